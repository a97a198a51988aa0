//! Functional tests driving each backend family against a mock server

use std::io::Cursor;

use imagegen_relay::config::{BackendType, Settings};
use imagegen_relay::error::AppError;
use imagegen_relay::gateway::{GenerationRequest, Relay, UpscaleRequest};
use imagegen_relay::params::{GenerationOptions, SourceImage};
use imagegen_relay::response::base64;
use serde_json::Value;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(kind: BackendType, server: &MockServer) -> Settings {
    let mut settings = Settings::default();
    settings.backend.kind = kind;
    settings.backend.endpoint = Some(server.uri());
    settings.dispatch.poll_interval_ms = 10;
    settings.dispatch.poll_timeout_ms = 2000;
    settings
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        scope: "channel".to_string(),
        prompt: prompt.to_string(),
        options: GenerationOptions::default(),
        source_image: None,
    }
}

fn png(width: u32, height: u32) -> SourceImage {
    let mut bytes = Vec::new();
    image::DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    SourceImage::from_bytes(bytes)
}

async fn sent_json(server: &MockServer, request_path: &str) -> Value {
    let requests = server.received_requests().await.unwrap();
    let request = requests
        .iter()
        .find(|r| r.url.path() == request_path)
        .unwrap();
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn test_novelai_event_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ai/generate-image"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("event: newImage\nid: 1\ndata:aW1hZ2U=\n"))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(BackendType::Token, &server);
    settings.backend.token = Some("secret".to_string());
    settings.backend.smea = true;
    let relay = Relay::new(settings).unwrap();

    let mut req = request("Cat, (smile)");
    req.options.seed = Some(42);
    let output = relay.generate(req).await.unwrap();
    assert_eq!(output.image_base64, "aW1hZ2U=");
    assert_eq!(output.model.as_deref(), Some("nai-diffusion-3"));

    let body = sent_json(&server, "/ai/generate-image").await;
    assert_eq!(body["model"], "nai-diffusion-3");
    assert_eq!(body["action"], "generate");
    assert!(body["input"].as_str().unwrap().starts_with("cat, {smile}"));
    assert_eq!(body["parameters"]["seed"], 42);
    assert_eq!(body["parameters"]["width"], 832);
    assert_eq!(body["parameters"]["height"], 1216);
    assert_eq!(body["parameters"]["sm"], true);
    assert_eq!(body["parameters"]["sampler"], "k_euler");
    assert!(body["parameters"].get("image").is_none());
}

#[tokio::test]
async fn test_novelai_login_then_generate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/user/login"))
        .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"accessToken":"session"}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ai/generate-image"))
        .and(header("authorization", "Bearer session"))
        .respond_with(ResponseTemplate::new(200).set_body_string("event: newImage\nid: 1\ndata:aW1n\n"))
        .expect(2)
        .mount(&server)
        .await;

    let mut settings = settings(BackendType::Login, &server);
    settings.backend.access_key = Some("derived-key".to_string());
    settings.backend.api_endpoint = server.uri();
    let relay = Relay::new(settings).unwrap();

    relay.generate(request("cat")).await.unwrap();
    relay.generate(request("dog")).await.unwrap();

    let login = sent_json(&server, "/user/login").await;
    assert_eq!(login["key"], "derived-key");
}

#[tokio::test]
async fn test_failed_login_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/user/login"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/user/login"))
        .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"accessToken":"session"}"#))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ai/generate-image"))
        .respond_with(ResponseTemplate::new(200).set_body_string("event: newImage\nid: 1\ndata:aW1n\n"))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(BackendType::Login, &server);
    settings.backend.access_key = Some("derived-key".to_string());
    settings.backend.api_endpoint = server.uri();
    let relay = Relay::new(settings).unwrap();

    let err = relay.generate(request("cat")).await.unwrap_err();
    assert!(matches!(err, AppError::Credential(_)));
    assert_eq!(relay.gate().in_flight(), 0);

    relay.generate(request("cat")).await.unwrap();
}

#[tokio::test]
async fn test_novelai_image_to_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ai/generate-image"))
        .respond_with(ResponseTemplate::new(200).set_body_string("event: newImage\nid: 1\ndata:aW1n\n"))
        .mount(&server)
        .await;

    let mut settings = settings(BackendType::Token, &server);
    settings.backend.token = Some("secret".to_string());
    let relay = Relay::new(settings).unwrap();

    let mut req = request("cat");
    let source = png(512, 768);
    req.source_image = Some(source.clone());
    let output = relay.generate(req).await.unwrap();
    assert_eq!(output.strength, Some(0.7));

    let body = sent_json(&server, "/ai/generate-image").await;
    assert_eq!(body["action"], "img2img");
    assert_eq!(body["parameters"]["image"], source.base64);
    assert_eq!(body["parameters"]["width"], 512);
    assert_eq!(body["parameters"]["height"], 768);
    assert_eq!(body["parameters"]["steps"], 50);
}

#[tokio::test]
async fn test_naifu_flattened_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_string("event: newImage\nid: 1\ndata:aW1n\n"))
        .expect(1)
        .mount(&server)
        .await;

    let relay = Relay::new(settings(BackendType::Naifu, &server)).unwrap();
    let output = relay.generate(request("cat")).await.unwrap();
    assert_eq!(output.image_base64, "aW1n");
    assert_eq!(output.model, None);

    let body = sent_json(&server, "/generate-stream").await;
    assert!(body["prompt"].as_str().unwrap().starts_with("cat"));
    assert_eq!(body["n_samples"], 1);
    assert!(body.get("parameters").is_none());
    assert!(body.get("sm").is_none());
}

#[tokio::test]
async fn test_webui_text_to_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"images":["data:image/png;base64,aW1n"]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(BackendType::SdWebui, &server);
    settings.backend.sampler = Some("k_euler_a".to_string());
    settings.backend.scheduler = Some("Karras".to_string());
    settings.backend.hires_fix = true;
    let relay = Relay::new(settings).unwrap();

    let mut req = request("{red eyes}");
    req.options.resolution = Some("833x1217".to_string());
    let output = relay.generate(req).await.unwrap();
    assert_eq!(output.image_base64, "aW1n");
    assert_eq!(output.sampler, "k_euler_a");

    let body = sent_json(&server, "/sdapi/v1/txt2img").await;
    assert!(body["prompt"].as_str().unwrap().starts_with("(red eyes)"));
    assert_eq!(body["sampler_index"], "Euler a");
    assert_eq!(body["scheduler"], "Karras");
    assert_eq!(body["cfg_scale"], 5.0);
    assert_eq!(body["width"], 832);
    assert_eq!(body["height"], 1216);
    assert_eq!(body["batch_size"], 1);
    assert_eq!(body["enable_hr"], true);
    assert!(body.get("denoising_strength").is_none());
}

#[tokio::test]
async fn test_webui_image_to_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/img2img"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"images":["aW1n"]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let relay = Relay::new(settings(BackendType::SdWebui, &server)).unwrap();
    let mut req = request("cat");
    req.source_image = Some(png(700, 500));
    req.options.strength = Some(0.4);
    relay.generate(req).await.unwrap();

    let body = sent_json(&server, "/sdapi/v1/img2img").await;
    assert!(body["init_images"][0]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    assert_eq!(body["denoising_strength"], 0.4);
    assert_eq!(body["width"], 720);
    assert_eq!(body["height"], 512);
    assert!(body.get("enable_hr").is_none());
}

#[tokio::test]
async fn test_webui_empty_image_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"images":[]}"#))
        .mount(&server)
        .await;

    let relay = Relay::new(settings(BackendType::SdWebui, &server)).unwrap();
    let err = relay.generate(request("cat")).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyResponse));
    assert_eq!(err.key(), "empty-response");
}

#[tokio::test]
async fn test_webui_upscale() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/extra-single-image"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"image":"data:image/png;base64,dXA="}"#))
        .expect(1)
        .mount(&server)
        .await;

    let relay = Relay::new(settings(BackendType::SdWebui, &server)).unwrap();
    let output = relay
        .upscale(UpscaleRequest {
            scope: "channel".to_string(),
            source_image: png(64, 64),
            scale: None,
            resolution: None,
            upscaler: None,
            upscaler2: Some("ESRGAN_4x".to_string()),
            upscaler2_visibility: Some(0.5),
            upscale_first: false,
        })
        .await
        .unwrap();
    assert_eq!(output.image_base64, "dXA=");
    assert_eq!(output.upscaler, "Lanczos");

    let body = sent_json(&server, "/sdapi/v1/extra-single-image").await;
    assert_eq!(body["resize_mode"], 0);
    assert_eq!(body["upscaling_resize"], 2.0);
    assert_eq!(body["upscaler_2"], "ESRGAN_4x");
    assert_eq!(body["extras_upscaler_2_visibility"], 0.5);
}

#[tokio::test]
async fn test_upscale_secondary_visibility_defaults_to_full() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/extra-single-image"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"image":"dXA="}"#))
        .mount(&server)
        .await;

    let relay = Relay::new(settings(BackendType::SdWebui, &server)).unwrap();
    relay
        .upscale(UpscaleRequest {
            scope: "channel".to_string(),
            source_image: png(64, 64),
            scale: None,
            resolution: None,
            upscaler: Some("R-ESRGAN 2x+".to_string()),
            upscaler2: Some("R-ESRGAN AnimeVideo".to_string()),
            upscaler2_visibility: None,
            upscale_first: false,
        })
        .await
        .unwrap();

    let body = sent_json(&server, "/sdapi/v1/extra-single-image").await;
    assert_eq!(body["upscaler_1"], "R-ESRGAN 2x+");
    assert_eq!(body["extras_upscaler_2_visibility"], 1.0);
}

#[tokio::test]
async fn test_upscale_needs_webui() {
    let server = MockServer::start().await;
    let relay = Relay::new(settings(BackendType::Naifu, &server)).unwrap();
    let err = relay
        .upscale(UpscaleRequest {
            scope: "channel".to_string(),
            source_image: png(64, 64),
            scale: None,
            resolution: Some("1024x1024".to_string()),
            upscaler: None,
            upscaler2: None,
            upscaler2_visibility: None,
            upscale_first: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.key(), "feature-disabled");
}

#[tokio::test]
async fn test_horde_submit_and_poll() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/generate/async"))
        .and(header("apikey", "0000000000"))
        .respond_with(ResponseTemplate::new(202).set_body_string(r#"{"id":"job-1"}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/generate/check/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"done":false,"queue_position":3,"wait_time":5}"#))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/generate/check/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"done":true}"#))
        .mount(&server)
        .await;
    let stored = format!("{}/r2/job-1.webp", server.uri());
    Mock::given(method("GET"))
        .and(path("/api/v2/generate/status/job-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(r#"{{"generations":[{{"img":"{}"}}]}}"#, stored)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r2/job-1.webp"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"webp-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let relay = Relay::new(settings(BackendType::StableHorde, &server)).unwrap();
    let mut req = request("cat -u lowres");
    req.options.seed = Some(7);
    let output = relay.generate(req).await.unwrap();
    assert_eq!(output.image_base64, base64::encode(b"webp-bytes"));

    let body = sent_json(&server, "/api/v2/generate/async").await;
    let prompt = body["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("cat"));
    assert!(prompt.contains(" ### lowres"));
    assert_eq!(body["params"]["seed"], "7");
    assert_eq!(body["nsfw"], true);
}

#[tokio::test]
async fn test_horde_faulted_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/generate/async"))
        .respond_with(ResponseTemplate::new(202).set_body_string(r#"{"id":"job-2"}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/generate/check/job-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"done":false,"faulted":true}"#))
        .mount(&server)
        .await;

    let relay = Relay::new(settings(BackendType::StableHorde, &server)).unwrap();
    let err = relay.generate(request("cat")).await.unwrap_err();
    assert!(matches!(err, AppError::Backend(_)));
    assert_eq!(relay.gate().in_flight(), 0);
}

#[tokio::test]
async fn test_comfyui_text_workflow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"prompt_id":"p-1","number":0}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"p-1":{"outputs":{
                "12":{"images":[{"filename":"preview.png","subfolder":"","type":"temp"}]},
                "9":{"images":[{"filename":"relay_00001_.png","subfolder":"","type":"output"}]}
            },"status":{"status_str":"success"}}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/view"))
        .and(query_param("filename", "relay_00001_.png"))
        .and(query_param("type", "output"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(BackendType::Comfyui, &server);
    settings.backend.model = Some("sdxl.safetensors".to_string());
    settings.backend.sampler = Some("dpmpp_2m".to_string());
    let relay = Relay::new(settings).unwrap();

    let mut req = request("cat");
    req.options.seed = Some(5);
    let output = relay.generate(req).await.unwrap();
    assert_eq!(output.image_base64, base64::encode(b"png-bytes"));

    let body = sent_json(&server, "/prompt").await;
    let graph = &body["prompt"];
    assert_eq!(graph["3"]["inputs"]["seed"], 5);
    assert_eq!(graph["3"]["inputs"]["sampler_name"], "dpmpp_2m");
    assert_eq!(graph["4"]["inputs"]["ckpt_name"], "sdxl.safetensors");
    assert_eq!(graph["5"]["inputs"]["width"], 832);
    assert!(graph["6"]["inputs"]["text"].as_str().unwrap().starts_with("cat"));
    assert!(body["client_id"].is_string());
}

#[tokio::test]
async fn test_comfyui_finished_without_output_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"prompt_id":"p-9","number":0}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/p-9"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"p-9":{"outputs":{},"status":{"status_str":"success"}}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(BackendType::Comfyui, &server);
    settings.backend.model = Some("sdxl.safetensors".to_string());
    let relay = Relay::new(settings).unwrap();

    let err = relay.generate(request("cat")).await.unwrap_err();
    assert!(matches!(err, AppError::EmptyResponse));
    assert_eq!(err.key(), "empty-response");
    assert_eq!(relay.gate().in_flight(), 0);
}

#[tokio::test]
async fn test_comfyui_uploads_source_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/image"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"ignored.png"}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"prompt_id":"p-2"}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/p-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"p-2":{"outputs":{"9":{"images":[{"filename":"out.png","subfolder":"","type":"output"}]}}}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/view"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
        .mount(&server)
        .await;

    let mut settings = settings(BackendType::Comfyui, &server);
    settings.backend.model = Some("sdxl.safetensors".to_string());
    let relay = Relay::new(settings).unwrap();

    let mut req = request("cat");
    req.source_image = Some(png(512, 512));
    relay.generate(req).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let upload = requests.iter().find(|r| r.url.path() == "/upload/image").unwrap();
    let multipart = String::from_utf8_lossy(&upload.body);
    assert!(multipart.contains("name=\"image\""));
    assert!(multipart.contains("filename=\"relay-"));

    let body = sent_json(&server, "/prompt").await;
    let image_name = body["prompt"]["10"]["inputs"]["image"].as_str().unwrap();
    assert!(image_name.starts_with("relay-"));
    assert!(multipart.contains(image_name));
    assert_eq!(body["prompt"]["3"]["inputs"]["denoise"], 0.7);
}
