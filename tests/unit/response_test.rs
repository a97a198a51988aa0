//! Unit tests for result bundles and base64 helpers

use imagegen_relay::error::ValidationError;
use imagegen_relay::params::{ResolvedParameters, SourceImage};
use imagegen_relay::prompt::CanonicalPrompt;
use imagegen_relay::response::{base64, GenerationOutput, OutputMode};

fn params(strength: Option<f64>) -> ResolvedParameters {
    ResolvedParameters {
        seed: 3141,
        width: 832,
        height: 1216,
        steps: 28,
        scale: 5.0,
        sampler_key: "k_euler_a".to_string(),
        model: Some("nai-diffusion-3".to_string()),
        strength,
        noise: strength.map(|_| 0.2),
        source_image: None,
        enhance: false,
    }
}

fn prompt() -> CanonicalPrompt {
    CanonicalPrompt {
        positive_tags: vec!["cat".to_string(), "masterpiece".to_string()],
        negative_tags: vec!["lowres".to_string()],
        sanitized_echo: "cat".to_string(),
    }
}

#[test]
fn test_output_echoes_parameters() {
    let output = GenerationOutput::new("aW1n".to_string(), &params(None), &prompt(), 2, true);

    assert_eq!(output.seed, 3141);
    assert_eq!(output.sampler, "k_euler_a");
    assert_eq!(output.prompt, "cat, masterpiece");
    assert_eq!(output.negative_prompt, "lowres");
    assert_eq!(output.sanitized_prompt, "cat");
    assert_eq!(output.queue_depth, 2);
}

#[test]
fn test_serialized_output_omits_absent_fields() {
    let output = GenerationOutput::new("aW1n".to_string(), &params(None), &prompt(), 0, true);
    let value = serde_json::to_value(&output).unwrap();

    assert_eq!(value["image_base64"], "aW1n");
    assert!(value.get("strength").is_none());
    assert!(value.get("show_model").is_none());
    assert!(value["created"].is_string());
}

#[test]
fn test_verbose_summary_hides_model_for_free_backends() {
    let output = GenerationOutput::new("aW1n".to_string(), &params(Some(0.5)), &prompt(), 0, false);
    let lines = output.summary_lines(OutputMode::Verbose);

    assert!(!lines[0].contains("model ="));
    assert!(lines[0].contains("strength = 0.5"));
    assert!(lines[0].contains("noise = 0.2"));
}

#[test]
fn test_output_mode_parses_lowercase() {
    let mode: OutputMode = serde_json::from_str("\"minimal\"").unwrap();
    assert_eq!(mode, OutputMode::Minimal);
    assert_eq!(OutputMode::default(), OutputMode::Default);
}

#[test]
fn test_source_image_from_data_url() {
    let image = SourceImage::from_base64("data:image/gif;base64,R0lGODlhAQABAAAAACw=").unwrap();
    assert_eq!(&image.bytes[..6], b"GIF89a");
    assert!(image.data_url.starts_with("data:image/gif;base64,"));
}

#[test]
fn test_base64_rejects_garbage() {
    let err = base64::decode("not valid base64!!!").unwrap_err();
    assert!(matches!(err, ValidationError::UnreadableImage(_)));
    assert_eq!(err.key(), "download-error");
}

#[test]
fn test_create_data_url() {
    assert_eq!(base64::data_url("abc", "image/webp"), "data:image/webp;base64,abc");
}
