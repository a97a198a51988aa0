//! Main entry point for the image generation relay

use imagegen_relay::{api, config::Settings, gateway::Relay, AppState};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("Starting image generation relay");
    settings.validate()?;
    info!(
        "Loaded configuration: server={}:{} backend={:?}",
        settings.server.host, settings.server.port, settings.backend.kind
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let app_state = Arc::new(AppState {
        relay: Relay::new(settings)?,
    });

    #[cfg(unix)]
    spawn_reload_listener(app_state.clone())?;

    let app = api::create_router(app_state);

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Reload configuration on SIGHUP
#[cfg(unix)]
fn spawn_reload_listener(state: Arc<AppState>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::warn;

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            let reloaded = Settings::load().and_then(|settings| {
                settings.validate()?;
                state.relay.reload(settings)
            });
            if let Err(e) = reloaded {
                warn!(error = %e, "Configuration reload failed, keeping previous settings");
            }
        }
    });
    Ok(())
}
