use duet_engine::MemoryRemote;
use duet_relay::{app, config::Config, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "duet_relay=debug,duet_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Duet Relay on {}", config.addr());

    let state = AppState::new(MemoryRemote::new());

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    tracing::info!("Relay listening on {}", config.addr());

    axum::serve(listener, app(state)).await?;

    Ok(())
}
