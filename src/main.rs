use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use planner_server::config::{generate_config_template, Config};
use planner_server::mail::LogMailer;
use planner_server::state::AppState;
use planner_server::weather::WeatherService;
use planner_server::ws::gateway::EventGateway;
use planner_server::ws::rooms::RoomRegistry;
use planner_server::{auth, db, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "planner_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "planner_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("planner-server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database and signing key
    let db = db::init_db(&config.data_dir)?;
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Channel runtime: room registry plus the fan-out gateway REST uses
    let rooms = Arc::new(RoomRegistry::new());
    let gateway = Arc::new(EventGateway::new(rooms.clone()));

    if config.weather_api_key.is_none() {
        tracing::warn!("No weather API key configured; task forecasts are disabled");
    }
    let weather = Arc::new(WeatherService::new(
        config.weather_base_url.clone(),
        config.weather_api_key.clone(),
    ));
    let mailer = Arc::new(LogMailer::new(config.mail_from.clone()));

    let state = AppState {
        db,
        jwt_secret,
        token_ttl_secs: config.token_ttl_secs,
        rooms,
        gateway: Some(gateway),
        weather,
        mailer,
    };

    let app = routes::build_router(state, &config.cors_origin);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
