use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Task-planning server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "planner-server", version, about = "Task-planning server with real-time sync")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PLANNER_PORT", default_value = "5050")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PLANNER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./planner.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PLANNER_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "PLANNER_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Allowed CORS origin for the frontend ("*" allows any)
    #[arg(long, env = "PLANNER_CORS_ORIGIN", default_value = "*")]
    pub cors_origin: String,

    /// Access token lifetime in seconds
    #[arg(long, env = "PLANNER_TOKEN_TTL_SECS", default_value = "86400")]
    pub token_ttl_secs: i64,

    /// OpenWeatherMap API key; forecast enrichment is skipped when unset
    #[arg(long, env = "PLANNER_WEATHER_API_KEY")]
    pub weather_api_key: Option<String>,

    /// Base URL of the weather API (overridable for testing)
    #[arg(
        long,
        env = "PLANNER_WEATHER_BASE_URL",
        default_value = "https://api.openweathermap.org/data/2.5"
    )]
    pub weather_base_url: String,

    /// From address used for outbound mail
    #[arg(long, env = "PLANNER_MAIL_FROM", default_value = "no-reply@planner.local")]
    pub mail_from: String,
}

impl Config {
    /// Load config with layered precedence: defaults < TOML < env < CLI.
    /// clap resolves defaults, env vars and CLI flags; the TOML file fills
    /// anything the command line left at its default.
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Self::parse();
        Figment::from(Serialized::defaults(&cli))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("PLANNER_"))
            .extract()
    }
}

/// Commented TOML template printed by `--generate-config`.
pub fn generate_config_template() -> String {
    r#"# planner-server configuration
# Values here are overridden by PLANNER_* environment variables and CLI flags.

# Port to listen on
port = 5050

# Bind address
bind_address = "0.0.0.0"

# Enable structured JSON logging
json_logs = false

# Data directory for the SQLite database and JWT signing key
data_dir = "./data"

# Allowed CORS origin for the frontend ("*" allows any)
cors_origin = "*"

# Access token lifetime in seconds (default: 24 hours)
token_ttl_secs = 86400

# OpenWeatherMap API key; task forecasts are skipped when unset
# weather_api_key = ""

# Base URL of the weather API
weather_base_url = "https://api.openweathermap.org/data/2.5"

# From address used for outbound mail
mail_from = "no-reply@planner.local"
"#
    .to_string()
}
