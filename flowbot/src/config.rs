use std::path::PathBuf;

use chrono::TimeDelta;
use clap::Parser;

pub const PREDEFINED_BOT_TOKEN_RELEASE: Option<&str> = option_env!("PREDEFINED_BOT_TOKEN_RELEASE");
pub const PREDEFINED_BOT_TOKEN_DEBUG: Option<&str> = option_env!("PREDEFINED_BOT_TOKEN_DEBUG");
pub const PREDEFINED_BOT_TOKEN: Option<&str> = if cfg!(debug_assertions) {
    PREDEFINED_BOT_TOKEN_DEBUG
} else {
    PREDEFINED_BOT_TOKEN_RELEASE
};

pub const API_TIMEOUT_SECONDS: u64 = 10;
pub const DB_MIN_CONNECTIONS: u32 = 1;
pub const DB_MAX_CONNECTIONS: u32 = 10;
pub const SESSION_PURGE_INTERVAL_SECONDS: u64 = 600;

const DEFAULT_API_PORT: u16 = 5000;

/// A Telegram bot that walks users through a YAML-defined conversation
#[derive(Parser, Debug)]
#[command(name = "flowbot")]
#[command(about = "A Telegram bot driven by a YAML conversation flow", long_about = None)]
pub struct Args {
    /// Flow definition file
    #[arg(long, env = "FLOW_FILE", default_value = "flows/survey.yaml")]
    pub flow: PathBuf,

    /// Environment variable name containing the bot token
    #[arg(long, default_value = "BOT_TOKEN")]
    pub bot_token_env: String,

    /// Postgres connection string; profiles stay in memory without it
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Base URL of the dashboard API receiving message logs
    #[arg(long, env = "API_BASE_URL")]
    pub api_base_url: Option<String>,

    #[arg(long, env = "REPLIT_DEV_DOMAIN")]
    pub replit_dev_domain: Option<String>,

    #[arg(long, env = "API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Dashboard project id; message logging to the API is off without it
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    /// Idle time after which a conversation state is forgotten
    #[arg(long, env = "SESSION_TTL_MINUTES", default_value_t = 1440)]
    pub session_ttl_minutes: i64,
}

impl Args {
    /// Get the bot token from the named environment variable or the predefined token
    pub fn get_token(&self) -> Result<String, String> {
        match std::env::var(&self.bot_token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => PREDEFINED_BOT_TOKEN.map(str::to_string).ok_or_else(|| {
                format!(
                    "Environment variable {} not found and no precompiled token available",
                    self.bot_token_env
                )
            }),
        }
    }

    /// Dashboard API base: explicit URL, then the Replit dev domain, then localhost
    pub fn resolve_api_base_url(&self) -> String {
        if let Some(url) = self.api_base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            url.trim_end_matches('/').to_string()
        } else if let Some(domain) = self
            .replit_dev_domain
            .as_deref()
            .filter(|d| !d.trim().is_empty())
        {
            format!("https://{}", domain)
        } else {
            format!("http://localhost:{}", self.api_port)
        }
    }

    pub fn session_ttl(&self) -> TimeDelta {
        TimeDelta::minutes(self.session_ttl_minutes.max(1))
    }
}
