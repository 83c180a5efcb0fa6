//! Environment-driven configuration

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable not set: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Process configuration, read once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// `SQLite` database path
    pub db_path: String,
    /// HTTP bind port
    pub port: u16,
    /// `OpenAI` API key
    pub openai_api_key: String,
    /// Chat model driving the coach
    pub model: String,
    /// Override for the chat-completions endpoint (tests, proxies)
    pub llm_base_url: Option<String>,
    /// Twilio account SID
    pub twilio_account_sid: String,
    /// Twilio auth token
    pub twilio_auth_token: String,
    /// `WhatsApp` sender number
    pub twilio_from_number: String,
    /// Default proof-submission flow reference
    pub whatsapp_flow_id: Option<String>,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("MOMENTUM_DB_PATH").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.momentum/momentum.db")
        });

        let port = match std::env::var("MOMENTUM_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("MOMENTUM_PORT", raw))?,
            Err(_) => 8000,
        };

        Ok(Self {
            db_path,
            port,
            openai_api_key: required("OPENAI_API_KEY")?,
            model: std::env::var("MOMENTUM_MODEL").unwrap_or_else(|_| "gpt-4.1".to_string()),
            llm_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            twilio_account_sid: required("TWILIO_ACCOUNT_SID")?,
            twilio_auth_token: required("TWILIO_AUTH_TOKEN")?,
            twilio_from_number: required("TWILIO_WHATSAPP_NUMBER")?,
            whatsapp_flow_id: std::env::var("WHATSAPP_FLOW_ID").ok(),
        })
    }
}
