use std::path::PathBuf;

use anyhow::bail;
use tracing::warn;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub resend_api_key: Option<String>,
    pub mail_from: String,
    pub openrouter_api_key: Option<String>,
    pub suggest_model: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("VEIL_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("VEIL_JWT_SECRET is unset or still a placeholder; set it in your .env");
        }

        let host = std::env::var("VEIL_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("VEIL_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()?;
        let db_path: PathBuf = std::env::var("VEIL_DB_PATH")
            .unwrap_or_else(|_| "veil.db".into())
            .into();

        let resend_api_key = optional_var("RESEND_API_KEY");
        if resend_api_key.is_none() {
            warn!("RESEND_API_KEY unset; verification codes will be logged, not emailed");
        }
        let mail_from =
            std::env::var("VEIL_MAIL_FROM").unwrap_or_else(|_| "onboarding@resend.dev".into());

        let openrouter_api_key = optional_var("OPENROUTER_API_KEY");
        if openrouter_api_key.is_none() {
            warn!("OPENROUTER_API_KEY unset; message suggestions will be unavailable");
        }
        let suggest_model = optional_var("VEIL_SUGGEST_MODEL");

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            resend_api_key,
            mail_from,
            openrouter_api_key,
            suggest_model,
        })
    }
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
