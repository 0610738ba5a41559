use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{info, warn};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const DEFAULT_FROM: &str = "onboarding@resend.dev";

/// Delivers verification codes through the Resend HTTP API.
///
/// Without an API key the mailer runs disabled: codes are logged instead of
/// delivered. That is the development default and what the test suites use.
pub struct Mailer {
    client: reqwest::Client,
    api_key: Option<String>,
    from: String,
}

impl Mailer {
    pub fn new(api_key: Option<String>, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            from,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_FROM.to_string())
    }

    /// Delivery failure is an error for the caller to surface — registration
    /// must not silently succeed with an undeliverable code.
    pub async fn send_verification_code(&self, email: &str, username: &str, code: &str) -> Result<()> {
        let Some(key) = &self.api_key else {
            info!("Mailer disabled; verification code for {} <{}>: {}", username, email, code);
            return Ok(());
        };

        let payload = verification_payload(&self.from, email, username, code);

        let resp = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await
            .context("verification email request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            warn!("Resend rejected verification email for {}: {} {}", email, status, detail);
            bail!("email provider returned {}", status);
        }

        info!("Verification email sent to {}", email);
        Ok(())
    }
}

fn verification_payload(from: &str, email: &str, username: &str, code: &str) -> serde_json::Value {
    json!({
        "from": from,
        "to": email,
        "subject": "Veil | Verification Code",
        "text": format!(
            "Hello {username},\n\nYour verification code is {code}. It expires in one hour.\n\nIf you did not request this, you can ignore this email."
        ),
        "html": format!(
            "<p>Hello {username},</p><p>Your verification code is <strong>{code}</strong>. It expires in one hour.</p><p>If you did not request this, you can ignore this email.</p>"
        ),
    })
}
