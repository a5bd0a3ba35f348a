//! Transactional email through the Resend HTTP API.

use anyhow::{bail, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Clone)]
pub struct Mailer {
    client: Client,
    api_key: Option<String>,
    from: String,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.resend_api_key.clone(),
            from: config.email_from.clone(),
        }
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let Some(api_key) = &self.api_key else {
            info!("RESEND_API_KEY not set; skipping email '{subject}'");
            return Ok(());
        };

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(api_key)
            .json(&ResendEmail {
                from: &self.from,
                to: [to],
                subject,
                html,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Resend returned {status}: {body}");
        }
        Ok(())
    }

    /// Sends on a background task; failures are logged only.
    pub fn send_in_background(&self, to: String, subject: String, html: String) {
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer.send(&to, &subject, &html).await {
                warn!("Failed to send email '{subject}': {e:#}");
            }
        });
    }
}
