use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Error)]
pub enum StripeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stripe API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

/// The subset of a Stripe subscription object the service reads.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            base_url: STRIPE_API_BASE.to_string(),
        }
    }

    /// Cancels a subscription immediately.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeError> {
        let response = self
            .client
            .delete(format!("{}/subscriptions/{subscription_id}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let subscription: StripeSubscription = parse(response).await?;
        info!("Cancelled Stripe subscription {}", subscription.id);
        Ok(subscription)
    }

    pub async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<StripeSubscription, StripeError> {
        let response = self
            .client
            .get(format!("{}/subscriptions/{subscription_id}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        parse(response).await
    }
}

async fn parse(response: reqwest::Response) -> Result<StripeSubscription, StripeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StripeError::Api {
        status: status.as_u16(),
        message: error_message(body),
    })
}

fn error_message(body: String) -> String {
    serde_json::from_str::<StripeErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}
