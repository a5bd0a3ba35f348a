use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::models::broker::{BrokerRow, SubscriptionStatus, SubscriptionTier};

const ISSUER: &str = "om2chat";

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

/// Session payload, mapped from the broker row at login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub team_id: Option<Uuid>,
    pub is_team_member: bool,
    pub iss: String,
    pub iat: usize,
    pub exp: usize,
}

impl JwtService {
    pub fn from_config(config: &Config) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            expiry: Duration::hours(config.jwt_expiry_hours),
        }
    }

    pub fn expires_in_secs(&self) -> i64 {
        self.expiry.num_seconds()
    }

    pub fn generate_token(&self, broker: &BrokerRow) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: broker.id,
            email: broker.email.clone(),
            tier: broker.tier(),
            status: broker.status(),
            trial_ends_at: broker.trial_ends_at,
            team_id: broker.team_id,
            is_team_member: broker.is_team_member,
            iss: ISSUER.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + self.expiry).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::broker;
    use super::*;

    #[test]
    fn test_token_carries_broker_fields() {
        let service = JwtService::from_config(&Config::for_tests());
        let broker = broker("active", None);
        let token = service.generate_token(&broker).unwrap();
        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.sub, broker.id);
        assert_eq!(claims.email, broker.email);
        assert_eq!(claims.tier, SubscriptionTier::Individual);
        assert_eq!(claims.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let service = JwtService::from_config(&Config::for_tests());
        let mut other_config = Config::for_tests();
        other_config.jwt_secret = "another-secret".to_string();
        let other = JwtService::from_config(&other_config);

        let token = other.generate_token(&broker("active", None)).unwrap();
        assert!(service.verify_token(&token).is_err());
    }
}
