pub mod handlers;
pub mod jwt;
pub mod password;
pub mod reset;
pub mod subscription;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::auth::jwt::Claims;
use crate::auth::subscription::{check_access, load_billing, Access, BillingState};
use crate::errors::AppError;
use crate::state::AppState;

/// A broker authenticated by a Bearer session token.
#[derive(Debug, Clone)]
pub struct AuthBroker(pub Claims);

/// An authenticated broker whose trial or subscription currently allows paid
/// features. Rejects with 402 otherwise.
///
/// Billing is read from the database on every request; the tier, status and
/// team fields of the wrapped claims are replaced with the stored values.
#[derive(Debug, Clone)]
pub struct ActiveBroker(pub Claims);

impl ActiveBroker {
    /// Gates already verified claims on the broker's stored billing state.
    pub async fn authorize(state: &AppState, claims: Claims) -> Result<Self, AppError> {
        let billing = load_billing(&state.db, claims.sub).await?;
        gate(claims, billing, Utc::now()).map(ActiveBroker)
    }
}

fn gate(
    mut claims: Claims,
    billing: Option<BillingState>,
    now: DateTime<Utc>,
) -> Result<Claims, AppError> {
    let Some(billing) = billing else {
        debug!("Session for missing broker {}", claims.sub);
        return Err(AppError::Unauthorized);
    };

    match check_access(&billing, now) {
        Access::Granted => {}
        Access::TrialExpired => {
            return Err(AppError::PaymentRequired(
                "Your free trial has ended. Choose a plan to continue.".to_string(),
            ))
        }
        Access::PaymentRequired => {
            return Err(AppError::PaymentRequired(
                "An active subscription is required.".to_string(),
            ))
        }
    }

    claims.tier = billing.tier;
    claims.status = billing.status;
    claims.trial_ends_at = billing.trial_ends_at;
    claims.team_id = billing.team_id;
    claims.is_team_member = billing.is_team_member;
    Ok(claims)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthBroker {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let claims = state.jwt.verify_token(token).map_err(|e| {
            debug!("Rejected session token: {e}");
            AppError::Unauthorized
        })?;
        Ok(AuthBroker(claims))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ActiveBroker {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthBroker(claims) = AuthBroker::from_request_parts(parts, state).await?;
        ActiveBroker::authorize(state, claims).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::models::broker::{SubscriptionStatus, SubscriptionTier};

    fn claims() -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            email: "b@example.com".to_string(),
            tier: SubscriptionTier::Individual,
            status: SubscriptionStatus::Active,
            trial_ends_at: None,
            team_id: None,
            is_team_member: false,
            iss: "om2chat".to_string(),
            iat: 0,
            exp: 0,
        }
    }

    fn billing(status: SubscriptionStatus, trial_ends_at: Option<DateTime<Utc>>) -> BillingState {
        BillingState {
            team_id: None,
            is_team_member: false,
            tier: SubscriptionTier::FreeTrial,
            status,
            trial_ends_at,
        }
    }

    #[test]
    fn test_gate_uses_stored_status_over_token() {
        let now = Utc::now();
        let stored = billing(SubscriptionStatus::Cancelled, None);
        let err = gate(claims(), Some(stored), now).unwrap_err();
        assert!(matches!(err, AppError::PaymentRequired(_)));

        let expired = billing(SubscriptionStatus::Trial, Some(now - Duration::days(1)));
        let err = gate(claims(), Some(expired), now).unwrap_err();
        assert!(matches!(err, AppError::PaymentRequired(msg) if msg.contains("trial")));
    }

    #[test]
    fn test_gate_refreshes_claims_from_stored_row() {
        let now = Utc::now();
        let team_id = Uuid::new_v4();
        let mut stored = billing(SubscriptionStatus::Trial, Some(now + Duration::days(2)));
        stored.team_id = Some(team_id);
        stored.is_team_member = true;
        stored.tier = SubscriptionTier::Team;

        let refreshed = gate(claims(), Some(stored), now).unwrap();
        assert_eq!(refreshed.tier, SubscriptionTier::Team);
        assert_eq!(refreshed.status, SubscriptionStatus::Trial);
        assert_eq!(refreshed.team_id, Some(team_id));
        assert!(refreshed.is_team_member);
    }

    #[test]
    fn test_gate_rejects_missing_broker() {
        let err = gate(claims(), None, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }
}
