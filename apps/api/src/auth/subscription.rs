//! Subscription gating and the `subscription_status` state machine.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::broker::{SubscriptionStatus, SubscriptionTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    TrialExpired,
    PaymentRequired,
}

/// The billing columns of one `brokers` row.
#[derive(Debug, Clone, FromRow)]
pub struct BillingRow {
    pub team_id: Option<Uuid>,
    pub is_team_member: bool,
    pub subscription_tier: String,
    pub subscription_status: String,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

/// Current billing state a broker is gated on.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingState {
    pub team_id: Option<Uuid>,
    pub is_team_member: bool,
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl BillingState {
    /// Team members are billed through their admin: tier, status and trial
    /// come from the admin row when there is one. Team fields stay the
    /// broker's own.
    pub fn resolve(own: BillingRow, admin: Option<BillingRow>) -> BillingState {
        let billed = match admin {
            Some(admin) if own.is_team_member => admin,
            _ => own.clone(),
        };
        BillingState {
            team_id: own.team_id,
            is_team_member: own.is_team_member,
            tier: billed.subscription_tier.parse().unwrap_or_default(),
            status: billed
                .subscription_status
                .parse()
                .unwrap_or(SubscriptionStatus::Cancelled),
            trial_ends_at: billed.trial_ends_at,
        }
    }
}

/// Loads the billing state of `broker_id`, or `None` when the broker row is gone.
pub async fn load_billing(
    pool: &PgPool,
    broker_id: Uuid,
) -> Result<Option<BillingState>, sqlx::Error> {
    let own: Option<BillingRow> = sqlx::query_as(
        "SELECT team_id, is_team_member, subscription_tier, subscription_status, trial_ends_at
         FROM brokers WHERE id = $1",
    )
    .bind(broker_id)
    .fetch_optional(pool)
    .await?;
    let Some(own) = own else {
        return Ok(None);
    };

    let admin = match own.team_id.filter(|_| own.is_team_member) {
        Some(team_id) => {
            sqlx::query_as(
                "SELECT b.team_id, b.is_team_member, b.subscription_tier,
                        b.subscription_status, b.trial_ends_at
                 FROM teams t
                 JOIN brokers b ON b.id = t.admin_broker_id
                 WHERE t.id = $1",
            )
            .bind(team_id)
            .fetch_optional(pool)
            .await?
        }
        None => None,
    };

    Ok(Some(BillingState::resolve(own, admin)))
}

/// Decides whether a broker may use paid features at `now`.
pub fn check_access(billing: &BillingState, now: DateTime<Utc>) -> Access {
    match billing.status {
        SubscriptionStatus::Active => Access::Granted,
        SubscriptionStatus::Trial => match billing.trial_ends_at {
            Some(ends_at) if now > ends_at => Access::TrialExpired,
            _ => Access::Granted,
        },
        SubscriptionStatus::PastDue | SubscriptionStatus::Cancelled => Access::PaymentRequired,
    }
}

impl SubscriptionStatus {
    /// Next status after a Stripe event of `event_type`.
    ///
    /// `customer.subscription.updated` carries the Stripe subscription status,
    /// passed as `stripe_status`. Events that do not affect billing leave the
    /// status unchanged.
    pub fn after_event(self, event_type: &str, stripe_status: Option<&str>) -> SubscriptionStatus {
        match event_type {
            "checkout.session.completed"
            | "customer.subscription.created"
            | "invoice.payment_succeeded" => SubscriptionStatus::Active,
            "invoice.payment_failed" => SubscriptionStatus::PastDue,
            "customer.subscription.deleted" => SubscriptionStatus::Cancelled,
            "customer.subscription.updated" => stripe_status
                .and_then(SubscriptionStatus::from_stripe)
                .unwrap_or(self),
            _ => self,
        }
    }

    /// Maps a Stripe subscription `status` field.
    pub fn from_stripe(status: &str) -> Option<SubscriptionStatus> {
        match status {
            "trialing" => Some(SubscriptionStatus::Trial),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" | "unpaid" | "incomplete" => Some(SubscriptionStatus::PastDue),
            "canceled" | "incomplete_expired" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn row(status: &str, trial_ends_at: Option<DateTime<Utc>>) -> BillingRow {
        BillingRow {
            team_id: None,
            is_team_member: false,
            subscription_tier: "individual".to_string(),
            subscription_status: status.to_string(),
            trial_ends_at,
        }
    }

    fn member_row(team_id: Uuid) -> BillingRow {
        BillingRow {
            team_id: Some(team_id),
            is_team_member: true,
            ..row("trial", None)
        }
    }

    fn state(status: &str, trial_ends_at: Option<DateTime<Utc>>) -> BillingState {
        BillingState::resolve(row(status, trial_ends_at), None)
    }

    #[test]
    fn test_trial_within_window_is_granted() {
        let now = Utc::now();
        let billing = state("trial", Some(now + Duration::days(3)));
        assert_eq!(check_access(&billing, now), Access::Granted);
    }

    #[test]
    fn test_trial_past_end_is_expired() {
        let now = Utc::now();
        let billing = state("trial", Some(now - Duration::seconds(1)));
        assert_eq!(check_access(&billing, now), Access::TrialExpired);
    }

    #[test]
    fn test_unpaid_statuses_require_payment() {
        let now = Utc::now();
        for status in ["past_due", "cancelled", "garbage"] {
            assert_eq!(check_access(&state(status, None), now), Access::PaymentRequired);
        }
    }

    #[test]
    fn test_team_member_is_gated_on_admin_row() {
        let now = Utc::now();
        let team_id = Uuid::new_v4();

        let billing = BillingState::resolve(member_row(team_id), Some(row("cancelled", None)));
        assert_eq!(billing.team_id, Some(team_id));
        assert!(billing.is_team_member);
        assert_eq!(check_access(&billing, now), Access::PaymentRequired);

        let mut admin = row("active", None);
        admin.subscription_tier = "team".to_string();
        let billing = BillingState::resolve(member_row(team_id), Some(admin));
        assert_eq!(billing.tier, SubscriptionTier::Team);
        assert_eq!(check_access(&billing, now), Access::Granted);
    }

    #[test]
    fn test_admin_row_ignored_for_solo_broker() {
        let billing = BillingState::resolve(row("active", None), Some(row("cancelled", None)));
        assert_eq!(billing.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_state_machine_transitions() {
        use SubscriptionStatus::*;
        assert_eq!(Trial.after_event("checkout.session.completed", None), Active);
        assert_eq!(Active.after_event("invoice.payment_failed", None), PastDue);
        assert_eq!(PastDue.after_event("invoice.payment_succeeded", None), Active);
        assert_eq!(Active.after_event("customer.subscription.deleted", None), Cancelled);
        assert_eq!(
            Active.after_event("customer.subscription.updated", Some("past_due")),
            PastDue
        );
        assert_eq!(Trial.after_event("customer.updated", None), Trial);
        assert_eq!(
            Active.after_event("customer.subscription.updated", Some("paused")),
            Active
        );
    }
}
