// Stripe subscription management: cancellation with data removal, and a
// pull-based status sync against the Stripe API.

pub mod handlers;
pub mod stripe;
