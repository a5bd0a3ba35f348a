//! Tokenized public links: broker-side link management and the
//! unauthenticated client surface (link landing, email capture, chat).

pub mod chat;
pub mod links;
pub mod sessions;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of link and session tokens.
pub const TOKEN_LENGTH: usize = 32;

/// A random URL-safe token.
pub fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
