pub mod analytics;
pub mod broker;
pub mod chat;
pub mod document;
pub mod public_link;
