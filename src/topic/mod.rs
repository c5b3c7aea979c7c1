//! Topic filters
//!
//! Validation of mapping topic filters and matching of inbound publish
//! topics against them. The client receives one publish stream for all
//! subscriptions, so every publish is matched against each mapping's filter
//! to find the handlers it belongs to.

pub mod validation;

pub use validation::{parse_shared_subscription, topic_matches_filter, validate_topic_filter};
