//! Publishing to the broker
//!
//! `PublishClient` wraps a broker producer; `PublishAction` turns a control
//! request into a timed publish and records the outcome.

pub mod action;
pub mod client;

pub use action::PublishAction;
pub use client::{ClientOptions, PublishClient, RetryPolicy};

use serde::{Deserialize, Serialize};

/// How a control request publishes its message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// Wait for the broker acknowledgement of this message
    #[default]
    Sync,
    /// Queue the message, then flush all queued messages
    Async,
}

impl std::str::FromStr for SendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(SendMode::Sync),
            "async" => Ok(SendMode::Async),
            other => Err(format!("unknown send mode: {}", other)),
        }
    }
}
