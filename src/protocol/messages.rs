//! Protocol message definitions
//!
//! All message types for coordinator-worker communication.
//! Messages are serialized as JSON with a `type` discriminator.

use serde::{Deserialize, Serialize};

use crate::params::ParameterSet;

// ─────────────────────────────────────────────────────────────────
// Message Types (Discriminated Union)
// ─────────────────────────────────────────────────────────────────

/// All protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // ─── Coordinator → Worker ───────────────────────────────────
    /// Train locally starting from the given parameters
    Fit(FitInstruction),

    // ─── Worker → Coordinator ───────────────────────────────────
    /// Locally updated parameters
    #[serde(rename = "fit_res")]
    FitResult(FitResult),
}

impl Message {
    /// Get the message type name as it appears on the wire
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Fit(_) => "fit",
            Message::FitResult(_) => "fit_res",
        }
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a raw frame without failing
    ///
    /// Anything that is not valid JSON or not one of the known message types
    /// comes back as [`Incoming::Unrecognized`], keeping the `type` tag when
    /// the frame had one.
    pub fn decode(bytes: &[u8]) -> Incoming {
        match serde_json::from_slice::<Message>(bytes) {
            Ok(message) => Incoming::Known(message),
            Err(e) => {
                let type_name = serde_json::from_slice::<serde_json::Value>(bytes)
                    .ok()
                    .and_then(|v| v.get("type")?.as_str().map(str::to_string));
                Incoming::Unrecognized {
                    type_name,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Result of decoding one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Known(Message),
    Unrecognized {
        /// The frame's `type` tag, if it was a JSON object with one
        type_name: Option<String>,
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────
// Fit Messages
// ─────────────────────────────────────────────────────────────────

/// Per-round training configuration sent to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Local epochs to train before replying
    pub epochs: u32,
}

/// Broadcast of the current global parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitInstruction {
    /// Global parameters; empty on the first round of a session
    pub parameters: ParameterSet,

    pub config: FitConfig,
}

/// A worker's parameters after local training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub parameters: ParameterSet,
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
