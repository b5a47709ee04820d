//! Typed notification streams published by the three managers.
//!
//! Each manager owns a `tokio::sync::broadcast` sender and hands out
//! receivers through `subscribe()`. Delivery to a given subscriber follows
//! emission order; ordering across subscribers is unspecified. The core never
//! depends on anyone listening; sends to an empty channel are discarded.

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisResult;
use crate::session::Role;

/// Buffer depth per subscriber. A full 30-minute session emits roughly one
/// event per ticker period plus a handful of transitions, so this leaves
/// ample slack before a slow subscriber starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    Started { username: String, role: Role },
    Ended,
    Expiring,
    Expired,
    CurrentUserChanged { username: Option<String> },
    TimeRemainingChanged { seconds: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalibrationEvent {
    StatusChanged { calibrating: bool },
    StepChanged { step: Option<String> },
    ProgressChanged { percent: u8 },
    StepCompleted { step: String, success: bool },
    Completed { success: bool },
    Failed { reason: String },
    CalibratedChanged { calibrated: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisEvent {
    Started { sample_id: Option<String> },
    Completed { result: AnalysisResult },
    Error { reason: String },
}
