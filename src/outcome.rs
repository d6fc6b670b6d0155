//! Outcome vocabulary shared by handlers, adapters, and the controller.
//!
//! Three small enums describe every decision the engine makes:
//! `SetupResult` routes a node out of its setup handler, `DoneResult` is
//! what handlers and adapters report, and `DoneWith` is the terminal
//! outcome a done handler (or the controller) observes. Only the engine
//! can produce `DoneWith::Cancel`; handlers rewrite outcomes through
//! `DoneResult` alone.

use serde::{Deserialize, Serialize};

/// Terminal outcome of a node or of the whole tree.
///
/// Done handlers receive this value; `Cancel` always routes through the
/// error-side handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneWith {
    /// The node reached its success state.
    Success,
    /// The node reached its error state.
    Error,
    /// The node was cancelled before settling (by policy, timeout,
    /// or an external request).
    Cancel,
}

impl DoneWith {
    /// The result a done handler is assumed to return when absent.
    ///
    /// Cancel is error-side: without a handler rewriting it, a cancelled
    /// node propagates as an error.
    pub fn default_result(self) -> DoneResult {
        match self {
            DoneWith::Success => DoneResult::Success,
            DoneWith::Error | DoneWith::Cancel => DoneResult::Error,
        }
    }
}

impl std::fmt::Display for DoneWith {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DoneWith::Success => write!(f, "success"),
            DoneWith::Error => write!(f, "error"),
            DoneWith::Cancel => write!(f, "cancel"),
        }
    }
}

/// Result returned by done handlers, sync leaves, and task adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneResult {
    Success,
    Error,
}

impl From<DoneResult> for DoneWith {
    fn from(result: DoneResult) -> Self {
        match result {
            DoneResult::Success => DoneWith::Success,
            DoneResult::Error => DoneWith::Error,
        }
    }
}

impl std::fmt::Display for DoneResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DoneResult::Success => write!(f, "success"),
            DoneResult::Error => write!(f, "error"),
        }
    }
}

/// Result returned by setup handlers.
///
/// `Continue` lets the node run; the two `StopWith…` variants route the
/// node straight to the chosen terminal state without starting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupResult {
    Continue,
    StopWithSuccess,
    StopWithError,
}

/// Controls whether a task's done handler runs at all.
///
/// Cancellation counts as the error side: `OnError` fires for cancelled
/// tasks, `OnSuccess` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneFilter {
    /// Run the done handler for every outcome.
    Always,
    /// Run the done handler only on success.
    OnSuccess,
    /// Run the done handler on error or cancel.
    OnError,
}

impl DoneFilter {
    pub(crate) fn admits(self, with: DoneWith) -> bool {
        match self {
            DoneFilter::Always => true,
            DoneFilter::OnSuccess => with == DoneWith::Success,
            DoneFilter::OnError => with != DoneWith::Success,
        }
    }
}

impl Default for DoneFilter {
    fn default() -> Self {
        DoneFilter::Always
    }
}
