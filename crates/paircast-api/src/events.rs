//! Event types published by the API layer.
//!
//! Two channels exist: [`ApiEvent`] carries auth-layer signals out of the
//! token provider, [`HubEvent`] carries connection lifecycle changes out
//! of the hub connection. Both are fanned out over
//! [`tokio::sync::broadcast`] so any number of consumers can watch.

use serde::{Deserialize, Serialize};

/// How loudly a notification should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-facing message with a severity.
///
/// The host application decides how to render these (toast, chat line,
/// log entry). The library never writes to any UI itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Signals published by the token provider.
#[derive(Debug, Clone)]
pub enum ApiEvent {
    /// A user-facing message (auth failures, clock problems).
    Notice(Notification),
    /// The server invalidated our credential. Consumers holding open
    /// sessions should tear them down.
    AuthRevoked,
}

/// Connection lifecycle events published by the hub connection.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// The transport dropped; the retry policy is driving reconnection.
    Reconnecting { reason: String },
    /// A reconnection attempt succeeded; the session is live again.
    Reconnected,
    /// The connection is closed for good. No further attempts follow.
    Closed { reason: String },
}
