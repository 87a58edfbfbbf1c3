//! Command outcome types.
//!
//! Every command resolves to exactly one `CommandOutcome`. `TimedOut` means
//! "unconfirmed": the server may or may not have acted on it.

use crate::order::{Cancellation, OrderId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of user-initiated command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Cancel,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Why a command was refused client-side. Rejected commands never reach the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// A command with the same correlation key is still in flight.
    AlreadyPending,
    /// No live channel session to send on.
    NotConnected,
    /// The cached order is past the point where it can be cancelled.
    NotCancellable { status: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPending => write!(f, "already pending"),
            Self::NotConnected => write!(f, "not connected"),
            Self::NotCancellable { status } => write!(f, "not cancellable in status {status}"),
        }
    }
}

/// Terminal outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The server acknowledged the command.
    Acked {
        order_id: OrderId,
        cancellation: Cancellation,
    },
    /// No acknowledgment before the deadline or the session ended first.
    TimedOut { order_id: OrderId },
    /// Refused before sending.
    Rejected {
        order_id: OrderId,
        reason: RejectReason,
    },
}

impl CommandOutcome {
    pub fn order_id(&self) -> &OrderId {
        match self {
            Self::Acked { order_id, .. }
            | Self::TimedOut { order_id }
            | Self::Rejected { order_id, .. } => order_id,
        }
    }

    pub fn is_acked(&self) -> bool {
        matches!(self, Self::Acked { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Acked { .. } => "acked",
            Self::TimedOut { .. } => "timed_out",
            Self::Rejected { .. } => "rejected",
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acked { order_id, .. } => write!(f, "{order_id}: confirmed"),
            Self::TimedOut { order_id } => write!(f, "{order_id}: unconfirmed"),
            Self::Rejected { order_id, reason } => write!(f, "{order_id}: rejected ({reason})"),
        }
    }
}
