//! Notification room management.
//!
//! Maps the configured identity to a server-side room and re-joins it after
//! every (re)connection. Rooms are never assumed to survive a reconnect.

use crate::message::OutboundMessage;
use crate::ws_write_handle::WsWriteHandle;
use orderlink_core::Identity;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Snapshot of the active room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRoom {
    /// `role:id` of the configured identity.
    pub room_key: String,
    /// Whether a join has been sent on the current session.
    pub joined: bool,
}

/// Result of a `join_room` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Already joined to this room on the current session; nothing sent.
    AlreadyJoined,
    /// Join frame queued on the live session.
    Joined,
    /// Not connected; the join is sent on the next connected signal.
    Queued,
}

#[derive(Debug, Default)]
struct RoomState {
    /// Identity whose room should be joined.
    identity: Option<Identity>,
    /// Join sent on the current session.
    joined: bool,
}

/// Subscription registry.
///
/// Every check-and-set of `joined` happens under one lock, so a join racing
/// with the connected signal produces exactly one join frame.
pub struct SubscriptionRegistry {
    state: Mutex<RoomState>,
    write: WsWriteHandle,
}

impl SubscriptionRegistry {
    /// Create a registry sending through `write`.
    pub fn new(write: WsWriteHandle) -> Self {
        Self {
            state: Mutex::new(RoomState::default()),
            write,
        }
    }

    /// Join the room for `identity`.
    ///
    /// Idempotent for the same identity. Switching identity leaves the old
    /// room first. While disconnected the intent is queued.
    pub async fn join_room(&self, identity: &Identity) -> JoinOutcome {
        let previous = {
            let mut state = self.state.lock();

            if state.joined && state.identity.as_ref() == Some(identity) {
                debug!(room = %identity.room_key(), "Already joined, skipping");
                return JoinOutcome::AlreadyJoined;
            }

            let previous = if state.joined {
                state.identity.take()
            } else {
                None
            };
            state.identity = Some(identity.clone());

            if !self.write.is_connected() {
                state.joined = false;
                info!(room = %identity.room_key(), "Not connected, join queued");
                return JoinOutcome::Queued;
            }

            state.joined = true;
            previous
        };

        if let Some(previous) = previous {
            info!(room = %previous.room_key(), "Leaving previous room");
            if let Err(e) = self.write.send(&OutboundMessage::leave_room(&previous)).await {
                warn!(%e, room = %previous.room_key(), "Failed to send leave-room");
            }
        }

        match self.write.send(&OutboundMessage::join_room(identity)).await {
            Ok(()) => {
                info!(room = %identity.room_key(), "Joined room");
                JoinOutcome::Joined
            }
            Err(e) => {
                warn!(%e, room = %identity.room_key(), "Join failed, will retry on connect");
                let mut state = self.state.lock();
                if state.identity.as_ref() == Some(identity) {
                    state.joined = false;
                }
                JoinOutcome::Queued
            }
        }
    }

    /// Leave the current room and forget the intent.
    pub async fn leave_room(&self) {
        let left = {
            let mut state = self.state.lock();
            let was_joined = std::mem::take(&mut state.joined);
            state.identity.take().filter(|_| was_joined)
        };

        if let Some(identity) = left {
            info!(room = %identity.room_key(), "Leaving room");
            if let Err(e) = self.write.send(&OutboundMessage::leave_room(&identity)).await {
                warn!(%e, "Failed to send leave-room");
            }
        }
    }

    /// Currently configured room, if any.
    pub fn active_room(&self) -> Option<ActiveRoom> {
        let state = self.state.lock();
        state.identity.as_ref().map(|identity| ActiveRoom {
            room_key: identity.room_key(),
            joined: state.joined,
        })
    }

    /// Connected signal: returns the join frame to send first on the new session.
    pub fn on_connected(&self) -> Option<String> {
        let mut state = self.state.lock();
        if state.joined {
            return None;
        }
        let identity = state.identity.as_ref()?;

        match OutboundMessage::join_room(identity).to_frame() {
            Ok(frame) => {
                info!(room = %identity.room_key(), "Re-joining room after connect");
                state.joined = true;
                Some(frame)
            }
            Err(e) => {
                warn!(?e, "Failed to encode join-room");
                None
            }
        }
    }

    /// Session ended: the server forgot our room membership.
    pub fn on_disconnected(&self) {
        self.state.lock().joined = false;
    }

    /// Forget the intent without sending anything (identity switch).
    pub fn clear_intent(&self) {
        let mut state = self.state.lock();
        state.identity = None;
        state.joined = false;
    }
}
