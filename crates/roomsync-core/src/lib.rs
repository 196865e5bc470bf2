//! Room state synchronization core shared by the runtime and presentation layers.
//!
//! This crate folds typed event deltas from initial and incremental syncs into
//! per-room state, and defines the command/event protocol, lifecycle model and
//! error types used by the runtime that drives it. It performs no I/O and has
//! no async dependencies.

/// Single-flight backward pagination.
pub mod backfill;
/// Typing and read-receipt state.
pub mod ephemeral;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Typed room events.
pub mod event;
/// Joined/left member index keyed by display name.
pub mod membership;
/// Room display name computation.
pub mod naming;
/// Room aggregate and reducer.
pub mod room;
/// Runtime lifecycle state machine.
pub mod state_machine;
/// Ordered, deduplicated room timeline.
pub mod timeline;
/// Protocol types (commands, events, notifications, sync payloads).
pub mod types;
/// Long-lived user entities.
pub mod users;

pub use backfill::{BackfillChunk, BackfillCoordinator, BackfillRequest, BackfillState};
pub use ephemeral::EphemeralState;
pub use error::{SyncError, SyncErrorCategory, classify_http_status};
pub use event::{
    EventKind, EventReceipts, MemberContent, Membership, MessageContent, MessageType, RoomEvent,
};
pub use membership::{MembershipChange, MembershipIndex};
pub use naming::{NamingInputs, compute_display_name};
pub use room::Room;
pub use state_machine::RuntimeStateMachine;
pub use timeline::{TimelineBuffer, TimelineInsert};
pub use types::{
    InitialRoomSnapshot, JoinState, RoomNotification, RoomSummary, RuntimeCommand,
    RuntimeConfig, RuntimeEvent, RuntimeLifecycleState, SyncRoomUpdate,
};
pub use users::{Member, UserDirectory, UserRegistry};
