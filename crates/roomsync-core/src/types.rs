use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{backfill::BackfillState, event::RoomEvent};

/// Lifecycle of the runtime that owns the rooms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuntimeLifecycleState {
    /// No initial sync has completed yet.
    Cold,
    /// The initial sync job is running.
    InitialSyncing,
    /// Rooms are populated and accept incremental syncs and backfills.
    Ready,
}

/// The local user's relation to a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum JoinState {
    Invited,
    #[default]
    Joined,
    Left,
}

/// Change notification raised by the room reducer.
///
/// Notifications are returned in the order the underlying changes were
/// detected within a single reducer call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomNotification {
    DisplayNameChanged { old: String, new: String },
    MemberAdded { user_id: String },
    MemberRemoved { user_id: String },
    MemberRenamed {
        user_id: String,
        old_name: String,
        new_name: String,
    },
    TypingChanged { user_ids: Vec<String> },
    TopicChanged { topic: String },
    AliasesChanged { aliases: Vec<String> },
    JoinStateChanged { old: JoinState, new: JoinState },
    HighlightCountChanged { count: u64 },
    NotificationCountChanged { count: u64 },
    NewMessage { event: RoomEvent },
}

/// One room's slice of an incremental sync response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncRoomUpdate {
    pub join_state: JoinState,
    /// Backfill cursor for history before this batch; adopted only once.
    pub prev_batch: Option<String>,
    pub state: Vec<RoomEvent>,
    pub timeline: Vec<RoomEvent>,
    pub ephemeral: Vec<RoomEvent>,
    pub highlight_count: u64,
    pub notification_count: u64,
}

/// One room's slice of the initial sync snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InitialRoomSnapshot {
    /// State entries; `None` marks an entry the parser could not type.
    pub state: Vec<Option<RoomEvent>>,
    pub messages: Vec<RoomEvent>,
    pub prev_batch: Option<String>,
}

/// Serializable room overview for presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: String,
    pub display_name: String,
    pub topic: String,
    pub join_state: JoinState,
    pub highlight_count: u64,
    pub notification_count: u64,
    pub joined_members: usize,
    pub left_members: usize,
    pub timeline_len: usize,
    pub typing: Vec<String>,
    pub backfill: BackfillState,
}

/// Runtime tuning values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// User ID of the logged-in user; never picked as a room-name representative.
    pub local_user_id: Option<String>,
    /// Requested events per backfill.
    pub backfill_limit: u16,
    /// Hard cap on events per backfill imposed by the server.
    pub server_limit_cap: u16,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            local_user_id: None,
            backfill_limit: crate::backfill::DEFAULT_BACKFILL_LIMIT,
            server_limit_cap: crate::backfill::DEFAULT_SERVER_LIMIT_CAP,
            command_buffer: 128,
            event_buffer: 512,
        }
    }
}

/// Command channel input accepted by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuntimeCommand {
    /// Run the initial sync job and populate rooms from its snapshot.
    InitialSync,
    /// Fold one room's incremental sync slice into its state.
    ApplySync {
        room_id: String,
        update: SyncRoomUpdate,
    },
    /// Ask for older history of a room; dropped while one is in flight.
    RequestOlder { room_id: String },
    ResetNotificationCount { room_id: String },
    ResetHighlightCount { room_id: String },
    /// Post the local user's read receipt for an event already in the timeline.
    MarkAsRead { room_id: String, event_id: String },
    /// Emit the current room list.
    ListRooms,
}

/// Event channel output emitted by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Runtime lifecycle transition.
    StateChanged { state: RuntimeLifecycleState },
    /// A change notification raised by one room.
    Room {
        room_id: String,
        notification: RoomNotification,
    },
    /// Full room list replacement.
    RoomListUpdated { rooms: Vec<RoomSummary> },
    BackfillStarted { room_id: String, request_id: Uuid },
    BackfillFinished { room_id: String, inserted: usize },
    /// The server accepted the local user's read receipt.
    ReadReceiptPosted { room_id: String, event_id: String },
    /// A job or command failed; room state is unchanged.
    JobFailed {
        code: String,
        message: String,
        recoverable: bool,
    },
}
