//! Room aggregate and the reducer that folds sync deltas into it.

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    backfill::{BackfillChunk, BackfillCoordinator, BackfillRequest, BackfillState},
    ephemeral::EphemeralState,
    error::SyncError,
    event::{EventKind, EventReceipts, RoomEvent},
    membership::{MembershipChange, MembershipIndex},
    naming::{NamingInputs, compute_display_name, empty_room_name},
    timeline::{TimelineBuffer, TimelineInsert},
    types::{InitialRoomSnapshot, JoinState, RoomNotification, RoomSummary, SyncRoomUpdate},
    users::UserRegistry,
};

/// Client-side state of one room.
///
/// All mutation goes through the `apply_*` entry points, each of which
/// returns the notifications it raised in detection order.
#[derive(Debug, Clone)]
pub struct Room {
    id: String,
    local_user_id: Option<String>,
    name: String,
    aliases: Vec<String>,
    canonical_alias: String,
    topic: String,
    display_name: String,
    join_state: JoinState,
    highlight_count: u64,
    notification_count: u64,
    members: MembershipIndex,
    timeline: TimelineBuffer,
    ephemeral: EphemeralState,
    backfill: BackfillCoordinator,
}

impl Room {
    pub fn new(id: impl Into<String>, local_user_id: Option<String>) -> Self {
        let id = id.into();
        debug!(room_id = %id, "new room");
        Self {
            display_name: empty_room_name(&id),
            id,
            local_user_id,
            name: String::new(),
            aliases: Vec::new(),
            canonical_alias: String::new(),
            topic: String::new(),
            join_state: JoinState::Joined,
            highlight_count: 0,
            notification_count: 0,
            members: MembershipIndex::new(),
            timeline: TimelineBuffer::new(),
            ephemeral: EphemeralState::new(),
            backfill: BackfillCoordinator::default(),
        }
    }

    /// Replace the backfill coordinator, e.g. to apply configured limits.
    pub fn with_backfill(mut self, backfill: BackfillCoordinator) -> Self {
        self.backfill = backfill;
        self
    }

    /// Fold the initial sync snapshot: state first, then messages.
    pub fn apply_initial(
        &mut self,
        snapshot: InitialRoomSnapshot,
        users: &mut dyn UserRegistry,
    ) -> Vec<RoomNotification> {
        let mut out = Vec::new();
        self.backfill.seed_cursor(snapshot.prev_batch.as_deref());

        for event in &snapshot.state {
            self.process_state_event(event.as_ref(), users, &mut out);
        }
        for event in snapshot.messages {
            self.add_message(event, &mut out);
        }

        debug!(
            room_id = %self.id,
            display_name = %self.display_name,
            timeline = self.timeline.len(),
            "initial state applied"
        );
        out
    }

    /// Fold one incremental sync slice.
    ///
    /// Order: join state, state events, timeline events (each stored as a
    /// message and then re-checked as state), ephemeral events, counts.
    pub fn apply_sync(
        &mut self,
        update: SyncRoomUpdate,
        users: &mut dyn UserRegistry,
    ) -> Vec<RoomNotification> {
        let mut out = Vec::new();
        self.backfill.seed_cursor(update.prev_batch.as_deref());
        self.set_join_state(update.join_state, &mut out);

        for event in &update.state {
            self.process_state_event(Some(event), users, &mut out);
        }
        for event in update.timeline {
            self.add_message(event.clone(), &mut out);
            // State changes can arrive inside the timeline.
            self.process_state_event(Some(&event), users, &mut out);
        }
        for event in &update.ephemeral {
            self.process_ephemeral_event(event, &mut out);
        }

        self.set_highlight_count(update.highlight_count, &mut out);
        self.set_notification_count(update.notification_count, &mut out);
        out
    }

    /// Apply one state event. `None` stands for an entry the upstream parser
    /// could not type; it is logged and skipped.
    pub fn apply_state_event(
        &mut self,
        event: Option<&RoomEvent>,
        users: &mut dyn UserRegistry,
    ) -> Vec<RoomNotification> {
        let mut out = Vec::new();
        self.process_state_event(event, users, &mut out);
        out
    }

    /// Start fetching older history unless a fetch is already running.
    pub fn request_older(&mut self) -> Option<BackfillRequest> {
        self.backfill.request_older(&self.id)
    }

    /// Fold a successful backfill response.
    ///
    /// A response that does not belong to the in-flight request is dropped.
    pub fn apply_backfill(
        &mut self,
        request_id: Uuid,
        chunk: BackfillChunk,
    ) -> Vec<RoomNotification> {
        let mut out = Vec::new();
        if !self.backfill.complete(request_id, chunk.end) {
            return out;
        }
        for event in chunk.events {
            self.add_message(event, &mut out);
        }
        debug!(
            room_id = %self.id,
            %request_id,
            new_messages = out.len(),
            cursor = ?self.backfill.cursor(),
            "backfill applied"
        );
        out
    }

    /// Settle a failed backfill; the cursor is kept so the next request retries.
    pub fn backfill_failed(&mut self, request_id: Uuid, error: &SyncError) -> bool {
        self.backfill.fail(request_id, error)
    }

    /// Re-key members renamed elsewhere (for example in another room).
    pub fn refresh_members(&mut self, users: &dyn UserRegistry) -> Vec<RoomNotification> {
        let mut out = Vec::new();
        let changes = self.members.refresh_names(users);
        out.extend(changes.into_iter().map(membership_notification));
        // Left members can name the room too, and they are never re-keyed.
        self.update_display_name(users, &mut out);
        out
    }

    pub fn reset_notification_count(&mut self) -> Vec<RoomNotification> {
        let mut out = Vec::new();
        self.set_notification_count(0, &mut out);
        out
    }

    pub fn reset_highlight_count(&mut self) -> Vec<RoomNotification> {
        let mut out = Vec::new();
        self.set_highlight_count(0, &mut out);
        out
    }

    /// Move the local user's read marker after the server accepted a receipt.
    ///
    /// Returns `false` when the room has no local user configured.
    pub fn record_local_receipt(&mut self, event_id: &str) -> bool {
        let Some(local_user_id) = self.local_user_id.clone() else {
            return false;
        };
        self.ephemeral.apply_receipts(&[EventReceipts {
            event_id: event_id.to_owned(),
            user_ids: vec![local_user_id],
        }]);
        debug!(room_id = %self.id, %event_id, "local read marker moved");
        true
    }

    fn add_message(&mut self, event: RoomEvent, out: &mut Vec<RoomNotification>) {
        match self.timeline.insert(event.clone()) {
            TimelineInsert::Inserted(_) => out.push(RoomNotification::NewMessage { event }),
            TimelineInsert::Replaced(idx) => {
                trace!(room_id = %self.id, idx, "timeline event replaced in place");
            }
        }
    }

    fn process_state_event(
        &mut self,
        event: Option<&RoomEvent>,
        users: &mut dyn UserRegistry,
        out: &mut Vec<RoomNotification>,
    ) {
        let Some(event) = event else {
            warn!(room_id = %self.id, "missing state event passed to reducer; skipped");
            return;
        };

        match &event.kind {
            EventKind::Name { name } => {
                self.name = name.clone();
                debug!(room_id = %self.id, name = %self.name, "room name");
                self.update_display_name(users, out);
            }
            EventKind::Aliases { aliases } => {
                if self.aliases != *aliases {
                    self.aliases = aliases.clone();
                    debug!(room_id = %self.id, aliases = ?self.aliases, "room aliases");
                    out.push(RoomNotification::AliasesChanged {
                        aliases: self.aliases.clone(),
                    });
                }
                self.update_display_name(users, out);
            }
            EventKind::CanonicalAlias { alias } => {
                self.canonical_alias = alias.clone();
                debug!(room_id = %self.id, alias = %self.canonical_alias, "room canonical alias");
                self.update_display_name(users, out);
            }
            EventKind::Topic { topic } => {
                self.topic = topic.clone();
                out.push(RoomNotification::TopicChanged {
                    topic: self.topic.clone(),
                });
            }
            EventKind::Member(content) => {
                if let Some(change) = self.members.apply_membership(content, users) {
                    out.push(membership_notification(change));
                }
                let renamed = self.members.refresh_names(users);
                out.extend(renamed.into_iter().map(membership_notification));
                self.update_display_name(users, out);
            }
            EventKind::Message(_) | EventKind::Typing { .. } | EventKind::Receipt { .. } => {}
            EventKind::Unknown { kind } => {
                trace!(room_id = %self.id, %kind, "ignoring unknown state event kind");
            }
        }
    }

    fn process_ephemeral_event(&mut self, event: &RoomEvent, out: &mut Vec<RoomNotification>) {
        match &event.kind {
            EventKind::Typing { user_ids } => {
                self.ephemeral.apply_typing(user_ids);
                out.push(RoomNotification::TypingChanged {
                    user_ids: self.ephemeral.typing_users().to_vec(),
                });
            }
            EventKind::Receipt { receipts } => self.ephemeral.apply_receipts(receipts),
            other => {
                trace!(room_id = %self.id, kind = other.type_tag(), "ignoring ephemeral event");
            }
        }
    }

    fn update_display_name(&mut self, users: &dyn UserRegistry, out: &mut Vec<RoomNotification>) {
        let next = compute_display_name(&NamingInputs {
            room_id: &self.id,
            name: &self.name,
            canonical_alias: &self.canonical_alias,
            local_user_id: self.local_user_id.as_deref(),
            members: &self.members,
            users,
        });
        if next == self.display_name {
            return;
        }
        let old = std::mem::replace(&mut self.display_name, next);
        debug!(room_id = %self.id, %old, new = %self.display_name, "display name changed");
        out.push(RoomNotification::DisplayNameChanged {
            old,
            new: self.display_name.clone(),
        });
    }

    fn set_join_state(&mut self, state: JoinState, out: &mut Vec<RoomNotification>) {
        if state == self.join_state {
            return;
        }
        let old = self.join_state;
        self.join_state = state;
        out.push(RoomNotification::JoinStateChanged { old, new: state });
    }

    fn set_highlight_count(&mut self, count: u64, out: &mut Vec<RoomNotification>) {
        if count != self.highlight_count {
            self.highlight_count = count;
            out.push(RoomNotification::HighlightCountChanged { count });
        }
    }

    fn set_notification_count(&mut self, count: u64, out: &mut Vec<RoomNotification>) {
        if count != self.notification_count {
            self.notification_count = count;
            out.push(RoomNotification::NotificationCountChanged { count });
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn canonical_alias(&self) -> &str {
        &self.canonical_alias
    }

    pub fn join_state(&self) -> JoinState {
        self.join_state
    }

    pub fn highlight_count(&self) -> u64 {
        self.highlight_count
    }

    pub fn notification_count(&self) -> u64 {
        self.notification_count
    }

    /// Timeline snapshot, oldest first.
    pub fn messages(&self) -> &[RoomEvent] {
        self.timeline.events()
    }

    pub fn has_event(&self, event_id: &str) -> bool {
        self.timeline.find(event_id).is_some()
    }

    pub fn members(&self) -> &MembershipIndex {
        &self.members
    }

    pub fn joined_members(&self) -> Vec<String> {
        self.members.joined_members()
    }

    pub fn left_members(&self) -> &[String] {
        self.members.left_members()
    }

    /// Disambiguated name of a member as shown in this room.
    pub fn member_name(&self, user_id: &str, users: &dyn UserRegistry) -> String {
        self.members.disambiguated_name(user_id, users)
    }

    pub fn typing_users(&self) -> &[String] {
        self.ephemeral.typing_users()
    }

    pub fn last_read_event(&self, user_id: &str) -> Option<&str> {
        self.ephemeral.last_read(user_id)
    }

    pub fn backfill_state(&self) -> BackfillState {
        self.backfill.state()
    }

    pub fn prev_batch(&self) -> Option<&str> {
        self.backfill.cursor()
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.id.clone(),
            display_name: self.display_name.clone(),
            topic: self.topic.clone(),
            join_state: self.join_state,
            highlight_count: self.highlight_count,
            notification_count: self.notification_count,
            joined_members: self.members.joined_count(),
            left_members: self.members.left_members().len(),
            timeline_len: self.timeline.len(),
            typing: self.ephemeral.typing_users().to_vec(),
            backfill: self.backfill.state(),
        }
    }
}

fn membership_notification(change: MembershipChange) -> RoomNotification {
    match change {
        MembershipChange::Added { user_id } => RoomNotification::MemberAdded { user_id },
        MembershipChange::Removed { user_id } => RoomNotification::MemberRemoved { user_id },
        MembershipChange::Renamed {
            user_id,
            old_name,
            new_name,
        } => RoomNotification::MemberRenamed {
            user_id,
            old_name,
            new_name,
        },
    }
}
