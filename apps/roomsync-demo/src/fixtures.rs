//! In-memory job dispatcher serving a canned homeserver history.

use std::{collections::HashMap, future::Future, time::Duration};

use roomsync_core::{
    BackfillChunk, BackfillRequest, EventKind, EventReceipts, InitialRoomSnapshot, JoinState,
    Membership, RoomEvent, SyncError, SyncErrorCategory, SyncRoomUpdate,
};
use roomsync_runtime::{InitialSyncBatch, JobDispatcher};
use tracing::debug;

pub const LOUNGE: &str = "!lounge:example.org";
pub const DIRECT: &str = "!dm:example.org";

const ALICE: &str = "@alice:example.org";
const BOB: &str = "@bob:example.org";
const CAROL: &str = "@carol:example.org";

const JOB_LATENCY: Duration = Duration::from_millis(20);

pub struct FixtureDispatcher {
    local_user_id: String,
    /// Older pages keyed by the cursor that fetches them.
    history: HashMap<String, BackfillChunk>,
}

impl FixtureDispatcher {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        let history = HashMap::from([
            (
                "lounge-2".to_owned(),
                BackfillChunk {
                    events: vec![
                        text("$l2", BOB, "anyone around?", 200),
                        text("$l1", ALICE, "first!", 100),
                    ],
                    end: Some("lounge-1".to_owned()),
                },
            ),
            (
                "lounge-1".to_owned(),
                BackfillChunk {
                    events: Vec::new(),
                    end: None,
                },
            ),
        ]);
        Self {
            local_user_id: local_user_id.into(),
            history,
        }
    }

    fn initial_batch(&self) -> InitialSyncBatch {
        let me = self.local_user_id.as_str();
        vec![
            (
                LOUNGE.to_owned(),
                InitialRoomSnapshot {
                    state: vec![
                        Some(RoomEvent::member(me, Membership::Join, Some("me"))),
                        Some(RoomEvent::member(ALICE, Membership::Join, Some("alice"))),
                        Some(RoomEvent::member(BOB, Membership::Join, Some("bob"))),
                        Some(RoomEvent::new(EventKind::Topic {
                            topic: "General chatter".to_owned(),
                        })),
                        None,
                    ],
                    messages: vec![
                        text("$l3", ALICE, "morning all", 300),
                        text("$l4", BOB, "hey alice", 400),
                    ],
                    prev_batch: Some("lounge-2".to_owned()),
                },
            ),
            (
                DIRECT.to_owned(),
                InitialRoomSnapshot {
                    state: vec![
                        Some(RoomEvent::member(me, Membership::Join, Some("me"))),
                        Some(RoomEvent::member(CAROL, Membership::Join, Some("carol"))),
                    ],
                    messages: vec![text("$d1", CAROL, "lunch?", 350)],
                    prev_batch: None,
                },
            ),
        ]
    }
}

impl JobDispatcher for FixtureDispatcher {
    fn initial_sync(&self) -> impl Future<Output = Result<InitialSyncBatch, SyncError>> + Send {
        let batch = self.initial_batch();
        async move {
            tokio::time::sleep(JOB_LATENCY).await;
            Ok(batch)
        }
    }

    fn backfill(
        &self,
        request: BackfillRequest,
    ) -> impl Future<Output = Result<BackfillChunk, SyncError>> + Send {
        let page = request
            .from
            .as_deref()
            .and_then(|from| self.history.get(from))
            .cloned();
        debug!(
            room_id = %request.room_id,
            from = ?request.from,
            limit = request.limit,
            found = page.is_some(),
            "serving fixture backfill"
        );
        async move {
            tokio::time::sleep(JOB_LATENCY).await;
            page.ok_or_else(|| {
                SyncError::new(
                    SyncErrorCategory::Config,
                    "unknown_cursor",
                    "no history stored for this cursor",
                )
            })
        }
    }

    fn post_receipt(
        &self,
        room_id: String,
        event_id: String,
    ) -> impl Future<Output = Result<(), SyncError>> + Send {
        debug!(%room_id, %event_id, "accepting fixture read receipt");
        async move {
            tokio::time::sleep(JOB_LATENCY).await;
            Ok(())
        }
    }
}

/// Incremental sync for the lounge: a canonical alias appears, alice renames
/// herself and reads bob's reply while bob is still typing.
pub fn lounge_update() -> SyncRoomUpdate {
    SyncRoomUpdate {
        join_state: JoinState::Joined,
        prev_batch: Some("lounge-ignored".to_owned()),
        state: vec![RoomEvent::new(EventKind::CanonicalAlias {
            alias: "#lounge:example.org".to_owned(),
        })],
        timeline: vec![
            RoomEvent::member(ALICE, Membership::Join, Some("Alice Liddell"))
                .with_id("$l5")
                .with_timestamp(500),
            text("$l6", BOB, "nice name", 600),
        ],
        ephemeral: vec![
            RoomEvent::new(EventKind::Typing {
                user_ids: vec![BOB.to_owned()],
            }),
            RoomEvent::new(EventKind::Receipt {
                receipts: vec![EventReceipts {
                    event_id: "$l6".to_owned(),
                    user_ids: vec![ALICE.to_owned()],
                }],
            }),
        ],
        highlight_count: 1,
        notification_count: 2,
    }
}

fn text(event_id: &str, sender: &str, body: &str, ts: u64) -> RoomEvent {
    RoomEvent::text(event_id, sender, body).with_timestamp(ts)
}
