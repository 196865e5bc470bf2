//! Async driver that owns every room and feeds job results into the reducer.
//!
//! All room mutation happens on the single runtime task. Jobs run on spawned
//! tasks and report back through an internal completion queue, so a job never
//! touches room state directly.

use std::{collections::BTreeMap, future::Future, sync::Arc};

use roomsync_core::{
    BackfillChunk, BackfillCoordinator, BackfillRequest, EventKind, InitialRoomSnapshot, Room,
    RoomNotification, RoomSummary, RuntimeCommand, RuntimeConfig, RuntimeEvent,
    RuntimeStateMachine, SyncError, SyncErrorCategory, SyncRoomUpdate, UserDirectory,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rooms delivered by the initial sync job, keyed by room ID.
pub type InitialSyncBatch = Vec<(String, InitialRoomSnapshot)>;

/// Runtime event subscription handed to presentation code.
pub type EventStream = broadcast::Receiver<RuntimeEvent>;

/// Network-facing job layer. Implementations own transport, retries and
/// timeouts; the runtime only sees "job produced data or failed".
pub trait JobDispatcher: Send + Sync + 'static {
    fn initial_sync(&self) -> impl Future<Output = Result<InitialSyncBatch, SyncError>> + Send;

    fn backfill(
        &self,
        request: BackfillRequest,
    ) -> impl Future<Output = Result<BackfillChunk, SyncError>> + Send;

    /// Send the local user's read receipt for `event_id`.
    fn post_receipt(
        &self,
        room_id: String,
        event_id: String,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Errors returned by [`RuntimeHandle::send`].
#[derive(Debug, Error)]
pub enum RuntimeSendError {
    #[error("runtime is no longer accepting commands")]
    Stopped,
}

/// Handle to a spawned runtime.
#[derive(Debug)]
pub struct RuntimeHandle {
    command_tx: mpsc::Sender<RuntimeCommand>,
    event_tx: broadcast::Sender<RuntimeEvent>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    pub async fn send(&self, command: RuntimeCommand) -> Result<(), RuntimeSendError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RuntimeSendError::Stopped)
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Stop the runtime loop and wait for it to exit.
    ///
    /// In-flight jobs keep running but their completions are discarded.
    pub async fn shutdown(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

/// Spawn the runtime on the current tokio runtime.
pub fn spawn_runtime<D: JobDispatcher>(dispatcher: D, config: RuntimeConfig) -> RuntimeHandle {
    let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
    let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
    let stop = CancellationToken::new();
    let runtime = RoomRuntime::new(
        command_rx,
        event_tx.clone(),
        Arc::new(dispatcher),
        config,
        stop.child_token(),
    );
    let task = tokio::spawn(async move {
        runtime.run().await;
    });

    RuntimeHandle {
        command_tx,
        event_tx,
        stop,
        task,
    }
}

enum JobCompletion {
    InitialSync(Result<InitialSyncBatch, SyncError>),
    Backfill {
        room_id: String,
        request_id: Uuid,
        result: Result<BackfillChunk, SyncError>,
    },
    Receipt {
        room_id: String,
        event_id: String,
        result: Result<(), SyncError>,
    },
}

struct RoomRuntime<D> {
    command_rx: mpsc::Receiver<RuntimeCommand>,
    event_tx: broadcast::Sender<RuntimeEvent>,
    completion_tx: mpsc::UnboundedSender<JobCompletion>,
    completion_rx: mpsc::UnboundedReceiver<JobCompletion>,
    state_machine: RuntimeStateMachine,
    dispatcher: Arc<D>,
    config: RuntimeConfig,
    users: UserDirectory,
    rooms: BTreeMap<String, Room>,
    stop: CancellationToken,
}

impl<D: JobDispatcher> RoomRuntime<D> {
    fn new(
        command_rx: mpsc::Receiver<RuntimeCommand>,
        event_tx: broadcast::Sender<RuntimeEvent>,
        dispatcher: Arc<D>,
        config: RuntimeConfig,
        stop: CancellationToken,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            command_rx,
            event_tx,
            completion_tx,
            completion_rx,
            state_machine: RuntimeStateMachine::default(),
            dispatcher,
            config,
            users: UserDirectory::new(),
            rooms: BTreeMap::new(),
            stop,
        }
    }

    async fn run(mut self) {
        debug!("room runtime started");
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                Some(command) = self.command_rx.recv() => {
                    if let Err(err) = self.handle_command(command) {
                        self.emit_failure(err);
                    }
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }
            }
        }
        debug!(rooms = self.rooms.len(), "room runtime exiting");
    }

    fn handle_command(&mut self, command: RuntimeCommand) -> Result<(), SyncError> {
        for event in self.state_machine.apply(&command)? {
            self.emit(event);
        }

        match command {
            RuntimeCommand::InitialSync => {
                self.spawn_initial_sync();
                Ok(())
            }
            RuntimeCommand::ApplySync { room_id, update } => {
                self.handle_apply_sync(room_id, update);
                Ok(())
            }
            RuntimeCommand::RequestOlder { room_id } => self.handle_request_older(room_id),
            RuntimeCommand::ResetNotificationCount { room_id } => {
                let notes = self.require_room(&room_id)?.reset_notification_count();
                self.emit_notifications(&room_id, notes);
                Ok(())
            }
            RuntimeCommand::ResetHighlightCount { room_id } => {
                let notes = self.require_room(&room_id)?.reset_highlight_count();
                self.emit_notifications(&room_id, notes);
                Ok(())
            }
            RuntimeCommand::MarkAsRead { room_id, event_id } => {
                self.handle_mark_as_read(room_id, event_id)
            }
            RuntimeCommand::ListRooms => {
                self.emit_room_list();
                Ok(())
            }
        }
    }

    fn handle_apply_sync(&mut self, room_id: String, update: SyncRoomUpdate) {
        let touches_members = update
            .state
            .iter()
            .chain(&update.timeline)
            .any(|event| matches!(event.kind, EventKind::Member(_)));

        let room = room_entry(&mut self.rooms, &self.config, &room_id);
        let notes = room.apply_sync(update, &mut self.users);
        debug!(%room_id, notifications = notes.len(), "sync applied");
        self.emit_notifications(&room_id, notes);

        if touches_members {
            self.refresh_rooms(Some(&room_id));
        }
    }

    fn handle_request_older(&mut self, room_id: String) -> Result<(), SyncError> {
        let Some(request) = self.require_room(&room_id)?.request_older() else {
            return Ok(());
        };

        let request_id = request.request_id;
        self.emit(RuntimeEvent::BackfillStarted {
            room_id: room_id.clone(),
            request_id,
        });

        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn_job(
            "backfill",
            async move { dispatcher.backfill(request).await },
            move |result| JobCompletion::Backfill {
                room_id,
                request_id,
                result,
            },
        );
        Ok(())
    }

    fn handle_mark_as_read(&mut self, room_id: String, event_id: String) -> Result<(), SyncError> {
        if !self.require_room(&room_id)?.has_event(&event_id) {
            return Err(SyncError::new(
                SyncErrorCategory::Config,
                "event_not_found",
                format!("event {event_id} is not in the timeline of {room_id}"),
            ));
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let (job_room, job_event) = (room_id.clone(), event_id.clone());
        self.spawn_job(
            "post_receipt",
            async move { dispatcher.post_receipt(job_room, job_event).await },
            move |result| JobCompletion::Receipt {
                room_id,
                event_id,
                result,
            },
        );
        Ok(())
    }

    fn spawn_initial_sync(&self) {
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn_job(
            "initial_sync",
            async move { dispatcher.initial_sync().await },
            JobCompletion::InitialSync,
        );
    }

    /// Run `job` on its own task and queue its result back into the loop.
    ///
    /// A panicking job still completes, as an `Internal` failure, so the
    /// room never waits on a request that cannot finish.
    fn spawn_job<T, F, C>(&self, name: &'static str, job: F, complete: C)
    where
        T: Send + 'static,
        F: Future<Output = Result<T, SyncError>> + Send + 'static,
        C: FnOnce(Result<T, SyncError>) -> JobCompletion + Send + 'static,
    {
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::spawn(job).await {
                Ok(result) => result,
                Err(err) => Err(job_aborted(name, &err)),
            };
            let _ = completion_tx.send(complete(result));
        });
    }

    fn handle_completion(&mut self, completion: JobCompletion) {
        match completion {
            JobCompletion::InitialSync(Ok(batch)) => {
                info!(rooms = batch.len(), "initial sync completed");
                for (room_id, snapshot) in batch {
                    let room = room_entry(&mut self.rooms, &self.config, &room_id);
                    let notes = room.apply_initial(snapshot, &mut self.users);
                    self.emit_notifications(&room_id, notes);
                }
                // Later snapshots may have renamed users seen in earlier ones.
                self.refresh_rooms(None);
                self.finish_initial_sync(true);
                self.emit_room_list();
            }
            JobCompletion::InitialSync(Err(err)) => {
                error!(error = %err, "initial sync failed");
                self.finish_initial_sync(false);
                self.emit_failure(err);
            }
            JobCompletion::Backfill {
                room_id,
                request_id,
                result,
            } => self.handle_backfill_completion(room_id, request_id, result),
            JobCompletion::Receipt {
                room_id,
                event_id,
                result,
            } => self.handle_receipt_completion(room_id, event_id, result),
        }
    }

    fn handle_backfill_completion(
        &mut self,
        room_id: String,
        request_id: Uuid,
        result: Result<BackfillChunk, SyncError>,
    ) {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            warn!(%room_id, %request_id, "backfill completed for unknown room");
            return;
        };

        match result {
            Ok(chunk) => {
                let notes = room.apply_backfill(request_id, chunk);
                let inserted = notes
                    .iter()
                    .filter(|note| matches!(note, RoomNotification::NewMessage { .. }))
                    .count();
                self.emit_notifications(&room_id, notes);
                self.emit(RuntimeEvent::BackfillFinished { room_id, inserted });
            }
            Err(err) => {
                if room.backfill_failed(request_id, &err) {
                    self.emit_failure(err);
                }
            }
        }
    }

    fn handle_receipt_completion(
        &mut self,
        room_id: String,
        event_id: String,
        result: Result<(), SyncError>,
    ) {
        if let Err(err) = result {
            error!(%room_id, %event_id, error = %err, "read receipt failed");
            self.emit_failure(err);
            return;
        }

        match self.rooms.get_mut(&room_id) {
            Some(room) => {
                room.record_local_receipt(&event_id);
            }
            None => warn!(%room_id, %event_id, "read receipt completed for unknown room"),
        }
        self.emit(RuntimeEvent::ReadReceiptPosted { room_id, event_id });
    }

    fn finish_initial_sync(&mut self, success: bool) {
        match self.state_machine.on_initial_sync_result(success) {
            Ok(event) => self.emit(event),
            Err(err) => self.emit_failure(err),
        }
    }

    /// Re-key members in every room except `skip` against the shared registry.
    fn refresh_rooms(&mut self, skip: Option<&str>) {
        let mut pending = Vec::new();
        for (room_id, room) in self.rooms.iter_mut() {
            if skip == Some(room_id.as_str()) {
                continue;
            }
            let notes = room.refresh_members(&self.users);
            if !notes.is_empty() {
                pending.push((room_id.clone(), notes));
            }
        }
        for (room_id, notes) in pending {
            self.emit_notifications(&room_id, notes);
        }
    }

    fn require_room(&mut self, room_id: &str) -> Result<&mut Room, SyncError> {
        self.rooms.get_mut(room_id).ok_or_else(|| {
            SyncError::new(
                SyncErrorCategory::Config,
                "room_not_found",
                format!("room not found: {room_id}"),
            )
        })
    }

    fn room_summaries(&self) -> Vec<RoomSummary> {
        self.rooms.values().map(Room::summary).collect()
    }

    /// Broadcast to subscribers; having none is not an error.
    fn emit(&self, event: RuntimeEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_room_list(&self) {
        self.emit(RuntimeEvent::RoomListUpdated {
            rooms: self.room_summaries(),
        });
    }

    fn emit_notifications(&self, room_id: &str, notes: Vec<RoomNotification>) {
        for notification in notes {
            self.emit(RuntimeEvent::Room {
                room_id: room_id.to_owned(),
                notification,
            });
        }
    }

    fn emit_failure(&self, err: SyncError) {
        let recoverable = err.is_recoverable();
        self.emit(RuntimeEvent::JobFailed {
            code: err.code,
            message: err.message,
            recoverable,
        });
    }
}

fn room_entry<'a>(
    rooms: &'a mut BTreeMap<String, Room>,
    config: &RuntimeConfig,
    room_id: &str,
) -> &'a mut Room {
    rooms.entry(room_id.to_owned()).or_insert_with(|| {
        Room::new(room_id, config.local_user_id.clone()).with_backfill(BackfillCoordinator::new(
            config.backfill_limit,
            config.server_limit_cap,
        ))
    })
}

fn job_aborted(name: &str, err: &JoinError) -> SyncError {
    error!(job = name, error = %err, "job task aborted");
    SyncError::new(
        SyncErrorCategory::Internal,
        "job_aborted",
        format!("{name} job did not complete: {err}"),
    )
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use roomsync_core::{EventKind, JoinState, Membership, RoomEvent};
    use tokio::{sync::Notify, time::timeout};

    use super::*;

    const ROOM: &str = "!lounge:example.org";

    #[derive(Default)]
    struct ScriptedDispatcher {
        initial: Mutex<Option<Result<InitialSyncBatch, SyncError>>>,
        backfills: Mutex<Vec<Result<BackfillChunk, SyncError>>>,
        requests: Arc<Mutex<Vec<BackfillRequest>>>,
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Notify>>,
        panic_next_backfill: AtomicBool,
        receipt_results: Mutex<Vec<Result<(), SyncError>>>,
        posted: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl JobDispatcher for ScriptedDispatcher {
        fn initial_sync(
            &self,
        ) -> impl Future<Output = Result<InitialSyncBatch, SyncError>> + Send {
            let result = self
                .initial
                .lock()
                .expect("initial lock")
                .take()
                .unwrap_or_else(|| Ok(Vec::new()));
            async move { result }
        }

        fn backfill(
            &self,
            request: BackfillRequest,
        ) -> impl Future<Output = Result<BackfillChunk, SyncError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().expect("requests lock").push(request);
            let mut scripted = self.backfills.lock().expect("backfill lock");
            let result = if scripted.is_empty() {
                Ok(BackfillChunk {
                    events: Vec::new(),
                    end: None,
                })
            } else {
                scripted.remove(0)
            };
            let gate = self.gate.clone();
            let crash = self.panic_next_backfill.swap(false, Ordering::SeqCst);
            async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                if crash {
                    panic!("scripted backfill crash");
                }
                result
            }
        }

        fn post_receipt(
            &self,
            room_id: String,
            event_id: String,
        ) -> impl Future<Output = Result<(), SyncError>> + Send {
            self.posted
                .lock()
                .expect("posted lock")
                .push((room_id, event_id));
            let mut scripted = self.receipt_results.lock().expect("receipt lock");
            let result = if scripted.is_empty() {
                Ok(())
            } else {
                scripted.remove(0)
            };
            async move { result }
        }
    }

    fn snapshot() -> InitialSyncBatch {
        vec![(
            ROOM.to_owned(),
            InitialRoomSnapshot {
                state: vec![
                    Some(RoomEvent::member("@alice:example.org", Membership::Join, Some("alice"))),
                    Some(RoomEvent::new(EventKind::Name {
                        name: "Lounge".into(),
                    })),
                ],
                messages: vec![
                    RoomEvent::text("$3", "@alice:example.org", "latest").with_timestamp(30),
                ],
                prev_batch: Some("t0".into()),
            },
        )]
    }

    fn chunk(ids: &[(&str, u64)], end: Option<&str>) -> BackfillChunk {
        BackfillChunk {
            events: ids
                .iter()
                .map(|(id, ts)| RoomEvent::text(*id, "@alice:example.org", *id).with_timestamp(*ts))
                .collect(),
            end: end.map(str::to_owned),
        }
    }

    async fn wait_for<F>(events: &mut EventStream, mut predicate: F) -> RuntimeEvent
    where
        F: FnMut(&RuntimeEvent) -> bool,
    {
        loop {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("event timeout")
                .expect("event receive");
            if predicate(&event) {
                return event;
            }
        }
    }

    async fn ready_runtime(dispatcher: ScriptedDispatcher) -> (RuntimeHandle, EventStream) {
        *dispatcher.initial.lock().expect("initial lock") = Some(Ok(snapshot()));
        let handle = spawn_runtime(dispatcher, RuntimeConfig::default());
        let mut events = handle.subscribe();
        handle
            .send(RuntimeCommand::InitialSync)
            .await
            .expect("command should enqueue");
        wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::RoomListUpdated { .. })
        })
        .await;
        (handle, events)
    }

    #[tokio::test]
    async fn initial_sync_populates_rooms() {
        let dispatcher = ScriptedDispatcher::default();
        *dispatcher.initial.lock().expect("initial lock") = Some(Ok(snapshot()));
        let handle = spawn_runtime(dispatcher, RuntimeConfig::default());
        let mut events = handle.subscribe();

        handle
            .send(RuntimeCommand::InitialSync)
            .await
            .expect("command should enqueue");

        let event = wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::RoomListUpdated { .. })
        })
        .await;
        match event {
            RuntimeEvent::RoomListUpdated { rooms } => {
                assert_eq!(rooms.len(), 1);
                assert_eq!(rooms[0].display_name, "Lounge");
                assert_eq!(rooms[0].timeline_len, 1);
                assert_eq!(rooms[0].join_state, JoinState::Joined);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failed_initial_sync_reports_and_returns_to_cold() {
        let dispatcher = ScriptedDispatcher::default();
        *dispatcher.initial.lock().expect("initial lock") =
            Some(Err(SyncError::from_http_status(503, "unavailable")));
        let handle = spawn_runtime(dispatcher, RuntimeConfig::default());
        let mut events = handle.subscribe();

        handle
            .send(RuntimeCommand::InitialSync)
            .await
            .expect("command should enqueue");

        let event = wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::JobFailed { .. })
        })
        .await;
        match event {
            RuntimeEvent::JobFailed {
                code, recoverable, ..
            } => {
                assert_eq!(code, "http_error");
                assert!(recoverable);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn runtime_rejects_sync_before_initial_sync() {
        let handle = spawn_runtime(ScriptedDispatcher::default(), RuntimeConfig::default());
        let mut events = handle.subscribe();

        handle
            .send(RuntimeCommand::ApplySync {
                room_id: ROOM.into(),
                update: SyncRoomUpdate::default(),
            })
            .await
            .expect("command should enqueue");

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event receive");
        match event {
            RuntimeEvent::JobFailed { code, .. } => assert_eq!(code, "invalid_state_transition"),
            other => panic!("unexpected event: {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn backfill_is_single_flight() {
        let gate = Arc::new(Notify::new());
        let dispatcher = ScriptedDispatcher {
            gate: Some(Arc::clone(&gate)),
            backfills: Mutex::new(vec![Ok(chunk(&[("$2", 20), ("$1", 10)], Some("t1")))]),
            ..ScriptedDispatcher::default()
        };
        let calls = Arc::clone(&dispatcher.calls);
        let (handle, mut events) = ready_runtime(dispatcher).await;

        for _ in 0..2 {
            handle
                .send(RuntimeCommand::RequestOlder {
                    room_id: ROOM.into(),
                })
                .await
                .expect("command should enqueue");
        }
        wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::BackfillStarted { .. })
        })
        .await;

        // Round-trip a command so both RequestOlder commands have been handled.
        handle
            .send(RuntimeCommand::ListRooms)
            .await
            .expect("command should enqueue");
        wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::RoomListUpdated { .. })
        })
        .await;

        gate.notify_one();
        let event = wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::BackfillFinished { .. })
        })
        .await;
        match event {
            RuntimeEvent::BackfillFinished { room_id, inserted } => {
                assert_eq!(room_id, ROOM);
                assert_eq!(inserted, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn backfill_cursor_advances_only_on_success() {
        let dispatcher = ScriptedDispatcher {
            backfills: Mutex::new(vec![
                Err(SyncError::from_http_status(502, "bad gateway")),
                Ok(chunk(&[("$2", 20)], Some("t1"))),
                Ok(chunk(&[("$1", 10)], Some("t2"))),
            ]),
            ..ScriptedDispatcher::default()
        };
        let requests = Arc::clone(&dispatcher.requests);
        let (handle, mut events) = ready_runtime(dispatcher).await;

        let request_older = || RuntimeCommand::RequestOlder {
            room_id: ROOM.into(),
        };

        handle.send(request_older()).await.expect("enqueue");
        wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::JobFailed { .. })
        })
        .await;

        for _ in 0..2 {
            handle.send(request_older()).await.expect("enqueue");
            wait_for(&mut events, |event| {
                matches!(event, RuntimeEvent::BackfillFinished { .. })
            })
            .await;
        }

        let froms: Vec<Option<String>> = requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|request| request.from.clone())
            .collect();
        assert_eq!(
            froms,
            vec![Some("t0".to_owned()), Some("t0".to_owned()), Some("t1".to_owned())]
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_room_backfill_is_reported() {
        let (handle, mut events) = ready_runtime(ScriptedDispatcher::default()).await;

        handle
            .send(RuntimeCommand::RequestOlder {
                room_id: "!missing:example.org".into(),
            })
            .await
            .expect("command should enqueue");

        let event = wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::JobFailed { .. })
        })
        .await;
        match event {
            RuntimeEvent::JobFailed {
                code, recoverable, ..
            } => {
                assert_eq!(code, "room_not_found");
                assert!(!recoverable);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn rename_in_one_room_rekeys_other_rooms() {
        let (handle, mut events) = ready_runtime(ScriptedDispatcher::default()).await;
        let other = "!other:example.org";

        handle
            .send(RuntimeCommand::ApplySync {
                room_id: other.into(),
                update: SyncRoomUpdate {
                    state: vec![RoomEvent::member(
                        "@alice:example.org",
                        Membership::Join,
                        Some("alicia"),
                    )],
                    ..SyncRoomUpdate::default()
                },
            })
            .await
            .expect("command should enqueue");

        let event = wait_for(&mut events, |event| {
            matches!(
                event,
                RuntimeEvent::Room {
                    notification: RoomNotification::MemberRenamed { .. },
                    ..
                }
            )
        })
        .await;
        match event {
            RuntimeEvent::Room {
                room_id,
                notification: RoomNotification::MemberRenamed { new_name, .. },
            } => {
                assert_eq!(room_id, ROOM);
                assert_eq!(new_name, "alicia");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn initial_sync_rekeys_rooms_renamed_by_later_snapshots() {
        let dispatcher = ScriptedDispatcher::default();
        let alice = "@alice:example.org";
        *dispatcher.initial.lock().expect("initial lock") = Some(Ok(vec![
            (
                "!a:example.org".to_owned(),
                InitialRoomSnapshot {
                    state: vec![Some(RoomEvent::member(alice, Membership::Join, Some("alice")))],
                    ..InitialRoomSnapshot::default()
                },
            ),
            (
                "!b:example.org".to_owned(),
                InitialRoomSnapshot {
                    state: vec![Some(RoomEvent::member(alice, Membership::Join, Some("alicia")))],
                    ..InitialRoomSnapshot::default()
                },
            ),
        ]));
        let handle = spawn_runtime(dispatcher, RuntimeConfig::default());
        let mut events = handle.subscribe();

        handle
            .send(RuntimeCommand::InitialSync)
            .await
            .expect("command should enqueue");

        let renamed = wait_for(&mut events, |event| {
            matches!(
                event,
                RuntimeEvent::Room {
                    notification: RoomNotification::MemberRenamed { .. },
                    ..
                }
            )
        })
        .await;
        match renamed {
            RuntimeEvent::Room {
                room_id,
                notification: RoomNotification::MemberRenamed { old_name, new_name, .. },
            } => {
                assert_eq!(room_id, "!a:example.org");
                assert_eq!(old_name, "alice");
                assert_eq!(new_name, "alicia");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event = wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::RoomListUpdated { .. })
        })
        .await;
        match event {
            RuntimeEvent::RoomListUpdated { rooms } => {
                let names: Vec<(&str, &str)> = rooms
                    .iter()
                    .map(|room| (room.room_id.as_str(), room.display_name.as_str()))
                    .collect();
                assert_eq!(
                    names,
                    vec![("!a:example.org", "alicia"), ("!b:example.org", "alicia")]
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn mark_as_read_posts_receipt() {
        let dispatcher = ScriptedDispatcher::default();
        let posted = Arc::clone(&dispatcher.posted);
        let (handle, mut events) = ready_runtime(dispatcher).await;

        handle
            .send(RuntimeCommand::MarkAsRead {
                room_id: ROOM.into(),
                event_id: "$3".into(),
            })
            .await
            .expect("command should enqueue");

        let event = wait_for(&mut events, |event| {
            matches!(
                event,
                RuntimeEvent::ReadReceiptPosted { .. } | RuntimeEvent::JobFailed { .. }
            )
        })
        .await;
        assert_eq!(
            event,
            RuntimeEvent::ReadReceiptPosted {
                room_id: ROOM.into(),
                event_id: "$3".into(),
            }
        );
        assert_eq!(
            *posted.lock().expect("posted lock"),
            vec![(ROOM.to_owned(), "$3".to_owned())]
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn mark_as_read_reports_unknown_event_and_failed_job() {
        let dispatcher = ScriptedDispatcher {
            receipt_results: Mutex::new(vec![Err(SyncError::from_http_status(
                429,
                "slow down",
            ))]),
            ..ScriptedDispatcher::default()
        };
        let posted = Arc::clone(&dispatcher.posted);
        let (handle, mut events) = ready_runtime(dispatcher).await;

        handle
            .send(RuntimeCommand::MarkAsRead {
                room_id: ROOM.into(),
                event_id: "$nope".into(),
            })
            .await
            .expect("command should enqueue");
        let event = wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::JobFailed { .. })
        })
        .await;
        match event {
            RuntimeEvent::JobFailed { code, .. } => assert_eq!(code, "event_not_found"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(posted.lock().expect("posted lock").is_empty());

        handle
            .send(RuntimeCommand::MarkAsRead {
                room_id: ROOM.into(),
                event_id: "$3".into(),
            })
            .await
            .expect("command should enqueue");
        let event = wait_for(&mut events, |event| {
            matches!(
                event,
                RuntimeEvent::ReadReceiptPosted { .. } | RuntimeEvent::JobFailed { .. }
            )
        })
        .await;
        match event {
            RuntimeEvent::JobFailed {
                code, recoverable, ..
            } => {
                assert_eq!(code, "http_error");
                assert!(recoverable);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn crashed_backfill_job_releases_the_room() {
        let dispatcher = ScriptedDispatcher {
            panic_next_backfill: AtomicBool::new(true),
            ..ScriptedDispatcher::default()
        };
        let calls = Arc::clone(&dispatcher.calls);
        let (handle, mut events) = ready_runtime(dispatcher).await;
        let request_older = || RuntimeCommand::RequestOlder {
            room_id: ROOM.into(),
        };

        handle.send(request_older()).await.expect("enqueue");
        let event = wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::JobFailed { .. })
        })
        .await;
        match event {
            RuntimeEvent::JobFailed {
                code, recoverable, ..
            } => {
                assert_eq!(code, "job_aborted");
                assert!(!recoverable);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        handle.send(request_older()).await.expect("enqueue");
        wait_for(&mut events, |event| {
            matches!(event, RuntimeEvent::BackfillFinished { .. })
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        handle.shutdown().await;
    }
}
