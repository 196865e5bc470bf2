use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{error::SyncError, event::RoomEvent, timeline::TimelineBuffer};

/// Default number of events asked for per backfill request.
pub const DEFAULT_BACKFILL_LIMIT: u16 = 30;
/// Server-side cap applied when no other cap is configured.
pub const DEFAULT_SERVER_LIMIT_CAP: u16 = 100;

/// Backfill state of one room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackfillState {
    Idle,
    Fetching,
}

/// One "older messages" job handed to the job dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillRequest {
    pub request_id: Uuid,
    pub room_id: String,
    /// Pagination cursor to fetch from; `None` asks from the live end.
    pub from: Option<String>,
    pub limit: u16,
}

/// Successful backfill response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillChunk {
    /// Events in server response order (usually newest first).
    pub events: Vec<RoomEvent>,
    /// Cursor to continue from on the next request.
    pub end: Option<String>,
}

/// Single-flight coordinator for backward pagination of one room.
#[derive(Debug, Clone)]
pub struct BackfillCoordinator {
    prev_batch: Option<String>,
    in_flight: Option<Uuid>,
    limit: u16,
    exhausted: bool,
}

impl Default for BackfillCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_BACKFILL_LIMIT, DEFAULT_SERVER_LIMIT_CAP)
    }
}

impl BackfillCoordinator {
    pub fn new(requested_limit: u16, server_cap: u16) -> Self {
        Self {
            prev_batch: None,
            in_flight: None,
            exhausted: false,
            limit: TimelineBuffer::bounded_paginate_limit(requested_limit, server_cap),
        }
    }

    pub fn state(&self) -> BackfillState {
        if self.in_flight.is_some() {
            BackfillState::Fetching
        } else {
            BackfillState::Idle
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.prev_batch.as_deref()
    }

    pub fn limit(&self) -> u16 {
        self.limit
    }

    /// Whether the server reported the start of the room history.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Adopt the first cursor the server hands out; later ones are ignored.
    pub fn seed_cursor(&mut self, token: Option<&str>) {
        if self.prev_batch.is_none() {
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                self.prev_batch = Some(token.to_owned());
            }
        }
    }

    /// Start a backfill unless one is already running.
    pub fn request_older(&mut self, room_id: &str) -> Option<BackfillRequest> {
        if let Some(request_id) = self.in_flight {
            debug!(%room_id, %request_id, "backfill already in flight; request dropped");
            return None;
        }
        if self.exhausted {
            debug!(%room_id, "room history exhausted; nothing older to fetch");
            return None;
        }

        let request = BackfillRequest {
            request_id: Uuid::new_v4(),
            room_id: room_id.to_owned(),
            from: self.prev_batch.clone(),
            limit: self.limit,
        };
        self.in_flight = Some(request.request_id);
        debug!(%room_id, request_id = %request.request_id, from = ?request.from, "backfill requested");
        Some(request)
    }

    /// Settle a successful response. Returns `false` for stale completions.
    ///
    /// A response without an `end` cursor marks the history as exhausted.
    pub fn complete(&mut self, request_id: Uuid, end: Option<String>) -> bool {
        if !self.settle(request_id) {
            return false;
        }
        match end.filter(|token| !token.is_empty()) {
            Some(token) => self.prev_batch = Some(token),
            None => self.exhausted = true,
        }
        true
    }

    /// Settle a failed response; the cursor stays where it was.
    pub fn fail(&mut self, request_id: Uuid, error: &SyncError) -> bool {
        if !self.settle(request_id) {
            return false;
        }
        error!(%request_id, %error, cursor = ?self.prev_batch, "backfill failed; cursor kept");
        true
    }

    fn settle(&mut self, request_id: Uuid) -> bool {
        if self.in_flight != Some(request_id) {
            warn!(
                %request_id,
                in_flight = ?self.in_flight,
                "ignoring backfill completion that does not match the in-flight request"
            );
            return false;
        }
        self.in_flight = None;
        true
    }
}
