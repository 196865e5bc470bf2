use std::collections::HashMap;

use tracing::trace;

use crate::event::EventReceipts;

/// Non-persisted per-room signals: who is typing and who read what.
#[derive(Debug, Clone, Default)]
pub struct EphemeralState {
    typing: Vec<String>,
    last_read: HashMap<String, String>,
}

impl EphemeralState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the typing set wholesale; the server always sends all of it.
    pub fn apply_typing(&mut self, user_ids: &[String]) {
        self.typing.clear();
        self.typing.extend(user_ids.iter().cloned());
        trace!(typing = self.typing.len(), "typing set replaced");
    }

    /// Move each listed user's read marker to the event it is listed under.
    pub fn apply_receipts(&mut self, receipts: &[EventReceipts]) {
        for receipt in receipts {
            for user_id in &receipt.user_ids {
                self.last_read
                    .insert(user_id.clone(), receipt.event_id.clone());
            }
        }
    }

    pub fn typing_users(&self) -> &[String] {
        &self.typing
    }

    pub fn last_read(&self, user_id: &str) -> Option<&str> {
        self.last_read.get(user_id).map(String::as_str)
    }

    pub fn receipt_count(&self) -> usize {
        self.last_read.len()
    }
}
