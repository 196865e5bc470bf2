use serde::{Deserialize, Serialize};

/// Membership state carried by an `m.room.member` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Membership {
    Invite,
    Join,
    Knock,
    Leave,
    Ban,
}

/// Content of an `m.room.member` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberContent {
    /// Subject of the event (the state key), not necessarily the sender.
    pub user_id: String,
    /// New membership of the subject.
    pub membership: Membership,
    /// Display name announced with this membership, if any.
    pub display_name: Option<String>,
}

/// Matrix message type of an `m.room.message` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageType {
    /// Standard text message (`m.text`).
    Text,
    /// Notice message (`m.notice`).
    Notice,
    /// Emote message (`m.emote`).
    Emote,
    /// Any other `msgtype`, kept verbatim.
    Other(String),
}

/// Content of an `m.room.message` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    pub msgtype: MessageType,
    pub body: String,
}

/// Users that have read up to one event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventReceipts {
    pub event_id: String,
    pub user_ids: Vec<String>,
}

/// Closed set of event kinds the room reducer understands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    /// `m.room.member`
    Member(MemberContent),
    /// `m.room.name`
    Name { name: String },
    /// `m.room.topic`
    Topic { topic: String },
    /// `m.room.aliases`
    Aliases { aliases: Vec<String> },
    /// `m.room.canonical_alias`
    CanonicalAlias { alias: String },
    /// `m.typing`; always the complete set of typing users.
    Typing { user_ids: Vec<String> },
    /// `m.receipt`
    Receipt { receipts: Vec<EventReceipts> },
    /// `m.room.message`
    Message(MessageContent),
    /// Anything else. Carried only so it can be logged and skipped.
    Unknown { kind: String },
}

impl EventKind {
    /// Stable wire tag for this kind, used in diagnostics.
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Member(_) => "m.room.member",
            Self::Name { .. } => "m.room.name",
            Self::Topic { .. } => "m.room.topic",
            Self::Aliases { .. } => "m.room.aliases",
            Self::CanonicalAlias { .. } => "m.room.canonical_alias",
            Self::Typing { .. } => "m.typing",
            Self::Receipt { .. } => "m.receipt",
            Self::Message(_) => "m.room.message",
            Self::Unknown { kind } => kind,
        }
    }
}

/// Typed room event as delivered by the parsing layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEvent {
    /// Server-assigned event ID. Ephemeral events have none.
    pub event_id: Option<String>,
    /// Sender user ID when known.
    pub sender: Option<String>,
    /// Origin server timestamp in milliseconds since Unix epoch.
    ///
    /// This is the ordering key used by the timeline; events without it are
    /// treated as the newest known event.
    pub origin_server_ts: Option<u64>,
    pub kind: EventKind,
}

impl RoomEvent {
    /// Wrap a kind with no envelope metadata.
    pub fn new(kind: EventKind) -> Self {
        Self {
            event_id: None,
            sender: None,
            origin_server_ts: None,
            kind,
        }
    }

    pub fn with_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_timestamp(mut self, origin_server_ts: u64) -> Self {
        self.origin_server_ts = Some(origin_server_ts);
        self
    }

    /// Convenience constructor for an `m.room.member` event.
    pub fn member(
        user_id: impl Into<String>,
        membership: Membership,
        display_name: Option<&str>,
    ) -> Self {
        let user_id = user_id.into();
        Self::new(EventKind::Member(MemberContent {
            user_id: user_id.clone(),
            membership,
            display_name: display_name.map(str::to_owned),
        }))
        .with_sender(user_id)
    }

    /// Convenience constructor for an `m.text` message.
    pub fn text(
        event_id: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::Message(MessageContent {
            msgtype: MessageType::Text,
            body: body.into(),
        }))
        .with_id(event_id)
        .with_sender(sender)
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn type_tag(&self) -> &str {
        self.kind.type_tag()
    }

    pub fn member_content(&self) -> Option<&MemberContent> {
        match &self.kind {
            EventKind::Member(content) => Some(content),
            _ => None,
        }
    }

    pub fn message_content(&self) -> Option<&MessageContent> {
        match &self.kind {
            EventKind::Message(content) => Some(content),
            _ => None,
        }
    }

    /// Whether this event is known to come before `other` in room order.
    ///
    /// Only events that both carry a timestamp can be compared; anything else
    /// is "not known to precede".
    pub fn precedes(&self, other: &RoomEvent) -> bool {
        match (self.origin_server_ts, other.origin_server_ts) {
            (Some(mine), Some(theirs)) => mine < theirs,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedes_requires_both_timestamps() {
        let early = RoomEvent::text("$1", "@a:x", "one").with_timestamp(10);
        let late = RoomEvent::text("$2", "@a:x", "two").with_timestamp(20);
        let untimed = RoomEvent::text("$3", "@a:x", "three");

        assert!(early.precedes(&late));
        assert!(!late.precedes(&early));
        assert!(!early.precedes(&untimed));
        assert!(!untimed.precedes(&early));
    }

    #[test]
    fn equal_timestamps_do_not_precede() {
        let a = RoomEvent::text("$1", "@a:x", "one").with_timestamp(10);
        let b = RoomEvent::text("$2", "@a:x", "two").with_timestamp(10);
        assert!(!a.precedes(&b));
        assert!(!b.precedes(&a));
    }

    #[test]
    fn unknown_kinds_keep_their_raw_tag() {
        let event = RoomEvent::new(EventKind::Unknown {
            kind: "org.example.custom".into(),
        });
        assert_eq!(event.type_tag(), "org.example.custom");
        assert!(event.member_content().is_none());
    }

    #[test]
    fn member_constructor_sets_sender_to_subject() {
        let event = RoomEvent::member("@bob:x", Membership::Join, Some("bob"));
        assert_eq!(event.sender.as_deref(), Some("@bob:x"));
        let content = event.member_content().expect("member content");
        assert_eq!(content.display_name.as_deref(), Some("bob"));
        assert_eq!(content.membership, Membership::Join);
    }

    #[test]
    fn events_serialize_with_tagged_kinds() {
        let event = RoomEvent::text("$1", "@a:x", "hello").with_timestamp(5);
        let json = serde_json::to_string(&event).expect("serialize");
        let back: RoomEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, event);
        assert!(json.contains("\"Message\""));
    }
}
