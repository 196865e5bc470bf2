use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::MemberContent;

/// Long-lived user entity shared by every room the user appears in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    /// Current display name; empty when the user never announced one.
    pub display_name: String,
}

impl Member {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
        }
    }

    /// Apply the profile carried by a member event.
    ///
    /// Returns `true` when the display name changed.
    pub fn process_member_event(&mut self, content: &MemberContent) -> bool {
        let next = content.display_name.as_deref().unwrap_or_default();
        if self.display_name == next {
            return false;
        }
        self.display_name = next.to_owned();
        true
    }

    /// Display name, falling back to the raw ID when it is empty.
    pub fn name_or_id(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Maps user IDs to long-lived member entities.
pub trait UserRegistry {
    /// Look up a user, creating an entity on first sight.
    fn resolve_user(&mut self, user_id: &str) -> &mut Member;

    /// Look up a user without creating it.
    fn user(&self, user_id: &str) -> Option<&Member>;

    /// Current display name of a user, empty when unknown.
    fn display_name(&self, user_id: &str) -> &str {
        self.user(user_id)
            .map(|member| member.display_name.as_str())
            .unwrap_or_default()
    }
}

/// In-memory registry used by the runtime and tests.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, Member>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserRegistry for UserDirectory {
    fn resolve_user(&mut self, user_id: &str) -> &mut Member {
        self.users
            .entry(user_id.to_owned())
            .or_insert_with(|| Member::new(user_id))
    }

    fn user(&self, user_id: &str) -> Option<&Member> {
        self.users.get(user_id)
    }
}
