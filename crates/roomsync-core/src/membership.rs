use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use crate::{
    event::{MemberContent, Membership},
    users::UserRegistry,
};

/// Effect of one membership update on the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Added { user_id: String },
    Removed { user_id: String },
    Renamed {
        user_id: String,
        old_name: String,
        new_name: String,
    },
}

/// Joined members keyed by display name, plus members that left.
///
/// A user is in at most one of the joined map and the left list. Entries are
/// never dropped, only moved between the two.
#[derive(Debug, Clone, Default)]
pub struct MembershipIndex {
    joined: BTreeMap<String, Vec<String>>,
    keyed_as: HashMap<String, String>,
    left: Vec<String>,
}

impl MembershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `m.room.member` event.
    ///
    /// Join and any event carrying a display name update the user's profile in
    /// the registry first; the index is then keyed on the registry name.
    pub fn apply_membership(
        &mut self,
        content: &MemberContent,
        users: &mut dyn UserRegistry,
    ) -> Option<MembershipChange> {
        let user_id = content.user_id.as_str();
        let member = users.resolve_user(user_id);
        if content.membership == Membership::Join || content.display_name.is_some() {
            member.process_member_event(content);
        }
        let name = member.display_name.clone();

        match content.membership {
            Membership::Join => self.join(user_id, name),
            Membership::Leave | Membership::Ban => self.leave(user_id),
            Membership::Invite | Membership::Knock => {
                trace!(%user_id, membership = ?content.membership, "membership not tracked by index");
                None
            }
        }
    }

    /// Re-key every joined member whose registry name no longer matches.
    pub fn refresh_names(&mut self, users: &dyn UserRegistry) -> Vec<MembershipChange> {
        let mut stale: Vec<(String, String)> = self
            .keyed_as
            .iter()
            .filter(|(user_id, key)| users.display_name(user_id) != key.as_str())
            .map(|(user_id, _)| (user_id.clone(), users.display_name(user_id).to_owned()))
            .collect();
        stale.sort();

        stale
            .into_iter()
            .filter_map(|(user_id, name)| self.join(&user_id, name))
            .collect()
    }

    fn join(&mut self, user_id: &str, name: String) -> Option<MembershipChange> {
        match self.keyed_as.get(user_id) {
            Some(current) if *current == name => None,
            Some(current) => {
                let old_name = current.clone();
                self.remove_key(user_id, &old_name);
                self.insert_key(user_id, name.clone());
                debug!(%user_id, %old_name, new_name = %name, "member re-keyed after rename");
                Some(MembershipChange::Renamed {
                    user_id: user_id.to_owned(),
                    old_name,
                    new_name: name,
                })
            }
            None => {
                self.left.retain(|id| id != user_id);
                self.insert_key(user_id, name);
                Some(MembershipChange::Added {
                    user_id: user_id.to_owned(),
                })
            }
        }
    }

    fn leave(&mut self, user_id: &str) -> Option<MembershipChange> {
        let was_joined = match self.keyed_as.get(user_id).cloned() {
            Some(name) => {
                self.remove_key(user_id, &name);
                true
            }
            None => false,
        };
        let newly_left = !self.left.iter().any(|id| id == user_id);
        if newly_left {
            self.left.push(user_id.to_owned());
        }

        (was_joined || newly_left).then(|| MembershipChange::Removed {
            user_id: user_id.to_owned(),
        })
    }

    fn insert_key(&mut self, user_id: &str, name: String) {
        self.joined
            .entry(name.clone())
            .or_default()
            .push(user_id.to_owned());
        self.keyed_as.insert(user_id.to_owned(), name);
    }

    fn remove_key(&mut self, user_id: &str, name: &str) {
        if let Some(ids) = self.joined.get_mut(name) {
            ids.retain(|id| id != user_id);
            if ids.is_empty() {
                self.joined.remove(name);
            }
        }
        self.keyed_as.remove(user_id);
    }

    pub fn is_joined(&self, user_id: &str) -> bool {
        self.keyed_as.contains_key(user_id)
    }

    pub fn has_left(&self, user_id: &str) -> bool {
        self.left.iter().any(|id| id == user_id)
    }

    /// Joined user IDs sorted by ID.
    pub fn joined_members(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keyed_as.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Users that left, in the order they left.
    pub fn left_members(&self) -> &[String] {
        &self.left
    }

    /// Joined user IDs currently keyed under `name`.
    pub fn members_named(&self, name: &str) -> &[String] {
        self.joined.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Name a joined user is keyed under.
    pub fn keyed_name(&self, user_id: &str) -> Option<&str> {
        self.keyed_as.get(user_id).map(String::as_str)
    }

    pub fn joined_count(&self) -> usize {
        self.keyed_as.len()
    }

    /// Name to render for a member, disambiguated against joined namesakes.
    ///
    /// An empty display name falls back to the user ID; a name shared by more
    /// than one joined member gets the ID appended in angle brackets.
    pub fn disambiguated_name(&self, user_id: &str, users: &dyn UserRegistry) -> String {
        let name = users.display_name(user_id);
        if name.is_empty() {
            return user_id.to_owned();
        }
        if self.members_named(name).len() <= 1 {
            return name.to_owned();
        }
        format!("{name} <{user_id}>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserDirectory;

    fn member(user_id: &str, membership: Membership, name: Option<&str>) -> MemberContent {
        MemberContent {
            user_id: user_id.into(),
            membership,
            display_name: name.map(str::to_owned),
        }
    }

    #[test]
    fn join_is_idempotent() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        let join = member("@alice:x", Membership::Join, Some("alice"));

        assert_eq!(
            index.apply_membership(&join, &mut users),
            Some(MembershipChange::Added {
                user_id: "@alice:x".into()
            })
        );
        assert_eq!(index.apply_membership(&join, &mut users), None);
        assert_eq!(index.members_named("alice"), ["@alice:x".to_owned()]);
        assert_eq!(index.joined_count(), 1);
    }

    #[test]
    fn leave_moves_member_to_left_list() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        index.apply_membership(&member("@bob:x", Membership::Join, Some("bob")), &mut users);

        let change = index.apply_membership(&member("@bob:x", Membership::Leave, None), &mut users);
        assert_eq!(
            change,
            Some(MembershipChange::Removed {
                user_id: "@bob:x".into()
            })
        );
        assert!(!index.is_joined("@bob:x"));
        assert!(index.has_left("@bob:x"));
        assert!(index.members_named("bob").is_empty());
        assert_eq!(users.display_name("@bob:x"), "bob");
    }

    #[test]
    fn repeated_leave_does_not_duplicate_left_entry() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        let leave = member("@bob:x", Membership::Leave, None);
        assert!(index.apply_membership(&leave, &mut users).is_some());
        assert!(index.apply_membership(&leave, &mut users).is_none());
        assert_eq!(index.left_members().len(), 1);
    }

    #[test]
    fn rejoin_removes_member_from_left_list() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        index.apply_membership(&member("@bob:x", Membership::Join, Some("bob")), &mut users);
        index.apply_membership(&member("@bob:x", Membership::Leave, None), &mut users);
        index.apply_membership(&member("@bob:x", Membership::Join, Some("bob")), &mut users);

        assert!(index.is_joined("@bob:x"));
        assert!(!index.has_left("@bob:x"));
    }

    #[test]
    fn rename_rekeys_without_duplicates() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        index.apply_membership(&member("@bob:x", Membership::Join, Some("bob")), &mut users);

        let change =
            index.apply_membership(&member("@bob:x", Membership::Join, Some("bobby")), &mut users);
        assert_eq!(
            change,
            Some(MembershipChange::Renamed {
                user_id: "@bob:x".into(),
                old_name: "bob".into(),
                new_name: "bobby".into(),
            })
        );
        assert!(index.members_named("bob").is_empty());
        assert_eq!(index.members_named("bobby"), ["@bob:x".to_owned()]);
        assert_eq!(index.joined_count(), 1);
    }

    #[test]
    fn refresh_names_follows_registry_renames() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        index.apply_membership(&member("@bob:x", Membership::Join, Some("bob")), &mut users);

        users.resolve_user("@bob:x").display_name = "bobby".into();
        let changes = index.refresh_names(&users);

        assert_eq!(changes.len(), 1);
        assert_eq!(index.keyed_name("@bob:x"), Some("bobby"));
        assert!(index.refresh_names(&users).is_empty());
    }

    #[test]
    fn invites_update_profile_but_not_index() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        let change = index.apply_membership(
            &member("@carol:x", Membership::Invite, Some("carol")),
            &mut users,
        );
        assert_eq!(change, None);
        assert!(!index.is_joined("@carol:x"));
        assert_eq!(users.display_name("@carol:x"), "carol");
    }

    #[test]
    fn disambiguates_namesakes() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        index.apply_membership(&member("@a1", Membership::Join, Some("alice")), &mut users);
        assert_eq!(index.disambiguated_name("@a1", &users), "alice");

        index.apply_membership(&member("@a2", Membership::Join, Some("alice")), &mut users);
        assert_eq!(index.disambiguated_name("@a1", &users), "alice <@a1>");
        assert_eq!(index.disambiguated_name("@a2", &users), "alice <@a2>");
    }

    #[test]
    fn empty_names_fall_back_to_user_id() {
        let mut users = UserDirectory::new();
        let mut index = MembershipIndex::new();
        index.apply_membership(&member("@anon:x", Membership::Join, None), &mut users);
        assert_eq!(index.disambiguated_name("@anon:x", &users), "@anon:x");
    }
}
