//! Human-readable room name computation.
//!
//! Priority order, first non-empty result wins:
//! 1. explicit name, with the canonical alias appended as `name <alias>` when set
//! 2. canonical alias
//! 3. up to two joined members other than the local user, ranked by user ID
//! 4. the same over members that left
//! 5. `Empty room (<room id>)`

use crate::{membership::MembershipIndex, users::UserRegistry};

/// Everything the resolver reads. Borrowed from the room; never mutated.
pub struct NamingInputs<'a> {
    pub room_id: &'a str,
    pub name: &'a str,
    pub canonical_alias: &'a str,
    pub local_user_id: Option<&'a str>,
    pub members: &'a MembershipIndex,
    pub users: &'a dyn UserRegistry,
}

/// Compute the display name for the current room state.
pub fn compute_display_name(inputs: &NamingInputs<'_>) -> String {
    if !inputs.name.is_empty() {
        if inputs.canonical_alias.is_empty() {
            return inputs.name.to_owned();
        }
        return format!("{} <{}>", inputs.name, inputs.canonical_alias);
    }

    if !inputs.canonical_alias.is_empty() {
        return inputs.canonical_alias.to_owned();
    }

    let joined = inputs.members.joined_members();
    if let Some(name) = name_from_members(joined.iter().map(String::as_str), inputs) {
        return name;
    }

    let left = inputs.members.left_members();
    if let Some(name) = name_from_members(left.iter().map(String::as_str), inputs) {
        return name;
    }

    empty_room_name(inputs.room_id)
}

/// Fallback name for a room with no members of any kind.
pub fn empty_room_name(room_id: &str) -> String {
    format!("Empty room ({room_id})")
}

fn name_from_members<'a>(
    user_ids: impl Iterator<Item = &'a str>,
    inputs: &NamingInputs<'_>,
) -> Option<String> {
    let mut others: Vec<&str> = user_ids
        .filter(|user_id| Some(*user_id) != inputs.local_user_id)
        .collect();
    others.sort_unstable();

    let render = |user_id: &str| inputs.members.disambiguated_name(user_id, inputs.users);
    match others.as_slice() {
        [] => None,
        [only] => Some(render(*only)),
        [first, second] => Some(format!("{} and {}", render(*first), render(*second))),
        [first, rest @ ..] => Some(format!("{} and {} others", render(*first), rest.len())),
    }
}
