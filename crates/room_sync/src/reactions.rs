//! Per-message, per-viewer reaction toggle logic. Pure: computes the next
//! reaction list so the caller can apply it optimistically and roll back by
//! restoring the previous list.

use shared::{domain::ViewerId, protocol::ReactionEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionState {
    NoReaction,
    Reacted(String),
}

pub fn viewer_state(reactions: &[ReactionEntry], viewer_id: ViewerId) -> ReactionState {
    reactions
        .iter()
        .find(|entry| entry.viewer_id == viewer_id)
        .map(|entry| ReactionState::Reacted(entry.value.clone()))
        .unwrap_or(ReactionState::NoReaction)
}

/// Outcome of a toggle: the full next list plus the value the server should
/// be told about (`None` means the viewer's reaction was cleared).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toggle {
    pub next: Vec<ReactionEntry>,
    pub requested: Option<String>,
}

/// Apply the toggle law for `viewer_id` selecting `value`:
/// none -> reacted(value); reacted(value) -> none; reacted(other) ->
/// reacted(value) as a single replacement, never a visible remove-then-add.
pub fn toggle(reactions: &[ReactionEntry], viewer_id: ViewerId, value: &str) -> Toggle {
    let mut next: Vec<ReactionEntry> = Vec::with_capacity(reactions.len() + 1);
    let mut requested = Some(value.to_string());

    let mut handled = false;
    for entry in reactions {
        if entry.viewer_id != viewer_id {
            next.push(entry.clone());
            continue;
        }
        handled = true;
        if entry.value == value {
            // Toggle-off: drop the entry.
            requested = None;
        } else {
            next.push(ReactionEntry {
                viewer_id,
                value: value.to_string(),
            });
        }
    }

    if !handled {
        next.push(ReactionEntry {
            viewer_id,
            value: value.to_string(),
        });
    }

    Toggle { next, requested }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWER: ViewerId = ViewerId(1);

    fn entry(viewer: i64, value: &str) -> ReactionEntry {
        ReactionEntry {
            viewer_id: ViewerId(viewer),
            value: value.to_string(),
        }
    }

    #[test]
    fn toggling_twice_returns_to_no_reaction() {
        let first = toggle(&[], VIEWER, "👍");
        assert_eq!(first.requested.as_deref(), Some("👍"));
        assert_eq!(viewer_state(&first.next, VIEWER), ReactionState::Reacted("👍".into()));

        let second = toggle(&first.next, VIEWER, "👍");
        assert_eq!(second.requested, None);
        assert_eq!(viewer_state(&second.next, VIEWER), ReactionState::NoReaction);
        assert!(second.next.is_empty());
    }

    #[test]
    fn switching_values_leaves_exactly_one_entry() {
        let first = toggle(&[], VIEWER, "👍");
        let second = toggle(&first.next, VIEWER, "❤️");

        assert_eq!(second.requested.as_deref(), Some("❤️"));
        assert_eq!(second.next, vec![entry(1, "❤️")]);
    }

    #[test]
    fn other_viewers_entries_are_untouched() {
        let current = vec![entry(2, "🎉"), entry(1, "👍")];
        let toggled = toggle(&current, VIEWER, "👍");

        assert_eq!(toggled.next, vec![entry(2, "🎉")]);
    }
}
