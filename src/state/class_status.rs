//! Class status and the pure part of the completion evaluation: counting
//! scored entries, compensating for a lagging read path and deciding whether
//! and where the class status moves.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dao::models::{EntryEntity, EntryId};

/// Progress of a class through the trial day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ClassStatus {
    /// Nothing scored yet.
    #[default]
    #[serde(rename = "no-status")]
    NoStatus,
    /// Ring being set up.
    #[serde(rename = "setup")]
    Setup,
    /// Judge briefing in progress.
    #[serde(rename = "briefing")]
    Briefing,
    /// Some entries scored.
    #[serde(rename = "in_progress")]
    InProgress,
    /// Every entry scored.
    #[serde(rename = "completed")]
    Completed,
}

impl ClassStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassStatus::NoStatus => "no-status",
            ClassStatus::Setup => "setup",
            ClassStatus::Briefing => "briefing",
            ClassStatus::InProgress => "in_progress",
            ClassStatus::Completed => "completed",
        }
    }
}

/// Where the entries used for a tally were read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    /// Local mirror, already reflecting this client's writes.
    Mirror,
    /// Remote read path, possibly served by a lagging replica.
    Remote,
}

/// Hints describing the mutation that triggered a completion check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionHints {
    /// Entry whose score was just written.
    pub just_scored: Option<EntryId>,
    /// Entry whose score was just cleared.
    pub just_reset: Option<EntryId>,
    /// The check originates from a reset and must bypass the boundary gate.
    pub is_reset: bool,
}

impl CompletionHints {
    /// Hints after `entry_id` received a score.
    pub fn scored(entry_id: EntryId) -> Self {
        Self {
            just_scored: Some(entry_id),
            ..Self::default()
        }
    }

    /// Hints after the score of `entry_id` was cleared.
    pub fn reset(entry_id: EntryId) -> Self {
        Self {
            just_reset: Some(entry_id),
            is_reset: true,
            ..Self::default()
        }
    }
}

/// Scored/total counts of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreTally {
    /// Entries with a final result.
    pub scored: usize,
    /// Entries in the class.
    pub total: usize,
}

impl ScoreTally {
    /// Count scored entries, compensating remote reads with the mutation hints.
    ///
    /// A hint only counts when its entry belongs to the fetched roster.
    pub fn count(
        entries: &[EntryEntity],
        source: EntrySource,
        hints: &CompletionHints,
        compensate: bool,
    ) -> Self {
        let scored_ids = entries
            .iter()
            .filter(|entry| entry.is_scored)
            .map(|entry| entry.id)
            .collect::<HashSet<_>>();

        let mut scored = scored_ids.len();
        let total = entries.len();

        if source == EntrySource::Remote && compensate {
            if let Some(id) = hints.just_scored {
                let in_roster = entries.iter().any(|entry| entry.id == id);
                if in_roster && !scored_ids.contains(&id) {
                    scored += 1;
                }
            }
            if let Some(id) = hints.just_reset {
                if scored_ids.contains(&id) {
                    scored = scored.saturating_sub(1);
                }
            }
        }

        Self {
            scored: scored.min(total),
            total,
        }
    }

    /// Whether the class status should be rewritten at all.
    ///
    /// Outside of resets only the first and the last scored entry move the
    /// class; scores in the middle of a class leave it `in_progress`.
    pub fn crosses_boundary(&self, is_reset: bool) -> bool {
        is_reset || self.scored == 1 || self.scored == self.total
    }

    /// Status the class should be in given the tally.
    pub fn resolve(&self) -> ClassStatus {
        match (self.scored, self.total) {
            (_, 0) | (0, _) => ClassStatus::NoStatus,
            (scored, total) if scored == total => ClassStatus::Completed,
            _ => ClassStatus::InProgress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(scored: &[bool]) -> Vec<EntryEntity> {
        scored
            .iter()
            .enumerate()
            .map(|(index, is_scored)| {
                let mut entry = EntryEntity::new(index as EntryId + 1, 10, index as i32 + 1);
                entry.is_scored = *is_scored;
                entry
            })
            .collect()
    }

    #[test]
    fn resolve_covers_all_three_states() {
        assert_eq!(ScoreTally { scored: 0, total: 3 }.resolve(), ClassStatus::NoStatus);
        assert_eq!(ScoreTally { scored: 2, total: 3 }.resolve(), ClassStatus::InProgress);
        assert_eq!(ScoreTally { scored: 3, total: 3 }.resolve(), ClassStatus::Completed);
        assert_eq!(ScoreTally { scored: 0, total: 0 }.resolve(), ClassStatus::NoStatus);
    }

    #[test]
    fn mirror_reads_are_taken_as_is() {
        let rows = entries(&[true, false, false]);
        let tally = ScoreTally::count(&rows, EntrySource::Mirror, &CompletionHints::scored(2), true);
        assert_eq!(tally, ScoreTally { scored: 1, total: 3 });
    }

    #[test]
    fn remote_reads_count_the_just_scored_entry() {
        let rows = entries(&[true, false, false]);
        let tally = ScoreTally::count(&rows, EntrySource::Remote, &CompletionHints::scored(2), true);
        assert_eq!(tally, ScoreTally { scored: 2, total: 3 });

        let already_visible =
            ScoreTally::count(&rows, EntrySource::Remote, &CompletionHints::scored(1), true);
        assert_eq!(already_visible, ScoreTally { scored: 1, total: 3 });
    }

    #[test]
    fn hints_for_entries_of_another_class_are_ignored() {
        let rows = entries(&[false, false]);
        let tally = ScoreTally::count(&rows, EntrySource::Remote, &CompletionHints::scored(77), true);
        assert_eq!(tally, ScoreTally { scored: 0, total: 2 });
    }

    #[test]
    fn remote_reads_discount_the_just_reset_entry() {
        let rows = entries(&[true, true, true]);
        let tally = ScoreTally::count(&rows, EntrySource::Remote, &CompletionHints::reset(2), true);
        assert_eq!(tally, ScoreTally { scored: 2, total: 3 });
    }

    #[test]
    fn compensation_can_be_disabled() {
        let rows = entries(&[true, true, true]);
        let tally = ScoreTally::count(&rows, EntrySource::Remote, &CompletionHints::reset(2), false);
        assert_eq!(tally, ScoreTally { scored: 3, total: 3 });
    }

    #[test]
    fn boundary_gate_skips_middle_scores_but_not_resets() {
        let middle = ScoreTally { scored: 2, total: 4 };
        assert!(!middle.crosses_boundary(false));
        assert!(middle.crosses_boundary(true));
        assert!(ScoreTally { scored: 1, total: 4 }.crosses_boundary(false));
        assert!(ScoreTally { scored: 4, total: 4 }.crosses_boundary(false));
    }
}
