//! Placement ranking as performed by the remote `recalculate_class_placements`
//! procedure. The in-memory store runs it locally; the PostgREST backend relies
//! on the database function, which applies the same ordering.

use std::cmp::Ordering;

use crate::{
    dao::models::{EntryEntity, EntryId},
    state::entry_status::ResultStatus,
};

/// Ordering rules selected by the competition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingRule {
    /// Fewest faults first, then fastest time.
    Regular,
    /// Most points first, then fastest time.
    Nationals,
}

impl RankingRule {
    /// Rule used by a show.
    pub fn for_show(is_nationals: bool) -> Self {
        if is_nationals {
            RankingRule::Nationals
        } else {
            RankingRule::Regular
        }
    }

    fn compare(&self, left: &EntryEntity, right: &EntryEntity) -> Ordering {
        let primary = match self {
            RankingRule::Regular => left.fault_count.cmp(&right.fault_count),
            RankingRule::Nationals => right.points.total_cmp(&left.points),
        };

        primary
            .then_with(|| compare_search_time(left.search_time_seconds, right.search_time_seconds))
            .then_with(|| left.id.cmp(&right.id))
    }
}

/// Zero (or unrecorded) times are the slowest possible time.
fn compare_search_time(left: f64, right: f64) -> Ordering {
    match (left > 0.0, right > 0.0) {
        (true, true) => left.total_cmp(&right),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}

/// Whether the entry competes for a placement at all.
pub fn is_candidate(entry: &EntryEntity) -> bool {
    entry.result_status == ResultStatus::Qualified && !entry.is_excused
}

/// Compute placements for `entries`: candidates get 1..=n, everyone else 0.
pub fn rank_entries<'a, I>(entries: I, rule: RankingRule) -> Vec<(EntryId, i32)>
where
    I: IntoIterator<Item = &'a EntryEntity>,
{
    let mut candidates = Vec::new();
    let mut placements = Vec::new();

    for entry in entries {
        if is_candidate(entry) {
            candidates.push(entry);
        } else {
            placements.push((entry.id, 0));
        }
    }

    candidates.sort_by(|left, right| rule.compare(left, right));

    placements.extend(
        candidates
            .into_iter()
            .enumerate()
            .map(|(index, entry)| (entry.id, index as i32 + 1)),
    );

    placements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qualified(id: EntryId, faults: i32, points: f64, time: f64) -> EntryEntity {
        let mut entry = EntryEntity::new(id, 1, id as i32 + 100);
        entry.result_status = ResultStatus::Qualified;
        entry.is_scored = true;
        entry.fault_count = faults;
        entry.points = points;
        entry.search_time_seconds = time;
        entry
    }

    fn placement_of(placements: &[(EntryId, i32)], id: EntryId) -> i32 {
        placements
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, place)| *place)
            .unwrap()
    }

    #[test]
    fn regular_ranks_faults_then_time() {
        let entries = vec![
            qualified(1, 1, 0.0, 30.0),
            qualified(2, 0, 0.0, 45.0),
            qualified(3, 0, 0.0, 40.0),
        ];

        let placements = rank_entries(&entries, RankingRule::Regular);
        assert_eq!(placement_of(&placements, 3), 1);
        assert_eq!(placement_of(&placements, 2), 2);
        assert_eq!(placement_of(&placements, 1), 3);
    }

    #[test]
    fn nationals_ranks_points_then_time() {
        let entries = vec![
            qualified(1, 0, 20.0, 50.0),
            qualified(2, 3, 25.0, 70.0),
            qualified(3, 0, 20.0, 42.5),
        ];

        let placements = rank_entries(&entries, RankingRule::Nationals);
        assert_eq!(placement_of(&placements, 2), 1);
        assert_eq!(placement_of(&placements, 3), 2);
        assert_eq!(placement_of(&placements, 1), 3);
    }

    #[test]
    fn missing_time_ranks_below_any_recorded_time() {
        let entries = vec![qualified(1, 0, 10.0, 0.0), qualified(2, 0, 10.0, 119.0)];

        let regular = rank_entries(&entries, RankingRule::Regular);
        assert_eq!(placement_of(&regular, 2), 1);
        assert_eq!(placement_of(&regular, 1), 2);

        let nationals = rank_entries(&entries, RankingRule::Nationals);
        assert_eq!(placement_of(&nationals, 2), 1);
        assert_eq!(placement_of(&nationals, 1), 2);
    }

    #[test]
    fn non_qualified_and_excused_entries_are_unplaced() {
        let mut nq = qualified(1, 0, 0.0, 10.0);
        nq.result_status = ResultStatus::NotQualified;
        let mut excused = qualified(2, 0, 0.0, 12.0);
        excused.is_excused = true;
        let winner = qualified(3, 2, 0.0, 80.0);

        let placements = rank_entries(&[nq, excused, winner], RankingRule::Regular);
        assert_eq!(placement_of(&placements, 1), 0);
        assert_eq!(placement_of(&placements, 2), 0);
        assert_eq!(placement_of(&placements, 3), 1);
    }
}
