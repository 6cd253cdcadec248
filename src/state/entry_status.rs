use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle of an entry on the trial floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum EntryStatus {
    /// Not checked in (also the state after a reset).
    #[default]
    #[serde(rename = "no-status")]
    NoStatus,
    /// Present at the check-in table.
    #[serde(rename = "checked-in")]
    CheckedIn,
    /// Currently searching; never scored.
    #[serde(rename = "in-ring")]
    InRing,
    /// Run finished and scored.
    #[serde(rename = "completed")]
    Completed,
    /// Did not show up.
    #[serde(rename = "absent")]
    Absent,
    /// Pulled from the class before running.
    #[serde(rename = "withdrawn")]
    Withdrawn,
}

impl EntryStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::NoStatus => "no-status",
            EntryStatus::CheckedIn => "checked-in",
            EntryStatus::InRing => "in-ring",
            EntryStatus::Completed => "completed",
            EntryStatus::Absent => "absent",
            EntryStatus::Withdrawn => "withdrawn",
        }
    }

    /// Statuses a steward may set from the check-in table.
    pub fn is_checkin_value(&self) -> bool {
        matches!(
            self,
            EntryStatus::CheckedIn
                | EntryStatus::Absent
                | EntryStatus::Withdrawn
                | EntryStatus::NoStatus
        )
    }
}

/// Outcome recorded by the judge for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// No final result yet.
    #[default]
    Pending,
    /// Qualifying run.
    Qualified,
    /// Non-qualifying run.
    NotQualified,
    /// Dog was absent.
    Absent,
    /// Excused by the judge.
    Excused,
    /// Withdrawn by the handler.
    Withdrawn,
    /// Marked complete by hand without a scoresheet.
    ManualComplete,
}

impl ResultStatus {
    /// Terminal results mark the entry as scored.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultStatus::Pending)
    }
}

/// Ring movement requested by the steward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingMove {
    /// Step into the ring.
    Enter,
    /// Leave the ring.
    Exit,
}

impl RingMove {
    /// Map the `in_ring` flag used by the scoring UI.
    pub fn from_flag(in_ring: bool) -> Self {
        if in_ring { RingMove::Enter } else { RingMove::Exit }
    }
}

/// Error returned when an entry cannot move to the requested status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entry transition: {requested} cannot be applied while {from:?} (scored: {is_scored})")]
pub struct InvalidTransition {
    /// Status the entry was in.
    pub from: EntryStatus,
    /// Whether the entry carried a score.
    pub is_scored: bool,
    /// Human readable description of the request.
    pub requested: &'static str,
}

/// Result of planning a ring move against the cached state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingPlan {
    /// The entry is already where the steward wants it.
    AlreadyThere,
    /// Write this status.
    MoveTo(EntryStatus),
}

/// Compute the status a ring move leads to.
///
/// Entering moves an unscored entry into the ring. Leaving lands on
/// `completed` when the entry is scored and back on `no-status` otherwise, so a
/// scored run is never downgraded.
pub fn plan_ring_move(
    current: EntryStatus,
    is_scored: bool,
    movement: RingMove,
) -> Result<RingPlan, InvalidTransition> {
    let in_ring = current == EntryStatus::InRing;

    match movement {
        RingMove::Enter if in_ring => Ok(RingPlan::AlreadyThere),
        RingMove::Exit if !in_ring => Ok(RingPlan::AlreadyThere),
        RingMove::Enter if is_scored => Err(InvalidTransition {
            from: current,
            is_scored,
            requested: "enter ring",
        }),
        RingMove::Enter => Ok(RingPlan::MoveTo(EntryStatus::InRing)),
        RingMove::Exit if is_scored => Ok(RingPlan::MoveTo(EntryStatus::Completed)),
        RingMove::Exit => Ok(RingPlan::MoveTo(EntryStatus::NoStatus)),
    }
}

/// Validate a check-in status change.
///
/// Only check-in values are accepted, and a scored entry keeps its
/// `completed` status until its score is reset. An unscored entry may leave
/// the ring this way, e.g. when it is withdrawn mid-run.
pub fn plan_checkin(
    current: EntryStatus,
    is_scored: bool,
    requested: EntryStatus,
) -> Result<EntryStatus, InvalidTransition> {
    if !requested.is_checkin_value() {
        return Err(InvalidTransition {
            from: current,
            is_scored,
            requested: "check-in with a non check-in status",
        });
    }
    if is_scored {
        return Err(InvalidTransition {
            from: current,
            is_scored,
            requested: "check-in change",
        });
    }
    Ok(requested)
}

/// Whether a manual completion would change anything.
pub fn needs_manual_completion(is_scored: bool) -> bool {
    !is_scored
}

/// Status written when a score submission lands.
pub fn status_after_score(result: ResultStatus) -> (bool, EntryStatus) {
    if result.is_terminal() {
        (true, EntryStatus::Completed)
    } else {
        (false, EntryStatus::InRing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entering_ring_from_no_status_or_checked_in() {
        assert_eq!(
            plan_ring_move(EntryStatus::NoStatus, false, RingMove::Enter),
            Ok(RingPlan::MoveTo(EntryStatus::InRing))
        );
        assert_eq!(
            plan_ring_move(EntryStatus::CheckedIn, false, RingMove::Enter),
            Ok(RingPlan::MoveTo(EntryStatus::InRing))
        );
    }

    #[test]
    fn repeated_ring_moves_are_noops() {
        assert_eq!(
            plan_ring_move(EntryStatus::InRing, false, RingMove::Enter),
            Ok(RingPlan::AlreadyThere)
        );
        assert_eq!(
            plan_ring_move(EntryStatus::CheckedIn, false, RingMove::Exit),
            Ok(RingPlan::AlreadyThere)
        );
    }

    #[test]
    fn leaving_ring_never_downgrades_a_scored_entry() {
        assert_eq!(
            plan_ring_move(EntryStatus::InRing, false, RingMove::Exit),
            Ok(RingPlan::MoveTo(EntryStatus::NoStatus))
        );
        assert_eq!(
            plan_ring_move(EntryStatus::InRing, true, RingMove::Exit),
            Ok(RingPlan::MoveTo(EntryStatus::Completed))
        );
    }

    #[test]
    fn scored_entry_cannot_enter_ring() {
        let err = plan_ring_move(EntryStatus::Completed, true, RingMove::Enter).unwrap_err();
        assert_eq!(err.from, EntryStatus::Completed);
        assert!(err.is_scored);
    }

    #[test]
    fn checkin_accepts_only_checkin_values() {
        assert_eq!(
            plan_checkin(EntryStatus::NoStatus, false, EntryStatus::Absent),
            Ok(EntryStatus::Absent)
        );
        assert!(plan_checkin(EntryStatus::NoStatus, false, EntryStatus::InRing).is_err());
        assert!(plan_checkin(EntryStatus::NoStatus, false, EntryStatus::Completed).is_err());
    }

    #[test]
    fn checkin_never_touches_scored_entries() {
        assert!(plan_checkin(EntryStatus::Completed, true, EntryStatus::CheckedIn).is_err());
        assert!(plan_checkin(EntryStatus::InRing, true, EntryStatus::Absent).is_err());
        assert_eq!(
            plan_checkin(EntryStatus::InRing, false, EntryStatus::Absent),
            Ok(EntryStatus::Absent)
        );
        assert_eq!(
            plan_checkin(EntryStatus::InRing, false, EntryStatus::NoStatus),
            Ok(EntryStatus::NoStatus)
        );
        assert_eq!(
            plan_checkin(EntryStatus::Absent, false, EntryStatus::CheckedIn),
            Ok(EntryStatus::CheckedIn)
        );
    }

    #[test]
    fn terminal_results_complete_the_entry() {
        assert_eq!(
            status_after_score(ResultStatus::Qualified),
            (true, EntryStatus::Completed)
        );
        assert_eq!(
            status_after_score(ResultStatus::NotQualified),
            (true, EntryStatus::Completed)
        );
        assert_eq!(
            status_after_score(ResultStatus::Pending),
            (false, EntryStatus::InRing)
        );
    }

    #[test]
    fn statuses_use_their_wire_names() {
        assert_eq!(
            serde_json::to_string(&EntryStatus::CheckedIn).unwrap(),
            "\"checked-in\""
        );
        assert_eq!(
            serde_json::to_string(&ResultStatus::ManualComplete).unwrap(),
            "\"manual_complete\""
        );
        assert_eq!(EntryStatus::InRing.as_str(), "in-ring");
    }
}
