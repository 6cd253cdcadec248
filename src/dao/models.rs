use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnNull, serde_as};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::state::{
    class_status::ClassStatus,
    entry_status::{EntryStatus, ResultStatus},
};

/// Primary key of an `entries` row.
pub type EntryId = i64;
/// Primary key of a `classes` row.
pub type ClassId = i64;
/// Primary key of a `trials` row.
pub type TrialId = i64;
/// Primary key of a `shows` row.
pub type ShowId = i64;

/// One dog's run in one class, as stored in the `entries` table.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryEntity {
    /// Primary key of the entry.
    pub id: EntryId,
    /// Class the entry runs in.
    pub class_id: ClassId,
    /// Armband number shown to the steward.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub armband: i32,
    /// Total search time in seconds (sum of the areas for multi-area searches).
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub search_time_seconds: f64,
    /// Time of the first search area.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub area1_time_seconds: f64,
    /// Time of the second search area.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub area2_time_seconds: f64,
    /// Time of the third search area.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub area3_time_seconds: f64,
    /// Faults called by the judge.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub fault_count: i32,
    /// Correct calls.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub correct_count: i32,
    /// Incorrect calls.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub incorrect_count: i32,
    /// Points awarded (ranking criterion at nationals events).
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub points: f64,
    /// Total score.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub total_score: f64,
    /// Final placement written by the ranking procedure; 0 means unplaced.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub final_placement: i32,
    /// Set once a final result is recorded.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub is_scored: bool,
    /// Judged result.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub result_status: ResultStatus,
    /// Ring/check-in status.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub entry_status: EntryStatus,
    /// Excused by the judge; never a placement candidate.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub is_excused: bool,
    /// Server-side write guard on the protected scoring fields.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub is_locked: bool,
    /// When the final result was recorded.
    #[serde_as(as = "Option<Rfc3339>")]
    pub scoring_completed_at: Option<OffsetDateTime>,
    /// When the entry last entered the ring.
    #[serde_as(as = "Option<Rfc3339>")]
    pub ring_entered_at: Option<OffsetDateTime>,
    /// When the entry last left the ring.
    #[serde_as(as = "Option<Rfc3339>")]
    pub ring_exited_at: Option<OffsetDateTime>,
    /// Last remote modification.
    #[serde_as(as = "Option<Rfc3339>")]
    pub updated_at: Option<OffsetDateTime>,
}

impl EntryEntity {
    /// Build a freshly seeded, unscored entry.
    pub fn new(id: EntryId, class_id: ClassId, armband: i32) -> Self {
        Self {
            id,
            class_id,
            armband,
            search_time_seconds: 0.0,
            area1_time_seconds: 0.0,
            area2_time_seconds: 0.0,
            area3_time_seconds: 0.0,
            fault_count: 0,
            correct_count: 0,
            incorrect_count: 0,
            points: 0.0,
            total_score: 0.0,
            final_placement: 0,
            is_scored: false,
            result_status: ResultStatus::Pending,
            entry_status: EntryStatus::NoStatus,
            is_excused: false,
            is_locked: false,
            scoring_completed_at: None,
            ring_entered_at: None,
            ring_exited_at: None,
            updated_at: None,
        }
    }
}

/// Partial update of an `entries` row. `None` fields are left untouched; the
/// nested options on timestamps distinguish "leave" from "clear".
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryPatch {
    /// New total search time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_time_seconds: Option<f64>,
    /// New first area time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area1_time_seconds: Option<f64>,
    /// New second area time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area2_time_seconds: Option<f64>,
    /// New third area time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area3_time_seconds: Option<f64>,
    /// New fault count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_count: Option<i32>,
    /// New correct count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_count: Option<i32>,
    /// New incorrect count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incorrect_count: Option<i32>,
    /// New points.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
    /// New total score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_score: Option<f64>,
    /// New placement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_placement: Option<i32>,
    /// New scored flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_scored: Option<bool>,
    /// New result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_status: Option<ResultStatus>,
    /// New ring/check-in status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_status: Option<EntryStatus>,
    /// `Some(None)` clears the scoring time.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Option<Rfc3339>>")]
    pub scoring_completed_at: Option<Option<OffsetDateTime>>,
    /// `Some(None)` clears the ring entry time.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Option<Rfc3339>>")]
    pub ring_entered_at: Option<Option<OffsetDateTime>>,
    /// `Some(None)` clears the ring exit time.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Option<Rfc3339>>")]
    pub ring_exited_at: Option<Option<OffsetDateTime>>,
    /// Modification time to record, for flushed mirror rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Rfc3339>")]
    pub updated_at: Option<OffsetDateTime>,
}

impl EntryPatch {
    /// Patch that only moves the entry status.
    pub fn status(status: EntryStatus) -> Self {
        Self {
            entry_status: Some(status),
            ..Self::default()
        }
    }

    /// Whether the patch rewrites fields the remote lock guard protects.
    pub fn touches_protected_fields(&self) -> bool {
        self.search_time_seconds.is_some()
            || self.area1_time_seconds.is_some()
            || self.area2_time_seconds.is_some()
            || self.area3_time_seconds.is_some()
            || self.fault_count.is_some()
            || self.correct_count.is_some()
            || self.incorrect_count.is_some()
            || self.points.is_some()
            || self.total_score.is_some()
            || self.final_placement.is_some()
            || self.is_scored.is_some()
            || self.result_status.is_some()
    }

    /// Apply the patch to an in-memory row the way the remote `PATCH` would.
    pub fn apply_to(&self, entry: &mut EntryEntity) {
        macro_rules! assign {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field.clone() {
                    entry.$field = value;
                })*
            };
        }

        assign!(
            search_time_seconds,
            area1_time_seconds,
            area2_time_seconds,
            area3_time_seconds,
            fault_count,
            correct_count,
            incorrect_count,
            points,
            total_score,
            final_placement,
            is_scored,
            result_status,
            entry_status,
            scoring_completed_at,
            ring_entered_at,
            ring_exited_at,
        );

        if let Some(updated_at) = self.updated_at {
            entry.updated_at = Some(updated_at);
        }
    }

    /// Full copy of a row's mutable fields, used when flushing a dirty mirror row.
    pub fn from_entity(entry: &EntryEntity) -> Self {
        Self {
            search_time_seconds: Some(entry.search_time_seconds),
            area1_time_seconds: Some(entry.area1_time_seconds),
            area2_time_seconds: Some(entry.area2_time_seconds),
            area3_time_seconds: Some(entry.area3_time_seconds),
            fault_count: Some(entry.fault_count),
            correct_count: Some(entry.correct_count),
            incorrect_count: Some(entry.incorrect_count),
            points: Some(entry.points),
            total_score: Some(entry.total_score),
            final_placement: Some(entry.final_placement),
            is_scored: Some(entry.is_scored),
            result_status: Some(entry.result_status),
            entry_status: Some(entry.entry_status),
            scoring_completed_at: Some(entry.scoring_completed_at),
            ring_entered_at: Some(entry.ring_entered_at),
            ring_exited_at: Some(entry.ring_exited_at),
            updated_at: entry.updated_at,
        }
    }
}

/// A judged group of entries, as stored in the `classes` table.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEntity {
    /// Primary key of the class.
    pub id: ClassId,
    /// Trial hosting the class.
    pub trial_id: TrialId,
    /// Search element (e.g. "Containers", "Interior").
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub element: String,
    /// Level (e.g. "Novice A").
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub level: String,
    /// Progress of the class.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub class_status: ClassStatus,
    /// Set when the judge signed off the results.
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub is_scoring_finalized: bool,
    /// Sibling class judged alongside this one in a combined A/B view.
    #[serde(default)]
    pub paired_class_id: Option<ClassId>,
    /// Last remote modification.
    #[serde_as(as = "Option<Rfc3339>")]
    pub updated_at: Option<OffsetDateTime>,
}

impl ClassEntity {
    /// Build a class row that has not started yet.
    pub fn new(id: ClassId, trial_id: TrialId, element: &str, level: &str) -> Self {
        Self {
            id,
            trial_id,
            element: element.to_string(),
            level: level.to_string(),
            class_status: ClassStatus::NoStatus,
            is_scoring_finalized: false,
            paired_class_id: None,
            updated_at: None,
        }
    }
}

/// Partial update of a `classes` row.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassPatch {
    /// New class status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_status: Option<ClassStatus>,
    /// New sign-off flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_scoring_finalized: Option<bool>,
    /// Modification time to record.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Rfc3339>")]
    pub updated_at: Option<OffsetDateTime>,
}

impl ClassPatch {
    /// Apply the patch to an in-memory row the way the remote `PATCH` would.
    pub fn apply_to(&self, class: &mut ClassEntity) {
        if let Some(status) = self.class_status {
            class.class_status = status;
        }
        if let Some(finalized) = self.is_scoring_finalized {
            class.is_scoring_finalized = finalized;
        }
        if let Some(updated_at) = self.updated_at {
            class.updated_at = Some(updated_at);
        }
    }
}

/// A trial day hosting several classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialEntity {
    /// Primary key of the trial.
    pub id: TrialId,
    /// Show the trial belongs to.
    pub show_id: ShowId,
    /// Display name.
    #[serde(default)]
    pub trial_name: String,
}

/// A show (event) grouping trials under one license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowEntity {
    /// Primary key of the show.
    pub id: ShowId,
    /// License the show runs under.
    pub license_key: String,
    /// Free-text show type, e.g. "Regular" or "AKC Nationals".
    #[serde(default)]
    pub show_type: String,
}

impl ShowEntity {
    /// Whether placements follow the nationals (points-first) ranking.
    pub fn is_nationals(&self) -> bool {
        self.show_type.to_lowercase().contains("nationals")
    }
}

/// Row of the entry/class join view used to resolve an entry's class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryClassLink {
    /// Entry side of the join.
    pub entry_id: EntryId,
    /// Class side of the join.
    pub class_id: ClassId,
}

/// Arguments of the remote placement recalculation procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementRequest {
    /// Classes to rank.
    #[serde(rename = "p_class_ids")]
    pub class_ids: Vec<ClassId>,
    /// License key of the owning show.
    #[serde(rename = "p_license_key")]
    pub license_key: String,
    /// Rank by points first.
    #[serde(rename = "p_is_nationals")]
    pub is_nationals: bool,
}

/// Remote tables the mirror and the change subscriptions know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `entries` table.
    Entries,
    /// `classes` table.
    Classes,
}

impl Table {
    /// Remote table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Entries => "entries",
            Table::Classes => "classes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of remote mutation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Row created.
    Insert,
    /// Row modified.
    Update,
    /// Row removed.
    Delete,
}

/// Typed row carried by a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRecord {
    /// Row of `entries`.
    Entry(EntryEntity),
    /// Row of `classes`.
    Class(ClassEntity),
}

impl ChangeRecord {
    /// Table the record belongs to.
    pub fn table(&self) -> Table {
        match self {
            ChangeRecord::Entry(_) => Table::Entries,
            ChangeRecord::Class(_) => Table::Classes,
        }
    }

    /// Primary key of the row.
    pub fn key(&self) -> i64 {
        match self {
            ChangeRecord::Entry(entry) => entry.id,
            ChangeRecord::Class(class) => class.id,
        }
    }

    /// Remote modification time of the row, when known.
    pub fn updated_at(&self) -> Option<OffsetDateTime> {
        match self {
            ChangeRecord::Entry(entry) => entry.updated_at,
            ChangeRecord::Class(class) => class.updated_at,
        }
    }

    /// Rendered value of a filterable column, if the table has it.
    fn column_value(&self, column: &str) -> Option<String> {
        match (self, column) {
            (ChangeRecord::Entry(entry), "id") => Some(entry.id.to_string()),
            (ChangeRecord::Entry(entry), "class_id") => Some(entry.class_id.to_string()),
            (ChangeRecord::Entry(entry), "entry_status") => {
                Some(entry.entry_status.as_str().to_string())
            }
            (ChangeRecord::Class(class), "id") => Some(class.id.to_string()),
            (ChangeRecord::Class(class), "trial_id") => Some(class.trial_id.to_string()),
            (ChangeRecord::Class(class), "class_status") => {
                Some(class.class_status.as_str().to_string())
            }
            _ => None,
        }
    }
}

/// A remote mutation delivered through a change subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// What happened to the row.
    pub kind: ChangeKind,
    /// Row after the change.
    pub record: ChangeRecord,
}

/// Error returned when a subscription filter string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid change filter `{0}`: expected `column=eq.value`")]
pub struct InvalidChangeFilter(pub String);

/// Equality filter of a change subscription, rendered as `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    /// Filtered column.
    pub column: String,
    /// Value the column must equal.
    pub value: String,
}

impl ChangeFilter {
    /// Filter rows whose `column` equals `value`.
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// Whether the record satisfies the filter. Unknown columns never match.
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        record
            .column_value(&self.column)
            .is_some_and(|value| value == self.value)
    }
}

impl fmt::Display for ChangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for ChangeFilter {
    type Err = InvalidChangeFilter;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (column, rest) = raw
            .split_once('=')
            .ok_or_else(|| InvalidChangeFilter(raw.to_string()))?;
        let value = rest
            .strip_prefix("eq.")
            .ok_or_else(|| InvalidChangeFilter(raw.to_string()))?;

        if column.trim().is_empty() || value.is_empty() {
            return Err(InvalidChangeFilter(raw.to_string()));
        }

        Ok(Self::eq(column.trim(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_filter_round_trips_through_its_text_form() {
        let filter: ChangeFilter = "class_id=eq.42".parse().unwrap();
        assert_eq!(filter, ChangeFilter::eq("class_id", 42));
        assert_eq!(filter.to_string(), "class_id=eq.42");
    }

    #[test]
    fn change_filter_rejects_other_operators() {
        assert!("class_id=gt.4".parse::<ChangeFilter>().is_err());
        assert!("class_id".parse::<ChangeFilter>().is_err());
        assert!("=eq.4".parse::<ChangeFilter>().is_err());
        assert!("class_id=eq.".parse::<ChangeFilter>().is_err());
    }

    #[test]
    fn change_filter_matches_on_known_columns_only() {
        let record = ChangeRecord::Entry(EntryEntity::new(7, 42, 101));
        assert!(ChangeFilter::eq("class_id", 42).matches(&record));
        assert!(!ChangeFilter::eq("class_id", 43).matches(&record));
        assert!(!ChangeFilter::eq("trial_id", 42).matches(&record));
    }

    #[test]
    fn entry_rows_tolerate_nulls_in_scoring_columns() {
        let raw = r#"{
            "id": 1,
            "class_id": 2,
            "armband": null,
            "search_time_seconds": null,
            "fault_count": 3,
            "result_status": "qualified",
            "entry_status": "completed",
            "is_scored": true,
            "scoring_completed_at": "2026-03-14T10:15:00Z",
            "updated_at": null
        }"#;

        let entry: EntryEntity = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.armband, 0);
        assert_eq!(entry.search_time_seconds, 0.0);
        assert_eq!(entry.fault_count, 3);
        assert_eq!(entry.result_status, ResultStatus::Qualified);
        assert_eq!(entry.entry_status, EntryStatus::Completed);
        assert!(entry.scoring_completed_at.is_some());
        assert!(entry.updated_at.is_none());
    }

    #[test]
    fn patch_serializes_only_touched_fields_and_explicit_clears() {
        let patch = EntryPatch {
            entry_status: Some(EntryStatus::NoStatus),
            ring_entered_at: Some(None),
            ..EntryPatch::default()
        };

        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"entry_status": "no-status", "ring_entered_at": null})
        );
        assert!(!patch.touches_protected_fields());
    }

    #[test]
    fn nationals_detection_is_case_insensitive() {
        let show = ShowEntity {
            id: 1,
            license_key: "L-1".into(),
            show_type: "AKC NATIONALS".into(),
        };
        assert!(show.is_nationals());

        let regular = ShowEntity {
            show_type: "Regular".into(),
            ..show
        };
        assert!(!regular.is_nationals());
    }
}
