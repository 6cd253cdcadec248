use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dao::models::{ClassId, EntryEntity, EntryId},
    dto::{format_timestamp, validation::validate_area_times},
    state::entry_status::{EntryStatus, ResultStatus},
};

/// Public projection of an entry exposed to REST/SSE clients.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct EntrySummary {
    /// Entry identifier.
    pub id: EntryId,
    /// Class the entry runs in.
    pub class_id: ClassId,
    /// Armband number worn by the handler.
    pub armband: i32,
    /// Ring/check-in status.
    pub entry_status: EntryStatus,
    /// Judged result.
    pub result_status: ResultStatus,
    /// Whether a final result was recorded.
    pub is_scored: bool,
    /// Whether the remote lock guard protects the score.
    pub is_locked: bool,
    /// Total search time in seconds.
    pub search_time_seconds: f64,
    /// Times of areas one to three, always three values; unused areas are zero.
    pub area_times: Vec<f64>,
    /// Faults called by the judge.
    pub fault_count: i32,
    /// Correct calls.
    pub correct_count: i32,
    /// Incorrect calls.
    pub incorrect_count: i32,
    /// Points awarded.
    pub points: f64,
    /// Total score.
    pub total_score: f64,
    /// Placement within the class, `0` when unplaced.
    pub final_placement: i32,
    /// RFC 3339 time the score was recorded.
    pub scoring_completed_at: Option<String>,
    /// RFC 3339 time the entry entered the ring.
    pub ring_entered_at: Option<String>,
    /// RFC 3339 time the entry left the ring.
    pub ring_exited_at: Option<String>,
}

impl From<&EntryEntity> for EntrySummary {
    fn from(entry: &EntryEntity) -> Self {
        let area_times = vec![
            entry.area1_time_seconds,
            entry.area2_time_seconds,
            entry.area3_time_seconds,
        ];

        Self {
            id: entry.id,
            class_id: entry.class_id,
            armband: entry.armband,
            entry_status: entry.entry_status,
            result_status: entry.result_status,
            is_scored: entry.is_scored,
            is_locked: entry.is_locked,
            search_time_seconds: entry.search_time_seconds,
            area_times,
            fault_count: entry.fault_count,
            correct_count: entry.correct_count,
            incorrect_count: entry.incorrect_count,
            points: entry.points,
            total_score: entry.total_score,
            final_placement: entry.final_placement,
            scoring_completed_at: format_timestamp(entry.scoring_completed_at),
            ring_entered_at: format_timestamp(entry.ring_entered_at),
            ring_exited_at: format_timestamp(entry.ring_exited_at),
        }
    }
}

/// Result of an entry mutation. `changed` is false when the entry already
/// was in the requested state and no remote write happened.
#[derive(Debug, Serialize, ToSchema)]
pub struct EntryUpdateResponse {
    /// Whether a remote write happened.
    pub changed: bool,
    /// Entry after the operation.
    pub entry: EntrySummary,
}

/// Scoresheet submitted by the judge's table for one entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct ScoreSubmission {
    /// Judged result.
    pub result_status: ResultStatus,
    /// Total search time. Ignored when more than one area time is supplied.
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub search_time_seconds: Option<f64>,
    /// Per-area search times for multi-area searches.
    #[serde(default)]
    #[validate(custom(function = "validate_area_times"))]
    pub area_times: Vec<f64>,
    /// Faults called by the judge.
    #[serde(default)]
    #[validate(range(min = 0))]
    pub fault_count: i32,
    /// Correct calls.
    #[serde(default)]
    #[validate(range(min = 0))]
    pub correct_count: i32,
    /// Incorrect calls.
    #[serde(default)]
    #[validate(range(min = 0))]
    pub incorrect_count: i32,
    /// Points awarded.
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub points: f64,
    /// Total score.
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub total_score: f64,
    /// Class of the entry; looked up remotely when omitted.
    #[serde(default)]
    pub class_id: Option<ClassId>,
    /// Sibling class evaluated alongside the entry's class.
    #[serde(default)]
    pub paired_class_id: Option<ClassId>,
}

impl ScoreSubmission {
    /// Submission carrying only a result, all counters at zero.
    pub fn with_result(result_status: ResultStatus) -> Self {
        Self {
            result_status,
            search_time_seconds: None,
            area_times: Vec::new(),
            fault_count: 0,
            correct_count: 0,
            incorrect_count: 0,
            points: 0.0,
            total_score: 0.0,
            class_id: None,
            paired_class_id: None,
        }
    }
}

/// One item of a batch score submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct BatchScoreItem {
    /// Entry being scored.
    pub entry_id: EntryId,
    /// Its scoresheet.
    #[validate(nested)]
    pub score: ScoreSubmission,
}

/// Several scoresheets submitted at once (e.g. after an offline period).
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct BatchScoreRequest {
    /// Scoresheets, processed in order.
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub items: Vec<BatchScoreItem>,
}

/// Entry that could not be scored within a batch.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchFailure {
    /// Entry that was not scored.
    pub entry_id: EntryId,
    /// Why it failed.
    pub message: String,
}

/// Outcome of a batch submission; items are processed independently.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct BatchScoreResponse {
    /// Entries scored successfully.
    pub succeeded: Vec<EntryId>,
    /// Entries that failed.
    pub failed: Vec<BatchFailure>,
}

/// Payload moving an entry in or out of the ring.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RingRequest {
    /// `true` to enter the ring, `false` to leave it.
    pub in_ring: bool,
}

/// Payload changing an entry's check-in status.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckinRequest {
    /// New check-in status.
    pub status: EntryStatus,
}

/// Query parameters shared by reset and manual completion.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PairedClassParams {
    /// Sibling class evaluated alongside the entry's class.
    #[serde(default)]
    pub paired_class_id: Option<ClassId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_rejects_negative_counts_and_extra_areas() {
        let mut submission = ScoreSubmission::with_result(ResultStatus::Qualified);
        assert!(submission.validate().is_ok());

        submission.fault_count = -1;
        assert!(submission.validate().is_err());

        submission.fault_count = 0;
        submission.area_times = vec![1.0, 2.0, 3.0, 4.0];
        assert!(submission.validate().is_err());
    }

    #[test]
    fn batch_requires_at_least_one_item() {
        let request = BatchScoreRequest { items: Vec::new() };
        assert!(request.validate().is_err());
    }

    #[test]
    fn batch_items_validate_their_scoresheets() {
        let mut score = ScoreSubmission::with_result(ResultStatus::Qualified);
        score.points = -1.0;
        let request = BatchScoreRequest {
            items: vec![BatchScoreItem { entry_id: 1, score }],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn summary_reports_every_area_including_zero_times() {
        let mut entry = EntryEntity::new(1, 2, 101);
        entry.area1_time_seconds = 20.0;
        entry.area2_time_seconds = 15.0;
        let summary = EntrySummary::from(&entry);
        assert_eq!(summary.area_times, vec![20.0, 15.0, 0.0]);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["area_times"], serde_json::json!([20.0, 15.0, 0.0]));
    }
}
