use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dao::models::{ClassEntity, ClassId, EntryId},
    services::completion_service::{ClassEvaluation, CompletionOutcome},
    state::class_status::{ClassStatus, ScoreTally},
};

/// Public projection of a class together with its scoring progress.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ClassSummary {
    /// Class identifier.
    pub id: ClassId,
    /// Trial hosting the class.
    pub trial_id: i64,
    /// Search element.
    pub element: String,
    /// Level.
    pub level: String,
    /// Current status.
    pub class_status: ClassStatus,
    /// Whether the judge signed off the results.
    pub is_scoring_finalized: bool,
    /// Sibling class of a combined view.
    pub paired_class_id: Option<ClassId>,
    /// Entries with a final result.
    pub scored: usize,
    /// Entries in the class.
    pub total: usize,
}

impl From<(ClassEntity, ScoreTally)> for ClassSummary {
    fn from((class, tally): (ClassEntity, ScoreTally)) -> Self {
        Self {
            id: class.id,
            trial_id: class.trial_id,
            element: class.element,
            level: class.level,
            class_status: class.class_status,
            is_scoring_finalized: class.is_scoring_finalized,
            paired_class_id: class.paired_class_id,
            scored: tally.scored,
            total: tally.total,
        }
    }
}

/// Manually requested completion evaluation.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CompletionCheckRequest {
    /// Sibling class evaluated alongside.
    #[serde(default)]
    pub paired_class_id: Option<ClassId>,
    /// Entry whose score was just written.
    #[serde(default)]
    pub just_scored: Option<EntryId>,
    /// Entry whose score was just cleared.
    #[serde(default)]
    pub just_reset: Option<EntryId>,
    /// Bypass the first/last-score gate.
    #[serde(default)]
    pub is_reset: bool,
}

/// Result of evaluating one class.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClassEvaluationResult {
    /// Evaluated class.
    pub class_id: ClassId,
    /// `updated`, `unchanged`, `skipped` or `failed`.
    pub outcome: String,
    /// Resolved status, when the class was evaluated.
    pub status: Option<ClassStatus>,
    /// Scored entries seen.
    pub scored: Option<usize>,
    /// Entries seen.
    pub total: Option<usize>,
    /// Failure reason.
    pub message: Option<String>,
}

impl From<ClassEvaluation> for ClassEvaluationResult {
    fn from(evaluation: ClassEvaluation) -> Self {
        let class_id = evaluation.class_id;
        match evaluation.outcome {
            CompletionOutcome::Updated { status, tally, .. } => Self {
                class_id,
                outcome: "updated".into(),
                status: Some(status),
                scored: Some(tally.scored),
                total: Some(tally.total),
                message: None,
            },
            CompletionOutcome::Unchanged { status, tally } => Self {
                class_id,
                outcome: "unchanged".into(),
                status: Some(status),
                scored: Some(tally.scored),
                total: Some(tally.total),
                message: None,
            },
            CompletionOutcome::Skipped { tally } => Self {
                class_id,
                outcome: "skipped".into(),
                status: None,
                scored: Some(tally.scored),
                total: Some(tally.total),
                message: None,
            },
            CompletionOutcome::Failed { reason } => Self {
                class_id,
                outcome: "failed".into(),
                status: None,
                scored: None,
                total: None,
                message: Some(reason),
            },
        }
    }
}

/// Response listing the evaluated classes.
#[derive(Debug, Serialize, ToSchema)]
pub struct CompletionCheckResponse {
    /// One result per evaluated class.
    pub results: Vec<ClassEvaluationResult>,
}

/// Response returned after adding a class to the mirror sync.
#[derive(Debug, Serialize, ToSchema)]
pub struct WatchResponse {
    /// Newly watched class.
    pub class_id: ClassId,
    /// Whether the sync was running when the class was added.
    pub sync_running: bool,
    /// Every watched class.
    pub watched_classes: Vec<ClassId>,
}
