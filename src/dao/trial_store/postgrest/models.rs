use serde::{Deserialize, Serialize};

use crate::dao::models::EntryId;

/// Path prefix of the REST API.
pub const REST_PREFIX: &str = "rest/v1";
/// Entries table.
pub const ENTRIES: &str = "entries";
/// Classes table.
pub const CLASSES: &str = "classes";
/// Trials table.
pub const TRIALS: &str = "trials";
/// Shows table.
pub const SHOWS: &str = "shows";
/// View joining entries to their class.
pub const ENTRY_CLASS_VIEW: &str = "view_entry_class_join";
/// Ranking procedure.
pub const RECALCULATE_PLACEMENTS_RPC: &str = "rpc/recalculate_class_placements";
/// Procedure clearing the score write guard.
pub const UNLOCK_ENTRY_RPC: &str = "rpc/unlock_entry_scoring";

/// Error payload PostgREST attaches to non-success responses.
#[derive(Debug, Default, Deserialize)]
pub struct PostgrestErrorBody {
    /// Main error text.
    #[serde(default)]
    pub message: String,
    /// SQLSTATE or PostgREST error code.
    #[serde(default)]
    pub code: Option<String>,
    /// Extra detail.
    #[serde(default)]
    pub details: Option<String>,
    /// Suggested fix.
    #[serde(default)]
    pub hint: Option<String>,
}

impl PostgrestErrorBody {
    /// One-line description used in error messages.
    pub fn describe(&self) -> String {
        let mut text = self.message.clone();
        if let Some(code) = &self.code {
            text = format!("[{code}] {text}");
        }
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            text.push_str(&format!(" ({details})"));
        }
        if let Some(hint) = self.hint.as_deref().filter(|h| !h.is_empty()) {
            text.push_str(&format!(" hint: {hint}"));
        }
        text
    }
}

/// Arguments of the unlock procedure.
#[derive(Debug, Serialize)]
pub struct UnlockEntryArgs {
    /// Entry to unlock.
    pub p_entry_id: EntryId,
}

/// Render the `column=eq.value` query value PostgREST expects.
pub fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_mentions_code_and_hint() {
        let body: PostgrestErrorBody = serde_json::from_str(
            r#"{"message":"entry is locked","code":"P0001","details":null,"hint":"unlock first"}"#,
        )
        .unwrap();
        assert_eq!(body.describe(), "[P0001] entry is locked hint: unlock first");
    }

    #[test]
    fn unlock_args_use_procedure_parameter_names() {
        let value = serde_json::to_value(UnlockEntryArgs { p_entry_id: 9 }).unwrap();
        assert_eq!(value, serde_json::json!({"p_entry_id": 9}));
    }
}
