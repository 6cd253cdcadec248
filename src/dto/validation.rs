//! Validation helpers for DTOs.

use validator::ValidationError;

/// Maximum number of timed search areas in one run.
pub const MAX_SEARCH_AREAS: usize = 3;

/// Validates that a list of per-area search times fits the search layout.
///
/// # Examples
///
/// ```ignore
/// validate_area_times(&[31.2, 12.0]) // Ok
/// validate_area_times(&[1.0, 2.0, 3.0, 4.0]) // Err - too many areas
/// validate_area_times(&[-1.0]) // Err - negative time
/// ```
pub fn validate_area_times(times: &[f64]) -> Result<(), ValidationError> {
    if times.len() > MAX_SEARCH_AREAS {
        let mut err = ValidationError::new("area_times_count");
        err.message = Some(
            format!(
                "At most {MAX_SEARCH_AREAS} search areas are timed (got {})",
                times.len()
            )
            .into(),
        );
        return Err(err);
    }

    if times.iter().any(|time| !time.is_finite() || *time < 0.0) {
        let mut err = ValidationError::new("area_times_value");
        err.message = Some("Area times must be finite, non-negative seconds".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_area_times_valid() {
        assert!(validate_area_times(&[]).is_ok());
        assert!(validate_area_times(&[30.0]).is_ok());
        assert!(validate_area_times(&[10.0, 0.0, 12.5]).is_ok());
    }

    #[test]
    fn test_validate_area_times_invalid() {
        assert!(validate_area_times(&[1.0, 2.0, 3.0, 4.0]).is_err());
        assert!(validate_area_times(&[-0.5]).is_err());
        assert!(validate_area_times(&[f64::NAN]).is_err());
    }
}
