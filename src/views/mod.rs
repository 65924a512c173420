//! Screen view-models.
//!
//! One module per dashboard screen. Each view owns its lists and exposes
//! plain state for a renderer; every remote write goes through
//! `OptimisticList` so failures roll back the same way everywhere.

pub mod clients;
pub mod dashboard;
pub mod internal_ops;
pub mod leads;
pub mod login;
pub mod prospects;

use crate::error::DashboardError;

/// Trimmed value of a required form field.
pub(crate) fn required(value: &str, field: &str) -> Result<String, DashboardError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DashboardError::validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Blank form fields are stored as null.
pub(crate) fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
