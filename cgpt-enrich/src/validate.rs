//! Enrichment response validation

use thiserror::Error;

/// Why a response was rejected; a rejection consumes one attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Empty response")]
    Empty,

    #[error("Response missing sections: {}", .0.join(", "))]
    MissingSections(Vec<String>),
}

/// Accept a response only if it is non-blank and contains every marker
pub fn validate_response(text: &str, required_markers: &[String]) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    let missing: Vec<String> = required_markers
        .iter()
        .filter(|marker| !text.contains(marker.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingSections(missing))
    }
}
