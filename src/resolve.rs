//! Job type resolution.
//!
//! The routing key is checked first because it reflects the binding the
//! message actually travelled through. Type hints are a fallback for
//! messages published on a generic key.

use crate::error::ResolutionError;
use crate::model::{JobType, ROUTES};

/// Resolve the effective job type. Returns `JobType::Unknown` on no match.
pub fn resolve(routing_key: &str, hints: &[String]) -> JobType {
    match_token(routing_key)
        .or_else(|| hints.iter().find_map(|hint| match_token(hint)))
        .unwrap_or(JobType::Unknown)
}

/// Like [`resolve`], but reports `Unknown` as an error.
pub fn resolve_known(routing_key: &str, hints: &[String]) -> Result<JobType, ResolutionError> {
    match resolve(routing_key, hints) {
        JobType::Unknown => Err(ResolutionError {
            routing_key: routing_key.to_string(),
            hints: hints.to_vec(),
        }),
        known => Ok(known),
    }
}

fn match_token(s: &str) -> Option<JobType> {
    ROUTES
        .iter()
        .find(|route| s.contains(route.token))
        .map(|route| route.job_type)
}
