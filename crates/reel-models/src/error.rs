//! Validation error shared by every model constructor.

use thiserror::Error;

/// Result type for model validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Every rule a value violated, collected rather than short-circuited.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", .issues.join("; "))]
pub struct ValidationError {
    issues: Vec<String>,
}

impl ValidationError {
    /// Create an error with a single issue.
    pub fn new(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }

    /// Create an error from a list of issues.
    pub fn from_issues(issues: Vec<String>) -> Self {
        Self { issues }
    }

    /// `Ok(())` when `issues` is empty, otherwise an error carrying all of them.
    pub fn check(issues: Vec<String>) -> ValidationResult<()> {
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Self::from_issues(issues))
        }
    }

    /// The violated rules, in discovery order.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<String> {
        self.issues
    }
}
