//! Error taxonomy for the approval workflow
use std::fmt;

use crate::types::ApprovalStatus;

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("user {user} does not hold '{required_role}' required for approval level {level}")]
    AuthorizationDenied {
        user: String,
        required_role: String,
        level: u8,
    },
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
    #[error("transaction {id} changed concurrently: expected version {expected}, found {found}")]
    Conflict {
        id: String,
        expected: u64,
        found: u64,
    },
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Codec(String),
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cannot {action} while status is '{from}'")]
    InvalidTransition {
        from: ApprovalStatus,
        action: &'static str,
    },
    #[error("rejection reason is required")]
    RejectionReasonRequired,
    #[error("{role} signature is required")]
    MissingSignature { role: String },
    #[error("movement type is required")]
    MissingMovementType,
    #[error("movement type {code} is not active")]
    InactiveMovementType { code: String },
    #[error("movement type {code} requires a {side} warehouse")]
    MissingWarehouse { code: String, side: &'static str },
    #[error("movement code {0} is registered more than once")]
    DuplicateMovementCode(String),
    #[error("approval level {0} is outside 1..=5")]
    ApprovalLevelOutOfRange(u8),
    #[error("conditional logic '{expression}' is malformed: {message}")]
    MalformedPredicate { expression: String, message: String },
    #[error("stock entry has already been submitted")]
    AlreadySubmitted,
    #[error("stock entry has not been submitted")]
    NotSubmitted,
    #[error("stock entry is not editable once approval has started")]
    NotEditable,
    #[error("approval is incomplete: status is '{0}'")]
    ApprovalIncomplete(ApprovalStatus),
    #[error("movement type {code} requires {level} level authorization")]
    InsufficientAuthorization { code: String, level: String },
    #[error("comment text is empty")]
    EmptyComment,
}

impl WorkflowError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable code for presentation layers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AuthorizationDenied { .. } => "AUTHORIZATION_DENIED",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::Conflict { .. } => "CONFLICT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Codec(_) => "CODEC_ERROR",
            Self::Config(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<minicbor::decode::Error> for WorkflowError {
    fn from(value: minicbor::decode::Error) -> Self {
        Self::Codec(value.to_string())
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for WorkflowError {
    fn from(value: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        Self::Codec(value.to_string())
    }
}

/// Non-fatal findings about reference data. Reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationWarning {
    DuplicateRule {
        movement_type: String,
        level: u8,
        roles: Vec<String>,
    },
    CategoryMismatch {
        code: String,
        category: String,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for ConfigurationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateRule {
                movement_type,
                level,
                roles,
            } => write!(
                f,
                "{} enabled rules for movement type {movement_type} at level {level}: {}",
                roles.len(),
                roles.join(", ")
            ),
            Self::CategoryMismatch {
                code,
                category,
                expected,
                actual,
            } => write!(
                f,
                "category '{category}' of movement type {code} typically uses '{expected}' stock movement, found '{actual}'"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_follow_taxonomy() {
        assert_eq!(
            WorkflowError::not_found("movement type", "999").error_code(),
            "NOT_FOUND"
        );
        let err = WorkflowError::from(ValidationError::RejectionReasonRequired);
        assert_eq!(err.error_code(), "VALIDATION_FAILED");
        assert!(err.to_string().contains("rejection reason"));

        let err = WorkflowError::Conflict {
            id: "se_1".into(),
            expected: 2,
            found: 3,
        };
        assert_eq!(err.error_code(), "CONFLICT");
    }

    #[test]
    fn invalid_transition_names_the_status() {
        let err = ValidationError::InvalidTransition {
            from: ApprovalStatus::Rejected,
            action: "approve",
        };
        assert_eq!(err.to_string(), "cannot approve while status is 'Rejected'");
    }

    #[test]
    fn duplicate_rule_warning_lists_roles() {
        let warning = ConfigurationWarning::DuplicateRule {
            movement_type: "311".into(),
            level: 1,
            roles: vec!["Warehouse Supervisor".into(), "Warehouse Manager".into()],
        };
        let text = warning.to_string();
        assert!(text.starts_with("2 enabled rules"));
        assert!(text.contains("Warehouse Manager"));
    }
}
