use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("uniqueness violation on {struct_name}: {fields:?}")]
    UniquenessViolation {
        struct_name: String,
        fields: Vec<String>,
    },
    #[error("check failed on {field}: {message}")]
    CheckViolation { field: String, message: String },
    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("evaluation error: {message}")]
    Evaluation { message: String },
    #[error("schema error: {message}")]
    Schema { message: String },
    #[error("trigger cascade exceeded depth {depth}")]
    CascadeLimit { depth: usize },
}

impl StrataError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn uniqueness(struct_name: impl Into<String>, fields: Vec<String>) -> Self {
        Self::UniquenessViolation {
            struct_name: struct_name.into(),
            fields,
        }
    }

    pub fn check(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CheckViolation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Expected outcomes a caller can surface to a user, as opposed to
    /// operational faults or programming errors.
    pub fn is_user_facing(&self) -> bool {
        match self {
            StrataError::NotFound { .. }
            | StrataError::InvalidInput { .. }
            | StrataError::UniquenessViolation { .. }
            | StrataError::CheckViolation { .. } => true,
            StrataError::Storage { .. }
            | StrataError::TypeMismatch { .. }
            | StrataError::Evaluation { .. }
            | StrataError::Schema { .. }
            | StrataError::CascadeLimit { .. } => false,
        }
    }
}

pub type StrataResult<T> = Result<T, StrataError>;

impl From<sea_orm::DbErr> for StrataError {
    fn from(value: sea_orm::DbErr) -> Self {
        StrataError::storage(value.to_string())
    }
}
