use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("malformed grade data: {0}")]
    MalformedData(String),

    #[error("invalid grade: {0}")]
    InvalidGrade(String),

    #[error("invalid value: {0}")]
    InvalidField(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl PlannerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable code reported on the IPC wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::MalformedData(_) => "malformed_data",
            Self::InvalidGrade(_) | Self::InvalidField(_) => "bad_params",
            Self::Persistence(_) => "db_query_failed",
        }
    }
}
