use crate::router::BatchReport;
use std::fmt;
use thiserror::Error;
use twinsync_model::SchemaError;
use twinsync_store::StoreError;

/// Why a single record could not be applied.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("schema {schema_id} not found after model refresh")]
    SchemaNotFound { schema_id: String },
    #[error("expected exactly one entity with {field} = {business_key}, found {matches}")]
    AmbiguousParent {
        field: String,
        business_key: String,
        matches: usize,
    },
    #[error("no child {child_role:?} related to {business_key:?}")]
    ChildNotFound {
        business_key: String,
        child_role: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Records dropped without counting as failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Deserialization(String),
    MissingIdentifier { field: String },
    /// The identifier field is present but null, blank or structured.
    EmptyIdentifier { field: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deserialization(message) => write!(f, "undecodable record: {message}"),
            Self::MissingIdentifier { field } => write!(f, "record has no {field} field"),
            Self::EmptyIdentifier { field } => write!(f, "record field {field} is empty"),
        }
    }
}

#[derive(Debug, Error)]
#[error("record {index}: {error}")]
pub struct RecordFailure {
    /// Position of the record within its batch.
    pub index: usize,
    #[source]
    pub error: UpdateError,
}

/// A batch in which at least one record failed. The report still covers
/// every record that was applied or skipped.
#[derive(Debug)]
pub struct BatchError {
    pub report: BatchReport,
    pub failures: Vec<RecordFailure>,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.as_slice() {
            [single] => write!(f, "{single}"),
            failures => {
                write!(
                    f,
                    "{} of {} records failed:",
                    failures.len(),
                    self.report.records
                )?;
                for failure in failures {
                    write!(f, " [{failure}]")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.failures.as_slice() {
            [single] => Some(&single.error),
            _ => None,
        }
    }
}
