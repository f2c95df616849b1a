use std::{
    fmt,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Classified failures
///
/// Configuration errors (in a reference or catalog) abort the whole run.
/// Ordering errors abort the merge for one sample, which is then left out of its
/// group.  Fetch errors may be retried before being counted as a failure of the
/// batch item, as are malformed sample inputs.  Anything else is passed around as
/// a plain anyhow::Error.
#[derive(Debug, Error)]
pub enum DensifyError {
    #[error("Reference {0} contains no units")]
    EmptyReference(String),
    #[error("Unit {unit} occurs more than once in reference {reference}")]
    DuplicateUnit { reference: String, unit: String },
    #[error("Missing required column {column} in {source_name}")]
    MissingField { source_name: String, column: String },
    #[error("{0}")]
    FatalConfiguration(String),
    #[error("Missing required column {column} in sample input {source_name}")]
    MissingInputField { source_name: String, column: String },
    #[error("Observation {found} is out of order: {reason}")]
    OrderingViolation { found: String, reason: String },
    #[error("Observation {0} does not correspond to any reference unit")]
    UnitNotInReference(String),
    #[error("Observation {0} lies beyond the end of the reference")]
    TrailingObservation(String),
    #[error("Could not fetch {}: {msg}", .path.display())]
    Fetch { path: PathBuf, msg: String },
}

impl DensifyError {
    pub fn fetch<P: AsRef<Path>, E: fmt::Display>(path: P, e: E) -> Self {
        Self::Fetch {
            path: path.as_ref().to_owned(),
            msg: e.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyReference(_)
                | Self::DuplicateUnit { .. }
                | Self::MissingField { .. }
                | Self::FatalConfiguration(_)
        )
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::OrderingViolation { .. }
                | Self::UnitNotInReference(_)
                | Self::TrailingObservation(_)
        )
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}

fn find(e: &anyhow::Error) -> Option<&DensifyError> {
    e.chain().find_map(|c| c.downcast_ref::<DensifyError>())
}

/// Does the error (or anything in its context chain) abort the whole run?
pub fn is_fatal(e: &anyhow::Error) -> bool {
    find(e).map(|d| d.is_fatal()).unwrap_or(false)
}

/// Does the error only affect the sample being merged?
pub fn is_ordering(e: &anyhow::Error) -> bool {
    find(e).map(|d| d.is_ordering()).unwrap_or(false)
}

pub fn is_recoverable(e: &anyhow::Error) -> bool {
    find(e).map(|d| d.is_recoverable()).unwrap_or(false)
}
