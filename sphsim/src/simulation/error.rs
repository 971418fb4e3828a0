//! Error types for the SPH core
//!
//! Setup problems (missing attributes, bad configuration) are returned as
//! `Result<T, SphError>`. Degenerate geometry and single bad particles are
//! not errors: they produce zero/sentinel results and a diagnostic.

use std::fmt;

use super::field::FieldStage;

#[derive(Clone, Debug, PartialEq)]
pub enum SphError {
    /// A per-particle attribute required by the current setup is absent
    MissingAttribute {
        object: String,
        attribute: &'static str,
    },
    /// An attribute array does not match the particle count
    AttributeLength {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },
    /// A sampling call needs a setup stage that has not been reached
    StageNotReady {
        needed: FieldStage,
        current: FieldStage,
    },
    /// Invalid configuration value
    InvalidConfiguration { reason: String },
}

impl fmt::Display for SphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAttribute { object, attribute } => {
                write!(f, "object '{object}' is missing required attribute '{attribute}'")
            }
            Self::AttributeLength { attribute, expected, found } => {
                write!(f, "attribute '{attribute}' has {found} entries, expected {expected}")
            }
            Self::StageNotReady { needed, current } => {
                write!(f, "field stage {needed:?} required, field is {current:?}")
            }
            Self::InvalidConfiguration { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for SphError {}
