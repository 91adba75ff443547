//! Error types for encoding, decoding and transform registration.

use thiserror::Error;

use crate::codec::CodecError;

/// Structural problems found in a reference table while decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("payload is not a reference table")]
    NotATable,
    #[error("reference table is empty")]
    EmptyTable,
    #[error("reference mark does not hold a non-negative integer index")]
    InvalidReference,
    #[error("reference index {index} is out of range for a table of {len} slots")]
    ReferenceOutOfRange { index: u64, len: usize },
    #[error("transform envelope must carry a non-empty string tag and a `data` entry")]
    MalformedEnvelope,
    #[error("table slot {0} refers to itself")]
    SelfAlias(usize),
    #[error("invalid \"{tag}\" payload: {reason}")]
    InvalidPayload { tag: String, reason: String },
}

impl FormatError {
    /// Shorthand used by transforms rejecting a payload of the wrong shape.
    pub fn payload(tag: &str, reason: impl Into<String>) -> Self {
        FormatError::InvalidPayload {
            tag: tag.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplicatorError {
    #[error("transform with type \"{0}\" was already added")]
    RegistrationConflict(String),
    #[error("transform type must be a non-empty string")]
    InvalidTag,
    #[error("can't find transform for \"{0}\" type")]
    UnknownTransformTag(String),
    #[error("invalid replicator payload: {0}")]
    Format(#[from] FormatError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_message_names_the_tag() {
        let err = ReplicatorError::UnknownTransformTag("[[Foo]]".into());
        assert_eq!(err.to_string(), "can't find transform for \"[[Foo]]\" type");
    }

    #[test]
    fn codec_errors_display_unchanged() {
        let inner = CodecError::InvalidUtf8;
        let shown = inner.to_string();
        let err: ReplicatorError = inner.into();
        assert_eq!(err.to_string(), shown);
    }

    #[test]
    fn payload_shorthand() {
        let err = FormatError::payload("[[Date]]", "expected a number");
        assert_eq!(
            err.to_string(),
            "invalid \"[[Date]]\" payload: expected a number"
        );
    }
}
