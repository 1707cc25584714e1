use thiserror::Error;

/// Errors from the envelope codec. Parse and validation are kept distinct
/// so callers can log-and-discard parse failures while surfacing
/// validation failures as 400s per the error taxonomy.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed message: {0}")]
    Parse(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("id is not a valid UUIDv4")]
    BadId,
    #[error("timestamp must be non-negative")]
    BadTimestamp,
    #[error("schema_version must be {0:?}")]
    BadSchemaVersion(&'static str),
    #[error("source.service does not match the required pattern")]
    BadServiceName,
    #[error("source.instance does not match the required pattern")]
    BadInstanceName,
    #[error("source.version is not strict MAJOR.MINOR.PATCH semver")]
    BadVersion,
    #[error("correlation_id is not a valid UUIDv4")]
    BadCorrelationId,
    #[error("reply_to does not match the required pattern")]
    BadReplyTo,
    #[error("kind {kind:?} requires a correlation_id")]
    MissingCorrelationId { kind: crate::Kind },
    #[error("kind {kind:?} requires a reply_to channel")]
    MissingReplyTo { kind: crate::Kind },
}
