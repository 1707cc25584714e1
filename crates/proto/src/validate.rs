//! Envelope validation rules per the wire contract.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::envelope::Envelope;
use crate::error::ValidationError;

static UUID_V4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-4[0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$",
    )
    .expect("UUID_V4 regex is valid")
});

static SERVICE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("SERVICE_NAME regex is valid"));

static INSTANCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("INSTANCE_NAME regex is valid"));

static SEMVER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("SEMVER regex is valid"));

static REPLY_CHANNEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_:/-]*$").expect("REPLY_CHANNEL regex is valid"));

pub fn validate(envelope: &Envelope) -> Result<(), ValidationError> {
    if !UUID_V4.is_match(&envelope.id.to_string()) {
        return Err(ValidationError::BadId);
    }
    if envelope.timestamp < 0 {
        return Err(ValidationError::BadTimestamp);
    }
    if envelope.schema_version != crate::envelope::SCHEMA_VERSION {
        return Err(ValidationError::BadSchemaVersion(
            crate::envelope::SCHEMA_VERSION,
        ));
    }
    if !SERVICE_NAME.is_match(&envelope.source.service) {
        return Err(ValidationError::BadServiceName);
    }
    if !INSTANCE_NAME.is_match(&envelope.source.instance) {
        return Err(ValidationError::BadInstanceName);
    }
    if !SEMVER.is_match(&envelope.source.version) {
        return Err(ValidationError::BadVersion);
    }
    if let Some(cid) = envelope.correlation_id {
        if !UUID_V4.is_match(&cid.to_string()) {
            return Err(ValidationError::BadCorrelationId);
        }
    }
    if let Some(reply_to) = &envelope.reply_to {
        if !REPLY_CHANNEL.is_match(reply_to) {
            return Err(ValidationError::BadReplyTo);
        }
    }
    if envelope.kind.requires_correlation_id() && envelope.correlation_id.is_none() {
        return Err(ValidationError::MissingCorrelationId {
            kind: envelope.kind,
        });
    }
    if envelope.kind.requires_reply_to() && envelope.reply_to.is_none() {
        return Err(ValidationError::MissingReplyTo {
            kind: envelope.kind,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Kind, Source};

    fn base() -> Envelope {
        Envelope {
            id: uuid::Uuid::new_v4(),
            timestamp: 1,
            source: Source {
                service: "controller".to_string(),
                instance: "ctrl-01".to_string(),
                version: "1.0.0".to_string(),
            },
            schema_version: crate::envelope::SCHEMA_VERSION.to_string(),
            kind: Kind::Heartbeat,
            correlation_id: None,
            reply_to: None,
        }
    }

    #[test]
    fn heartbeat_without_correlation_or_reply_is_valid() {
        assert!(validate(&base()).is_ok());
    }

    #[test]
    fn bad_schema_version_rejected() {
        let mut e = base();
        e.schema_version = "v2.0.0".to_string();
        assert_eq!(validate(&e), Err(ValidationError::BadSchemaVersion("v1.0.0")));
    }

    #[test]
    fn command_request_requires_both() {
        let mut e = base();
        e.kind = Kind::CommandRequest;
        assert!(matches!(
            validate(&e),
            Err(ValidationError::MissingCorrelationId { .. })
        ));
        e.correlation_id = Some(uuid::Uuid::new_v4());
        assert!(matches!(
            validate(&e),
            Err(ValidationError::MissingReplyTo { .. })
        ));
        e.reply_to = Some("responses:ctrl-01".to_string());
        assert!(validate(&e).is_ok());
    }

    #[test]
    fn bad_service_name_rejected() {
        let mut e = base();
        e.source.service = "Controller".to_string();
        assert_eq!(validate(&e), Err(ValidationError::BadServiceName));
    }

    #[test]
    fn bad_version_rejected() {
        let mut e = base();
        e.source.version = "1.0".to_string();
        assert_eq!(validate(&e), Err(ValidationError::BadVersion));
    }
}
