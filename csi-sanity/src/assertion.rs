//! Error-contract assertions.
//!
//! Every call site states what it expects: success, or failure with one
//! exact status [`Code`].  Only the code is compared; the plugin's message is
//! carried along for the report but never matched.

use libcsi::{Code, CsiError, VolumeStats};
use tracing::debug;

use crate::error::ScenarioError;

/// Require `result` to be a success and hand back its payload.
pub fn expect_success<T>(
    call: &'static str,
    result: Result<T, CsiError>,
) -> Result<T, ScenarioError> {
    result.map_err(|e| unexpected_error(call, e))
}

/// Require `result` to be a status answer carrying exactly `expected`.
pub fn expect_error<T>(
    call: &'static str,
    result: Result<T, CsiError>,
    expected: Code,
) -> Result<(), ScenarioError> {
    match result {
        Ok(_) => Err(ScenarioError::UnexpectedSuccess { call, expected }),
        Err(CsiError::Status(status)) if status.code() == expected => {
            debug!(call, code = %expected, "call failed as required");
            Ok(())
        }
        Err(CsiError::Status(status)) => Err(ScenarioError::ProtocolViolation {
            call,
            detail: format!(
                "expected {expected}, got {} ({})",
                status.code(),
                status.message()
            ),
        }),
        Err(CsiError::UnexpectedResponse(response)) => Err(ScenarioError::ProtocolViolation {
            call,
            detail: format!("expected {expected}, got response {response}"),
        }),
        Err(source) => Err(ScenarioError::TransportFailure { call, source }),
    }
}

fn unexpected_error(call: &'static str, err: CsiError) -> ScenarioError {
    match err {
        CsiError::Status(status) => ScenarioError::ProtocolViolation {
            call,
            detail: format!(
                "expected success, got {} ({})",
                status.code(),
                status.message()
            ),
        },
        CsiError::UnexpectedResponse(response) => ScenarioError::ProtocolViolation {
            call,
            detail: format!("unexpected response {response}"),
        },
        source => ScenarioError::TransportFailure { call, source },
    }
}

/// Fail with a protocol violation unless `condition` holds.
pub fn ensure(
    call: &'static str,
    condition: bool,
    detail: impl FnOnce() -> String,
) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::ProtocolViolation {
            call,
            detail: detail(),
        })
    }
}

pub fn require_non_empty(
    call: &'static str,
    field: &str,
    value: &str,
) -> Result<(), ScenarioError> {
    ensure(call, !value.is_empty(), || format!("{field} must not be empty"))
}

pub fn require_non_negative(
    call: &'static str,
    field: &str,
    value: i64,
) -> Result<(), ScenarioError> {
    ensure(call, value >= 0, || {
        format!("{field} must not be negative, got {value}")
    })
}

/// Usage statistics must contain at least one entry.
pub fn require_usage(call: &'static str, stats: &VolumeStats) -> Result<(), ScenarioError> {
    ensure(call, !stats.usage.is_empty(), || "usage must not be empty".to_owned())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use libcsi::Status;

    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn matching_code_passes() {
        let result: Result<(), CsiError> = Err(Status::invalid_argument("no id").into());
        expect_error("NodePublishVolume", result, Code::InvalidArgument).unwrap();
    }

    #[test]
    fn wrong_code_is_a_protocol_violation() {
        let result: Result<(), CsiError> = Err(Status::not_found("no such volume").into());
        let err = expect_error("NodePublishVolume", result, Code::InvalidArgument).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);
        assert_eq!(err.call(), "NodePublishVolume");
    }

    #[test]
    fn message_text_is_not_contractual() {
        // The message even claims a different error; only the code counts.
        let result: Result<(), CsiError> = Err(Status::not_found("invalid argument").into());
        expect_error("NodeGetVolumeStats", result, Code::NotFound).unwrap();
    }

    #[test]
    fn success_where_failure_required() {
        let err = expect_error("NodeGetVolumeStats", Ok(()), Code::NotFound).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::UnexpectedSuccess {
                expected: Code::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn timeouts_are_transport_failures() {
        let result: Result<(), CsiError> = Err(CsiError::Timeout(Duration::from_secs(5)));
        let err = expect_success("CreateVolume", result).unwrap_err();
        assert_eq!(err.kind(), FailureKind::TransportFailure);

        let result: Result<(), CsiError> = Err(CsiError::transport("connection lost"));
        let err = expect_error("NodeGetVolumeStats", result, Code::NotFound).unwrap_err();
        assert_eq!(err.kind(), FailureKind::TransportFailure);
    }

    #[test]
    fn field_checks() {
        assert!(require_non_empty("NodeGetInfo", "node_id", "node-1").is_ok());
        assert!(require_non_empty("NodeGetInfo", "node_id", "").is_err());
        assert!(require_non_negative("NodeGetInfo", "max_volumes_per_node", 0).is_ok());
        assert!(require_non_negative("NodeGetInfo", "max_volumes_per_node", -1).is_err());
        assert!(require_usage("NodeGetVolumeStats", &VolumeStats::default()).is_err());
    }
}
