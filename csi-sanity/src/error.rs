//! Failure taxonomy of a scenario.
//!
//! Scenario bodies return [`ScenarioError`]; the first error aborts the
//! remaining forward steps.  Cleanup failures are collected separately as
//! [`TeardownError`]s because they never change a scenario's verdict.

use std::fmt;

use libcsi::{Code, CsiError};
use thiserror::Error;

use crate::tracker::TrackedResource;

/// Why a scenario failed.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The plugin answered, but not the way the contract requires: a wrong
    /// status code, or a success payload missing a required value.
    #[error("{call}: protocol violation: {detail}")]
    ProtocolViolation { call: &'static str, detail: String },

    /// A call that had to fail returned a success payload.
    #[error("{call}: expected {expected} but the call succeeded")]
    UnexpectedSuccess { call: &'static str, expected: Code },

    /// The call never completed (connectivity, codec, timeout).
    #[error("{call}: transport failure: {source}")]
    TransportFailure {
        call: &'static str,
        #[source]
        source: CsiError,
    },
}

/// Coarse classification used for reporting, so infrastructure problems can
/// be told apart from plugin bugs at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ProtocolViolation,
    UnexpectedSuccess,
    TransportFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProtocolViolation => "protocol violation",
            Self::UnexpectedSuccess => "unexpected success",
            Self::TransportFailure => "transport failure",
        })
    }
}

impl ScenarioError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ProtocolViolation { .. } => FailureKind::ProtocolViolation,
            Self::UnexpectedSuccess { .. } => FailureKind::UnexpectedSuccess,
            Self::TransportFailure { .. } => FailureKind::TransportFailure,
        }
    }

    /// The RPC the failure was observed on.
    pub fn call(&self) -> &'static str {
        match self {
            Self::ProtocolViolation { call, .. }
            | Self::UnexpectedSuccess { call, .. }
            | Self::TransportFailure { call, .. } => call,
        }
    }
}

/// A cleanup call that failed after the scenario body finished.
#[derive(Debug, Error)]
#[error("failed to release {resource}: {source}")]
pub struct TeardownError {
    pub resource: TrackedResource,
    #[source]
    pub source: CsiError,
}
