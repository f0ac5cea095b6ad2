//! # csi-sanity: conformance harness for CSI node plugins
//!
//! Drives a plugin through the volume lifecycle and checks that it honors
//! the CSI error contract.  The plugin is reached through the `libcsi`
//! service traits, so the same scenarios run against a remote plugin over
//! QUIC ([`libcsi::transport::client::CsiClient`]) or an in-process one.
//!
//! | Module | Purpose |
//! |---|---|
//! | [`capability`] | Capability probe and the frozen [`capability::CapabilityFlags`]. |
//! | [`tracker`] | Registration and reverse-order teardown of provisioned resources. |
//! | [`naming`] | Run-unique resource names. |
//! | [`assertion`] | Success / exact-status-code checks. |
//! | [`lifecycle`] | The capability-gated volume state machine. |
//! | [`scenarios`] | The node-service scenario catalog. |
//! | [`runner`] | Per-scenario execution, skip logic and reports. |
//! | [`config`] | Mount locations, secrets and volume parameters. |

pub mod assertion;
pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod runner;
pub mod scenarios;
pub mod tracker;

pub use capability::{Capability, CapabilityFlags, CapabilityRegistry};
pub use config::SanityConfig;
pub use context::{PluginClients, ScenarioContext};
pub use error::{FailureKind, ScenarioError, TeardownError};
pub use runner::{Outcome, ScenarioReport, ScenarioRunner, SuiteReport};
pub use scenarios::{Scenario, node_suite};
