//! # libcsi: CSI protocol model and QUIC transport
//!
//! `libcsi` describes the [Container Storage Interface][csi] surface the
//! `csi-sanity` harness exercises: the request/response data model, the
//! status codes that make up the error contract, the three plugin services
//! as async traits, and a QUIC transport (via [`quinn`]) that carries
//! JSON-encoded messages between a client and a plugin.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: volumes, capabilities, requests, responses. |
//! | [`status`] | [`Code`] / [`Status`]: the gRPC status vocabulary. |
//! | [`error`] | [`CsiError`]: status answers vs. transport failures. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & capabilities. |
//! | [`controller`] | [`CsiController`] trait: create, delete, attach, detach. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, stats, node info. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | In-memory mock plugin. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod controller;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod status;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use controller::CsiController;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use status::{Code, Status};
pub use types::*;
