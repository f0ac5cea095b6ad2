//! QUIC transport layer for CSI messages.
//!
//! This module provides [`client::CsiClient`] and [`server::CsiServer`] that
//! communicate [`crate::CsiMessage`] values over QUIC bi-directional streams
//! using `quinn`.

pub mod client;
pub mod server;
