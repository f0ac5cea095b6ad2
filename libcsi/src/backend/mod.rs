//! Plugin implementations living next to the protocol definitions.
//!
//! Each backend module provides a concrete type that implements
//! [`crate::CsiIdentity`], [`crate::CsiController`], and [`crate::CsiNode`].

pub mod mock;
