//! # roadcast-types
//!
//! Shared types for the roadcast control plane. This crate defines the
//! vocabulary that the orchestrator, its workers and downstream consumers of
//! the room metadata agree on.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: Core types work without any serialization framework
//! - **Optional serialization**: Enable the `serde` feature to (de)serialize snapshots
//! - **Structural comparison**: Snapshots are plain values compared field by field
//! - **Versioned schema**: Published metadata carries [`SCHEMA_VERSION`]
//!
//! ## Features
//!
//! - `std` (default): Standard library support
//! - `serde`: JSON serialization via serde
//!
//! ## Example
//!
//! ```rust
//! use roadcast_types::{Role, TelemetrySnapshot};
//!
//! let snapshot = TelemetrySnapshot::builder()
//!     .tech("lte")
//!     .signal(80.0)
//!     .position(2.35, 48.85, 35.0)
//!     .speed(12.0)
//!     .temperature(23.4)
//!     .build();
//!
//! assert_eq!(snapshot.signal, Some(80.0));
//! assert_eq!(Role::Broadcast.as_str(), "broadcast");
//! ```
//!
//! ## Schema Version
//!
//! The current schema version is **1**.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod role;
mod telemetry;

pub use role::*;
pub use telemetry::*;

/// Current schema version of the published room metadata.
///
/// Increment this when making breaking changes to the snapshot format.
pub const SCHEMA_VERSION: u32 = 1;
