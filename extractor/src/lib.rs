//! Staged extraction of subway routes and stations from Overpass.
//!
//! The crate follows a ports-and-adapters layout:
//! - [`domain`] holds query construction, mirror fallback, element indexing,
//!   geometry resolution, and layer assembly, plus the port traits.
//! - [`outbound`] implements the ports over HTTP and the filesystem.
//! - [`pipeline`] wires the stages into complete runs.
//! - [`config`], [`presets`], and [`telemetry`] serve the binaries.

pub mod config;
pub mod domain;
pub mod outbound;
pub mod pipeline;
pub mod presets;
pub mod telemetry;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
