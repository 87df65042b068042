//! Outbound adapters implementing the domain ports.
//!
//! - [`overpass`] speaks HTTP to Overpass mirrors and decodes their JSON.
//! - [`storage`] publishes run artefacts into an output directory.

pub mod overpass;
pub mod storage;
