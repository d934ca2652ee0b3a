//! rack-core — shared types for the rack control plane.
//!
//! This crate is pure data: no I/O, no runtime. It provides:
//!
//! - **`types`** — domain structs persisted and served by providers
//! - **`manifest`** — the gen2 `convox.yml` service manifest
//! - **`compose`** — the gen1 compose-style manifest and its run order
//! - **`options`** — per-operation option structs with wire codecs
//! - **`id`** — prefixed random identifiers for builds and releases
//! - **`wire`** — the sortable timestamp and duration suffix formats

pub mod compose;
pub mod error;
pub mod id;
pub mod manifest;
pub mod options;
pub mod types;
pub mod wire;

pub use error::{CoreError, CoreResult};
pub use id::id;
pub use manifest::Manifest;
pub use types::*;
