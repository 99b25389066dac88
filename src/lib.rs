//! Keys Lookup Service Library
//!
//! Resolves exposure locations into catastrophe-model keys (area peril and
//! vulnerability ids per peril and coverage type) and serves them over HTTP.
//!
//! # Modules
//!
//! - `api`: HTTP-facing layer.
//! - `core`: Resolution pipeline.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `lookup`: The `KeysLookup` contract and lookup configuration.
//! - `models`: Locations, key rows and batch summaries.
//! - `reference_data`: Loading of model reference files.
//! - `reference_lookup`: Built-in lookup over area-peril and vulnerability tables.
//! - `resolution_cache`: Per-location result cache.
//! - `resolver`: Batch resolution with ordering and failure isolation.
//! - `routes`: Router assembly and middleware.
//! - `service`: Service lifecycle, hot reload and end-to-end key generation.
//! - `transcoding`: CSV and JSON wire formats.
//! - `validation`: Structural validation of decoded locations.

pub mod api;
pub mod core;

// Re-export primary modules for shared use in tests and other binaries
pub mod config;
pub mod errors;
pub mod handlers;
pub mod lookup;
pub mod models;
pub mod reference_data;
pub mod reference_lookup;
pub mod resolution_cache;
pub mod resolver;
pub mod routes;
pub mod service;
pub mod transcoding;
pub mod validation;
