//! Lookup files of the reporting portal (organizations, names, fields of science, cloud projects, resources),
//! exported from the read-only allocations database mirror.

pub mod builder;
pub mod config;
pub mod exports;
pub mod queries;

pub use exports::Exporter;
