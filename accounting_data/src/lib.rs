//! Shared post-processing of job accounting logs: which files to read, how their records are rewritten and
//! classified, and how the results are published. Sites differ only in their [`site::SiteConfig`].

pub mod classify;
pub mod formats;
pub mod job;
pub mod mapping;
pub mod pipeline;
pub mod selector;
pub mod site;
pub mod transform;
pub mod writer;

pub mod misc {
    pub mod parsing;
}

pub use pipeline::{Pipeline, RunSummary};
pub use site::SiteConfig;
