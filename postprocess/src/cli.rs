use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

/// Post-processes the job accounting logs of one or more sites.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(version)]
pub struct Args {
    /// site names (`<sites-dir>/<name>.toml`) or paths to site config files
    #[arg(required_unless_present = "all")]
    pub sites: Vec<String>,
    /// process every site config in the sites directory
    #[arg(long, conflicts_with = "sites")]
    pub all: bool,
    /// directory holding the site configs, overrides the settings
    #[arg(long)]
    pub sites_dir: Option<PathBuf>,
    /// read accounting logs from here instead of the site's `source_dir` (single site only)
    #[arg(long)]
    pub indir: Option<PathBuf>,
    /// write results here instead of the site's `output_dir` (single site only)
    #[arg(long)]
    pub outdir: Option<PathBuf>,
    /// continue with the remaining sites when one fails
    #[arg(long)]
    pub keep_going: bool,
    #[arg(short, long, conflicts_with_all = ["quiet", "log_level"])]
    pub verbose: bool,
    #[arg(short, long, conflicts_with = "log_level")]
    pub quiet: bool,
    #[arg(long)]
    pub log_level: Option<Level>,
}

impl Args {
    pub fn log_level(&self) -> Level {
        match (self.log_level, self.verbose, self.quiet) {
            (Some(level), _, _) => level,
            (None, true, _) => Level::DEBUG,
            (None, _, true) => Level::WARN,
            (None, false, false) => Level::INFO,
        }
    }
}
