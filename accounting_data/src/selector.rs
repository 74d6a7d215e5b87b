use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime};
use color_eyre::{eyre::Context as _, Result};
use itertools::Itertools as _;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::misc::parsing::Duration;

/// How the date is encoded in a source filename.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilenameRule {
    /// whole filename, e.g. `%Y-%m-%d.json` or `%Y%m%d`
    Whole { format: String },
    /// only the last `len` characters, e.g. `delta.jobs.abcd.2024-11-02.json` with `len = 15`
    Suffix { len: usize, format: String },
    /// a capture group of a regex, e.g. `^sacct_json_([a-z_]+)_([0-9-]{10}).json.gz$` with `group = 2`
    Pattern { regex: String, group: usize, format: String },
}

/// What to do with a file whose name doesn't carry a recognizable date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedFilename {
    #[default]
    Skip,
    Process,
}

#[derive(Debug, Clone)]
enum DateMatcher {
    Whole(String),
    Suffix(usize, String),
    Pattern(Regex, usize, String),
}

impl DateMatcher {
    fn compile(rule: &FilenameRule) -> Result<Self> {
        Ok(match rule {
            FilenameRule::Whole { format } => DateMatcher::Whole(format.clone()),
            FilenameRule::Suffix { len, format } => DateMatcher::Suffix(*len, format.clone()),
            FilenameRule::Pattern { regex, group, format } => DateMatcher::Pattern(
                Regex::new(regex).wrap_err_with(|| format!("compiling filename pattern `{regex}`"))?,
                *group,
                format.clone(),
            ),
        })
    }

    fn parse(&self, filename: &str) -> Option<NaiveDate> {
        match self {
            DateMatcher::Whole(format) => NaiveDate::parse_from_str(filename, format).ok(),
            DateMatcher::Suffix(len, format) => {
                let start = filename.len().saturating_sub(*len);
                let tail = filename.get(start..).unwrap_or(filename);
                NaiveDate::parse_from_str(tail, format).ok()
            }
            DateMatcher::Pattern(regex, group, format) => regex
                .captures(filename)
                .and_then(|captures| captures.get(*group))
                .and_then(|date| NaiveDate::parse_from_str(date.as_str(), format).ok()),
        }
    }
}

/// A file picked for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub filename: String,
    /// `None` if the name wasn't recognized and the site processes such files anyway
    pub date: Option<NaiveDate>,
}

/// The regular files of a source directory, sorted by name. Iterate with [`FileSelection::iter`] as often as needed,
/// date filtering happens while iterating.
#[derive(Debug, Clone)]
pub struct FileSelection {
    dir: PathBuf,
    filenames: Vec<String>,
    matcher: DateMatcher,
    retention: chrono::Duration,
    unrecognized: UnrecognizedFilename,
    now: NaiveDateTime,
}

impl FileSelection {
    pub fn new(
        dir: impl AsRef<Path>,
        rule: &FilenameRule,
        retention: &Duration,
        unrecognized: UnrecognizedFilename,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let filenames = dir
            .read_dir()
            .wrap_err_with(|| format!("listing files in {dir:?}"))?
            .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
            .process_results(|names| names.sorted().collect_vec())
            .wrap_err_with(|| format!("listing files in {dir:?}"))?;

        Ok(Self {
            dir,
            filenames,
            matcher: DateMatcher::compile(rule)?,
            retention: **retention,
            unrecognized,
            now: Local::now().naive_local(),
        })
    }

    /// Pin "now" (retention is measured against it).
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SourceFile> + '_ {
        self.filenames.iter().filter_map(move |filename| self.select(filename))
    }

    fn select(&self, filename: &str) -> Option<SourceFile> {
        let date = match self.matcher.parse(filename) {
            Some(date) => {
                let age = self.now - date.and_time(chrono::NaiveTime::MIN);
                if age > self.retention {
                    debug!("Skip {filename} due to time range");
                    return None;
                }
                Some(date)
            }
            None => match self.unrecognized {
                UnrecognizedFilename::Skip => {
                    warn!("Unrecognized filename {filename}. Skipping");
                    return None;
                }
                UnrecognizedFilename::Process => {
                    warn!("Unrecognized filename {filename}. Processing anyway");
                    None
                }
            },
        };

        let path = self.dir.join(filename);
        if !path.is_file() {
            return None;
        }
        Some(SourceFile {
            path,
            filename: filename.to_owned(),
            date,
        })
    }
}
