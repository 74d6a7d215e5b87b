use std::path::{Path, PathBuf};

use color_eyre::{
    eyre::{bail, Context as _},
    Result,
};
use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::{
    classify::ResourceRule,
    formats::InputFormat,
    mapping::MappingSource,
    misc::parsing::{Duration, FileMode},
    selector::{FilenameRule, UnrecognizedFilename},
    transform::{AccountRule, GrantRule},
};

const DEFAULT_RETENTION: &str = "365d";

fn default_retention() -> Duration {
    Duration(chrono::Duration::days(365))
}

/// What to do with a file whose content can't be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// log a warning and continue with the next file
    Skip,
    #[default]
    Abort,
}

/// What to do with a record whose queue matches no rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownQueuePolicy {
    /// log an error and drop the record
    #[default]
    Drop,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuffixReplacement {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct OutputOptions {
    #[serde(default)]
    pub mode: FileMode,
    #[serde(default)]
    pub replace_suffix: Option<SuffixReplacement>,
}

impl OutputOptions {
    pub fn filename_for(&self, source_filename: &str) -> String {
        match &self.replace_suffix {
            Some(SuffixReplacement { from, to }) => match source_filename.strip_suffix(from.as_str()) {
                Some(stem) => format!("{stem}{to}"),
                None => source_filename.to_owned(),
            },
            None => source_filename.to_owned(),
        }
    }
}

/// Everything that differs between two sites' post-processing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub filename: FilenameRule,
    #[serde(default = "default_retention")]
    pub retention: Duration,
    #[serde(default)]
    pub on_unrecognized_filename: UnrecognizedFilename,
    pub input: InputFormat,
    #[serde(default)]
    pub on_malformed: MalformedPolicy,
    #[serde(default)]
    pub mapping: Option<MappingSource>,
    pub account: AccountRule,
    #[serde(default)]
    pub resource: ResourceRule,
    #[serde(default)]
    pub on_unknown_queue: UnknownQueuePolicy,
    #[serde(default)]
    pub output: OutputOptions,
}

impl SiteConfig {
    /// Loads a site from a TOML file. `SITE_*` environment variables override top level keys
    /// (`SITE_SOURCE_DIR`, `SITE_OUTPUT_DIR`, ...).
    pub fn load(path: &Path) -> Result<Self> {
        let site: SiteConfig = Config::builder()
            .set_default("retention", DEFAULT_RETENTION)?
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(config::Environment::with_prefix("SITE"))
            .build()
            .and_then(Config::try_deserialize)
            .wrap_err_with(|| format!("loading site config {path:?}"))?;
        site.validate().wrap_err_with(|| format!("validating site config {path:?}"))?;
        Ok(site)
    }

    pub fn from_toml(toml: &str) -> Result<Self> {
        let site: SiteConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .wrap_err("parsing site config")?;
        site.validate()?;
        Ok(site)
    }

    /// Catches combinations that would only fail on the first record.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.account.grant, GrantRule::Mapped) && self.mapping.is_none() {
            bail!("site {}: `account.grant = mapped` needs a `mapping` section", self.name);
        }
        if let InputFormat::Delimited(options) = &self.input {
            if options.delimiter.len() != 1 {
                bail!("site {}: delimiter must be a single byte, got `{}`", self.name, options.delimiter);
            }
            if options.header && options.columns.is_empty() {
                bail!("site {}: header input needs `input.columns` to lay out the output", self.name);
            }
        }
        Ok(())
    }
}
