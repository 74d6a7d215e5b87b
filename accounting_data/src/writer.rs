use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use color_eyre::{eyre::Context as _, Result};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{job::Destination, misc::parsing::FileMode};

/// Writes `contents` to `dir/filename` so that the file only ever shows up complete and with `mode` already applied:
/// the data goes into a temp file next to the target, which is then renamed over it.
#[tracing::instrument(skip(contents), fields(len = contents.len()))]
pub fn publish_atomic(dir: &Path, filename: &str, contents: &[u8], mode: FileMode) -> Result<PathBuf> {
    fs::create_dir_all(dir).wrap_err_with(|| format!("creating output directory {dir:?}"))?;
    let target = dir.join(filename);

    let mut tmp = NamedTempFile::new_in(dir).wrap_err_with(|| format!("creating temp file in {dir:?}"))?;
    tmp.write_all(contents).wrap_err_with(|| format!("writing {:?}", tmp.path()))?;
    tmp.as_file().sync_all().wrap_err_with(|| format!("syncing {:?}", tmp.path()))?;
    set_mode(tmp.as_file(), mode)?;
    tmp.persist(&target).wrap_err_with(|| format!("moving output into place at {target:?}"))?;

    debug!(?target, "published");
    Ok(target)
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: FileMode) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    file.set_permissions(fs::Permissions::from_mode(mode.0))
        .wrap_err_with(|| format!("setting mode {:o}", mode.0))
}

#[cfg(not(unix))]
fn set_mode(file: &fs::File, mode: FileMode) -> Result<()> {
    let mut permissions = file.metadata()?.permissions();
    permissions.set_readonly(mode.0 & 0o200 == 0);
    file.set_permissions(permissions).wrap_err("setting permissions")
}

/// Publishes buckets below one output directory, `Destination::Root` straight into it.
#[derive(Debug, Clone)]
pub struct BucketWriter {
    pub output_dir: PathBuf,
    pub mode: FileMode,
}

impl BucketWriter {
    pub fn new(output_dir: impl Into<PathBuf>, mode: FileMode) -> Self {
        Self {
            output_dir: output_dir.into(),
            mode,
        }
    }

    pub fn dir_for(&self, destination: &Destination) -> PathBuf {
        match destination {
            Destination::Root => self.output_dir.clone(),
            Destination::Resource(resource) => self.output_dir.join(resource.as_str()),
        }
    }

    pub fn publish(&self, destination: &Destination, filename: &str, contents: &[u8]) -> Result<PathBuf> {
        publish_atomic(&self.dir_for(destination), filename, contents, self.mode)
    }
}
