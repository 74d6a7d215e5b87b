mod cli;
mod config;

use std::path::{Path, PathBuf};

use accounting_data::{Pipeline, RunSummary, SiteConfig};
use clap::Parser as _;
use cli::Args;
use color_eyre::{
    eyre::{bail, ensure, Context as _},
    Result, Section as _,
};
use itertools::Itertools as _;
use tracing::{error, info, Level};

use crate::config::Settings;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    register_logging(args.log_level())?;

    let settings = Settings::new().wrap_err("loading settings")?;
    let sites_dir = args.sites_dir.clone().unwrap_or(settings.sites_dir);
    let keep_going = args.keep_going || settings.keep_going;

    let paths = if args.all {
        all_sites(&sites_dir)?
    } else {
        args.sites.iter().map(|site| site_path(&sites_dir, site)).collect_vec()
    };
    ensure!(!paths.is_empty(), "no site configs in {sites_dir:?}");
    if (args.indir.is_some() || args.outdir.is_some()) && paths.len() != 1 {
        bail!("--indir/--outdir only work with a single site, got {}", paths.len());
    }

    let mut failed = Vec::new();
    for path in &paths {
        match run_site(path, &args) {
            Ok(summary) => info!(?path, ?summary, "Site done"),
            Err(e) if keep_going => {
                error!("{e:?}");
                failed.push(path.display().to_string());
            }
            Err(e) => return Err(e),
        }
    }
    if !failed.is_empty() {
        bail!("{} of {} sites failed: {}", failed.len(), paths.len(), failed.join(", "));
    }
    Ok(())
}

fn register_logging(level: Level) -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        // all events at `level` or more severe go to stdout
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).wrap_err("setting default subscriber failed")
}

fn run_site(path: &Path, args: &Args) -> Result<RunSummary> {
    let mut site = SiteConfig::load(path)?;
    if let Some(indir) = &args.indir {
        site.source_dir = indir.clone();
    }
    if let Some(outdir) = &args.outdir {
        site.output_dir = outdir.clone();
    }
    let name = site.name.clone();
    Pipeline::new(site)?
        .run()
        .wrap_err_with(|| format!("post-processing {name}"))
        .with_note(|| format!("site config: {path:?}"))
}

/// A bare name is looked up in the sites directory, anything that looks like a path is taken as is.
fn site_path(sites_dir: &Path, site: &str) -> PathBuf {
    let path = Path::new(site);
    if path.extension().is_some_and(|ext| ext == "toml") || path.components().count() > 1 {
        path.to_path_buf()
    } else {
        sites_dir.join(format!("{site}.toml"))
    }
}

fn all_sites(sites_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = sites_dir
        .read_dir()
        .wrap_err_with(|| format!("listing site configs in {sites_dir:?}"))?;
    entries
        .map(|entry| entry.map(|entry| entry.path()))
        .process_results(|paths| {
            paths
                .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
                .sorted()
                .collect_vec()
        })
        .wrap_err_with(|| format!("listing site configs in {sites_dir:?}"))
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn site_path__name_or_path() {
        let dir = Path::new("/etc/postprocess/sites");
        assert_eq!(site_path(dir, "ncsa-delta"), dir.join("ncsa-delta.toml"));
        assert_eq!(site_path(dir, "local.toml"), PathBuf::from("local.toml"));
        assert_eq!(site_path(dir, "./ncsa-delta"), PathBuf::from("./ncsa-delta"));
    }

    #[test]
    fn all_sites__toml_files_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("tamu-aces.toml"), "")?;
        fs::write(dir.path().join("dgx.toml"), "")?;
        fs::write(dir.path().join("notes.md"), "")?;
        fs::create_dir(dir.path().join("old.toml"))?;

        assert_eq!(
            all_sites(dir.path())?,
            [dir.path().join("dgx.toml"), dir.path().join("tamu-aces.toml")]
        );
        Ok(())
    }

    #[test]
    fn all_sites__shipped_configs_load() -> Result<()> {
        let sites = all_sites(&Path::new(env!("CARGO_MANIFEST_DIR")).join("../sites"))?;
        assert_eq!(sites.len(), 10);
        for site in sites {
            SiteConfig::load(&site)?;
        }
        Ok(())
    }
}
