use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::Context as _, Result, Section as _};
use lookups::{
    config::{DbSettings, Settings},
    queries::Queries,
    Exporter,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, Level};

/// Exports the lookup files of the reporting portal from the allocations database.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    export: Export,
    /// INI file with the `[tgcdbmirror]` connection section, overrides the settings
    #[arg(long, global = true)]
    portal_settings: Option<PathBuf>,
    /// where the lookup files go, overrides the settings
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    #[arg(short, long, global = true, conflicts_with_all = ["quiet", "log_level"])]
    verbose: bool,
    #[arg(short, long, global = true, conflicts_with = "log_level")]
    quiet: bool,
    #[arg(long, global = true)]
    log_level: Option<Level>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Export {
    /// organization.json
    Organizations,
    /// names.csv: people by ORCID and project PIs by project number
    Names,
    /// hierarchy.csv: fields of science
    Hierarchy,
    /// group-to-hierarchy.csv: field of science of every project
    Groups,
    /// cloud-project-to-pi.csv
    Cloud,
    /// resources.json and resource_specs.json
    Resources,
    /// everything above
    All,
}

impl Args {
    fn log_level(&self) -> Level {
        match (self.log_level, self.verbose, self.quiet) {
            (Some(level), _, _) => level,
            (None, true, _) => Level::DEBUG,
            (None, _, true) => Level::WARN,
            (None, false, false) => Level::INFO,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    register_logging(args.log_level())?;

    let mut settings = Settings::new().wrap_err("loading settings")?;
    if let Some(portal_settings) = args.portal_settings {
        settings.portal_settings = portal_settings;
    }
    if let Some(output_dir) = args.output_dir {
        settings.output_dir = output_dir;
    }

    let db = DbSettings::from_ini_file(&settings.portal_settings)?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(db.connect_options()?)
        .await
        .wrap_err_with(|| format!("connecting to {}", db.host))
        .note("connection settings come from [tgcdbmirror] of the portal settings")?;

    let exporter = Exporter {
        queries: Queries {
            pool: &pool,
            process: &settings.process,
        },
        output_dir: &settings.output_dir,
        mode: settings.mode,
        cloud_resources: &settings.cloud_resources,
    };
    let written = match args.export {
        Export::Organizations => vec![exporter.organizations().await?],
        Export::Names => vec![exporter.names().await?],
        Export::Hierarchy => vec![exporter.hierarchy().await?],
        Export::Groups => vec![exporter.groups().await?],
        Export::Cloud => vec![exporter.cloud().await?],
        Export::Resources => exporter.resources().await?,
        Export::All => exporter.all().await?,
    };
    info!(files = written.len(), "Done");

    pool.close().await;
    Ok(())
}

fn register_logging(level: Level) -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        // all events at `level` or more severe go to stdout
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).wrap_err("setting default subscriber failed")
}
