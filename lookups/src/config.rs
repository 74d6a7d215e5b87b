use std::{env, path::PathBuf};

use accounting_data::misc::parsing::FileMode;
use color_eyre::{eyre::Context as _, Result};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

const DEFAULT_OUTPUT_DIR: &str = "/data/www/xdmod/etc";
const DEFAULT_PORTAL_SETTINGS: &str = "/data/www/xdmod/etc/portal_settings.ini";

/// Which allocations process the exports are about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Process {
    pub abbr: String,
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub portal_settings: PathBuf,
    pub mode: FileMode,
    pub process: Process,
    /// resources whose projects go into `cloud-project-to-pi.csv`
    pub cloud_resources: Vec<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "default".into());

        let builder = Config::builder()
            .set_default("output_dir", DEFAULT_OUTPUT_DIR)?
            .set_default("portal_settings", DEFAULT_PORTAL_SETTINGS)?
            .set_default("mode", "0644")?
            .set_default("process.abbr", "NAIRR")?
            .set_default("process.id", 108)?
            .set_default("process.name", "National Artificial Intelligence Research Resource")?
            .set_default("cloud_resources", vec!["Indiana Jetstream2 GPU"])?
            .add_source(File::with_name("config/lookups").required(false))
            .add_source(File::with_name(&format!("config/lookups.{run_mode}")).required(false))
            .add_source(Environment::with_prefix("lookups").separator("__"))
            .build()?;

        builder.try_deserialize()
    }
}

/// `[tgcdbmirror]` of the portal's INI file. Values may be wrapped in single quotes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DbSettings {
    pub database: String,
    pub host: String,
    pub user: String,
    pub pass: String,
    #[serde(default = "default_port")]
    pub port: String,
}

fn default_port() -> String {
    "5432".to_owned()
}

#[derive(Debug, Deserialize)]
struct PortalSettings {
    tgcdbmirror: DbSettings,
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches('\'')
}

impl DbSettings {
    pub fn from_ini_file(path: &std::path::Path) -> Result<Self> {
        let portal: PortalSettings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()
            .and_then(Config::try_deserialize)
            .wrap_err_with(|| format!("reading [tgcdbmirror] of {path:?}"))?;
        Ok(portal.tgcdbmirror)
    }

    pub fn from_ini_str(ini: &str) -> Result<Self> {
        let portal: PortalSettings = Config::builder()
            .add_source(File::from_str(ini, FileFormat::Ini))
            .build()
            .and_then(Config::try_deserialize)
            .wrap_err("reading [tgcdbmirror]")?;
        Ok(portal.tgcdbmirror)
    }

    /// Every transaction on these connections is read-only.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let port = unquote(&self.port)
            .parse::<u16>()
            .wrap_err_with(|| format!("invalid database port `{}`", self.port))?;
        Ok(PgConnectOptions::new()
            .host(unquote(&self.host))
            .port(port)
            .username(unquote(&self.user))
            .password(unquote(&self.pass))
            .database(unquote(&self.database))
            .options([("default_transaction_read_only", "on")]))
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    const PORTAL: &str = "
[general]
title = 'NAIRR Pilot'

[tgcdbmirror]
database = 'xras'
host = 'db.example.org'
user = 'xdmod'
pass = 'hunter2'
port = '6543'
";

    #[test]
    fn DbSettings__from_ini_str() {
        let db = DbSettings::from_ini_str(PORTAL).unwrap();
        assert_eq!(unquote(&db.host), "db.example.org");
        assert_eq!(unquote(&db.pass), "hunter2");

        let options = db.connect_options().unwrap();
        assert_eq!(options.get_host(), "db.example.org");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "xdmod");
        assert_eq!(options.get_database(), Some("xras"));
        assert!(options
            .get_options()
            .is_some_and(|o| o.contains("default_transaction_read_only=on")));
    }

    #[test]
    fn DbSettings__bad_port() {
        let db = DbSettings::from_ini_str(&PORTAL.replace("'6543'", "'db'")).unwrap();
        assert!(db.connect_options().is_err());
    }

    #[test]
    fn DbSettings__missing_section() {
        assert!(DbSettings::from_ini_str("[general]\ntitle = x\n").is_err());
    }
}
