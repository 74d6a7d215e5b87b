use std::{env, path::PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_SITES_DIR: &str = "sites";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub sites_dir: PathBuf,
    pub keep_going: bool,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "default".into());

        let builder = Config::builder()
            .set_default("sites_dir", DEFAULT_SITES_DIR)?
            .set_default("keep_going", false)?
            .add_source(File::with_name("config/postprocess").required(false))
            .add_source(File::with_name(&format!("config/postprocess.{run_mode}")).required(false))
            .add_source(Environment::with_prefix("postprocess"))
            .build()?;

        builder.try_deserialize()
    }
}
