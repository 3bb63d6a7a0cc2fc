use std::env;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

#[derive(Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    run: Run,
}

#[derive(Deserialize, Default)]
pub struct Run {
    bpm: Option<f64>,
    quantum: Option<f64>,
    metrics_listen: Option<SocketAddr>,
}

fn set_env<T: ToString>(name: &str, value: T) {
    env::set_var(name, value.to_string());
}

fn set_env_option<T: ToString>(name: &str, value: Option<T>) {
    if let Some(value) = value {
        set_env(name, value)
    }
}

pub fn load_into_env(config: &Config) {
    set_env_option("LINK_RUN_BPM", config.run.bpm);
    set_env_option("LINK_RUN_QUANTUM", config.run.quantum);
    set_env_option("LINK_RUN_METRICS_LISTEN", config.run.metrics_listen);
}

fn load_file(path: &Path) -> Option<Config> {
    log::debug!("looking for config in {}", path.display());

    let contents = std::fs::read_to_string(path).ok()?;

    match toml::from_str(&contents) {
        Ok(config) => {
            log::info!("reading config from {}", path.display());
            Some(config)
        }
        Err(e) => {
            log::error!("error reading config: {}", e);
            std::process::exit(1);
        }
    }
}

pub fn read() -> Option<Config> {
    // try current directory first
    if let Some(config) = load_file(Path::new("link.toml")) {
        return Some(config);
    }

    // otherwise try xdg config dirs
    let dirs = xdg::BaseDirectories::new().ok()?;
    if let Some(config) = dirs.find_config_file("link.toml") {
        return load_file(&config);
    }

    // found nothing
    None
}
