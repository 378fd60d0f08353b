use std::path::PathBuf;

/// Daemon configuration, sourced from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: String,
    pub amp_binary: String,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", "8080"),
            amp_binary: env_or("AMP_BINARY", "amp"),
            log_dir: PathBuf::from(env_or("LOG_DIR", "./logs")),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}
