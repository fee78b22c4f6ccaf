//! Service configuration, read once from the environment at startup.

use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MODEL_FILE: &str = "model.onnx";
pub const DEFAULT_JSON_LIMIT: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("WORKERS must be at least 1")]
    ZeroWorkers,
    #[error("cannot locate the service executable: {0}")]
    ExecutableDir(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub model_path: PathBuf,
    pub json_limit: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let exe = std::env::current_exe().map_err(ConfigError::ExecutableDir)?;
        let exe_dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Self::from_lookup(|var| std::env::var(var).ok(), exe_dir)
    }

    /// Builds the config from an arbitrary variable source. `exe_dir` anchors
    /// the default model path.
    pub fn from_lookup<F>(lookup: F, exe_dir: &Path) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_var(&lookup, "PORT")?.unwrap_or(DEFAULT_PORT);
        let workers = parse_var(&lookup, "WORKERS")?.unwrap_or_else(num_cpus::get);
        if workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        let model_path = lookup("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| exe_dir.join(DEFAULT_MODEL_FILE));
        let json_limit = parse_var(&lookup, "JSON_LIMIT")?.unwrap_or(DEFAULT_JSON_LIMIT);

        Ok(Self {
            host,
            port,
            workers,
            model_path,
            json_limit,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}
