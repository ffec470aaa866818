//! Configuration loading.
//!
//! Precedence, lowest to highest: compiled defaults, JSON config file (when
//! the `CONFIG` environment variable points at one), environment variables,
//! command-line flags. When `--config` arrives only as a flag, the process
//! re-executes itself with `CONFIG` set so the file is consumed on the first
//! load pass and the precedence order stays fixed.

use clap::Parser;
use serde::Deserialize;
use std::path::Path;
use std::{env, fs, process};
use thiserror::Error;
use url::Url;

/// Environment variable naming the JSON config file.
pub const CONFIG_FILE_ENV: &str = "CONFIG";

const SECRET_KEY_ENV: &str = "SHORTENER_SECRET_KEY";
const COOKIE_NAME_ENV: &str = "COOKIE_AUTH_NAME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base url: {0}")]
    BaseUrl(String),
    #[error("failed to re-execute with config file: {0}")]
    ReExec(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server_address: String,
    pub base_url: String,
    pub file_storage_path: String,
    pub database_dsn: String,
    pub enable_https: bool,
    pub trusted_subnet: String,
    pub grpc_address: String,
    pub secret_key: String,
    pub cookie_auth_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: "localhost:8080".to_string(),
            base_url: "http://localhost:8080".to_string(),
            file_storage_path: String::new(),
            database_dsn: String::new(),
            enable_https: false,
            trusted_subnet: String::new(),
            grpc_address: String::new(),
            secret_key: "kurz development secret".to_string(),
            cookie_auth_name: "kurz_auth".to_string(),
        }
    }
}

/// Keys recognized in the JSON config file. Secrets are env-only.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_address: Option<String>,
    base_url: Option<String>,
    file_storage_path: Option<String>,
    database_dsn: Option<String>,
    enable_https: Option<bool>,
    trusted_subnet: Option<String>,
    grpc_address: Option<String>,
}

#[derive(Debug, Default, Parser)]
#[command(name = "kurz-server", about = "kurz URL shortener service")]
pub struct Cli {
    /// Server address, example ip:port
    #[arg(short = 'a', long, env = "SERVER_ADDRESS")]
    server_address: Option<String>,

    /// Base URL address, example http://127.0.0.1:8080
    #[arg(short = 'b', long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Append-log path for the in-memory backend; blank disables the log
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<String>,

    /// Postgres connection string; blank selects the in-memory backend
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Force the https scheme onto the base URL
    #[arg(short = 's', long, env = "ENABLE_HTTPS", num_args = 0..=1, default_missing_value = "true")]
    enable_https: Option<bool>,

    /// Trusted subnet for internal stats, CIDR notation
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,

    /// gRPC listen address; blank disables the gRPC server
    #[arg(short = 'g', long, env = "GRPC_ADDRESS")]
    grpc_address: Option<String>,

    /// Config file path (JSON)
    #[arg(short = 'c', long)]
    config: Option<String>,
}

/// Loads the effective configuration from all four sources.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        if env::var_os(CONFIG_FILE_ENV).is_none() {
            return Err(reexec_with_config_file(path));
        }
    }

    let mut config = Config::default();
    if let Some(path) = env::var_os(CONFIG_FILE_ENV) {
        config.merge_file(Path::new(&path))?;
    }
    config.apply_cli(cli);

    if let Ok(secret) = env::var(SECRET_KEY_ENV) {
        config.secret_key = secret;
    }
    if let Ok(name) = env::var(COOKIE_NAME_ENV) {
        config.cookie_auth_name = name;
    }

    config.apply_base_url_scheme()?;
    Ok(config)
}

impl Config {
    /// Merges the JSON file at `path` over the current values. A missing or
    /// non-regular file is silently skipped.
    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let Ok(metadata) = fs::metadata(path) else {
            return Ok(());
        };
        if !metadata.is_file() {
            return Ok(());
        }

        let file: FileConfig = serde_json::from_str(&fs::read_to_string(path)?)?;
        if let Some(value) = file.server_address {
            self.server_address = value;
        }
        if let Some(value) = file.base_url {
            self.base_url = value;
        }
        if let Some(value) = file.file_storage_path {
            self.file_storage_path = value;
        }
        if let Some(value) = file.database_dsn {
            self.database_dsn = value;
        }
        if let Some(value) = file.enable_https {
            self.enable_https = value;
        }
        if let Some(value) = file.trusted_subnet {
            self.trusted_subnet = value;
        }
        if let Some(value) = file.grpc_address {
            self.grpc_address = value;
        }
        Ok(())
    }

    /// Applies environment variables and flags; clap already resolved the
    /// flag-over-env precedence per argument.
    fn apply_cli(&mut self, cli: Cli) {
        if let Some(value) = cli.server_address {
            self.server_address = value;
        }
        if let Some(value) = cli.base_url {
            self.base_url = value;
        }
        if let Some(value) = cli.file_storage_path {
            self.file_storage_path = value;
        }
        if let Some(value) = cli.database_dsn {
            self.database_dsn = value;
        }
        if let Some(value) = cli.enable_https {
            self.enable_https = value;
        }
        if let Some(value) = cli.trusted_subnet {
            self.trusted_subnet = value;
        }
        if let Some(value) = cli.grpc_address {
            self.grpc_address = value;
        }
    }

    /// Rewrites the base URL scheme according to `enable_https`.
    fn apply_base_url_scheme(&mut self) -> Result<(), ConfigError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::BaseUrl(format!("{}: {e}", self.base_url)))?;
        let scheme = if self.enable_https { "https" } else { "http" };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::BaseUrl(format!("cannot set scheme {scheme} on {url}")))?;
        self.base_url = url.to_string().trim_end_matches('/').to_string();
        Ok(())
    }
}

/// Re-runs the current binary with `CONFIG` pointing at the file named on
/// the command line, then exits with the child's status. Only called when
/// the variable is not already set, so the child takes the normal load path.
fn reexec_with_config_file(path: &str) -> ConfigError {
    let exe = match env::current_exe() {
        Ok(exe) => exe,
        Err(err) => return ConfigError::ReExec(err.to_string()),
    };

    match process::Command::new(exe)
        .args(env::args_os().skip(1))
        .env(CONFIG_FILE_ENV, path)
        .status()
    {
        Ok(status) => process::exit(status.code().unwrap_or(0)),
        Err(err) => ConfigError::ReExec(err.to_string()),
    }
}
