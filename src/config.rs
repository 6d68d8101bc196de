use crate::models::image::ImageFormat;
use anyhow::{Context, Result, anyhow, bail, ensure};
use clap::Parser;
use serde::Deserialize;
use std::{
    env, fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

const ENV_PREFIX: &str = "BLOB_STORE_";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STORAGE_DIR: &str = "./data/files";
const DEFAULT_LOCK_LIFETIME_SECS: u64 = 5;
const DEFAULT_IMAGE_MAX_DIMENSION: u32 = 2000;
const DEFAULT_SIZE_LIMIT: usize = 32 << 20;
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_LOG_LEVEL: &str = "info";

pub const IMAGE_MAX_DIMENSION_RANGE: (u32, u32) = (1000, 10_000);
const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Which storage backend serves files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Filesystem,
    InMemory,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filesystem" => Ok(Self::Filesystem),
            "inmemory" => Ok(Self::InMemory),
            other => Err(format!("unknown storage `{}` (filesystem|inmemory)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown log format `{}` (json|text)", other)),
        }
    }
}

/// Bearer tokens granting read or read/write access.
#[derive(Clone, PartialEq, Eq)]
pub struct Security {
    pub read_token: String,
    pub write_token: String,
}

// Keep tokens out of startup logs.
impl fmt::Debug for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Security")
            .field("read_token", &"<redacted>")
            .field("write_token", &"<redacted>")
            .finish()
    }
}

/// Centralized application configuration.
/// Layers, lowest first: defaults, JSON config file, environment, CLI flags.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageKind,
    pub storage_dir: PathBuf,
    pub lock_lifetime: Duration,
    pub image_format: ImageFormat,
    pub image_max_dimension: u32,
    pub security: Security,
    pub size_limit: usize,
    pub timeout: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Blob store with on-the-fly image processing")]
pub struct Args {
    /// JSON config file, applied below environment and flags
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (overrides BLOB_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOB_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend: filesystem or inmemory (overrides BLOB_STORE_STORAGE)
    #[arg(long)]
    pub storage: Option<StorageKind>,

    /// Directory where files are stored (overrides BLOB_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Lease lifetime in seconds (overrides BLOB_STORE_LOCK_LIFETIME)
    #[arg(long)]
    pub lock_lifetime: Option<u64>,

    /// Format images are stored and served in (overrides BLOB_STORE_IMAGE_FORMAT)
    #[arg(long)]
    pub image_format: Option<ImageFormat>,

    /// Bounding box edge for stored images (overrides BLOB_STORE_IMAGE_MAX_DIMENSION)
    #[arg(long)]
    pub image_max_dimension: Option<u32>,

    /// Token granting read access (overrides BLOB_STORE_READ_TOKEN)
    #[arg(long)]
    pub read_token: Option<String>,

    /// Token granting read and write access (overrides BLOB_STORE_WRITE_TOKEN)
    #[arg(long)]
    pub write_token: Option<String>,

    /// Maximum request body in bytes (overrides BLOB_STORE_SIZE_LIMIT)
    #[arg(long)]
    pub size_limit: Option<usize>,

    /// Request timeout in seconds (overrides BLOB_STORE_TIMEOUT)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// debug, info, warn or error (overrides BLOB_STORE_LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,

    /// json or text (overrides BLOB_STORE_LOG_FORMAT)
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

/// Shape of the optional `--config` file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    storage: Option<StorageKind>,
    storage_dir: Option<PathBuf>,
    lock_lifetime: Option<u64>,
    image_format: Option<ImageFormat>,
    image_max_dimension: Option<u32>,
    read_token: Option<String>,
    write_token: Option<String>,
    size_limit: Option<usize>,
    timeout: Option<u64>,
    log_level: Option<String>,
    log_format: Option<LogFormat>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// One setting resolved across the layers.
fn pick<T>(
    flag: Option<T>,
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    file: Option<T>,
) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if flag.is_some() {
        return Ok(flag);
    }
    let var = format!("{}{}", ENV_PREFIX, key);
    if let Some(value) = env(&var) {
        let parsed = value
            .parse::<T>()
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", var, value, err))?;
        return Ok(Some(parsed));
    }
    Ok(file)
}

impl AppConfig {
    /// Parse CLI args, environment variables and the optional config file.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge `args` with the environment seen through `env` and validate the
    /// result.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let cfg = Self {
            host: pick(args.host, &env, "HOST", file.host)?
                .unwrap_or_else(|| DEFAULT_HOST.into()),
            port: pick(args.port, &env, "PORT", file.port)?.unwrap_or(DEFAULT_PORT),
            storage: pick(args.storage, &env, "STORAGE", file.storage)?
                .unwrap_or(StorageKind::Filesystem),
            storage_dir: pick(args.storage_dir, &env, "STORAGE_DIR", file.storage_dir)?
                .unwrap_or_else(|| DEFAULT_STORAGE_DIR.into()),
            lock_lifetime: Duration::from_secs(
                pick(args.lock_lifetime, &env, "LOCK_LIFETIME", file.lock_lifetime)?
                    .unwrap_or(DEFAULT_LOCK_LIFETIME_SECS),
            ),
            image_format: pick(args.image_format, &env, "IMAGE_FORMAT", file.image_format)?
                .unwrap_or(ImageFormat::Jpeg),
            image_max_dimension: pick(
                args.image_max_dimension,
                &env,
                "IMAGE_MAX_DIMENSION",
                file.image_max_dimension,
            )?
            .unwrap_or(DEFAULT_IMAGE_MAX_DIMENSION),
            security: Security {
                read_token: pick(args.read_token, &env, "READ_TOKEN", file.read_token)?
                    .unwrap_or_default(),
                write_token: pick(args.write_token, &env, "WRITE_TOKEN", file.write_token)?
                    .unwrap_or_default(),
            },
            size_limit: pick(args.size_limit, &env, "SIZE_LIMIT", file.size_limit)?
                .unwrap_or(DEFAULT_SIZE_LIMIT),
            timeout: Duration::from_secs(
                pick(args.timeout, &env, "TIMEOUT", file.timeout)?
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            log_level: pick(args.log_level, &env, "LOG_LEVEL", file.log_level)?
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.into())
                .to_ascii_lowercase(),
            log_format: pick(args.log_format, &env, "LOG_FORMAT", file.log_format)?
                .unwrap_or(LogFormat::Json),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.port != 0, "port must not be 0");
        ensure!(
            self.image_format.is_output(),
            "image format `{}` cannot be encoded (bmp|jpeg|png|gif)",
            self.image_format
        );
        let (min, max) = IMAGE_MAX_DIMENSION_RANGE;
        ensure!(
            (min..=max).contains(&self.image_max_dimension),
            "image max dimension must be between {} and {}, got {}",
            min,
            max,
            self.image_max_dimension
        );
        if self.security.read_token.is_empty() || self.security.write_token.is_empty() {
            bail!("both read and write tokens must be set");
        }
        ensure!(
            self.security.read_token != self.security.write_token,
            "read and write tokens must differ"
        );
        ensure!(
            LOG_LEVELS.contains(&self.log_level.as_str()),
            "unknown log level `{}` (debug|info|warn|error)",
            self.log_level
        );
        ensure!(!self.lock_lifetime.is_zero(), "lock lifetime must be positive");
        ensure!(!self.timeout.is_zero(), "timeout must be positive");
        ensure!(self.size_limit > 0, "size limit must be positive");
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
