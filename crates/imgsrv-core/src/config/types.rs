//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Where sources and derivative artifacts live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding uploaded sources and their JSON sidecars
    pub upload_dir: PathBuf,

    /// Directory holding derivative artifacts and their JSON sidecars
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("~/.imgsrv/uploads"),
            cache_dir: PathBuf::from("~/.imgsrv/cache"),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the HTTP surface
    pub bind: SocketAddr,

    /// Route prefix the image resource is mounted under (ends with `/`)
    pub base_route: String,

    /// Public URL prefix used for `_links` hrefs (ends with `/`)
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 61235)),
            base_route: "/".to_string(),
            base_url: "/".to_string(),
        }
    }
}

/// Where the reservation authority runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorMode {
    /// The authority is a task inside this process
    #[default]
    Local,
    /// The authority is a designated coordinator process reached over TCP
    Remote,
}

/// Reservation coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Local (in-process) or remote (designated process) authority
    pub mode: CoordinatorMode,

    /// Address of the designated coordinator process.
    /// Required in remote mode, used as the listen address by `imgsrv coordinator`.
    pub address: Option<SocketAddr>,

    /// Max commands buffered on a coordinator connection before backpressure
    pub command_buffer: usize,

    /// Reservations older than this are expired and their waiters retry.
    /// 0 disables leases (a crashed owner then starves its waiters).
    pub lease_timeout_ms: u64,

    /// How often the authority looks for expired leases
    pub sweep_interval_ms: u64,

    /// Release the reservation when the transform fails.
    /// `false` abandons it instead, leaving waiters to the lease sweep.
    pub release_on_failure: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: CoordinatorMode::Local,
            address: None,
            command_buffer: 256,
            lease_timeout_ms: 60_000,
            sweep_interval_ms: 5_000,
            release_on_failure: true,
        }
    }
}

/// Resource limits to protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum file size in megabytes
    pub max_file_size_mb: u64,

    /// Maximum image dimension (width or height)
    pub max_image_dimension: u32,

    /// Decode timeout in milliseconds
    pub decode_timeout_ms: u64,

    /// Timeout for running a full transform plan in milliseconds
    pub transform_timeout_ms: u64,

    /// Timeout for downloading a source from its origin in milliseconds
    pub fetch_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 100,
            max_image_dimension: 10000,
            decode_timeout_ms: 5000,
            transform_timeout_ms: 30000,
            fetch_timeout_ms: 30000,
        }
    }
}

/// Encoder settings for derivative artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
