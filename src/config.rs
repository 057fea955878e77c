use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use url::Url;

const DEFAULT_TRACKER_LIST_URL: &str =
    "https://cdn.jsdelivr.net/gh/ngosang/trackerslist@master/trackers_best.txt";

/// Connection and housekeeping settings for the download daemon, read from
/// `ARIA2_*`.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,
    pub rpc_secret: Option<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub auto_update_tracker: bool,
    #[serde(default = "default_tracker_list_url")]
    pub tracker_list_url: String,
    pub http_proxy: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rpc_host: default_rpc_host(),
            rpc_port: default_rpc_port(),
            rpc_path: default_rpc_path(),
            rpc_secret: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            auto_update_tracker: true,
            tracker_list_url: default_tracker_list_url(),
            http_proxy: None,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed("ARIA2_").from_env()?)
    }

    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = Url::parse("ws://localhost")?;
        url.set_host(Some(&self.rpc_host))?;
        url.set_port(Some(self.rpc_port))
            .map_err(|()| anyhow::anyhow!("port should be accepted"))?;
        url.set_path(&self.rpc_path);
        Ok(url)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Where transfers land and where the curated index tree lives, read from
/// `LIBRARY_*`.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_io_workers")]
    pub io_workers: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            index_dir: default_index_dir(),
            io_workers: default_io_workers(),
        }
    }
}

impl LibraryConfig {
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed("LIBRARY_").from_env()?)
    }
}

/// Limits applied to every classification script, read from `RULE_*`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_rule_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_rule_timeout_ms(),
            memory_limit_bytes: default_memory_limit(),
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed("RULE_").from_env()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub database: String,
}

impl DbConfig {
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed("PG_").from_env()?)
    }

    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse("postgres://")?;
        url.set_host(Some(&self.host))?;
        url.set_password(Some(&self.pass))
            .map_err(|()| anyhow::anyhow!("password should be accepted"))?;
        url.set_username(&self.user)
            .map_err(|()| anyhow::anyhow!("username should be accepted"))?;
        url.set_port(Some(self.port))
            .map_err(|()| anyhow::anyhow!("port should be accepted"))?;
        url.set_path(&self.database);
        Ok(url)
    }
}

fn default_rpc_host() -> String {
    "127.0.0.1".into()
}

fn default_rpc_port() -> u16 {
    6800
}

fn default_rpc_path() -> String {
    "/jsonrpc".into()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_tracker_list_url() -> String {
    DEFAULT_TRACKER_LIST_URL.into()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("data/download")
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("data/index")
}

fn default_io_workers() -> usize {
    4
}

fn default_rule_timeout_ms() -> u64 {
    10_000
}

fn default_memory_limit() -> usize {
    64 * 1024 * 1024
}
