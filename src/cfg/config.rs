// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, net::IpAddr, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Top-level server configuration: where it listens, how many worker
/// threads it runs, where records and MapReduce scratch space live, and how
/// it logs. Loaded the same way the teacher loads its session config:
/// `serde_yaml` into a plain struct, then a `validate_and_normalize` pass
/// that rejects nonsensical values and fills in derived defaults.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_listen_addr")]
    pub listen_addr: IpAddr,

    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,

    /// Number of worker threads in the `TaskQueue` (spec §4.2).
    #[serde(default = "ServerConfig::default_worker_threads")]
    pub worker_threads: usize,

    /// Idle timeout before a session is dropped, in seconds.
    #[serde(default = "ServerConfig::default_session_timeout_secs", with = "serde_secs")]
    pub session_timeout: Duration,

    /// URL prefix RPC procedures are dispatched under (spec §4.5).
    #[serde(default = "ServerConfig::default_rpc_prefix")]
    pub rpc_prefix: String,

    /// Directory served for plain-GET static files outside `rpc_prefix`.
    /// `None` disables static serving.
    #[serde(default)]
    pub document_root: Option<String>,

    #[serde(default)]
    pub mapreduce: MapReduceConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl ServerConfig {
    fn default_listen_addr() -> IpAddr {
        IpAddr::from([0, 0, 0, 0])
    }

    /// KyotoTycoon's historical default port.
    fn default_port() -> u16 {
        1978
    }

    fn default_worker_threads() -> usize {
        8
    }

    fn default_session_timeout_secs() -> Duration {
        Duration::from_secs(30)
    }

    fn default_rpc_prefix() -> String {
        "/rpc/".to_string()
    }

    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: ServerConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.worker_threads >= 1, "worker_threads must be >= 1");
        ensure!(self.port != 0, "port must be nonzero");
        if !self.rpc_prefix.starts_with('/') {
            self.rpc_prefix.insert(0, '/');
        }
        if !self.rpc_prefix.ends_with('/') {
            self.rpc_prefix.push('/');
        }
        self.mapreduce.validate_and_normalize()?;
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: Self::default_listen_addr(),
            port: Self::default_port(),
            worker_threads: Self::default_worker_threads(),
            session_timeout: Self::default_session_timeout_secs(),
            rpc_prefix: Self::default_rpc_prefix(),
            document_root: None,
            mapreduce: MapReduceConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// MapReduce engine tuning (spec §3, §4.8): how much unflushed emitted data
/// to hold in memory, how many temp-store shards to spread it across, and
/// where those shards live on disk.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MapReduceConfig {
    /// Emitter cache flush threshold, in bytes of encoded value data.
    #[serde(default = "MapReduceConfig::default_cache_limit_bytes")]
    pub cache_limit_bytes: u64,

    /// Number of parallel temp-store shards (`dbnum` in spec §3/§9).
    #[serde(default = "MapReduceConfig::default_dbnum")]
    pub dbnum: usize,

    /// Directory temp-store shard files are written under. `None` keeps
    /// everything in memory (no spill-to-disk).
    #[serde(default)]
    pub temp_dir: Option<String>,

    #[serde(default = "MapReduceConfig::default_true")]
    pub compress_temp_stores: bool,

    /// Map-phase worker count (spec §4.8 `XPARAMAP`). `0` means "run the
    /// map phase inline on the calling thread".
    #[serde(default)]
    pub map_threads: usize,

    /// Reduce-phase worker count (spec §4.8 `XPARARED`). `0` means
    /// "inline".
    #[serde(default)]
    pub reduce_threads: usize,

    /// Dedicated emitter-flush worker count (spec §4.8 `XPARAFLS`). `0`
    /// means "flush inline on whichever thread triggers it".
    #[serde(default)]
    pub flush_threads: usize,
}

impl MapReduceConfig {
    fn default_cache_limit_bytes() -> u64 {
        64 * 1024 * 1024
    }

    fn default_dbnum() -> usize {
        8
    }

    fn default_true() -> bool {
        true
    }

    fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.cache_limit_bytes > 0, "cache_limit_bytes must be > 0");
        ensure!((1..=256).contains(&self.dbnum), "dbnum must be in 1..=256");
        ensure!(self.map_threads <= 256, "map_threads must be <= 256");
        ensure!(self.reduce_threads <= 256, "reduce_threads must be <= 256");
        ensure!(self.flush_threads <= 256, "flush_threads must be <= 256");
        Ok(())
    }
}

impl Default for MapReduceConfig {
    fn default() -> Self {
        MapReduceConfig {
            cache_limit_bytes: Self::default_cache_limit_bytes(),
            dbnum: Self::default_dbnum(),
            temp_dir: None,
            compress_temp_stores: true,
            map_threads: 0,
            reduce_threads: 0,
            flush_threads: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum RotationFreq {
    Minutely,
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogFileConfig {
    pub path: String,
    #[serde(default)]
    pub rotation_frequency: Option<RotationFreq>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogConfig {
    #[serde(default = "LogConfig::default_level")]
    pub level: String,
    #[serde(default = "LogConfig::default_output")]
    pub output: LogOutput,
    #[serde(default)]
    pub is_show_line: bool,
    #[serde(default)]
    pub is_show_module_path: bool,
    #[serde(default = "LogConfig::default_true")]
    pub is_show_target: bool,
    #[serde(default)]
    pub file: Option<LogFileConfig>,
}

impl LogConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_output() -> LogOutput {
        LogOutput::Stdout
    }

    fn default_true() -> bool {
        true
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: Self::default_level(),
            output: Self::default_output(),
            is_show_line: false,
            is_show_module_path: false,
            is_show_target: true,
            file: None,
        }
    }
}

/// Serde helper for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
