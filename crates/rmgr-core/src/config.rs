use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::respool::CapacitySource;

/// One resource queue definition (`[[queues]]` in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    /// Parent queue name; exactly one queue (the root) has none.
    #[serde(default)]
    pub parent: Option<String>,
    /// Share of the parent's memory, in percent.
    pub memory_limit_percent: f64,
    /// Share of the parent's cores, in percent.
    pub core_limit_percent: f64,
    /// Concurrent running statements allowed (0 = unlimited).
    #[serde(default)]
    pub active_statements: u32,
    /// Per-vseg memory quota in MB.
    #[serde(default = "default_vseg_memory_mb")]
    pub vseg_memory_mb: u32,
    /// Per-vseg core quota; derived from the cluster memory/core ratio when unset.
    #[serde(default)]
    pub vseg_core: Option<f64>,
    /// Factor applied to the queue's vseg count to get its reported maximum.
    #[serde(default = "default_overcommit")]
    pub overcommit: f64,
}

fn default_vseg_memory_mb() -> u32 {
    256
}

fn default_overcommit() -> f64 {
    2.0
}

/// A database user and the leaf queue it runs in (`[[users]]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub oid: i64,
    pub queue: String,
}

/// Global configuration loaded from `~/.config/rmgr/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmConfig {
    /// Address the RPC listener binds to.
    pub listen_addr: String,
    /// Optional Unix control socket path (None = `$XDG_STATE_HOME/rmgr/control.sock`).
    #[serde(default)]
    pub control_socket: Option<PathBuf>,
    /// Size of the connection id pool.
    pub max_resource_contexts: usize,
    /// Startup grace window before the first segment report, in seconds.
    pub nocluster_timeout_secs: u64,
    /// Largest tolerated fraction of unavailable hosts before acquires are rejected.
    pub reject_request_nseg_limit: f64,
    /// Expected cluster size (0 = number of hosts seen so far).
    #[serde(default)]
    pub slaves_host_count: u32,
    /// Key prefix of the membership store.
    pub membership_server_dir: String,
    /// Idle session timeout, in seconds.
    pub session_lease_timeout_secs: u64,
    /// A segment silent for this long is marked unavailable, in seconds.
    pub segment_heartbeat_timeout_secs: u64,
    /// Period of the sweep tick, in milliseconds.
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub capacity_source: CapacitySource,
    /// Configured minimum containers per segment.
    pub min_containers_per_seg: u32,
    /// Write segment status rows to the catalog (off for utility roles).
    #[serde(default = "default_true")]
    pub catalog_updates: bool,
    /// Optional catalog database path (None = `$XDG_STATE_HOME/rmgr/catalog.db`).
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Port the liveness prober connects to on each segment.
    pub segment_port: u16,
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for RmConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5437".to_string(),
            control_socket: None,
            max_resource_contexts: 65535,
            nocluster_timeout_secs: 60,
            reject_request_nseg_limit: 0.25,
            slaves_host_count: 0,
            membership_server_dir: "/rmgr/segments/".to_string(),
            session_lease_timeout_secs: 10,
            segment_heartbeat_timeout_secs: 300,
            tick_interval_ms: 1000,
            capacity_source: CapacitySource::Fts,
            min_containers_per_seg: 2,
            catalog_updates: true,
            catalog_path: None,
            segment_port: 40000,
            queues: vec![
                QueueConfig {
                    name: "pg_root".to_string(),
                    parent: None,
                    memory_limit_percent: 100.0,
                    core_limit_percent: 100.0,
                    active_statements: 0,
                    vseg_memory_mb: 256,
                    vseg_core: None,
                    overcommit: 1.0,
                },
                QueueConfig {
                    name: "pg_default".to_string(),
                    parent: Some("pg_root".to_string()),
                    memory_limit_percent: 50.0,
                    core_limit_percent: 50.0,
                    active_statements: 20,
                    vseg_memory_mb: 256,
                    vseg_core: None,
                    overcommit: 2.0,
                },
            ],
            users: vec![UserConfig {
                name: "gpadmin".to_string(),
                oid: 10,
                queue: "pg_default".to_string(),
            }],
        }
    }
}

impl RmConfig {
    /// Check the queue tree and user assignments.
    pub fn validate(&self) -> Result<()> {
        if self.max_resource_contexts == 0 {
            bail!("max_resource_contexts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.reject_request_nseg_limit) {
            bail!(
                "reject_request_nseg_limit must be within 0..=1, got {}",
                self.reject_request_nseg_limit
            );
        }

        let mut names = HashSet::new();
        for q in &self.queues {
            if !names.insert(q.name.as_str()) {
                bail!("duplicate queue {}", q.name);
            }
            if q.vseg_memory_mb == 0 {
                bail!("queue {} has a zero vseg memory quota", q.name);
            }
            for (what, pct) in [
                ("memory", q.memory_limit_percent),
                ("core", q.core_limit_percent),
            ] {
                if !(0.0..=100.0).contains(&pct) {
                    bail!("queue {} {what} limit {pct}% is out of range", q.name);
                }
            }
        }

        let roots: Vec<_> = self.queues.iter().filter(|q| q.parent.is_none()).collect();
        if roots.len() != 1 {
            bail!("expected exactly one root queue, found {}", roots.len());
        }

        let mut has_children: HashMap<&str, bool> = HashMap::new();
        for q in &self.queues {
            if let Some(parent) = q.parent.as_deref() {
                if !names.contains(parent) {
                    bail!("queue {} names unknown parent {parent}", q.name);
                }
                has_children.insert(parent, true);
            }
        }

        let mut oids = HashSet::new();
        for u in &self.users {
            if !names.contains(u.queue.as_str()) {
                bail!("user {} is assigned to unknown queue {}", u.name, u.queue);
            }
            if has_children.contains_key(u.queue.as_str()) {
                bail!("user {} is assigned to non-leaf queue {}", u.name, u.queue);
            }
            if !oids.insert(u.oid) {
                bail!("duplicate user oid {}", u.oid);
            }
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("rmgr")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load and validate configuration from an explicit path.
pub fn load_from_path(path: &Path) -> Result<RmConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg: RmConfig =
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Default location of the segment status catalog.
pub fn default_catalog_path() -> Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("rmgr")?.get_state_home();
    Ok(dir.join("rmgr").join("catalog.db"))
}

/// Default path for the control socket (same XDG state dir as the catalog).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("rmgr")?.get_state_home();
    Ok(dir.join("rmgr").join("control.sock"))
}
