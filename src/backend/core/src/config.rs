//! Configuration management.

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP / WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Task log pipeline configuration
    #[serde(default)]
    pub log: LogConfig,

    /// DAG pool configuration
    #[serde(default)]
    pub dag: DagPoolConfig,

    /// Remote worker selection
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Worker-mode settings (this node acting as a remote worker)
    #[serde(default)]
    pub work: WorkModeConfig,

    /// Auth settings
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Optional external migrations directory. The embedded migrations are
    /// used when unset.
    #[serde(default)]
    pub migrations_dir: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { db_path: default_db_path(), migrations_dir: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Task log file path; empty disables the file sink.
    #[serde(default = "default_log_path")]
    pub path: String,

    /// Ring buffer capacity per task.
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// File sink rotation threshold in bytes; 0 disables rotation.
    #[serde(default = "default_rotate_bytes")]
    pub rotate_bytes: u64,

    /// Rotated siblings kept after pruning.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            max_records: default_max_records(),
            rotate_bytes: default_rotate_bytes(),
            max_files: default_max_files(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DagPoolConfig {
    /// Initial pool workers; the hard cap is 4x this value.
    #[serde(default = "default_pool_workers")]
    pub num_workers: usize,
}

impl Default for DagPoolConfig {
    fn default() -> Self {
        Self { num_workers: default_pool_workers() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// `least-load` or `rr`.
    #[serde(default = "default_select_strategy")]
    pub select_strategy: String,

    /// Seconds a dead worker lingers before the sweeper removes it.
    #[serde(default = "default_prune_after_secs")]
    pub prune_after_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { select_strategy: default_select_strategy(), prune_after_secs: default_prune_after_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkModeConfig {
    /// When true this node registers with a master and accepts pushed tasks.
    #[serde(default)]
    pub is_work: bool,

    #[serde(default = "default_master_host")]
    pub master_host: String,

    #[serde(default = "default_master_port")]
    pub master_port: u16,

    #[serde(default)]
    pub worker_id: String,

    #[serde(default = "default_worker_host")]
    pub worker_host: String,

    #[serde(default)]
    pub worker_port: u16,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_max_running_tasks")]
    pub max_running_tasks: u32,

    #[serde(default)]
    pub queues: Vec<String>,

    #[serde(default)]
    pub labels: Vec<String>,
}

impl Default for WorkModeConfig {
    fn default() -> Self {
        Self {
            is_work: false,
            master_host: default_master_host(),
            master_port: default_master_port(),
            worker_id: String::new(),
            worker_host: default_worker_host(),
            worker_port: 0,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_running_tasks: default_max_running_tasks(),
            queues: Vec::new(),
            labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_admin_user")]
    pub admin_user: String,

    #[serde(default = "default_admin_password")]
    pub admin_password: String,

    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_user: default_admin_user(),
            admin_password: default_admin_password(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_db_path() -> String { "taskhub.db".to_string() }
fn default_log_path() -> String { "logs/taskhub.log".to_string() }
fn default_max_records() -> usize { 2000 }
fn default_rotate_bytes() -> u64 { 8 * 1024 * 1024 }
fn default_max_files() -> usize { 5 }
fn default_pool_workers() -> usize { 4 }
fn default_select_strategy() -> String { "least-load".to_string() }
fn default_prune_after_secs() -> u64 { 60 }
fn default_master_host() -> String { "127.0.0.1".to_string() }
fn default_master_port() -> u16 { 8080 }
fn default_worker_host() -> String { "127.0.0.1".to_string() }
fn default_heartbeat_interval_ms() -> u64 { 3000 }
fn default_max_running_tasks() -> u32 { 1 }
fn default_admin_user() -> String { "admin".to_string() }
fn default_admin_password() -> String { "123456".to_string() }
fn default_token_ttl_secs() -> u64 { 7200 }

impl Config {
    /// Load configuration from `taskhub.toml` (if present) and the
    /// environment, then apply the short-form env overrides.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_sources(config::File::with_name("taskhub").required(false))
    }

    /// Load from a specific file path plus environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        Self::from_sources(config::File::with_name(path))
    }

    fn from_sources(file: config::File<config::FileSourceFile, config::FileFormat>) -> anyhow::Result<Self> {
        let built = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("TASKHUB").separator("__"))
            .build()?;

        let mut cfg: Config = built.try_deserialize()?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// `TASKHUB_PORT`, `TASKHUB_HOST`, `TASKHUB_DB`, `TASKHUB_LOG` win over
    /// everything else.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("TASKHUB_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(host) = std::env::var("TASKHUB_HOST") {
            self.server.host = host;
        }
        if let Ok(db) = std::env::var("TASKHUB_DB") {
            self.database.db_path = db;
        }
        if let Ok(log) = std::env::var("TASKHUB_LOG") {
            self.log.path = log;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.log.max_records, 2000);
        assert_eq!(cfg.dag.num_workers, 4);
        assert_eq!(cfg.worker.select_strategy, "least-load");
        assert_eq!(cfg.auth.token_ttl_secs, 7200);
    }

    #[test]
    fn env_overrides_win() {
        std::env::set_var("TASKHUB_PORT", "9191");
        std::env::set_var("TASKHUB_DB", "/tmp/x.db");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.server.port, 9191);
        assert_eq!(cfg.database.db_path, "/tmp/x.db");
        std::env::remove_var("TASKHUB_PORT");
        std::env::remove_var("TASKHUB_DB");
    }
}
