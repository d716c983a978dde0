use crate::constants::{api, backup, config, logs, connectivity, runner, store};
use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub backup: BackupConfig,
    pub runner: RunnerConfig,
    pub connection: ConnectionConfig,
    pub recovery: RecoveryConfig,
    pub dashboard: DashboardConfig,
    pub server: ServerConfig,
}

/// 本地存储配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// DuckDB 数据库文件路径
    pub path: String,
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    /// 新建任务未指定目录时使用的存储目录
    pub default_storage_dir: String,
}

/// 外部命令配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    pub stderr_limit_bytes: usize,
}

/// 连通性检测配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub timeout_secs: u64,
}

/// 启动恢复配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// 启动时将遗留的 running 记录标记为失败
    pub fail_interrupted_runs: bool,
}

/// 仪表盘配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub recent_limit: usize,
}

/// 调度服务控制接口配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址，只应绑定本机回环地址
    pub listen: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: store::get_default_db_path().to_string_lossy().to_string(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            default_storage_dir: backup::get_default_storage_dir()
                .to_string_lossy()
                .to_string(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stderr_limit_bytes: runner::DEFAULT_STDERR_LIMIT,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: connectivity::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            fail_interrupted_runs: true,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            recent_limit: logs::DEFAULT_RECENT_LIMIT,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("{}:{}", api::DEFAULT_HOST, api::DEFAULT_PORT),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> backup-manager.toml -> .backup-manager.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        tracing::warn!("未找到配置文件，使用默认配置（可运行 init 生成）");
        Ok(Self::default())
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BackupError::ConfigNotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(&path, self.to_toml_with_comments())?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> String {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        TEMPLATE
            .replace("{store_path}", &escape_toml(&self.store.path))
            .replace(
                "{default_storage_dir}",
                &escape_toml(&self.backup.default_storage_dir),
            )
            .replace(
                "{stderr_limit_bytes}",
                &self.runner.stderr_limit_bytes.to_string(),
            )
            .replace("{connect_timeout_secs}", &self.connection.timeout_secs.to_string())
            .replace(
                "{fail_interrupted_runs}",
                &self.recovery.fail_interrupted_runs.to_string(),
            )
            .replace("{recent_limit}", &self.dashboard.recent_limit.to_string())
            .replace("{server_listen}", &escape_toml(&self.server.listen))
    }

    fn validate(&self) -> Result<()> {
        if self.store.path.trim().is_empty() {
            return Err(BackupError::invalid_input("store.path 不能为空"));
        }
        if self.connection.timeout_secs == 0 {
            return Err(BackupError::invalid_input("connection.timeout_secs 必须大于 0"));
        }
        if self.dashboard.recent_limit == 0 {
            return Err(BackupError::invalid_input("dashboard.recent_limit 必须大于 0"));
        }
        self.server_addr()?;
        Ok(())
    }

    /// 获取数据库文件路径
    pub fn get_store_path(&self) -> PathBuf {
        PathBuf::from(&self.store.path)
    }

    /// 获取默认备份目录路径
    pub fn get_default_storage_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.default_storage_dir)
    }

    /// 连通性检测超时
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.timeout_secs)
    }

    /// 控制接口监听地址
    pub fn server_addr(&self) -> Result<SocketAddr> {
        self.server.listen.parse().map_err(|_| {
            BackupError::invalid_input(format!("server.listen 不是有效的地址: {}", self.server.listen))
        })
    }

    /// 控制接口的基础 URL
    pub fn server_base_url(&self) -> Result<String> {
        Ok(format!("http://{}", self.server_addr()?))
    }
}

fn escape_toml(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
