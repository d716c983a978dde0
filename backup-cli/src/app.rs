use anyhow::{Context, Result};
use backup_core::{
    backup::BackupExecutor, config::AppConfig, database::Database, history::HistoryManager,
    job_manager::JobManager, connectivity::ConnectionTester, process::SystemRunner,
    restore::RestoreExecutor, scheduler::Scheduler, target_manager::TargetManager,
    vault::CredentialVault,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cli::Commands;
use crate::commands::{self, CommandContext};
use crate::remote::RemoteService;

/// 直接访问本地存储的全部组件，启动时组装一次
#[derive(Clone)]
pub struct CliApp {
    pub config: AppConfig,
    pub database: Database,
    pub vault: Arc<CredentialVault>,
    pub targets: TargetManager,
    pub jobs: JobManager,
    pub history: HistoryManager,
    pub restores: RestoreExecutor,
    pub scheduler: Arc<Scheduler>,
}

impl CliApp {
    /// 打开本地存储并初始化所有组件
    pub async fn open(config: AppConfig, vault: Arc<CredentialVault>) -> Result<Self> {
        let database = Database::connect(config.get_store_path())
            .await
            .with_context(|| format!("无法打开数据库 {}", config.store.path))?;
        debug!("数据库已连接: {}", config.store.path);

        Ok(Self::assemble(config, database, vault))
    }

    /// 用已有的存储与密钥组装组件
    pub fn assemble(config: AppConfig, database: Database, vault: Arc<CredentialVault>) -> Self {
        let runner = Arc::new(SystemRunner::new(config.runner.stderr_limit_bytes));
        let executor = BackupExecutor::new(database.clone(), vault.clone(), runner.clone());
        let scheduler = Arc::new(Scheduler::new(database.clone(), executor.clone()));

        let targets = TargetManager::new(
            database.clone(),
            vault.clone(),
            ConnectionTester::new(config.connect_timeout()),
        );
        let jobs = JobManager::new(database.clone(), scheduler.clone(), executor);
        let history =
            HistoryManager::new(database.clone()).with_recent_limit(config.dashboard.recent_limit);
        let restores = RestoreExecutor::new(database.clone(), vault.clone(), runner);

        Self {
            config,
            database,
            vault,
            targets,
            jobs,
            history,
            restores,
            scheduler,
        }
    }
}

/// 加载配置与加密密钥
///
/// `config_path` 存在时直接加载，否则按候选文件名查找，都没有时使用默认配置。
pub fn load_environment(config_path: &Path) -> Result<(AppConfig, Arc<CredentialVault>)> {
    let config = if config_path.exists() {
        AppConfig::load_from_file(config_path)?
    } else {
        AppConfig::find_and_load_config()?
    };
    let vault = Arc::new(CredentialVault::from_env()?);
    Ok((config, vault))
}

/// 运行管理命令
///
/// 调度服务在运行时通过控制接口交给服务进程执行，否则直接打开本地存储。
pub async fn execute(
    config: AppConfig,
    vault: Arc<CredentialVault>,
    json: bool,
    command: Commands,
) -> Result<()> {
    if let Some(remote) = RemoteService::detect(&config, &vault).await {
        debug!("检测到运行中的调度服务: {}", remote.base_url());
        let ctx = CommandContext {
            service: &remote,
            config: &config,
            json,
        };
        return commands::run_command(&ctx, command).await;
    }

    let app = CliApp::open(config, vault).await?;
    let ctx = CommandContext {
        service: &app,
        config: &app.config,
        json,
    };
    commands::run_command(&ctx, command).await
}

/// 启动调度服务与控制接口，直到收到 Ctrl-C
pub async fn serve(config: AppConfig, vault: Arc<CredentialVault>) -> Result<()> {
    let app = Arc::new(CliApp::open(config, vault).await?);
    commands::run_serve(app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{JobCommand, TargetCommand};
    use backup_core::models::EngineKind;

    async fn app(dir: &Path) -> CliApp {
        let mut config = AppConfig::default();
        config.backup.default_storage_dir = dir.join("backups").to_string_lossy().to_string();
        CliApp::assemble(
            config,
            Database::connect_memory().await.unwrap(),
            Arc::new(CredentialVault::new("test-key").unwrap()),
        )
    }

    async fn run(app: &CliApp, command: Commands) -> Result<()> {
        let ctx = CommandContext {
            service: app,
            config: &app.config,
            json: true,
        };
        commands::run_command(&ctx, command).await
    }

    #[tokio::test]
    async fn test_target_and_job_commands() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        run(
            &app,
            Commands::Target(TargetCommand::Add {
                name: "shop".to_string(),
                engine: EngineKind::Mysql,
                host: "localhost".to_string(),
                port: None,
                username: "backup".to_string(),
                password: "s3cret".to_string(),
                database_name: "shop".to_string(),
            }),
        )
        .await
        .unwrap();

        let targets = app.targets.list().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].port, 3306);

        run(
            &app,
            Commands::Job(JobCommand::Add {
                target: targets[0].id.clone(),
                schedule: "0 2 * * *".to_string(),
                storage_path: None,
                no_compression: false,
                disabled: false,
            }),
        )
        .await
        .unwrap();

        let jobs = app.jobs.list(None).await.unwrap();
        assert_eq!(jobs.len(), 1);
        // 相对目录在客户端解析为绝对路径
        let storage = Path::new(&jobs[0].job.storage_path);
        assert!(storage.is_absolute());
        assert!(storage.ends_with("backups"));
        assert!(app.scheduler.is_scheduled(&jobs[0].job.id));

        run(&app, Commands::Stats).await.unwrap();
        run(&app, Commands::Job(JobCommand::List { target: None }))
            .await
            .unwrap();
        run(
            &app,
            Commands::Target(TargetCommand::Show {
                id: targets[0].id.clone(),
            }),
        )
        .await
        .unwrap();

        // 仍被任务引用的目标不能删除
        let result = run(
            &app,
            Commands::Target(TargetCommand::Delete {
                id: targets[0].id.clone(),
            }),
        )
        .await;
        assert!(result.is_err());

        app.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_job_add_rejects_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let result = run(
            &app,
            Commands::Job(JobCommand::Add {
                target: "missing".to_string(),
                schedule: "0 2 * * *".to_string(),
                storage_path: None,
                no_compression: false,
                disabled: false,
            }),
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<backup_core::BackupError>(),
            Some(backup_core::BackupError::TargetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_without_running_service_uses_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.store.path = dir.path().join("store.duckdb").to_string_lossy().to_string();
        // 没有服务监听的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        config.server.listen = listener.local_addr().unwrap().to_string();
        drop(listener);

        let vault = Arc::new(CredentialVault::new("test-key").unwrap());
        execute(config, vault, true, Commands::Stats)
            .await
            .unwrap();
        assert!(dir.path().join("store.duckdb").exists());
    }
}
