use crate::constants::backup::{RESTORE_SUCCESS_MESSAGE, TEMP_SQL_SUFFIX};
use crate::database::{Database, new_id, now};
use crate::driver::driver_for;
use crate::models::{LogStatus, RestoreLog, TargetWithSecret};
use crate::packager;
use crate::process::{CommandRunner, remove_if_exists};
use crate::vault::CredentialVault;
use crate::{BackupError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// 恢复执行器
///
/// 把一条成功备份的产物导入到指定目标库。源备份与目标的检查都在写日志之前完成，
/// 之后的失败会写入 failed 状态的恢复日志并把错误返回给调用方。
#[derive(Clone)]
pub struct RestoreExecutor {
    database: Database,
    vault: Arc<CredentialVault>,
    runner: Arc<dyn CommandRunner>,
}

impl RestoreExecutor {
    pub fn new(
        database: Database,
        vault: Arc<CredentialVault>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            database,
            vault,
            runner,
        }
    }

    /// 用备份记录 `backup_log_id` 的产物覆盖目标库 `target_id`
    #[instrument(skip_all, fields(backup_log_id = %backup_log_id, target_id = %target_id))]
    pub async fn start_restore(&self, backup_log_id: &str, target_id: &str) -> Result<RestoreLog> {
        let source = self
            .database
            .get_backup_log(backup_log_id)
            .await?
            .ok_or_else(|| BackupError::BackupLogNotFound(backup_log_id.to_string()))?;

        let artifact = match (source.log.status, &source.log.file_path) {
            (LogStatus::Success, Some(path)) => PathBuf::from(path),
            _ => return Err(BackupError::RestoreNotEligible(backup_log_id.to_string())),
        };

        let target = self
            .database
            .get_target_with_secret(target_id)
            .await?
            .ok_or_else(|| BackupError::TargetNotFound(target_id.to_string()))?;

        let mut log = RestoreLog {
            id: new_id(),
            target_id: target_id.to_string(),
            backup_log_id: backup_log_id.to_string(),
            status: LogStatus::Running,
            start_time: now(),
            end_time: None,
            message: None,
        };
        self.database.create_restore_log(&log).await?;

        info!(
            "开始恢复: {} -> {} ({})",
            artifact.display(),
            target.target.name,
            target.target.engine
        );

        match self.perform_restore(&target, &artifact).await {
            Ok(()) => {
                self.database
                    .finish_restore_log(&mut log, LogStatus::Success, RESTORE_SUCCESS_MESSAGE)
                    .await?;
                info!("恢复完成: {}", log.id);
                Ok(log)
            }
            Err(e) => {
                error!("恢复失败: {}: {}", log.id, e);
                self.database
                    .finish_restore_log(&mut log, LogStatus::Failed, &e.log_message())
                    .await?;
                Err(e)
            }
        }
    }

    async fn perform_restore(&self, target: &TargetWithSecret, artifact: &Path) -> Result<()> {
        if !tokio::fs::try_exists(artifact).await? {
            return Err(BackupError::ArtifactMissing(artifact.display().to_string()));
        }

        let temp = if packager::is_archive(artifact) {
            let temp = temp_sql_path(artifact);
            packager::extract(artifact, &temp).await?;
            Some(temp)
        } else {
            None
        };

        let result = self
            .import(target, temp.as_deref().unwrap_or(artifact))
            .await;

        // 解压出的临时文件无论成败都要删除
        if let Some(temp) = &temp {
            remove_if_exists(temp).await;
        }
        result
    }

    async fn import(&self, target: &TargetWithSecret, sql_file: &Path) -> Result<()> {
        let secret = self.vault.decrypt(&target.encrypted_secret)?;
        let plan = driver_for(target.target.engine).build_restore_command(
            &target.target,
            &secret,
            sql_file,
        )?;

        info!("执行导入: {}", plan.display_command());
        self.runner.run(&plan).await?;
        Ok(())
    }
}

/// 压缩包旁的临时 SQL 文件：`<文件名去扩展名>-temp.sql`
fn temp_sql_path(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    archive.with_file_name(format!("{stem}{TEMP_SQL_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::test_support::{DUMP_CONTENT, FakeRunner};
    use crate::database::test_support::{finished_log, target};
    use crate::models::{DatabaseTarget, EngineKind};

    struct Fixture {
        database: Database,
        vault: Arc<CredentialVault>,
        dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        Fixture {
            database: Database::connect_memory().await.unwrap(),
            vault: Arc::new(CredentialVault::new("test-key").unwrap()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    impl Fixture {
        async fn target(&self, engine: EngineKind) -> DatabaseTarget {
            let target = target("shop", engine);
            let secret = self.vault.encrypt("s3cret").unwrap();
            self.database.create_target(&target, &secret).await.unwrap();
            target
        }

        /// 写出 SQL 文件（可选压缩）并登记一条成功的备份记录
        async fn artifact(&self, compressed: bool) -> (String, PathBuf) {
            let sql = self.dir.path().join("shop-2024-01-15T02-00-00-000Z.sql");
            std::fs::write(&sql, DUMP_CONTENT).unwrap();
            let path = if compressed {
                packager::compress(&sql).await.unwrap()
            } else {
                sql
            };
            let size = std::fs::metadata(&path).unwrap().len() as i64;
            let log = finished_log(
                None,
                LogStatus::Success,
                Some(&path.to_string_lossy()),
                Some(size),
            );
            self.database.create_backup_log(&log).await.unwrap();
            (log.id, path)
        }

        fn executor(&self, runner: Arc<FakeRunner>) -> RestoreExecutor {
            RestoreExecutor::new(self.database.clone(), self.vault.clone(), runner)
        }
    }

    #[test]
    fn test_temp_sql_path() {
        assert_eq!(
            temp_sql_path(Path::new("/backups/shop-2024.zip")),
            PathBuf::from("/backups/shop-2024-temp.sql")
        );
    }

    #[tokio::test]
    async fn test_restore_archive_into_mysql() {
        let fx = fixture().await;
        let target = fx.target(EngineKind::Mysql).await;
        let (log_id, archive) = fx.artifact(true).await;
        let runner = Arc::new(FakeRunner::succeeding());

        let log = fx
            .executor(runner.clone())
            .start_restore(&log_id, &target.id)
            .await
            .unwrap();

        assert_eq!(log.status, LogStatus::Success);
        assert_eq!(log.message.as_deref(), Some(RESTORE_SUCCESS_MESSAGE));
        assert!(log.end_time.is_some());
        assert_eq!(fx.database.get_restore_log(&log.id).await.unwrap(), Some(log));

        let plans = runner.recorded();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].program, "mysql");
        let temp = plans[0].stdin_from.clone().unwrap();
        assert_eq!(temp, temp_sql_path(&archive));
        assert_eq!(runner.inputs(), vec![DUMP_CONTENT.to_string()]);

        // 压缩包保留，临时文件已删除
        assert!(archive.exists());
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_restore_plain_sql_into_postgres() {
        let fx = fixture().await;
        let target = fx.target(EngineKind::Postgres).await;
        let (log_id, sql) = fx.artifact(false).await;
        let runner = Arc::new(FakeRunner::succeeding());

        fx.executor(runner.clone())
            .start_restore(&log_id, &target.id)
            .await
            .unwrap();

        let plans = runner.recorded();
        assert_eq!(plans[0].program, "psql");
        assert!(plans[0].args.contains(&format!("--file={}", sql.display())));
        assert!(sql.exists());
    }

    #[tokio::test]
    async fn test_ineligible_sources_are_rejected_without_log() {
        let fx = fixture().await;
        let target = fx.target(EngineKind::Postgres).await;
        let executor = fx.executor(Arc::new(FakeRunner::succeeding()));

        let failed = finished_log(None, LogStatus::Failed, None, None);
        fx.database.create_backup_log(&failed).await.unwrap();
        assert!(matches!(
            executor.start_restore(&failed.id, &target.id).await,
            Err(BackupError::RestoreNotEligible(_))
        ));

        let no_file = finished_log(None, LogStatus::Success, None, None);
        fx.database.create_backup_log(&no_file).await.unwrap();
        assert!(matches!(
            executor.start_restore(&no_file.id, &target.id).await,
            Err(BackupError::RestoreNotEligible(_))
        ));

        assert!(matches!(
            executor.start_restore("missing", &target.id).await,
            Err(BackupError::BackupLogNotFound(_))
        ));

        let (log_id, _) = fx.artifact(false).await;
        assert!(matches!(
            executor.start_restore(&log_id, "missing").await,
            Err(BackupError::TargetNotFound(_))
        ));

        assert!(fx.database.list_restore_logs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifact_records_failed_restore() {
        let fx = fixture().await;
        let target = fx.target(EngineKind::Postgres).await;
        let (log_id, sql) = fx.artifact(false).await;
        std::fs::remove_file(&sql).unwrap();

        let result = fx
            .executor(Arc::new(FakeRunner::succeeding()))
            .start_restore(&log_id, &target.id)
            .await;
        assert!(matches!(result, Err(BackupError::ArtifactMissing(_))));

        let logs = fx.database.list_restore_logs().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log.status, LogStatus::Failed);
        assert!(logs[0].log.message.as_deref().unwrap().contains("备份文件不存在"));
        assert_eq!(logs[0].target_name.as_deref(), Some("shop"));
    }

    #[tokio::test]
    async fn test_failed_import_removes_temp_file() {
        let fx = fixture().await;
        let target = fx.target(EngineKind::Mysql).await;
        let (log_id, archive) = fx.artifact(true).await;

        let result = fx
            .executor(Arc::new(FakeRunner::failing(1, "ERROR 1045: Access denied")))
            .start_restore(&log_id, &target.id)
            .await;
        assert!(matches!(result, Err(BackupError::ProcessFailed { .. })));
        assert!(!temp_sql_path(&archive).exists());

        let logs = fx.database.list_restore_logs().await.unwrap();
        assert_eq!(logs[0].log.status, LogStatus::Failed);
        assert!(logs[0].log.message.as_deref().unwrap().contains("Access denied"));
    }

    #[tokio::test]
    async fn test_sqlite_target_fails_restore() {
        let fx = fixture().await;
        let target = fx.target(EngineKind::Sqlite).await;
        let (log_id, _) = fx.artifact(false).await;
        let runner = Arc::new(FakeRunner::succeeding());

        let result = fx
            .executor(runner.clone())
            .start_restore(&log_id, &target.id)
            .await;
        assert!(matches!(result, Err(BackupError::UnsupportedEngine(_))));
        assert!(runner.recorded().is_empty());
    }
}
