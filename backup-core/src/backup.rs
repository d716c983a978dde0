use crate::constants::backup::{ARCHIVE_EXTENSION, SQL_EXTENSION, SUCCESS_MESSAGE};
use crate::database::{BackupLogStart, Database};
use crate::driver::driver_for;
use crate::models::{ExecutionLog, LogOutcome, RecurringJob, TargetWithSecret};
use crate::packager;
use crate::process::{CommandRunner, remove_if_exists};
use crate::vault::CredentialVault;
use crate::{BackupError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// 一次备份执行的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BackupRunOutcome {
    Succeeded(ExecutionLog),
    Failed(ExecutionLog),
    /// 该任务已有执行中的记录，本次未执行
    Skipped { running_log_id: String },
}

impl BackupRunOutcome {
    pub fn log(&self) -> Option<&ExecutionLog> {
        match self {
            BackupRunOutcome::Succeeded(log) | BackupRunOutcome::Failed(log) => Some(log),
            BackupRunOutcome::Skipped { .. } => None,
        }
    }
}

/// 备份执行器
///
/// 负责单次备份：准入检查 → 写入 running 日志 → 转储 → 可选压缩 → 写入终态。
/// 写入 running 日志之后的任何失败都会先清理残留文件，再把日志标记为失败。
#[derive(Clone)]
pub struct BackupExecutor {
    database: Database,
    vault: Arc<CredentialVault>,
    runner: Arc<dyn CommandRunner>,
}

/// 本次执行产生的文件，失败时需要清理
#[derive(Debug, Default)]
struct Artifacts {
    raw: Option<PathBuf>,
    archive: Option<PathBuf>,
}

impl Artifacts {
    async fn cleanup(&self) {
        for path in [&self.raw, &self.archive].into_iter().flatten() {
            remove_if_exists(path).await;
        }
    }
}

impl BackupExecutor {
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

    /// 执行一次备份
    ///
    /// 任务不存在、已禁用或目标不存在时直接返回错误，不写日志。
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn run_job(&self, job_id: &str) -> Result<BackupRunOutcome> {
        let job = self
            .database
            .get_job(job_id)
            .await?
            .ok_or_else(|| BackupError::JobNotFound(job_id.to_string()))?;
        if !job.enabled {
            return Err(BackupError::JobDisabled(job_id.to_string()));
        }
        let target = self
            .database
            .get_target_with_secret(&job.target_id)
            .await?
            .ok_or_else(|| BackupError::TargetNotFound(job.target_id.clone()))?;

        let mut log = match self.database.start_backup_log(&job.id).await? {
            BackupLogStart::Started(log) => log,
            BackupLogStart::AlreadyRunning { log_id } => {
                warn!("任务 {} 已有执行中的备份 {}，跳过本次触发", job.id, log_id);
                return Ok(BackupRunOutcome::Skipped {
                    running_log_id: log_id,
                });
            }
        };

        info!(
            "开始备份: 任务 {} -> {} ({})",
            job.id, target.target.name, target.target.engine
        );

        let mut artifacts = Artifacts::default();
        match self.perform_backup(&job, &target, &log, &mut artifacts).await {
            Ok((file_path, file_size)) => {
                let outcome = LogOutcome::Success {
                    file_path: file_path.to_string_lossy().to_string(),
                    file_size,
                    message: SUCCESS_MESSAGE.to_string(),
                };
                self.database.finish_backup_log(&mut log, outcome).await?;
                info!("备份完成: {} ({} 字节)", file_path.display(), file_size);
                Ok(BackupRunOutcome::Succeeded(log))
            }
            Err(e) => {
                error!("备份失败: 任务 {}: {}", job.id, e);
                artifacts.cleanup().await;
                let outcome = LogOutcome::Failed {
                    message: e.log_message(),
                };
                self.database.finish_backup_log(&mut log, outcome).await?;
                Ok(BackupRunOutcome::Failed(log))
            }
        }
    }

    /// 执行转储与压缩，返回最终文件路径和大小
    async fn perform_backup(
        &self,
        job: &RecurringJob,
        target: &TargetWithSecret,
        log: &ExecutionLog,
        artifacts: &mut Artifacts,
    ) -> Result<(PathBuf, i64)> {
        let storage_dir = Path::new(&job.storage_path);
        tokio::fs::create_dir_all(storage_dir).await?;

        let raw_path = storage_dir.join(artifact_file_name(
            &target.target.database_name,
            log.start_time,
        ));

        let secret = self.vault.decrypt(&target.encrypted_secret)?;
        let plan = driver_for(target.target.engine).build_dump_command(
            &target.target,
            &secret,
            &raw_path,
        )?;

        artifacts.raw = Some(raw_path.clone());
        info!("执行转储: {}", plan.display_command());
        self.runner.run(&plan).await?;

        let final_path = if job.compression {
            artifacts.archive = Some(raw_path.with_extension(ARCHIVE_EXTENSION));
            packager::compress(&raw_path).await?
        } else {
            raw_path
        };

        let metadata = tokio::fs::metadata(&final_path).await?;
        Ok((final_path, metadata.len() as i64))
    }
}

/// 备份文件名：`<数据库名>-<ISO 8601 时间，':' 与 '.' 替换为 '-'>.sql`
pub fn artifact_file_name(database_name: &str, started_at: DateTime<Utc>) -> String {
    let timestamp = started_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{database_name}-{timestamp}.{SQL_EXTENSION}")
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::process::{CommandPlan, CommandRunner, ProcessOutput};
    use crate::{BackupError, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 脚本化的命令执行器：按配置写出转储内容或模拟失败
    #[derive(Default)]
    pub struct FakeRunner {
        pub fail_with: Option<(i32, String)>,
        /// 失败前先写出部分内容，模拟中途出错
        pub write_partial: bool,
        pub delay: Option<Duration>,
        pub plans: Mutex<Vec<CommandPlan>>,
        /// 恢复命令读到的 SQL 内容
        pub inputs: Mutex<Vec<String>>,
    }

    pub const DUMP_CONTENT: &str = "CREATE TABLE orders (id INT);\nINSERT INTO orders VALUES (1);\n";

    impl FakeRunner {
        pub fn succeeding() -> Self {
            Self::default()
        }

        pub fn failing(exit_code: i32, stderr: &str) -> Self {
            Self {
                fail_with: Some((exit_code, stderr.to_string())),
                write_partial: true,
                ..Self::default()
            }
        }

        pub fn recorded(&self) -> Vec<CommandPlan> {
            self.plans.lock().unwrap().clone()
        }

        pub fn inputs(&self) -> Vec<String> {
            self.inputs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, plan: &CommandPlan) -> Result<ProcessOutput> {
            self.plans.lock().unwrap().push(plan.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            // psql 用 --file=，mysql 用 stdin
            let input = plan.stdin_from.clone().or_else(|| {
                plan.args
                    .iter()
                    .find_map(|arg| arg.strip_prefix("--file="))
                    .filter(|_| !plan.program.ends_with("dump"))
                    .map(Into::into)
            });
            if let Some(path) = &input {
                self.inputs
                    .lock()
                    .unwrap()
                    .push(std::fs::read_to_string(path)?);
            }

            // pg_dump 用 --file=，mysqldump 用 stdout
            let output = plan.stdout_to.clone().or_else(|| {
                plan.args
                    .iter()
                    .find_map(|arg| arg.strip_prefix("--file="))
                    .filter(|_| plan.program.ends_with("dump"))
                    .map(Into::into)
            });

            if let Some((exit_code, stderr)) = &self.fail_with {
                if let (Some(path), true) = (&output, self.write_partial) {
                    std::fs::write(path, "-- partial")?;
                }
                return Err(BackupError::ProcessFailed {
                    program: plan.program.clone(),
                    exit_code: Some(*exit_code),
                    stderr: stderr.clone(),
                });
            }

            if let Some(path) = &output {
                std::fs::write(path, DUMP_CONTENT)?;
            }
            Ok(ProcessOutput {
                stdout_bytes: DUMP_CONTENT.len() as u64,
                stderr: String::new(),
            })
        }
    }
}
