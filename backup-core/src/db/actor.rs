use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use duckdb::{Connection, Row, params};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::DbMessage;
use super::models::{
    BackupLogListRow, BackupLogRow, JobListRow, JobRow, LogAdmission, LogCompletion,
    LogCountFilter, RestoreLogListRow, RestoreLogRow, TargetRow,
};

const TARGET_COLUMNS: &str = "id, name, engine, host, port, username, encrypted_secret, \
     database_name, created_at, updated_at";

const JOB_COLUMNS: &str = "j.id, j.target_id, j.schedule, j.backup_kind, j.storage_kind, \
     j.storage_path, j.compression, j.enabled, j.created_at, j.updated_at";

const LOG_COLUMNS: &str =
    "l.id, l.job_id, l.status, l.start_time, l.end_time, l.file_path, l.file_size, l.message";

/// 备份日志 + 任务所属目标
const LOG_LIST_FROM: &str = "FROM backup_logs l \
     LEFT JOIN backup_jobs j ON l.job_id = j.id \
     LEFT JOIN database_targets t ON j.target_id = t.id";

/// DuckDB Actor - 确保单线程访问DuckDB
pub struct DuckDbActor {
    connection: Connection,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("DuckDB Actor 已启动");

        while let Some(message) = receiver.recv().await {
            self.handle_message(message);
        }

        info!("DuckDB Actor 已关闭");
    }

    /// 处理数据库消息
    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }

            DbMessage::InsertTarget { row, respond_to } => {
                let _ = respond_to.send(self.insert_target(&row));
            }
            DbMessage::ListTargets { respond_to } => {
                let _ = respond_to.send(self.list_targets());
            }
            DbMessage::GetTarget { id, respond_to } => {
                let _ = respond_to.send(self.get_target(&id));
            }
            DbMessage::UpdateTarget { row, respond_to } => {
                let _ = respond_to.send(self.update_target(&row));
            }
            DbMessage::DeleteTarget { id, respond_to } => {
                let _ = respond_to.send(self.delete_target(&id));
            }
            DbMessage::CountTargets { respond_to } => {
                let _ = respond_to.send(self.count("SELECT COUNT(*) FROM database_targets"));
            }

            DbMessage::InsertJob { row, respond_to } => {
                let _ = respond_to.send(self.insert_job(&row));
            }
            DbMessage::ListJobs {
                target_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_jobs(target_id.as_deref()));
            }
            DbMessage::GetJob { id, respond_to } => {
                let _ = respond_to.send(self.get_job(&id));
            }
            DbMessage::ListEnabledJobs { respond_to } => {
                let _ = respond_to.send(self.list_enabled_jobs());
            }
            DbMessage::UpdateJob { row, respond_to } => {
                let _ = respond_to.send(self.update_job(&row));
            }
            DbMessage::DeleteJob { id, respond_to } => {
                let _ = respond_to.send(self.delete_job(&id));
            }
            DbMessage::CountJobs {
                enabled_only,
                respond_to,
            } => {
                let sql = if enabled_only {
                    "SELECT COUNT(*) FROM backup_jobs WHERE enabled = TRUE"
                } else {
                    "SELECT COUNT(*) FROM backup_jobs"
                };
                let _ = respond_to.send(self.count(sql));
            }
            DbMessage::CountJobsByTarget {
                target_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.count_jobs_by_target(&target_id));
            }

            DbMessage::StartBackupLog { row, respond_to } => {
                let _ = respond_to.send(self.start_backup_log(&row));
            }
            DbMessage::InsertBackupLog { row, respond_to } => {
                let _ = respond_to.send(self.insert_backup_log(&row));
            }
            DbMessage::FinishBackupLog {
                id,
                completion,
                respond_to,
            } => {
                let _ = respond_to.send(self.finish_backup_log(&id, &completion));
            }
            DbMessage::CountBackupLogs { filter, respond_to } => {
                let _ = respond_to.send(self.count_backup_logs(&filter));
            }
            DbMessage::SumArtifactSize { respond_to } => {
                let _ = respond_to.send(self.count(
                    "SELECT CAST(COALESCE(SUM(file_size), 0) AS BIGINT) \
                     FROM backup_logs WHERE status = 'success'",
                ));
            }
            DbMessage::RecentBackupLogs { limit, respond_to } => {
                let _ = respond_to.send(self.recent_backup_logs(limit));
            }
            DbMessage::GetBackupLog { id, respond_to } => {
                let _ = respond_to.send(self.get_backup_log(&id));
            }
            DbMessage::ListBackupLogs { job_id, respond_to } => {
                let _ = respond_to.send(self.list_backup_logs(job_id.as_deref()));
            }
            DbMessage::CountRunningByJob { job_id, respond_to } => {
                let _ = respond_to.send(self.count_running_by_job(&job_id));
            }

            DbMessage::InsertRestoreLog { row, respond_to } => {
                let _ = respond_to.send(self.insert_restore_log(&row));
            }
            DbMessage::FinishRestoreLog {
                id,
                completion,
                respond_to,
            } => {
                let _ = respond_to.send(self.finish_restore_log(&id, &completion));
            }
            DbMessage::GetRestoreLog { id, respond_to } => {
                let _ = respond_to.send(self.get_restore_log(&id));
            }
            DbMessage::ListRestoreLogs { respond_to } => {
                let _ = respond_to.send(self.list_restore_logs());
            }

            DbMessage::FailInterruptedLogs {
                end_time,
                message,
                respond_to,
            } => {
                let _ = respond_to.send(self.fail_interrupted_logs(end_time, &message));
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化DuckDB表...");

        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                self.connection.execute(trimmed, [])?;
            }
        }

        info!("DuckDB表初始化完成");
        Ok(())
    }

    fn count(&mut self, sql: &str) -> Result<i64> {
        let count = self.connection.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }

    // ========== 备份目标 ==========

    fn insert_target(&mut self, row: &TargetRow) -> Result<()> {
        self.connection.execute(
            &format!("INSERT INTO database_targets ({TARGET_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                row.id,
                row.name,
                row.engine,
                row.host,
                row.port,
                row.username,
                row.encrypted_secret,
                row.database_name,
                row.created_at,
                row.updated_at
            ],
        )?;
        Ok(())
    }

    fn list_targets(&mut self) -> Result<Vec<TargetRow>> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM database_targets ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], target_from_row)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    fn get_target(&mut self, id: &str) -> Result<Option<TargetRow>> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM database_targets WHERE id = ?"
        ))?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(target_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn update_target(&mut self, row: &TargetRow) -> Result<bool> {
        let updated = self.connection.execute(
            "UPDATE database_targets SET name = ?, engine = ?, host = ?, port = ?, username = ?, \
             encrypted_secret = ?, database_name = ?, updated_at = ? WHERE id = ?",
            params![
                row.name,
                row.engine,
                row.host,
                row.port,
                row.username,
                row.encrypted_secret,
                row.database_name,
                row.updated_at,
                row.id
            ],
        )?;
        Ok(updated > 0)
    }

    fn delete_target(&mut self, id: &str) -> Result<bool> {
        let jobs = self.count_jobs_by_target(id)?;
        if jobs > 0 {
            return Err(BackupError::TargetInUse { jobs });
        }
        let deleted = self
            .connection
            .execute("DELETE FROM database_targets WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }

    // ========== 备份任务 ==========

    fn insert_job(&mut self, row: &JobRow) -> Result<()> {
        self.connection.execute(
            "INSERT INTO backup_jobs (id, target_id, schedule, backup_kind, storage_kind, \
             storage_path, compression, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.id,
                row.target_id,
                row.schedule,
                row.backup_kind,
                row.storage_kind,
                row.storage_path,
                row.compression,
                row.enabled,
                row.created_at,
                row.updated_at
            ],
        )?;
        Ok(())
    }

    fn list_jobs(&mut self, target_id: Option<&str>) -> Result<Vec<JobListRow>> {
        let base = format!(
            "SELECT {JOB_COLUMNS}, t.name, t.engine FROM backup_jobs j \
             LEFT JOIN database_targets t ON j.target_id = t.id"
        );
        let rows = match target_id {
            Some(target_id) => {
                let mut stmt = self.connection.prepare(&format!(
                    "{base} WHERE j.target_id = ? ORDER BY j.created_at DESC"
                ))?;
                let rows = stmt.query_map(params![target_id], job_list_from_row)?;
                rows.collect::<duckdb::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self
                    .connection
                    .prepare(&format!("{base} ORDER BY j.created_at DESC"))?;
                let rows = stmt.query_map([], job_list_from_row)?;
                rows.collect::<duckdb::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    fn get_job(&mut self, id: &str) -> Result<Option<JobRow>> {
        let mut stmt = self
            .connection
            .prepare(&format!("SELECT {JOB_COLUMNS} FROM backup_jobs j WHERE j.id = ?"))?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(job_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_enabled_jobs(&mut self) -> Result<Vec<JobRow>> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM backup_jobs j WHERE j.enabled = TRUE ORDER BY j.created_at"
        ))?;
        let rows = stmt.query_map([], job_from_row)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    fn update_job(&mut self, row: &JobRow) -> Result<bool> {
        let updated = self.connection.execute(
            "UPDATE backup_jobs SET target_id = ?, schedule = ?, backup_kind = ?, storage_kind = ?, \
             storage_path = ?, compression = ?, enabled = ?, updated_at = ? WHERE id = ?",
            params![
                row.target_id,
                row.schedule,
                row.backup_kind,
                row.storage_kind,
                row.storage_path,
                row.compression,
                row.enabled,
                row.updated_at,
                row.id
            ],
        )?;
        Ok(updated > 0)
    }

    fn delete_job(&mut self, id: &str) -> Result<bool> {
        let tx = self.connection.transaction()?;
        let detached = tx.execute(
            "UPDATE backup_logs SET job_id = NULL WHERE job_id = ?",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM backup_jobs WHERE id = ?", params![id])?;
        tx.commit()?;

        if detached > 0 {
            debug!("任务 {} 删除后保留 {} 条备份日志", id, detached);
        }
        Ok(deleted > 0)
    }

    fn count_jobs_by_target(&mut self, target_id: &str) -> Result<i64> {
        let count = self.connection.query_row(
            "SELECT COUNT(*) FROM backup_jobs WHERE target_id = ?",
            params![target_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========== 备份日志 ==========

    fn start_backup_log(&mut self, row: &BackupLogRow) -> Result<LogAdmission> {
        if let Some(job_id) = &row.job_id {
            let mut stmt = self.connection.prepare(
                "SELECT id FROM backup_logs WHERE job_id = ? AND status = 'running' LIMIT 1",
            )?;
            let mut rows = stmt.query(params![job_id])?;
            if let Some(existing) = rows.next()? {
                return Ok(LogAdmission::AlreadyRunning(existing.get(0)?));
            }
        }
        self.insert_backup_log(row)?;
        Ok(LogAdmission::Started)
    }

    fn insert_backup_log(&mut self, row: &BackupLogRow) -> Result<()> {
        self.connection.execute(
            "INSERT INTO backup_logs (id, job_id, status, start_time, end_time, file_path, \
             file_size, message) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.id,
                row.job_id,
                row.status,
                row.start_time,
                row.end_time,
                row.file_path,
                row.file_size,
                row.message
            ],
        )?;
        Ok(())
    }

    fn finish_backup_log(&mut self, id: &str, completion: &LogCompletion) -> Result<bool> {
        let updated = self.connection.execute(
            "UPDATE backup_logs SET status = ?, end_time = ?, file_path = ?, file_size = ?, \
             message = ? WHERE id = ?",
            params![
                completion.status,
                completion.end_time,
                completion.file_path,
                completion.file_size,
                completion.message,
                id
            ],
        )?;
        Ok(updated > 0)
    }

    fn count_backup_logs(&mut self, filter: &LogCountFilter) -> Result<i64> {
        let base = "SELECT COUNT(*) FROM backup_logs";
        let count = match (filter.status.as_deref(), filter.since) {
            (None, None) => self.connection.query_row(base, [], |row| row.get(0))?,
            (Some(status), None) => self.connection.query_row(
                &format!("{base} WHERE status = ?"),
                params![status],
                |row| row.get(0),
            )?,
            (None, Some(since)) => self.connection.query_row(
                &format!("{base} WHERE start_time >= ?"),
                params![since],
                |row| row.get(0),
            )?,
            (Some(status), Some(since)) => self.connection.query_row(
                &format!("{base} WHERE status = ? AND start_time >= ?"),
                params![status, since],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    fn recent_backup_logs(&mut self, limit: usize) -> Result<Vec<BackupLogListRow>> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {LOG_COLUMNS}, t.name, t.engine {LOG_LIST_FROM} \
             ORDER BY l.start_time DESC LIMIT {limit}"
        ))?;
        let rows = stmt.query_map([], backup_log_list_from_row)?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    fn get_backup_log(&mut self, id: &str) -> Result<Option<BackupLogListRow>> {
        let mut stmt = self.connection.prepare(&format!(
            "SELECT {LOG_COLUMNS}, t.name, t.engine {LOG_LIST_FROM} WHERE l.id = ?"
        ))?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(backup_log_list_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_backup_logs(&mut self, job_id: Option<&str>) -> Result<Vec<BackupLogListRow>> {
        let rows = match job_id {
            Some(job_id) => {
                let mut stmt = self.connection.prepare(&format!(
                    "SELECT {LOG_COLUMNS}, t.name, t.engine {LOG_LIST_FROM} \
                     WHERE l.job_id = ? ORDER BY l.start_time DESC"
                ))?;
                let rows = stmt.query_map(params![job_id], backup_log_list_from_row)?;
                rows.collect::<duckdb::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self.connection.prepare(&format!(
                    "SELECT {LOG_COLUMNS}, t.name, t.engine {LOG_LIST_FROM} \
                     ORDER BY l.start_time DESC"
                ))?;
                let rows = stmt.query_map([], backup_log_list_from_row)?;
                rows.collect::<duckdb::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    fn count_running_by_job(&mut self, job_id: &str) -> Result<i64> {
        let count = self.connection.query_row(
            "SELECT COUNT(*) FROM backup_logs WHERE job_id = ? AND status = 'running'",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========== 恢复日志 ==========

    fn insert_restore_log(&mut self, row: &RestoreLogRow) -> Result<()> {
        self.connection.execute(
            "INSERT INTO restore_logs (id, target_id, backup_log_id, status, start_time, \
             end_time, message) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                row.id,
                row.target_id,
                row.backup_log_id,
                row.status,
                row.start_time,
                row.end_time,
                row.message
            ],
        )?;
        Ok(())
    }

    fn finish_restore_log(&mut self, id: &str, completion: &LogCompletion) -> Result<bool> {
        let updated = self.connection.execute(
            "UPDATE restore_logs SET status = ?, end_time = ?, message = ? WHERE id = ?",
            params![
                completion.status,
                completion.end_time,
                completion.message,
                id
            ],
        )?;
        Ok(updated > 0)
    }

    fn get_restore_log(&mut self, id: &str) -> Result<Option<RestoreLogRow>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, target_id, backup_log_id, status, start_time, end_time, message \
             FROM restore_logs WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => Ok(Some(restore_log_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_restore_logs(&mut self) -> Result<Vec<RestoreLogListRow>> {
        let mut stmt = self.connection.prepare(
            "SELECT r.id, r.target_id, r.backup_log_id, r.status, r.start_time, r.end_time, \
             r.message, t.name, t.engine, b.start_time, st.name \
             FROM restore_logs r \
             LEFT JOIN database_targets t ON r.target_id = t.id \
             LEFT JOIN backup_logs b ON r.backup_log_id = b.id \
             LEFT JOIN backup_jobs j ON b.job_id = j.id \
             LEFT JOIN database_targets st ON j.target_id = st.id \
             ORDER BY r.start_time DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RestoreLogListRow {
                log: restore_log_from_row(row)?,
                target_name: row.get(7)?,
                target_engine: row.get(8)?,
                source_started_at: row.get(9)?,
                source_target_name: row.get(10)?,
            })
        })?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    fn fail_interrupted_logs(
        &mut self,
        end_time: DateTime<Utc>,
        message: &str,
    ) -> Result<(usize, usize)> {
        let tx = self.connection.transaction()?;
        let backups = tx.execute(
            "UPDATE backup_logs SET status = 'failed', end_time = ?, message = ? \
             WHERE status IN ('pending', 'running')",
            params![end_time, message],
        )?;
        let restores = tx.execute(
            "UPDATE restore_logs SET status = 'failed', end_time = ?, message = ? \
             WHERE status IN ('pending', 'running')",
            params![end_time, message],
        )?;
        tx.commit()?;
        Ok((backups, restores))
    }
}

fn target_from_row(row: &Row<'_>) -> duckdb::Result<TargetRow> {
    Ok(TargetRow {
        id: row.get(0)?,
        name: row.get(1)?,
        engine: row.get(2)?,
        host: row.get(3)?,
        port: row.get(4)?,
        username: row.get(5)?,
        encrypted_secret: row.get(6)?,
        database_name: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn job_from_row(row: &Row<'_>) -> duckdb::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        target_id: row.get(1)?,
        schedule: row.get(2)?,
        backup_kind: row.get(3)?,
        storage_kind: row.get(4)?,
        storage_path: row.get(5)?,
        compression: row.get(6)?,
        enabled: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn job_list_from_row(row: &Row<'_>) -> duckdb::Result<JobListRow> {
    Ok(JobListRow {
        job: job_from_row(row)?,
        target_name: row.get(10)?,
        target_engine: row.get(11)?,
    })
}

fn backup_log_from_row(row: &Row<'_>) -> duckdb::Result<BackupLogRow> {
    Ok(BackupLogRow {
        id: row.get(0)?,
        job_id: row.get(1)?,
        status: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        file_path: row.get(5)?,
        file_size: row.get(6)?,
        message: row.get(7)?,
    })
}

fn backup_log_list_from_row(row: &Row<'_>) -> duckdb::Result<BackupLogListRow> {
    Ok(BackupLogListRow {
        log: backup_log_from_row(row)?,
        target_name: row.get(8)?,
        target_engine: row.get(9)?,
    })
}

fn restore_log_from_row(row: &Row<'_>) -> duckdb::Result<RestoreLogRow> {
    Ok(RestoreLogRow {
        id: row.get(0)?,
        target_id: row.get(1)?,
        backup_log_id: row.get(2)?,
        status: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        message: row.get(6)?,
    })
}
