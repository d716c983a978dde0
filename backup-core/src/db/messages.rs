use crate::Result;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::models::{
    BackupLogListRow, BackupLogRow, JobListRow, JobRow, LogAdmission, LogCompletion,
    LogCountFilter, RestoreLogListRow, RestoreLogRow, TargetRow,
};

type Reply<T> = oneshot::Sender<Result<T>>;

/// DuckDB数据库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables { respond_to: Reply<()> },

    // ========== 备份目标 ==========
    InsertTarget {
        row: TargetRow,
        respond_to: Reply<()>,
    },
    ListTargets {
        respond_to: Reply<Vec<TargetRow>>,
    },
    GetTarget {
        id: String,
        respond_to: Reply<Option<TargetRow>>,
    },
    /// 覆盖除 id/created_at 以外的全部字段，返回是否命中
    UpdateTarget {
        row: TargetRow,
        respond_to: Reply<bool>,
    },
    /// 仍被任务引用时返回 `TargetInUse`
    DeleteTarget {
        id: String,
        respond_to: Reply<bool>,
    },
    CountTargets {
        respond_to: Reply<i64>,
    },

    // ========== 备份任务 ==========
    InsertJob {
        row: JobRow,
        respond_to: Reply<()>,
    },
    ListJobs {
        target_id: Option<String>,
        respond_to: Reply<Vec<JobListRow>>,
    },
    GetJob {
        id: String,
        respond_to: Reply<Option<JobRow>>,
    },
    ListEnabledJobs {
        respond_to: Reply<Vec<JobRow>>,
    },
    UpdateJob {
        row: JobRow,
        respond_to: Reply<bool>,
    },
    /// 先将关联日志的 job_id 置空，再删除任务
    DeleteJob {
        id: String,
        respond_to: Reply<bool>,
    },
    CountJobs {
        enabled_only: bool,
        respond_to: Reply<i64>,
    },
    CountJobsByTarget {
        target_id: String,
        respond_to: Reply<i64>,
    },

    // ========== 备份日志 ==========
    /// 同一任务不存在 running 记录时才写入
    StartBackupLog {
        row: BackupLogRow,
        respond_to: Reply<LogAdmission>,
    },
    InsertBackupLog {
        row: BackupLogRow,
        respond_to: Reply<()>,
    },
    FinishBackupLog {
        id: String,
        completion: LogCompletion,
        respond_to: Reply<bool>,
    },
    CountBackupLogs {
        filter: LogCountFilter,
        respond_to: Reply<i64>,
    },
    SumArtifactSize {
        respond_to: Reply<i64>,
    },
    RecentBackupLogs {
        limit: usize,
        respond_to: Reply<Vec<BackupLogListRow>>,
    },
    GetBackupLog {
        id: String,
        respond_to: Reply<Option<BackupLogListRow>>,
    },
    ListBackupLogs {
        job_id: Option<String>,
        respond_to: Reply<Vec<BackupLogListRow>>,
    },
    CountRunningByJob {
        job_id: String,
        respond_to: Reply<i64>,
    },

    // ========== 恢复日志 ==========
    InsertRestoreLog {
        row: RestoreLogRow,
        respond_to: Reply<()>,
    },
    FinishRestoreLog {
        id: String,
        completion: LogCompletion,
        respond_to: Reply<bool>,
    },
    GetRestoreLog {
        id: String,
        respond_to: Reply<Option<RestoreLogRow>>,
    },
    ListRestoreLogs {
        respond_to: Reply<Vec<RestoreLogListRow>>,
    },

    /// 将遗留的 running 记录标记为失败，返回 (备份, 恢复) 影响行数
    FailInterruptedLogs {
        end_time: DateTime<Utc>,
        message: String,
        respond_to: Reply<(usize, usize)>,
    },
}
