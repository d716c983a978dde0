use super::DumpDriver;
use crate::models::{DatabaseTarget, EngineKind};
use crate::process::CommandPlan;
use crate::vault::DecryptedSecret;
use crate::{BackupError, Result};
use std::path::Path;

/// SQLite 已在引擎类型中声明，但尚未支持备份与恢复
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl DumpDriver for SqliteDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn build_dump_command(
        &self,
        _target: &DatabaseTarget,
        _secret: &DecryptedSecret,
        _output: &Path,
    ) -> Result<CommandPlan> {
        Err(BackupError::unsupported_engine(EngineKind::Sqlite.as_str()))
    }

    fn build_restore_command(
        &self,
        _target: &DatabaseTarget,
        _secret: &DecryptedSecret,
        _sql_file: &Path,
    ) -> Result<CommandPlan> {
        Err(BackupError::unsupported_engine(EngineKind::Sqlite.as_str()))
    }
}
