//! 各数据库引擎的转储/恢复命令生成
//!
//! 驱动只负责拼装 [`CommandPlan`]，不做任何 I/O。

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use crate::Result;
use crate::models::{DatabaseTarget, EngineKind};
use crate::process::{CommandPlan, command_available};
use crate::vault::DecryptedSecret;
use std::path::Path;

/// 单个数据库引擎的转储/恢复策略
pub trait DumpDriver: Send + Sync {
    fn engine(&self) -> EngineKind;

    /// 生成把整个数据库导出为 SQL 文本到 `output` 的命令
    fn build_dump_command(
        &self,
        target: &DatabaseTarget,
        secret: &DecryptedSecret,
        output: &Path,
    ) -> Result<CommandPlan>;

    /// 生成把 `sql_file` 导入目标数据库的命令
    fn build_restore_command(
        &self,
        target: &DatabaseTarget,
        secret: &DecryptedSecret,
        sql_file: &Path,
    ) -> Result<CommandPlan>;
}

static POSTGRES: PostgresDriver = PostgresDriver;
static MYSQL: MySqlDriver = MySqlDriver;
static SQLITE: SqliteDriver = SqliteDriver;

/// 按引擎类型选择驱动
pub fn driver_for(engine: EngineKind) -> &'static dyn DumpDriver {
    match engine {
        EngineKind::Postgres => &POSTGRES,
        EngineKind::Mysql => &MYSQL,
        EngineKind::Sqlite => &SQLITE,
    }
}

/// 引擎依赖的外部命令（转储, 恢复）
pub fn required_programs(engine: EngineKind) -> &'static [&'static str] {
    match engine {
        EngineKind::Postgres => &[postgres::DUMP_PROGRAM, postgres::RESTORE_PROGRAM],
        EngineKind::Mysql => &[mysql::DUMP_PROGRAM, mysql::RESTORE_PROGRAM],
        EngineKind::Sqlite => &[],
    }
}

/// 当前环境中找不到的外部命令
pub fn missing_programs(engine: EngineKind) -> Vec<&'static str> {
    required_programs(engine)
        .iter()
        .copied()
        .filter(|program| !command_available(program))
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::{DatabaseTarget, EngineKind};
    use chrono::Utc;

    pub fn target(engine: EngineKind) -> DatabaseTarget {
        let now = Utc::now();
        DatabaseTarget {
            id: "target-1".into(),
            name: "orders".into(),
            engine,
            host: "db.internal".into(),
            port: match engine {
                EngineKind::Mysql => 3306,
                _ => 5432,
            },
            username: "backup".into(),
            database_name: "shop".into(),
            created_at: now,
            updated_at: now,
        }
    }
}
