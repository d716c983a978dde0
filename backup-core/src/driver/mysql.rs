use super::DumpDriver;
use crate::Result;
use crate::models::{DatabaseTarget, EngineKind};
use crate::process::CommandPlan;
use crate::vault::DecryptedSecret;
use std::path::Path;

pub(super) const DUMP_PROGRAM: &str = "mysqldump";
pub(super) const RESTORE_PROGRAM: &str = "mysql";

/// MySQL 驱动
///
/// 密码以 `--password=` 形式出现在命令行中，同机其他用户可通过进程列表看到。
/// 日志中的命令行会做脱敏。
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl MySqlDriver {
    fn connection_args(
        plan: CommandPlan,
        target: &DatabaseTarget,
        secret: &DecryptedSecret,
    ) -> CommandPlan {
        plan.arg(format!("--host={}", target.host))
            .arg(format!("--port={}", target.port))
            .arg(format!("--user={}", target.username))
            .arg(format!("--password={}", secret.expose()))
            .arg(target.database_name.clone())
    }
}

impl DumpDriver for MySqlDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn build_dump_command(
        &self,
        target: &DatabaseTarget,
        secret: &DecryptedSecret,
        output: &Path,
    ) -> Result<CommandPlan> {
        Ok(Self::connection_args(CommandPlan::new(DUMP_PROGRAM), target, secret).stdout_to(output))
    }

    fn build_restore_command(
        &self,
        target: &DatabaseTarget,
        secret: &DecryptedSecret,
        sql_file: &Path,
    ) -> Result<CommandPlan> {
        Ok(
            Self::connection_args(CommandPlan::new(RESTORE_PROGRAM), target, secret)
                .stdin_from(sql_file),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::test_support::target;

    #[test]
    fn test_dump_command_streams_stdout() {
        let plan = MySqlDriver
            .build_dump_command(
                &target(EngineKind::Mysql),
                &DecryptedSecret::new("pw"),
                Path::new("/backups/shop.sql"),
            )
            .unwrap();

        assert_eq!(plan.program, "mysqldump");
        assert_eq!(
            plan.args,
            vec![
                "--host=db.internal",
                "--port=3306",
                "--user=backup",
                "--password=pw",
                "shop",
            ]
        );
        assert_eq!(plan.stdout_to.as_deref(), Some(Path::new("/backups/shop.sql")));
        assert!(plan.env.is_empty());
        assert!(!plan.display_command().contains("=pw"));
    }

    #[test]
    fn test_restore_command_streams_stdin() {
        let plan = MySqlDriver
            .build_restore_command(
                &target(EngineKind::Mysql),
                &DecryptedSecret::new("pw"),
                Path::new("/backups/shop.sql"),
            )
            .unwrap();

        assert_eq!(plan.program, "mysql");
        assert_eq!(plan.stdin_from.as_deref(), Some(Path::new("/backups/shop.sql")));
        assert!(plan.stdout_to.is_none());
    }
}
