use super::DumpDriver;
use crate::Result;
use crate::models::{DatabaseTarget, EngineKind};
use crate::process::CommandPlan;
use crate::vault::DecryptedSecret;
use std::path::Path;

pub(super) const DUMP_PROGRAM: &str = "pg_dump";
pub(super) const RESTORE_PROGRAM: &str = "psql";

/// 密码通过环境变量传入，不出现在命令行中
const PASSWORD_ENV: &str = "PGPASSWORD";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    fn connection_args(plan: CommandPlan, target: &DatabaseTarget) -> CommandPlan {
        plan.arg(format!("--host={}", target.host))
            .arg(format!("--port={}", target.port))
            .arg(format!("--username={}", target.username))
            .arg(format!("--dbname={}", target.database_name))
    }
}

impl DumpDriver for PostgresDriver {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn build_dump_command(
        &self,
        target: &DatabaseTarget,
        secret: &DecryptedSecret,
        output: &Path,
    ) -> Result<CommandPlan> {
        let plan = Self::connection_args(CommandPlan::new(DUMP_PROGRAM), target)
            .arg("--format=plain")
            .arg(format!("--file={}", output.display()))
            .env(PASSWORD_ENV, secret.expose());
        Ok(plan)
    }

    fn build_restore_command(
        &self,
        target: &DatabaseTarget,
        secret: &DecryptedSecret,
        sql_file: &Path,
    ) -> Result<CommandPlan> {
        let plan = Self::connection_args(CommandPlan::new(RESTORE_PROGRAM), target)
            .arg(format!("--file={}", sql_file.display()))
            .env(PASSWORD_ENV, secret.expose());
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::test_support::target;

    #[test]
    fn test_dump_command() {
        let plan = PostgresDriver
            .build_dump_command(
                &target(EngineKind::Postgres),
                &DecryptedSecret::new("pw"),
                Path::new("/backups/shop.sql"),
            )
            .unwrap();

        assert_eq!(plan.program, "pg_dump");
        assert_eq!(
            plan.args,
            vec![
                "--host=db.internal",
                "--port=5432",
                "--username=backup",
                "--dbname=shop",
                "--format=plain",
                "--file=/backups/shop.sql",
            ]
        );
        assert_eq!(plan.env, vec![("PGPASSWORD".to_string(), "pw".to_string())]);
        assert!(plan.stdout_to.is_none());
        assert!(!plan.args.iter().any(|arg| arg.contains("pw")));
    }

    #[test]
    fn test_restore_command() {
        let plan = PostgresDriver
            .build_restore_command(
                &target(EngineKind::Postgres),
                &DecryptedSecret::new("pw"),
                Path::new("/backups/shop-temp.sql"),
            )
            .unwrap();

        assert_eq!(plan.program, "psql");
        assert_eq!(plan.args.last().unwrap(), "--file=/backups/shop-temp.sql");
        assert!(plan.stdin_from.is_none());
        assert_eq!(plan.env[0].0, "PGPASSWORD");
    }
}
