use anyhow::{Result, anyhow};
use backup_core::models::{ConnectionParams, DatabaseTarget, EngineKind, NewTarget, TargetUpdate};
use tracing::{error, info};

use super::{CommandContext, format_time, print_json};
use crate::cli::TargetCommand;
use crate::service::ConnectionCheck;

/// 运行备份目标相关命令
pub async fn handle_target_command(ctx: &CommandContext<'_>, cmd: TargetCommand) -> Result<()> {
    match cmd {
        TargetCommand::Add {
            name,
            engine,
            host,
            port,
            username,
            password,
            database_name,
        } => {
            let input = NewTarget {
                name,
                connection: connection_params(engine, host, port, username, password, database_name),
            };
            let target = ctx.service.create_target(input).await?;
            if ctx.json {
                return print_json(&target);
            }
            info!("✅ 已添加备份目标: {} ({})", target.name, target.id);
            Ok(())
        }
        TargetCommand::List => list_targets(ctx).await,
        TargetCommand::Show { id } => {
            let detail = ctx.service.get_target(&id).await?;
            if ctx.json {
                return print_json(&detail);
            }
            show_target(&detail.target);
            info!("   关联任务: {} 个", detail.job_count);
            Ok(())
        }
        TargetCommand::Update {
            id,
            name,
            engine,
            host,
            port,
            username,
            password,
            database_name,
        } => {
            let update = TargetUpdate {
                name,
                engine,
                host,
                port,
                username,
                password,
                database_name,
            };
            let target = ctx.service.update_target(&id, update).await?;
            if ctx.json {
                return print_json(&target);
            }
            info!("✅ 已更新备份目标: {}", target.name);
            Ok(())
        }
        TargetCommand::Delete { id } => {
            ctx.service.delete_target(&id).await?;
            info!("🗑️  已删除备份目标: {}", id);
            Ok(())
        }
        TargetCommand::Test { id } => {
            let check = ctx.service.test_target(&id).await?;
            report_check(ctx, &check)
        }
        TargetCommand::Check {
            engine,
            host,
            port,
            username,
            password,
            database_name,
        } => {
            let params = connection_params(engine, host, port, username, password, database_name);
            let check = ctx.service.test_connection(params).await?;
            report_check(ctx, &check)
        }
    }
}

/// 未指定端口时按数据库类型选择默认端口
fn connection_params(
    engine: EngineKind,
    host: String,
    port: Option<u16>,
    username: String,
    password: String,
    database_name: String,
) -> ConnectionParams {
    ConnectionParams {
        engine,
        host,
        port: port.or_else(|| engine.default_port()).unwrap_or_default(),
        username,
        password,
        database_name,
    }
}

async fn list_targets(ctx: &CommandContext<'_>) -> Result<()> {
    let targets = ctx.service.list_targets().await?;
    if ctx.json {
        return print_json(&targets);
    }

    if targets.is_empty() {
        info!("📋 暂无备份目标");
        info!("💡 使用 'backup-cli target add' 添加");
        return Ok(());
    }

    info!("📋 备份目标列表 ({} 个):", targets.len());
    for target in &targets {
        info!(
            "   {}  {:<16} {:<8} {}@{}:{}/{}",
            target.id,
            target.name,
            target.engine,
            target.username,
            target.host,
            target.port,
            target.database_name
        );
    }
    Ok(())
}

fn show_target(target: &DatabaseTarget) {
    info!("📋 备份目标: {}", target.name);
    info!("   ID: {}", target.id);
    info!("   类型: {}", target.engine);
    info!("   地址: {}:{}", target.host, target.port);
    info!("   用户: {}", target.username);
    info!("   数据库: {}", target.database_name);
    info!("   创建时间: {}", format_time(target.created_at));
    info!("   更新时间: {}", format_time(target.updated_at));
}

fn report_check(ctx: &CommandContext<'_>, check: &ConnectionCheck) -> Result<()> {
    if ctx.json {
        print_json(check)?;
    }

    if check.ok {
        info!("✅ 连接成功");
        return Ok(());
    }
    let reason = check.error.clone().unwrap_or_default();
    error!("❌ 连接失败: {}", reason);
    Err(anyhow!(reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_params_default_port() {
        let params = connection_params(
            EngineKind::Postgres,
            "db".into(),
            None,
            "u".into(),
            "p".into(),
            "shop".into(),
        );
        assert_eq!(params.port, 5432);

        let params = connection_params(
            EngineKind::Mysql,
            "db".into(),
            Some(3307),
            "u".into(),
            "p".into(),
            "shop".into(),
        );
        assert_eq!(params.port, 3307);
    }
}
