use backup_core::constants::config::LOG_FILE_ENV;
use tracing_appender::non_blocking::WorkerGuard;

/// # 日志配置
///
/// 库代码只使用 `tracing` 宏，日志订阅者在 `main.rs` 中通过 `setup_logging()` 安装。
///
/// - `-v, --verbose`：DEBUG 级别
/// - `RUST_LOG`：标准的日志级别控制，优先于 `-v`
/// - `BACKUP_LOG_FILE`：设置后日志写入该文件（非阻塞写入，包含模块路径、线程名和行号）
///
/// ```bash
/// # 日志输出到文件
/// BACKUP_LOG_FILE=backup.log backup-cli serve
///
/// # 只看调度器的调试日志
/// RUST_LOG=backup_core::scheduler=debug backup-cli serve
/// ```
///
/// 写文件时返回的 guard 必须存活到进程退出，否则缓冲中的日志会丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    // 根据verbose参数和环境变量确定日志级别
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var(LOG_FILE_ENV) {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
        {
            Ok(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .init();
                return Some(guard);
            }
            Err(e) => {
                eprintln!("无法打开日志文件 {log_file}: {e}，改为输出到终端");
            }
        }
    }

    // 输出到终端 - 使用简洁格式，用户友好
    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(false)
        .with_line_number(false)
        .without_time()
        .compact()
        .init();
    None
}
