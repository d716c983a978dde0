// 私有模块声明
mod api;
mod app;
mod cli;
mod commands;
mod init;
mod remote;
mod service;
mod utils;

// 通过 pub use 精确控制对外暴露的接口
pub use app::{CliApp, execute, load_environment, serve};
pub use cli::{Cli, Commands, JobCommand, LogsCommand, RestoreCommand, TargetCommand};
pub use init::run_init;
pub use remote::RemoteService;
pub use service::{BackupService, ConnectionCheck, JobEntry, TargetDetail};
pub use utils::setup_logging;
