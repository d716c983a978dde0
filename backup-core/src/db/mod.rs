// DuckDB数据库模块
//
// DuckDB 连接只能由单个线程持有，这里通过 Actor 模式串行化所有访问：
// - DuckDbManager: 可克隆的异步接口，通过 mpsc 发送消息、oneshot 接收结果
// - DuckDbActor: 独占连接，逐条处理消息
// - models: 与表结构一一对应的原始行，类型转换在 `crate::database` 中完成

mod actor;
mod manager;
mod messages;
mod models;

pub use manager::DuckDbManager;
pub use models::{
    BackupLogListRow, BackupLogRow, JobListRow, JobRow, LogAdmission, LogCompletion,
    LogCountFilter, RestoreLogListRow, RestoreLogRow, TargetRow,
};
