pub mod backup;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod cron;
pub mod database;
pub mod db;
pub mod driver;
pub mod error;
pub mod history;
pub mod job_manager;
pub mod models;
pub mod packager;
pub mod process;
pub mod restore;
pub mod scheduler;
pub mod target_manager;
pub mod vault;

pub use error::{BackupError, Result};
