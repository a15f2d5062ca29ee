pub mod backup;
pub mod keys;
pub mod record;
pub mod stats;

pub use backup::BackupCommand;
pub use keys::KeysCommand;
pub use record::RecordCommand;
pub use stats::StatsCommand;
