//! Records, their version history and the store that ties them to tiers

pub mod store;
pub mod types;
pub mod versions;

pub use store::{RecordStore, validate_key};
pub use types::{PutOptions, PutOutcome, Record, RecordMeta, Version, VersionInfo};
pub use versions::{VERSIONS_DIR, VersionLog};
