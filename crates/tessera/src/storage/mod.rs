//! Tiered record storage
//!
//! Tier backends share the [`TierStorage`] interface; the
//! [`TierManager`] routes reads and writes across them.

pub mod cache;
pub mod crystal;
pub mod disk;
pub mod manager;
pub mod tier;

pub use cache::CacheTier;
pub use crystal::CrystalTier;
pub use disk::DiskTier;
pub use manager::{ManagerStats, Placement, SweepReport, TierManager};
pub use tier::{EntryTimes, Tier, TierBackend, TierStats, TierStorage};
