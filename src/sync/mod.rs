//! Zone synchronization.
//!
//! The session state machine, the materializer feeding it, the watermark
//! state that makes runs resumable, and the maintainer scheduling runs
//! across zones.

pub mod error;
pub mod maintainer;
pub mod materializer;
pub mod session;
pub mod types;
pub mod watermark;


pub use self::error::SyncError;
pub use self::maintainer::{
    MaintainerConfig, MaintainerError, ZoneHealth, ZoneStatus,
    ZoneSyncMaintainer,
};
pub use self::materializer::{
    Materialized, MaterializeError, RecordMaterializer, SkipReason,
};
pub use self::session::{SyncConfig, ZoneSyncSession};
pub use self::types::{
    NodeContent, SyncCounters, SyncMode, SyncReport, ZoneNodeUpdate,
};
pub use self::watermark::{
    InMemoryWatermarkStore, WatermarkRecord, WatermarkStore,
};
