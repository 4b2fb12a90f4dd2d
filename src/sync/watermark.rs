//! Per-zone watermark state.
//!
//! The watermark record is the whole of the state this engine persists:
//! two scalars per zone. Everything bulky lives in the zone store. The
//! record is the single source of truth across runs and is only ever
//! advanced by a session that completed all of its phases — that commit,
//! not node application, is the durability boundary defining "this run
//! happened."

use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::usn::Usn;
use crate::zone::ZoneIdentity;

//------------ WatermarkRecord -----------------------------------------------

/// The persisted synchronization state of one zone.
///
/// Monotonic: neither field regresses across commits, except when an
/// administrative full reload rebuilds the zone.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct WatermarkRecord {
    /// Change number of the last fully applied scan.
    pub last_applied: Usn,

    /// Earliest tombstone deletion time still tracked.
    #[serde(with = "time::serde::timestamp")]
    pub tombstone_low_water_mark: OffsetDateTime,
}

impl Default for WatermarkRecord {
    fn default() -> Self {
        WatermarkRecord {
            last_applied: Usn::ZERO,
            tombstone_low_water_mark: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

//------------ WatermarkStore ------------------------------------------------

pub type WatermarkFut<'a, T> = BoxFuture<'a, Result<T, io::Error>>;

/// The consumed capability of durably storing watermark records.
pub trait WatermarkStore: Debug + Send + Sync {
    /// Returns the record for a zone, `None` if the zone has never
    /// completed a run.
    fn read<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
    ) -> WatermarkFut<'a, Option<WatermarkRecord>>;

    /// Atomically replaces the record for a zone.
    fn commit_atomically<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        record: WatermarkRecord,
    ) -> WatermarkFut<'a, ()>;
}

//------------ InMemoryWatermarkStore ----------------------------------------

/// A [`WatermarkStore`] keeping records in process memory.
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    records: Mutex<HashMap<ZoneIdentity, WatermarkRecord>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Synchronous convenience accessor for tests and reporting.
    pub fn record(&self, zone: &ZoneIdentity) -> Option<WatermarkRecord> {
        self.records.lock().get(zone).copied()
    }
}

impl WatermarkStore for InMemoryWatermarkStore {
    fn read<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
    ) -> WatermarkFut<'a, Option<WatermarkRecord>> {
        Box::pin(async move { Ok(self.records.lock().get(zone).copied()) })
    }

    fn commit_atomically<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        record: WatermarkRecord,
    ) -> WatermarkFut<'a, ()> {
        Box::pin(async move {
            self.records.lock().insert(zone.clone(), record);
            Ok(())
        })
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;

    fn zone() -> ZoneIdentity {
        ZoneIdentity::new("example.com", "DC=example.com,CN=Zones")
    }

    #[tokio::test]
    async fn read_returns_none_for_an_unknown_zone() {
        let store = InMemoryWatermarkStore::new();
        assert_eq!(store.read(&zone()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn commit_then_read_round_trips() {
        let store = InMemoryWatermarkStore::new();
        let record = WatermarkRecord {
            last_applied: Usn::new(80),
            ..Default::default()
        };
        store.commit_atomically(&zone(), record).await.unwrap();
        assert_eq!(store.read(&zone()).await.unwrap(), Some(record));
    }

    #[test]
    fn records_serialize_with_a_plain_timestamp() {
        let record = WatermarkRecord {
            last_applied: Usn::new(42),
            tombstone_low_water_mark: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["last_applied"], 42);
        assert_eq!(json["tombstone_low_water_mark"], 0);
    }
}
