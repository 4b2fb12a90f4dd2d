//! Types shared across the synchronization machinery.

use core::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::record::RecordData;
use crate::usn::Usn;
use crate::zone::{NodeName, ZoneIdentity};

//------------ SyncMode ------------------------------------------------------

/// The phase a synchronization run is in.
///
/// A run starts scanning in either [`FullLoad`] or [`IncrementalUpdate`]
/// and then always advances through [`DeletionSweep`] and
/// [`TombstoneSweep`] before committing.
///
/// [`FullLoad`]: SyncMode::FullLoad
/// [`IncrementalUpdate`]: SyncMode::IncrementalUpdate
/// [`DeletionSweep`]: SyncMode::DeletionSweep
/// [`TombstoneSweep`]: SyncMode::TombstoneSweep
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize,
)]
pub enum SyncMode {
    /// Scan every object in the zone to seed or rebuild it.
    FullLoad,

    /// Scan only objects changed at or after the start watermark.
    IncrementalUpdate,

    /// Infer deletions from absence against a complete observation.
    DeletionSweep,

    /// Reconcile the directory's tombstoned-object view.
    TombstoneSweep,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::FullLoad => f.write_str("full load"),
            SyncMode::IncrementalUpdate => {
                f.write_str("incremental update")
            }
            SyncMode::DeletionSweep => f.write_str("deletion sweep"),
            SyncMode::TombstoneSweep => f.write_str("tombstone sweep"),
        }
    }
}

//------------ NodeContent / ZoneNodeUpdate ----------------------------------

/// What a materialized object says about its node.
///
/// A node carries either a live record set or a tombstone marker, never
/// both and never neither; the enum makes the invariant structural.
#[derive(Clone, Debug)]
pub enum NodeContent {
    /// The node is alive with this record set.
    Live(Vec<RecordData>),

    /// The node is deleted; the name stays reserved until the marker
    /// expires.
    Tombstone {
        /// When the object was tombstoned.
        deleted_at: OffsetDateTime,
    },
}

/// One materialized node update, independently owned and never aliased.
#[derive(Clone, Debug)]
pub struct ZoneNodeUpdate {
    /// The node's owner name relative to the zone apex.
    pub node: NodeName,

    /// Live record set or tombstone marker.
    pub content: NodeContent,

    /// The change number of the source object.
    pub watermark: Usn,

    /// The source object's security descriptor, when it carried one.
    pub security_descriptor: Option<Bytes>,
}

//------------ SyncCounters --------------------------------------------------

/// Running counters of one synchronization run.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize,
)]
pub struct SyncCounters {
    /// Objects returned by the directory, across all phases.
    pub objects_seen: u64,

    /// Live node updates applied to the zone store.
    pub live_applied: u64,

    /// Tombstone markers applied to the zone store.
    pub tombstones_applied: u64,

    /// Nodes marked deleted by the deletion sweep.
    pub deletions_applied: u64,

    /// Expired tombstones purged outright.
    pub tombstones_purged: u64,

    /// Objects skipped, whether filtered or undecodable.
    pub skipped: u64,
}

//------------ SyncReport ----------------------------------------------------

/// The outcome of one successfully committed synchronization run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SyncReport {
    /// The synchronized zone.
    pub zone: ZoneIdentity,

    /// The scan mode the run started in.
    pub mode: SyncMode,

    /// The watermark the run started from.
    pub start_watermark: Usn,

    /// The watermark committed at the end of the run.
    pub committed_watermark: Usn,

    /// What the run did.
    pub counters: SyncCounters,
}
