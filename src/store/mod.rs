//! The zone store adapter.
//!
//! The authoritative zone database this engine feeds is an external
//! collaborator, reached through the [`ZoneStore`] trait. The engine only
//! requires atomic per-node operations and one property of every
//! implementation: idempotency under re-application. Applying an update
//! carrying an equal-or-older watermark than the node already holds must
//! be a no-op — "last writer by watermark wins." That property is what
//! lets the engine deliver pages at-least-once and stay correct across
//! crashes and retries.
//!
//! [`InMemoryZoneStore`] is a reference implementation for tests and for
//! embedders without a persistent backend yet.

pub mod in_memory;

pub use self::in_memory::InMemoryZoneStore;

use std::collections::HashSet;
use std::fmt::Debug;
use std::io;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::record::RecordData;
use crate::usn::Usn;
use crate::zone::{NodeName, ZoneIdentity};

//------------ LiveNodeUpdate ------------------------------------------------

/// A materialized live node handed to the store.
#[derive(Clone, Debug)]
pub struct LiveNodeUpdate {
    /// The node's owner name relative to the zone apex.
    pub node: NodeName,

    /// The node's full record set.
    pub records: Vec<RecordData>,

    /// The change number the source object carried.
    pub watermark: Usn,

    /// The source object's security descriptor, when available.
    pub security_descriptor: Option<Bytes>,
}

//------------ ZoneStore -----------------------------------------------------

pub type StoreFut<'a, T> = BoxFuture<'a, Result<T, io::Error>>;

/// The consumed capability of an authoritative zone database.
///
/// All operations are atomic per node and idempotent under re-application
/// with an equal-or-older watermark.
pub trait ZoneStore: Debug + Send + Sync {
    /// Replaces a node's record set (watermark permitting).
    fn upsert_live_node<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        update: LiveNodeUpdate,
    ) -> StoreFut<'a, ()>;

    /// Marks a node deleted while keeping its name reserved.
    fn upsert_tombstone<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        node: NodeName,
        watermark: Usn,
    ) -> StoreFut<'a, ()>;

    /// Removes a tombstoned node outright.
    fn purge_tombstone<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        node: NodeName,
    ) -> StoreFut<'a, ()>;

    /// Returns the names of live nodes whose watermark predates the
    /// given one.
    fn node_names_with_watermark_before<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        watermark: Usn,
    ) -> StoreFut<'a, HashSet<NodeName>>;

    /// Returns the number of live nodes in the zone.
    fn node_count<'a>(&'a self, zone: &'a ZoneIdentity)
        -> StoreFut<'a, usize>;
}
