//! An in-memory zone store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use crate::record::RecordData;
use crate::usn::Usn;
use crate::zone::{NodeName, ZoneIdentity};

use super::{LiveNodeUpdate, StoreFut, ZoneStore};

//------------ StoredNode ----------------------------------------------------

/// A node as held by the in-memory store.
#[derive(Clone, Debug)]
pub struct StoredNode {
    content: StoredContent,
    watermark: Usn,
}

#[derive(Clone, Debug)]
enum StoredContent {
    Live {
        records: Vec<RecordData>,
        security_descriptor: Option<Bytes>,
    },
    Tombstone,
}

impl StoredNode {
    /// Returns whether the node is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        matches!(self.content, StoredContent::Tombstone)
    }

    /// Returns the node's record set, `None` for tombstones.
    pub fn records(&self) -> Option<&[RecordData]> {
        match &self.content {
            StoredContent::Live { records, .. } => Some(records),
            StoredContent::Tombstone => None,
        }
    }

    /// Returns the node's security descriptor, if any.
    pub fn security_descriptor(&self) -> Option<&Bytes> {
        match &self.content {
            StoredContent::Live {
                security_descriptor,
                ..
            } => security_descriptor.as_ref(),
            StoredContent::Tombstone => None,
        }
    }

    /// Returns the watermark the node was last written under.
    pub fn watermark(&self) -> Usn {
        self.watermark
    }
}

//------------ InMemoryZoneStore ---------------------------------------------

/// A reference [`ZoneStore`] keeping everything in process memory.
///
/// Enforces the watermark-wins discipline: a write carrying a watermark
/// equal to or older than the one a node already holds is a no-op.
#[derive(Debug, Default)]
pub struct InMemoryZoneStore {
    zones: RwLock<HashMap<ZoneIdentity, HashMap<NodeName, StoredNode>>>,
}

impl InMemoryZoneStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a snapshot of one node, for inspection.
    pub fn node(
        &self,
        zone: &ZoneIdentity,
        node: &NodeName,
    ) -> Option<StoredNode> {
        self.zones.read().get(zone)?.get(node).cloned()
    }

    /// Pre-populates a node, for tests and migration tooling.
    pub fn seed_live_node(
        &self,
        zone: &ZoneIdentity,
        node: NodeName,
        records: Vec<RecordData>,
        watermark: Usn,
    ) {
        self.zones.write().entry(zone.clone()).or_default().insert(
            node,
            StoredNode {
                content: StoredContent::Live {
                    records,
                    security_descriptor: None,
                },
                watermark,
            },
        );
    }

    /// Returns whether the incoming watermark supersedes the stored one.
    fn supersedes(
        nodes: &HashMap<NodeName, StoredNode>,
        node: &NodeName,
        watermark: Usn,
    ) -> bool {
        nodes
            .get(node)
            .map(|stored| watermark > stored.watermark)
            .unwrap_or(true)
    }
}

impl ZoneStore for InMemoryZoneStore {
    fn upsert_live_node<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        update: LiveNodeUpdate,
    ) -> StoreFut<'a, ()> {
        Box::pin(async move {
            let mut zones = self.zones.write();
            let nodes = zones.entry(zone.clone()).or_default();
            if !Self::supersedes(nodes, &update.node, update.watermark) {
                trace!(
                    %zone, node = %update.node,
                    "ignoring stale live update"
                );
                return Ok(());
            }
            nodes.insert(
                update.node,
                StoredNode {
                    content: StoredContent::Live {
                        records: update.records,
                        security_descriptor: update.security_descriptor,
                    },
                    watermark: update.watermark,
                },
            );
            Ok(())
        })
    }

    fn upsert_tombstone<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        node: NodeName,
        watermark: Usn,
    ) -> StoreFut<'a, ()> {
        Box::pin(async move {
            let mut zones = self.zones.write();
            let nodes = zones.entry(zone.clone()).or_default();
            if !Self::supersedes(nodes, &node, watermark) {
                trace!(%zone, %node, "ignoring stale tombstone");
                return Ok(());
            }
            nodes.insert(
                node,
                StoredNode {
                    content: StoredContent::Tombstone,
                    watermark,
                },
            );
            Ok(())
        })
    }

    fn purge_tombstone<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        node: NodeName,
    ) -> StoreFut<'a, ()> {
        Box::pin(async move {
            let mut zones = self.zones.write();
            if let Some(nodes) = zones.get_mut(zone) {
                // Only tombstones are purged; a node that came back to
                // life in the meantime stays.
                if nodes.get(&node).is_some_and(StoredNode::is_tombstone)
                {
                    nodes.remove(&node);
                }
            }
            Ok(())
        })
    }

    fn node_names_with_watermark_before<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
        watermark: Usn,
    ) -> StoreFut<'a, HashSet<NodeName>> {
        Box::pin(async move {
            Ok(self
                .zones
                .read()
                .get(zone)
                .map(|nodes| {
                    nodes
                        .iter()
                        .filter(|(_, stored)| {
                            !stored.is_tombstone()
                                && stored.watermark < watermark
                        })
                        .map(|(name, _)| name.clone())
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn node_count<'a>(
        &'a self,
        zone: &'a ZoneIdentity,
    ) -> StoreFut<'a, usize> {
        Box::pin(async move {
            Ok(self
                .zones
                .read()
                .get(zone)
                .map(|nodes| {
                    nodes
                        .values()
                        .filter(|stored| !stored.is_tombstone())
                        .count()
                })
                .unwrap_or(0))
        })
    }
}

//============ Testing =======================================================
