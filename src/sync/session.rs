//! The zone synchronization session.
//!
//! One session owns one run against one zone: it picks the scan mode from
//! the zone's watermark record, drives a paged scan of the zone's
//! container, applies every page to the zone store strictly in the order
//! received, infers deletions, reconciles the directory's tombstone view
//! and only then — on clean completion of every phase — commits the new
//! watermark. A session that fails anywhere simply returns the error and
//! commits nothing; the next run retries from the last known-good
//! watermark, which is what makes crashes, timeouts and cancellations all
//! look the same.

use std::collections::HashSet;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, trace, warn};

use crate::directory::{
    ControlKind, DirectoryError, DirectoryObject, DirectorySession,
    PageCursor, RootDescriptor, SdParts, SearchControl, SearchRequest,
    SearchScope, ATTR_NODE_TOMBSTONED, ATTR_OBJECT_CLASS,
    ATTR_RECORD_DATA, ATTR_SECURITY_DESCRIPTOR, ATTR_USN_CHANGED,
    ATTR_WHEN_CHANGED, CLASS_DNS_NODE,
};
use crate::store::{LiveNodeUpdate, ZoneStore};
use crate::usn::Usn;
use crate::version::VersionGate;
use crate::zone::{NodeName, ZoneIdentity};

use super::error::SyncError;
use super::materializer::{
    node_name_of, Materialized, RecordMaterializer, SkipReason,
};
use super::types::{NodeContent, SyncCounters, SyncMode, SyncReport};
use super::watermark::{WatermarkRecord, WatermarkStore};

/// Attributes requested for every scanned object.
const SCAN_ATTRS: &[&str] = &[
    ATTR_OBJECT_CLASS,
    ATTR_USN_CHANGED,
    ATTR_WHEN_CHANGED,
    ATTR_RECORD_DATA,
    ATTR_NODE_TOMBSTONED,
    ATTR_SECURITY_DESCRIPTOR,
];

/// Attributes requested for tombstone sweep objects.
const TOMBSTONE_ATTRS: &[&str] = &[
    ATTR_OBJECT_CLASS,
    ATTR_USN_CHANGED,
    ATTR_WHEN_CHANGED,
    ATTR_NODE_TOMBSTONED,
];

//------------ SyncConfig ----------------------------------------------------

/// Knobs of a synchronization run.
#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    /// Maximum objects per page of the zone scan.
    pub page_size: usize,

    /// How far below the start watermark an observed change number may
    /// fall before the run aborts as inconsistent.
    pub allowed_usn_skew: u64,

    /// Tombstone retention window, used when the directory does not
    /// advertise its own.
    pub tombstone_retention: core::time::Duration,

    /// Fetch security descriptors with a follow-up read when the
    /// inclusion control cannot be used.
    pub fetch_security_descriptors: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            page_size: 256,
            allowed_usn_skew: 0,
            tombstone_retention: core::time::Duration::from_secs(
                180 * 24 * 60 * 60,
            ),
            fetch_security_descriptors: true,
        }
    }
}

//------------ ZoneSyncSession -----------------------------------------------

/// One synchronization run for one zone.
///
/// Created per run and consumed by [`run()`]; nothing of it is persisted.
/// The watermark store is only written in the final commit step, after
/// every phase completed.
///
/// [`run()`]: ZoneSyncSession::run()
#[derive(Debug)]
pub struct ZoneSyncSession {
    zone: ZoneIdentity,
    directory: Arc<DirectorySession>,
    root: Arc<RootDescriptor>,
    gate: Arc<VersionGate>,
    store: Arc<dyn ZoneStore>,
    watermarks: Arc<dyn WatermarkStore>,
    materializer: RecordMaterializer,
    config: SyncConfig,
    full_reload: bool,

    // Run state. The cursor is owned exclusively by this session and
    // never outlives it.
    mode: SyncMode,
    start_watermark: Usn,
    highest_observed: Usn,
    cursor: Option<PageCursor>,
    observed: HashSet<NodeName>,
    counters: SyncCounters,
}

impl ZoneSyncSession {
    /// Creates a session for one run against the given zone.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        zone: ZoneIdentity,
        directory: Arc<DirectorySession>,
        root: Arc<RootDescriptor>,
        gate: Arc<VersionGate>,
        store: Arc<dyn ZoneStore>,
        watermarks: Arc<dyn WatermarkStore>,
        config: SyncConfig,
    ) -> Self {
        ZoneSyncSession {
            zone,
            directory,
            root,
            gate,
            store,
            watermarks,
            materializer: RecordMaterializer::new(),
            config,
            full_reload: false,
            mode: SyncMode::FullLoad,
            start_watermark: Usn::ZERO,
            highest_observed: Usn::ZERO,
            cursor: None,
            observed: HashSet::new(),
            counters: SyncCounters::default(),
        }
    }

    /// Replaces the record materializer, e.g. to use a custom codec.
    pub fn with_materializer(
        mut self,
        materializer: RecordMaterializer,
    ) -> Self {
        self.materializer = materializer;
        self
    }

    /// Forces the run to rescan the whole zone.
    pub fn with_full_reload(mut self, full_reload: bool) -> Self {
        self.full_reload = full_reload;
        self
    }

    /// Runs all phases and commits the watermark on clean completion.
    pub async fn run(mut self) -> Result<SyncReport, SyncError> {
        let record = self
            .watermarks
            .read(&self.zone)
            .await
            .map_err(SyncError::WatermarkStore)?;

        let (mode, start) = match (&record, self.full_reload) {
            (None, _) => (SyncMode::FullLoad, Usn::ZERO),
            (Some(rec), true) => (SyncMode::FullLoad, rec.last_applied),
            (Some(rec), false) => {
                (SyncMode::IncrementalUpdate, rec.last_applied)
            }
        };
        self.mode = mode;
        self.start_watermark = start;
        self.highest_observed = start;
        let low_water_mark = record
            .map(|rec| rec.tombstone_low_water_mark)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        info!(
            zone = %self.zone, %mode, start_watermark = %start,
            "starting synchronization run"
        );

        let pre_run_nodes = self
            .store
            .node_count(&self.zone)
            .await
            .map_err(SyncError::Store)?;

        self.scan().await?;
        self.deletion_sweep(mode, pre_run_nodes).await?;
        let low_water_mark = self.tombstone_sweep(low_water_mark).await?;

        // Committing: the one write that makes this run count.
        let committed = WatermarkRecord {
            last_applied: self.highest_observed,
            tombstone_low_water_mark: low_water_mark,
        };
        self.watermarks
            .commit_atomically(&self.zone, committed)
            .await
            .map_err(SyncError::WatermarkStore)?;

        info!(
            zone = %self.zone, %mode,
            committed_watermark = %self.highest_observed,
            objects_seen = self.counters.objects_seen,
            live_applied = self.counters.live_applied,
            tombstones_applied = self.counters.tombstones_applied,
            deletions_applied = self.counters.deletions_applied,
            skipped = self.counters.skipped,
            "synchronization run committed"
        );

        Ok(SyncReport {
            zone: self.zone,
            mode,
            start_watermark: start,
            committed_watermark: self.highest_observed,
            counters: self.counters,
        })
    }

    /// The scan phase: pages every matching object into the zone store.
    async fn scan(&mut self) -> Result<(), SyncError> {
        let filter = match self.mode {
            SyncMode::FullLoad => {
                format!("(objectClass={CLASS_DNS_NODE})")
            }
            _ => format!(
                "(&(objectClass={CLASS_DNS_NODE})({ATTR_USN_CHANGED}>={}))",
                self.start_watermark
            ),
        };
        let mut request = SearchRequest::new(
            self.zone.container_dn(),
            SearchScope::Subtree,
            filter,
        );
        request.attrs = SCAN_ATTRS.to_vec();
        request.page_size = self.config.page_size;
        request.time_limit = self.directory.config().op_time_limit;
        request.controls = self.gated_controls();

        // A full load applies everything it sees; only an incremental
        // scan re-filters by the start watermark.
        let refilter_floor = match self.mode {
            SyncMode::FullLoad => Usn::ZERO,
            _ => self.start_watermark,
        };
        let sd_inline =
            request.has_control(ControlKind::SecurityDescriptorInclusion);

        loop {
            let page = match self
                .directory
                .search_page(&request, self.cursor.take())
                .await
            {
                Ok(page) => page,
                Err(err) => return Err(self.directory_failure(err)),
            };
            // Pages apply strictly in the order received; later pages
            // may carry corrective watermarks for earlier nodes.
            for object in &page.objects {
                self.process_object(object, refilter_floor, sd_inline)
                    .await?;
            }
            match page.cursor {
                Some(cursor) => self.cursor = Some(cursor),
                None => break,
            }
        }
        Ok(())
    }

    /// Classifies and applies one scanned object.
    async fn process_object(
        &mut self,
        object: &DirectoryObject,
        refilter_floor: Usn,
        sd_inline: bool,
    ) -> Result<(), SyncError> {
        self.counters.objects_seen += 1;

        // A change number below the start watermark in an incremental
        // scan means the server's change sequence ran backwards. Not
        // retryable: retrying could perpetually miss changes.
        if self.mode == SyncMode::IncrementalUpdate {
            if let Some(usn) =
                object.first_u64(ATTR_USN_CHANGED).map(Usn::new)
            {
                let floor = self
                    .start_watermark
                    .saturating_back(self.config.allowed_usn_skew);
                if usn < floor {
                    return Err(SyncError::Consistency {
                        observed: usn,
                        start: self.start_watermark,
                    });
                }
            }
        }

        match self.materializer.materialize(object, refilter_floor) {
            Ok(Materialized::Update(update)) => {
                self.observed.insert(update.node.clone());
                self.highest_observed =
                    self.highest_observed.max_with(update.watermark);
                self.apply(update, object.dn(), sd_inline).await
            }
            Ok(Materialized::Skip(reason)) => {
                trace!(
                    zone = %self.zone, dn = object.dn(), %reason,
                    "object skipped"
                );
                self.counters.skipped += 1;
                if matches!(reason, SkipReason::StaleWatermark) {
                    // The node exists; it must not look deleted to the
                    // deletion sweep.
                    if let Some(name) = node_name_of(object) {
                        self.observed.insert(name);
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!(
                    zone = %self.zone, dn = object.dn(), %err,
                    "object not materialized, skipping"
                );
                self.counters.skipped += 1;
                if let Some(name) = node_name_of(object) {
                    self.observed.insert(name);
                }
                Ok(())
            }
        }
    }

    /// Applies one materialized update to the zone store.
    async fn apply(
        &mut self,
        update: super::types::ZoneNodeUpdate,
        dn: &str,
        sd_inline: bool,
    ) -> Result<(), SyncError> {
        match update.content {
            NodeContent::Live(records) => {
                let mut security_descriptor = update.security_descriptor;
                if security_descriptor.is_none()
                    && !sd_inline
                    && self.config.fetch_security_descriptors
                {
                    security_descriptor =
                        self.read_security_descriptor(dn).await?;
                }
                self.store
                    .upsert_live_node(
                        &self.zone,
                        LiveNodeUpdate {
                            node: update.node,
                            records,
                            watermark: update.watermark,
                            security_descriptor,
                        },
                    )
                    .await
                    .map_err(SyncError::Store)?;
                self.counters.live_applied += 1;
            }
            NodeContent::Tombstone { .. } => {
                self.store
                    .upsert_tombstone(
                        &self.zone,
                        update.node,
                        update.watermark,
                    )
                    .await
                    .map_err(SyncError::Store)?;
                self.counters.tombstones_applied += 1;
            }
        }
        Ok(())
    }

    /// The deletion sweep: marks nodes deleted that a complete scan no
    /// longer observed.
    ///
    /// The absence diff is only sound against a complete observation of
    /// the zone, so it executes after full-load scans only; an
    /// incremental scan's deletions surface through tombstoned objects
    /// instead. It is also skipped when the store held no nodes before
    /// the run, as there is nothing a cold load could have missed.
    async fn deletion_sweep(
        &mut self,
        scan_mode: SyncMode,
        pre_run_nodes: usize,
    ) -> Result<(), SyncError> {
        self.mode = SyncMode::DeletionSweep;
        if scan_mode != SyncMode::FullLoad {
            debug!(
                zone = %self.zone,
                "deletion sweep: scan was incremental, nothing to diff"
            );
            return Ok(());
        }
        if pre_run_nodes == 0 {
            debug!(
                zone = %self.zone,
                "deletion sweep: store was empty before the run"
            );
            return Ok(());
        }

        let stale = self
            .store
            .node_names_with_watermark_before(
                &self.zone,
                self.start_watermark,
            )
            .await
            .map_err(SyncError::Store)?;
        for name in stale {
            if self.observed.contains(&name) {
                continue;
            }
            debug!(
                zone = %self.zone, node = %name,
                "node no longer present in the directory, marking deleted"
            );
            self.store
                .upsert_tombstone(
                    &self.zone,
                    name,
                    self.highest_observed,
                )
                .await
                .map_err(SyncError::Store)?;
            self.counters.deletions_applied += 1;
        }
        Ok(())
    }

    /// The tombstone sweep: applies live tombstone markers and purges
    /// expired ones.
    ///
    /// Returns the new tombstone low-water-mark. Change numbers seen here
    /// never advance the committed watermark; the scan, not the sweep,
    /// defines incremental coverage.
    async fn tombstone_sweep(
        &mut self,
        low_water_mark: OffsetDateTime,
    ) -> Result<OffsetDateTime, SyncError> {
        self.mode = SyncMode::TombstoneSweep;
        let retention = self
            .root
            .tombstone_retention()
            .unwrap_or(self.config.tombstone_retention);
        let expiry_cutoff = OffsetDateTime::now_utc() - retention;

        let filter = format!(
            "(&(objectClass={CLASS_DNS_NODE})({ATTR_NODE_TOMBSTONED}=TRUE)\
             ({ATTR_WHEN_CHANGED}>={}))",
            crate::directory::search::format_generalized_time(
                low_water_mark
            ),
        );
        let mut request = SearchRequest::new(
            self.zone.container_dn(),
            SearchScope::Subtree,
            filter,
        );
        request.attrs = TOMBSTONE_ATTRS.to_vec();
        request.page_size = self.config.page_size;
        request.time_limit = self.directory.config().op_time_limit;
        request.controls = self.gated_controls();
        request.include_tombstoned = true;

        let mut newest = low_water_mark;
        loop {
            let page = match self
                .directory
                .search_page(&request, self.cursor.take())
                .await
            {
                Ok(page) => page,
                Err(err) => return Err(self.directory_failure(err)),
            };
            for object in &page.objects {
                self.counters.objects_seen += 1;
                let Some(name) = node_name_of(object) else {
                    warn!(
                        zone = %self.zone, dn = object.dn(),
                        "tombstone with underivable name, skipping"
                    );
                    self.counters.skipped += 1;
                    continue;
                };
                let Some(deleted_at) =
                    object.first_time(ATTR_WHEN_CHANGED)
                else {
                    warn!(
                        zone = %self.zone, dn = object.dn(),
                        "tombstone without deletion time, skipping"
                    );
                    self.counters.skipped += 1;
                    continue;
                };
                newest = newest.max(deleted_at);

                if deleted_at < expiry_cutoff {
                    trace!(
                        zone = %self.zone, node = %name,
                        "tombstone past retention, purging"
                    );
                    self.store
                        .purge_tombstone(&self.zone, name)
                        .await
                        .map_err(SyncError::Store)?;
                    self.counters.tombstones_purged += 1;
                } else {
                    let watermark = object
                        .first_u64(ATTR_USN_CHANGED)
                        .map(Usn::new)
                        .unwrap_or(self.highest_observed);
                    self.store
                        .upsert_tombstone(&self.zone, name, watermark)
                        .await
                        .map_err(SyncError::Store)?;
                    self.counters.tombstones_applied += 1;
                }
            }
            match page.cursor {
                Some(cursor) => self.cursor = Some(cursor),
                None => break,
            }
        }
        Ok(newest)
    }

    /// Selects the optional controls safe to attach to a search.
    fn gated_controls(&self) -> Vec<SearchControl> {
        let candidates = [
            SearchControl::NoReferral,
            SearchControl::SecurityDescriptorInclusion(SdParts::Full),
        ];
        candidates
            .into_iter()
            .filter(|control| {
                self.directory.advertises(control.kind())
                    && self.gate.is_control_enabled(*control)
            })
            .collect()
    }

    /// Fetches a node's security descriptor with a follow-up read.
    async fn read_security_descriptor(
        &self,
        dn: &str,
    ) -> Result<Option<bytes::Bytes>, SyncError> {
        let entry = self
            .directory
            .read_entry(dn, &[ATTR_SECURITY_DESCRIPTOR])
            .await
            .map_err(|err| self.directory_failure(err))?;
        Ok(entry
            .and_then(|e| e.first(ATTR_SECURITY_DESCRIPTOR).cloned()))
    }

    /// Wraps a directory failure, updating the gate on control
    /// rejections so subsequent sessions avoid the feature.
    fn directory_failure(&self, err: DirectoryError) -> SyncError {
        if let DirectoryError::ControlRejected(kind) = &err {
            self.gate
                .record_rejection(self.directory.endpoint(), *kind);
        }
        SyncError::Directory(err)
    }
}
