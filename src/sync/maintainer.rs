//! Keeping a set of zones synchronized.
//!
//! The maintainer owns the zones this process synchronizes and runs one
//! [`ZoneSyncSession`] per zone per refresh interval. Zones are
//! independent: each run gets its own directory session so one zone's
//! large page never stalls another's, while a per-endpoint semaphore caps
//! how many sessions hit a single server at once. Failed runs are retried
//! with capped exponential backoff plus jitter; a consistency failure
//! parks the zone until an operator reacts.

use core::fmt;
use core::time::Duration;

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::directory::{
    Credentials, DirectoryConnector, DirectoryError, DirectorySession,
    Endpoint, RootDescriptorLoader, SessionConfig,
};
use crate::store::ZoneStore;
use crate::version::VersionGate;
use crate::zone::ZoneIdentity;

use super::error::SyncError;
use super::session::{SyncConfig, ZoneSyncSession};
use super::types::SyncReport;
use super::watermark::WatermarkStore;

//------------ MaintainerConfig ----------------------------------------------

/// Knobs of a [`ZoneSyncMaintainer`].
#[derive(Clone, Debug)]
pub struct MaintainerConfig {
    /// How often a healthy zone is resynchronized.
    pub refresh_interval: Duration,

    /// First retry delay after a failed run.
    pub min_backoff: Duration,

    /// Ceiling for the retry delay.
    pub max_backoff: Duration,

    /// Maximum concurrent sessions against one endpoint.
    pub endpoint_concurrency: usize,

    /// Configuration of established directory sessions.
    pub session: SessionConfig,

    /// Configuration of individual synchronization runs.
    pub sync: SyncConfig,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        MaintainerConfig {
            refresh_interval: Duration::from_secs(5 * 60),
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(15 * 60),
            endpoint_concurrency: 4,
            session: SessionConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

//------------ ZoneHealth / ZoneStatus ---------------------------------------

/// The health of one maintained zone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZoneHealth {
    /// No run has completed yet.
    Pending,

    /// The last run committed.
    Healthy,

    /// Runs are failing; the maintainer keeps retrying.
    Retrying {
        /// Failed runs since the last committed one.
        consecutive_failures: u32,
    },

    /// A run hit a non-retryable condition; an operator must act.
    RequiresIntervention,
}

impl Display for ZoneHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneHealth::Pending => f.write_str("pending"),
            ZoneHealth::Healthy => f.write_str("healthy"),
            ZoneHealth::Retrying {
                consecutive_failures,
            } => {
                write!(f, "retrying ({consecutive_failures} failures)")
            }
            ZoneHealth::RequiresIntervention => {
                f.write_str("requires intervention")
            }
        }
    }
}

/// A point-in-time view of one maintained zone.
#[derive(Clone, Debug)]
pub struct ZoneStatus {
    /// Current health.
    pub health: ZoneHealth,

    /// Whether the zone is administratively paused.
    pub paused: bool,

    /// The report of the last committed run, if any.
    pub last_report: Option<SyncReport>,
}

//------------ MaintainerError -----------------------------------------------

/// A zone run could not be started or did not commit.
#[derive(Debug)]
pub enum MaintainerError {
    /// The zone is not registered with this maintainer.
    UnknownZone(ZoneIdentity),

    /// The zone already has an active session; only one runs at a time.
    SessionActive(ZoneIdentity),

    /// The run itself failed.
    Sync(SyncError),
}

impl From<SyncError> for MaintainerError {
    fn from(err: SyncError) -> Self {
        MaintainerError::Sync(err)
    }
}

impl From<DirectoryError> for MaintainerError {
    fn from(err: DirectoryError) -> Self {
        MaintainerError::Sync(SyncError::Directory(err))
    }
}

impl Display for MaintainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintainerError::UnknownZone(zone) => {
                write!(f, "Zone {zone} is not registered")
            }
            MaintainerError::SessionActive(zone) => {
                write!(f, "Zone {zone} already has an active session")
            }
            MaintainerError::Sync(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for MaintainerError {}

//------------ ZoneEntry -----------------------------------------------------

#[derive(Debug)]
struct ZoneEntry {
    endpoint: Endpoint,
    credentials: Credentials,
    health: ZoneHealth,
    paused: bool,
    full_reload: bool,
    failures: u32,
    in_flight: bool,
    next_due: Instant,
    last_report: Option<SyncReport>,
}

//------------ ZoneSyncMaintainer --------------------------------------------

/// Schedules and supervises synchronization runs for a set of zones.
#[derive(Debug)]
pub struct ZoneSyncMaintainer {
    config: ArcSwap<MaintainerConfig>,
    connector: Arc<dyn DirectoryConnector>,
    gate: Arc<VersionGate>,
    loader: Arc<RootDescriptorLoader>,
    store: Arc<dyn ZoneStore>,
    watermarks: Arc<dyn WatermarkStore>,
    zones: Mutex<HashMap<ZoneIdentity, ZoneEntry>>,
    limits: Mutex<HashMap<Endpoint, Arc<Semaphore>>>,
    running: AtomicBool,
}

impl ZoneSyncMaintainer {
    /// Creates a maintainer over the given collaborators.
    pub fn new(
        connector: Arc<dyn DirectoryConnector>,
        gate: Arc<VersionGate>,
        loader: Arc<RootDescriptorLoader>,
        store: Arc<dyn ZoneStore>,
        watermarks: Arc<dyn WatermarkStore>,
        config: MaintainerConfig,
    ) -> Arc<Self> {
        Arc::new(ZoneSyncMaintainer {
            config: ArcSwap::from_pointee(config),
            connector,
            gate,
            loader,
            store,
            watermarks,
            zones: Mutex::new(HashMap::new()),
            limits: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Replaces the configuration for subsequent runs.
    pub fn set_config(&self, config: MaintainerConfig) {
        self.config.store(Arc::new(config));
    }

    /// Registers a zone for synchronization against the given endpoint.
    ///
    /// The zone becomes due immediately.
    pub fn insert_zone(
        &self,
        zone: ZoneIdentity,
        endpoint: Endpoint,
        credentials: Credentials,
    ) {
        info!(%zone, %endpoint, "zone registered for synchronization");
        self.zones.lock().insert(
            zone,
            ZoneEntry {
                endpoint,
                credentials,
                health: ZoneHealth::Pending,
                paused: false,
                full_reload: false,
                failures: 0,
                in_flight: false,
                next_due: Instant::now(),
                last_report: None,
            },
        );
    }

    /// Removes a zone from maintenance. Its data is left in the stores.
    pub fn remove_zone(&self, zone: &ZoneIdentity) {
        if self.zones.lock().remove(zone).is_some() {
            info!(%zone, "zone removed from synchronization");
        }
    }

    /// Pauses scheduling for a zone.
    pub fn pause_zone(&self, zone: &ZoneIdentity) {
        if let Some(entry) = self.zones.lock().get_mut(zone) {
            entry.paused = true;
        }
    }

    /// Resumes scheduling for a zone, clearing an intervention flag.
    pub fn resume_zone(&self, zone: &ZoneIdentity) {
        if let Some(entry) = self.zones.lock().get_mut(zone) {
            entry.paused = false;
            if entry.health == ZoneHealth::RequiresIntervention {
                entry.health = ZoneHealth::Pending;
            }
            entry.next_due = Instant::now();
        }
    }

    /// Requests that the zone's next run rescans the whole zone.
    ///
    /// Also clears an intervention flag: a full reload is the
    /// operator's answer to a watermark consistency alert.
    pub fn request_full_reload(&self, zone: &ZoneIdentity) {
        if let Some(entry) = self.zones.lock().get_mut(zone) {
            entry.full_reload = true;
            if entry.health == ZoneHealth::RequiresIntervention {
                entry.health = ZoneHealth::Pending;
            }
            entry.next_due = Instant::now();
        }
    }

    /// Returns a zone's current status.
    pub fn zone_status(&self, zone: &ZoneIdentity) -> Option<ZoneStatus> {
        self.zones.lock().get(zone).map(|entry| ZoneStatus {
            health: entry.health,
            paused: entry.paused,
            last_report: entry.last_report.clone(),
        })
    }

    /// Stops the scheduling loop after its current tick.
    pub fn terminate(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// The scheduling loop. Runs until [`terminate()`] is called.
    ///
    /// [`terminate()`]: ZoneSyncMaintainer::terminate()
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(1)).await;
            for zone in self.due_zones() {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = this.sync_zone_once(&zone).await {
                        debug!(%zone, %err, "zone run not committed");
                    }
                });
            }
        }
    }

    /// Runs one zone now, recording the outcome.
    ///
    /// This is also the direct entry point for operator tooling; the
    /// scheduling loop goes through it as well.
    pub async fn sync_zone_once(
        &self,
        zone: &ZoneIdentity,
    ) -> Result<SyncReport, MaintainerError> {
        let (endpoint, credentials, full_reload) = self.claim(zone)?;

        let result = self
            .run_session(zone, &endpoint, &credentials, full_reload)
            .await;
        self.note_outcome(zone, &result);
        result.map_err(MaintainerError::Sync)
    }

    /// Establishes a session and runs all phases for one zone.
    async fn run_session(
        &self,
        zone: &ZoneIdentity,
        endpoint: &Endpoint,
        credentials: &Credentials,
        full_reload: bool,
    ) -> Result<SyncReport, SyncError> {
        let limiter = self.endpoint_limiter(endpoint);
        let _permit =
            limiter.acquire_owned().await.map_err(|_| {
                SyncError::Directory(DirectoryError::Protocol(
                    "endpoint limiter closed".into(),
                ))
            })?;

        let config = self.config.load();
        let session = Arc::new(
            DirectorySession::establish(
                &*self.connector,
                endpoint.clone(),
                credentials,
                config.session,
            )
            .await
            .map_err(SyncError::Directory)?,
        );

        let result = async {
            let root = self.loader.load(&session).await?;
            ZoneSyncSession::new(
                zone.clone(),
                session.clone(),
                root,
                self.gate.clone(),
                self.store.clone(),
                self.watermarks.clone(),
                config.sync,
            )
            .with_full_reload(full_reload)
            .run()
            .await
        }
        .await;

        session.unbind().await;
        result
    }

    /// Claims a zone for a run, enforcing one session per zone.
    fn claim(
        &self,
        zone: &ZoneIdentity,
    ) -> Result<(Endpoint, Credentials, bool), MaintainerError> {
        let mut zones = self.zones.lock();
        let entry = zones
            .get_mut(zone)
            .ok_or_else(|| MaintainerError::UnknownZone(zone.clone()))?;
        if entry.in_flight {
            return Err(MaintainerError::SessionActive(zone.clone()));
        }
        entry.in_flight = true;
        Ok((
            entry.endpoint.clone(),
            entry.credentials.clone(),
            entry.full_reload,
        ))
    }

    /// Records a run's outcome and schedules the next one.
    fn note_outcome(
        &self,
        zone: &ZoneIdentity,
        result: &Result<SyncReport, SyncError>,
    ) {
        let config = self.config.load();
        let mut zones = self.zones.lock();
        let Some(entry) = zones.get_mut(zone) else {
            return;
        };
        entry.in_flight = false;
        match result {
            Ok(report) => {
                entry.health = ZoneHealth::Healthy;
                entry.failures = 0;
                entry.full_reload = false;
                entry.last_report = Some(report.clone());
                entry.next_due =
                    Instant::now() + config.refresh_interval;
            }
            Err(err) if err.requires_intervention() => {
                entry.health = ZoneHealth::RequiresIntervention;
                error!(
                    %zone, %err,
                    "synchronization requires operator intervention"
                );
            }
            Err(err) => {
                entry.failures += 1;
                entry.health = ZoneHealth::Retrying {
                    consecutive_failures: entry.failures,
                };
                let delay = Self::backoff(&config, entry.failures);
                entry.next_due = Instant::now() + delay;
                warn!(
                    %zone, %err, ?delay, failures = entry.failures,
                    "synchronization failed, backing off"
                );
            }
        }
    }

    /// Returns the zones due for a run.
    fn due_zones(&self) -> Vec<ZoneIdentity> {
        let now = Instant::now();
        self.zones
            .lock()
            .iter()
            .filter(|(_, entry)| {
                !entry.paused
                    && !entry.in_flight
                    && entry.health != ZoneHealth::RequiresIntervention
                    && entry.next_due <= now
            })
            .map(|(zone, _)| zone.clone())
            .collect()
    }

    /// Returns the concurrency limiter for an endpoint.
    fn endpoint_limiter(&self, endpoint: &Endpoint) -> Arc<Semaphore> {
        self.limits
            .lock()
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(Semaphore::new(
                    self.config.load().endpoint_concurrency,
                ))
            })
            .clone()
    }

    /// Capped exponential backoff with jitter.
    fn backoff(config: &MaintainerConfig, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let base = config
            .min_backoff
            .saturating_mul(1u32 << exponent)
            .min(config.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        base.mul_f64(1.0 + jitter).min(config.max_backoff)
    }
}

//============ Testing =======================================================
