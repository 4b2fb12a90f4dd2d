//! Behavior version gating.
//!
//! Forests, domains and individual directory servers each advertise an
//! ordinal feature level. An optional protocol feature gated at level *V*
//! is only safe to use once every replication partner this process has
//! contacted reports at least *V*; a single downlevel peer disables the
//! feature process-wide until the next revalidation cycle shows none.
//! (The re-enable policy is deliberately the conservative reading; see
//! DESIGN.md.)
//!
//! The gate is an explicitly constructed, dependency-injected service,
//! never an ambient singleton, so tests can build isolated instances.

use core::fmt;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::directory::controls::{ControlKind, SearchControl};
use crate::directory::session::Endpoint;

//------------ BehaviorVersion -----------------------------------------------

/// An ordinal feature level advertised by a forest, domain or server.
///
/// Levels are monotonically non-decreasing over the lifetime of a forest
/// or domain; a server reporting a smaller level than before has been
/// replaced or restored, not downgraded in place.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
pub struct BehaviorVersion(u32);

impl BehaviorVersion {
    /// Creates a feature level from its raw ordinal.
    pub const fn new(level: u32) -> Self {
        BehaviorVersion(level)
    }

    /// Returns the raw ordinal.
    pub const fn into_int(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BehaviorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//------------ VersionObservation --------------------------------------------

/// The feature levels learned from one endpoint contact.
#[derive(Clone, Debug)]
pub struct VersionObservation {
    /// The forest feature level the endpoint advertises.
    pub forest: BehaviorVersion,

    /// The domain the endpoint belongs to and its feature level, when
    /// known.
    pub domain: Option<(String, BehaviorVersion)>,

    /// The endpoint's own feature level.
    pub server: BehaviorVersion,
}

//------------ VersionGate ---------------------------------------------------

/// The process-wide record of observed feature levels.
///
/// Written rarely (once per endpoint contact), read before every request
/// that could carry an optional control; a single mutex is plenty.
#[derive(Debug, Default)]
pub struct VersionGate {
    inner: Mutex<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    /// Highest forest level seen; monotonic.
    forest: BehaviorVersion,

    /// Highest level seen per domain; monotonic.
    domains: HashMap<String, BehaviorVersion>,

    /// Level reported by each server contacted since the last
    /// revalidation.
    peers: HashMap<Endpoint, BehaviorVersion>,

    /// Controls a server rejected outright since the last revalidation.
    rejected: HashSet<ControlKind>,
}

impl VersionGate {
    /// Creates an empty gate.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records the feature levels learned from one endpoint contact.
    pub fn observe(
        &self,
        endpoint: &Endpoint,
        observation: VersionObservation,
    ) {
        let mut inner = self.inner.lock();
        inner.forest = inner.forest.max(observation.forest);
        if let Some((domain, version)) = observation.domain {
            let entry = inner.domains.entry(domain).or_default();
            *entry = (*entry).max(version);
        }
        let previous = inner
            .peers
            .insert(endpoint.clone(), observation.server);
        if previous.is_some_and(|p| p > observation.server) {
            warn!(
                %endpoint,
                "server feature level regressed from {} to {}",
                previous.unwrap_or_default(),
                observation.server
            );
        }
    }

    /// Returns whether a feature gated at `floor` may be used.
    ///
    /// True only once at least one server has been contacted and every
    /// server contacted since the last revalidation reported a level of
    /// at least `floor`.
    pub fn is_enabled(&self, floor: BehaviorVersion) -> bool {
        let inner = self.inner.lock();
        !inner.peers.is_empty()
            && inner.peers.values().all(|version| *version >= floor)
    }

    /// Returns whether the given control may be attached to a request.
    ///
    /// Combines the feature floor with the record of outright rejections:
    /// a control some server refused stays off until revalidation even if
    /// every advertised level clears the floor.
    pub fn is_control_enabled(&self, control: SearchControl) -> bool {
        if self.inner.lock().rejected.contains(&control.kind()) {
            return false;
        }
        self.is_enabled(control.required_floor())
    }

    /// Records that a server rejected a control.
    pub fn record_rejection(&self, endpoint: &Endpoint, kind: ControlKind) {
        warn!(%endpoint, control = %kind, "control rejected, gating off");
        self.inner.lock().rejected.insert(kind);
    }

    /// Returns the highest forest feature level observed.
    pub fn forest_version(&self) -> BehaviorVersion {
        self.inner.lock().forest
    }

    /// Returns the highest feature level observed for a domain.
    pub fn domain_version(&self, domain: &str) -> Option<BehaviorVersion> {
        self.inner.lock().domains.get(domain).copied()
    }

    /// Returns the number of contacted servers reporting a level below
    /// the forest's.
    pub fn downlevel_peer_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .peers
            .values()
            .filter(|version| **version < inner.forest)
            .count()
    }

    /// Forgets all per-server observations and recorded rejections.
    ///
    /// Forest and domain levels are kept: they are monotonic properties
    /// of the deployment, not of any single contact. After this call
    /// every feature stays disabled until a fresh observation cycle has
    /// contacted the relevant servers again.
    pub fn begin_revalidation(&self) {
        debug!("version gate revalidation: clearing peer observations");
        let mut inner = self.inner.lock();
        inner.peers.clear();
        inner.rejected.clear();
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;

    fn endpoint(n: u16) -> Endpoint {
        Endpoint::new(format!("dc{n}.example.com"), 389)
    }

    fn observation(server: u32) -> VersionObservation {
        VersionObservation {
            forest: BehaviorVersion::new(server),
            domain: Some((
                "DC=example,DC=com".into(),
                BehaviorVersion::new(server),
            )),
            server: BehaviorVersion::new(server),
        }
    }

    #[test]
    fn nothing_is_enabled_before_the_first_observation() {
        let gate = VersionGate::new();
        assert!(!gate.is_enabled(BehaviorVersion::new(0)));
    }

    #[test]
    fn a_single_downlevel_peer_disables_the_feature() {
        let gate = VersionGate::new();
        let floor = BehaviorVersion::new(3);

        // One peer at the floor: enabled.
        gate.observe(&endpoint(1), observation(3));
        assert!(gate.is_enabled(floor));

        // A second peer below the floor: disabled, process-wide.
        gate.observe(&endpoint(2), observation(2));
        assert!(!gate.is_enabled(floor));
        assert_eq!(gate.downlevel_peer_count(), 1);
    }

    #[test]
    fn upgraded_peer_reenables_after_fresh_observation() {
        let gate = VersionGate::new();
        let floor = BehaviorVersion::new(3);

        gate.observe(&endpoint(1), observation(2));
        assert!(!gate.is_enabled(floor));

        // The same endpoint reports an upgraded level.
        gate.observe(&endpoint(1), observation(3));
        assert!(gate.is_enabled(floor));
    }

    #[test]
    fn revalidation_clears_peers_but_keeps_forest_level() {
        let gate = VersionGate::new();
        gate.observe(&endpoint(1), observation(4));
        assert!(gate.is_enabled(BehaviorVersion::new(4)));

        gate.begin_revalidation();
        assert!(!gate.is_enabled(BehaviorVersion::new(0)));
        assert_eq!(gate.forest_version(), BehaviorVersion::new(4));
    }

    #[test]
    fn forest_and_domain_levels_never_regress() {
        let gate = VersionGate::new();
        gate.observe(&endpoint(1), observation(4));
        gate.observe(&endpoint(2), observation(2));
        assert_eq!(gate.forest_version(), BehaviorVersion::new(4));
        assert_eq!(
            gate.domain_version("DC=example,DC=com"),
            Some(BehaviorVersion::new(4))
        );
    }

    #[test]
    fn rejected_controls_stay_off_until_revalidation() {
        let gate = VersionGate::new();
        gate.observe(&endpoint(1), observation(5));

        let control = SearchControl::LazyCommit;
        assert!(gate.is_control_enabled(control));

        gate.record_rejection(&endpoint(1), control.kind());
        assert!(!gate.is_control_enabled(control));

        // Revalidation plus a fresh observation brings it back.
        gate.begin_revalidation();
        gate.observe(&endpoint(1), observation(5));
        assert!(gate.is_control_enabled(control));
    }
}
