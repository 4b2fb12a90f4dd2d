//! The root descriptor of a directory endpoint.
//!
//! First contact with an endpoint reads its well-known root entry, which
//! advertises the partitions it hosts, the highest change number it has
//! committed, its feature levels and the optional controls it speaks.
//! Everything downstream — addressing, version gating, watermark checks —
//! keys off this descriptor, so it is loaded once per endpoint, cached
//! with a revalidation TTL and shared between concurrent callers via
//! request coalescing.

use core::time::Duration;

use std::sync::Arc;

use moka::future::Cache;
use tracing::{debug, warn};

use crate::usn::Usn;
use crate::version::{BehaviorVersion, VersionGate, VersionObservation};

use super::controls::ControlKind;
use super::error::DirectoryError;
use super::search::DirectoryObject;
use super::session::{DirectorySession, Endpoint};
use super::{
    ATTR_CONFIG_CONTEXT, ATTR_DEFAULT_CONTEXT, ATTR_DOMAIN_VERSION,
    ATTR_FOREST_VERSION, ATTR_HIGHEST_COMMITTED_USN, ATTR_NAMING_CONTEXTS,
    ATTR_SCHEMA_CONTEXT, ATTR_SERVER_IDENTITY, ATTR_SERVER_VERSION,
    ATTR_SUPPORTED_CONTROL, ATTR_SUPPORTED_PROTOCOL_VERSION,
    ATTR_TOMBSTONE_LIFETIME,
};

/// The protocol revision this engine speaks.
const SUPPORTED_PROTOCOL_VERSION: u32 = 3;

/// The attributes requested from the root entry.
const ROOT_ATTRS: &[&str] = &[
    ATTR_SERVER_IDENTITY,
    ATTR_NAMING_CONTEXTS,
    ATTR_SCHEMA_CONTEXT,
    ATTR_CONFIG_CONTEXT,
    ATTR_DEFAULT_CONTEXT,
    ATTR_HIGHEST_COMMITTED_USN,
    ATTR_SUPPORTED_PROTOCOL_VERSION,
    ATTR_SUPPORTED_CONTROL,
    ATTR_FOREST_VERSION,
    ATTR_DOMAIN_VERSION,
    ATTR_SERVER_VERSION,
];

//------------ RootDescriptor ------------------------------------------------

/// The advertised capabilities and layout of one directory endpoint.
#[derive(Clone, Debug)]
pub struct RootDescriptor {
    /// Advertised host/service name of the contacted server.
    server_identity: String,

    /// Partition roots advertised by the endpoint, in advertised order.
    naming_contexts: Vec<String>,

    /// DN of the schema partition root.
    schema_context: String,

    /// DN of the configuration partition root.
    config_context: String,

    /// DN of the default (domain) partition root, if advertised.
    default_context: Option<String>,

    /// Largest change number the endpoint has locally committed.
    highest_committed: Usn,

    /// Feature levels advertised for the forest, domain and this server.
    forest_version: BehaviorVersion,
    domain_version: BehaviorVersion,
    server_version: BehaviorVersion,

    /// Optional controls the endpoint advertises.
    controls: Vec<ControlKind>,

    /// Tombstone retention window advertised by the directory, if read.
    tombstone_retention: Option<Duration>,
}

impl RootDescriptor {
    /// Builds a descriptor from the root entry.
    ///
    /// Fails with [`DirectoryError::MalformedRootDescriptor`] when a
    /// required attribute is missing or the schema/configuration
    /// partition is not listed among the naming contexts, and with
    /// [`DirectoryError::VersionUnsupported`] when the endpoint does not
    /// advertise a protocol revision this engine speaks.
    pub fn from_entry(
        entry: &DirectoryObject,
    ) -> Result<Self, DirectoryError> {
        let supported = entry
            .values(ATTR_SUPPORTED_PROTOCOL_VERSION)
            .iter()
            .filter_map(|v| core::str::from_utf8(v).ok())
            .filter_map(|s| s.trim().parse::<u32>().ok())
            .collect::<Vec<_>>();
        if !supported.contains(&SUPPORTED_PROTOCOL_VERSION) {
            return Err(DirectoryError::VersionUnsupported(
                supported.into_iter().max().unwrap_or(0),
            ));
        }

        let server_identity = entry
            .first_str(ATTR_SERVER_IDENTITY)
            .ok_or(DirectoryError::MalformedRootDescriptor(
                ATTR_SERVER_IDENTITY,
            ))?
            .to_string();

        let naming_contexts = entry
            .values(ATTR_NAMING_CONTEXTS)
            .iter()
            .filter_map(|v| core::str::from_utf8(v).ok())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if naming_contexts.is_empty() {
            return Err(DirectoryError::MalformedRootDescriptor(
                ATTR_NAMING_CONTEXTS,
            ));
        }

        // The schema and configuration partitions must both be present
        // and listed among the naming contexts.
        let schema_context = Self::required_context(
            entry,
            ATTR_SCHEMA_CONTEXT,
            &naming_contexts,
        )?;
        let config_context = Self::required_context(
            entry,
            ATTR_CONFIG_CONTEXT,
            &naming_contexts,
        )?;

        let highest_committed = entry
            .first_u64(ATTR_HIGHEST_COMMITTED_USN)
            .map(Usn::new)
            .ok_or(DirectoryError::MalformedRootDescriptor(
                ATTR_HIGHEST_COMMITTED_USN,
            ))?;

        let controls = entry
            .values(ATTR_SUPPORTED_CONTROL)
            .iter()
            .filter_map(|v| core::str::from_utf8(v).ok())
            .filter_map(|oid| ControlKind::from_oid(oid.trim()))
            .collect();

        // Older servers do not advertise feature levels at all; they are
        // level zero by definition.
        let version = |attr| {
            entry
                .first_u64(attr)
                .map(|v| BehaviorVersion::new(v as u32))
                .unwrap_or(BehaviorVersion::new(0))
        };

        Ok(RootDescriptor {
            server_identity,
            default_context: entry
                .first_str(ATTR_DEFAULT_CONTEXT)
                .map(str::to_string),
            naming_contexts,
            schema_context,
            config_context,
            highest_committed,
            forest_version: version(ATTR_FOREST_VERSION),
            domain_version: version(ATTR_DOMAIN_VERSION),
            server_version: version(ATTR_SERVER_VERSION),
            controls,
            tombstone_retention: None,
        })
    }

    fn required_context(
        entry: &DirectoryObject,
        attr: &'static str,
        naming_contexts: &[String],
    ) -> Result<String, DirectoryError> {
        let context = entry
            .first_str(attr)
            .ok_or(DirectoryError::MalformedRootDescriptor(attr))?;
        if !naming_contexts.iter().any(|nc| nc == context) {
            return Err(DirectoryError::MalformedRootDescriptor(attr));
        }
        Ok(context.to_string())
    }

    /// Returns the advertised host/service name of the server.
    pub fn server_identity(&self) -> &str {
        &self.server_identity
    }

    /// Returns the advertised partition roots.
    pub fn naming_contexts(&self) -> &[String] {
        &self.naming_contexts
    }

    /// Returns the DN of the schema partition root.
    pub fn schema_context(&self) -> &str {
        &self.schema_context
    }

    /// Returns the DN of the configuration partition root.
    pub fn config_context(&self) -> &str {
        &self.config_context
    }

    /// Returns the DN of the default partition root, if advertised.
    pub fn default_context(&self) -> Option<&str> {
        self.default_context.as_deref()
    }

    /// Returns the largest locally committed change number at load time.
    pub fn highest_committed(&self) -> Usn {
        self.highest_committed
    }

    /// Returns the advertised forest feature level.
    pub fn forest_version(&self) -> BehaviorVersion {
        self.forest_version
    }

    /// Returns the advertised domain feature level.
    pub fn domain_version(&self) -> BehaviorVersion {
        self.domain_version
    }

    /// Returns the advertised feature level of this server.
    pub fn server_version(&self) -> BehaviorVersion {
        self.server_version
    }

    /// Returns the optional controls the endpoint advertises.
    pub fn advertised_controls(
        &self,
    ) -> impl Iterator<Item = ControlKind> + '_ {
        self.controls.iter().copied()
    }

    /// Returns the directory's advertised tombstone retention window.
    pub fn tombstone_retention(&self) -> Option<Duration> {
        self.tombstone_retention
    }
}

//------------ RootCacheConfig -----------------------------------------------

/// Knobs of the root descriptor cache.
#[derive(Clone, Copy, Debug)]
pub struct RootCacheConfig {
    /// How long a loaded descriptor remains valid before the next load
    /// contacts the endpoint again.
    pub revalidate_after: Duration,

    /// Maximum number of endpoints cached.
    pub capacity: u64,
}

impl Default for RootCacheConfig {
    fn default() -> Self {
        RootCacheConfig {
            revalidate_after: Duration::from_secs(15 * 60),
            capacity: 64,
        }
    }
}

//------------ RootDescriptorLoader ------------------------------------------

/// Loads and caches root descriptors, once per endpoint.
///
/// Concurrent loads for the same endpoint share a single in-flight fetch.
/// Every successful load, cached or fresh, refreshes the behavior version
/// gate's record for the endpoint and records the endpoint's advertised
/// controls on the calling session.
pub struct RootDescriptorLoader {
    cache: Cache<Endpoint, Arc<RootDescriptor>>,
    gate: Arc<VersionGate>,
}

impl std::fmt::Debug for RootDescriptorLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootDescriptorLoader")
            .field("cached_endpoints", &self.cache.entry_count())
            .field("gate", &self.gate)
            .finish()
    }
}

impl RootDescriptorLoader {
    /// Creates a loader feeding the given version gate.
    pub fn new(gate: Arc<VersionGate>, config: RootCacheConfig) -> Self {
        RootDescriptorLoader {
            cache: Cache::builder()
                .max_capacity(config.capacity)
                .time_to_live(config.revalidate_after)
                .build(),
            gate,
        }
    }

    /// Loads the root descriptor for the session's endpoint.
    ///
    /// Idempotent and safe to call concurrently for the same endpoint.
    pub async fn load(
        &self,
        session: &DirectorySession,
    ) -> Result<Arc<RootDescriptor>, DirectoryError> {
        let endpoint = session.endpoint().clone();
        let root = self
            .cache
            .try_get_with(endpoint.clone(), async {
                Self::fetch(session).await.map(Arc::new)
            })
            .await
            .map_err(|err: Arc<DirectoryError>| (*err).clone())?;

        self.gate.observe(
            &endpoint,
            VersionObservation {
                forest: root.forest_version(),
                domain: root
                    .default_context()
                    .map(|dn| (dn.to_string(), root.domain_version())),
                server: root.server_version(),
            },
        );
        session.negotiate(&root);
        Ok(root)
    }

    /// Drops the cached descriptor for one endpoint.
    pub async fn invalidate(&self, endpoint: &Endpoint) {
        self.cache.invalidate(endpoint).await;
    }

    /// Drops every cached descriptor, forcing revalidation of all
    /// endpoints on next contact.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    async fn fetch(
        session: &DirectorySession,
    ) -> Result<RootDescriptor, DirectoryError> {
        let entry = session
            .read_entry("", ROOT_ATTRS)
            .await?
            .ok_or(DirectoryError::MalformedRootDescriptor("root entry"))?;
        let mut root = RootDescriptor::from_entry(&entry)?;
        debug!(
            endpoint = %session.endpoint(),
            server = root.server_identity(),
            highest_committed = %root.highest_committed(),
            "loaded root descriptor"
        );

        // The retention window lives on the directory service entry of
        // the configuration partition. Not every deployment exposes it;
        // the sync configuration provides the fallback.
        let ds_dn = format!(
            "CN=Directory Service,CN=Windows NT,CN=Services,{}",
            root.config_context()
        );
        match session
            .read_entry(&ds_dn, &[ATTR_TOMBSTONE_LIFETIME])
            .await
        {
            Ok(Some(entry)) => {
                root.tombstone_retention = entry
                    .first_u64(ATTR_TOMBSTONE_LIFETIME)
                    .map(|days| Duration::from_secs(days * 24 * 60 * 60));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    endpoint = %session.endpoint(),
                    %err,
                    "could not read tombstone retention, using default"
                );
            }
        }
        Ok(root)
    }
}

//============ Testing =======================================================
