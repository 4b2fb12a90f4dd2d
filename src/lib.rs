//! Directory-backed DNS zone synchronization for Rust.
//!
//! This crate keeps a DNS server's authoritative zone data consistent
//! with zone data held in an LDAP-speaking directory service, using
//! incremental, watermark-driven pull replication instead of full
//! reloads. The directory protocol client, the full DNS record codec and
//! the authoritative zone database are all external collaborators,
//! consumed through traits; what lives here is the synchronization
//! protocol layered on top of them: which objects to fetch, in what
//! order, how deletions and tombstone expirations propagate without a
//! delete notification channel, how a run resumes after a crash, and
//! which optional protocol features are safe against a given set of
//! replication partners.
//!
//! # Modules
//!
//! Fundamental types:
//!
//! * [usn] provides the change-sequence-number type used as the
//!   synchronization watermark,
//! * [zone] provides zone identities and node names, and
//! * [record] provides the record blob validity codec.
//!
//! The machinery on top:
//!
//! * [directory] is the interface boundary to the directory service:
//!   sessions, paged searches, optional controls and the root descriptor
//!   loader;
//! * [version] gates optional protocol features on the feature levels of
//!   contacted replication partners;
//! * [store] is the zone store adapter seam, with an in-memory reference
//!   implementation;
//! * [sync] is the synchronization engine itself: the per-run session
//!   state machine, the record materializer, the watermark store and the
//!   maintainer scheduling runs across zones.
//!
//! # Getting started
//!
//! Construct the shared services once, register zones with the
//! maintainer and let it run:
//!
//! ```ignore
//! let gate = VersionGate::new();
//! let loader = Arc::new(RootDescriptorLoader::new(
//!     gate.clone(),
//!     RootCacheConfig::default(),
//! ));
//! let maintainer = ZoneSyncMaintainer::new(
//!     connector, // your directory protocol client
//!     gate,
//!     loader,
//!     store,     // your authoritative zone database
//!     watermarks,
//!     MaintainerConfig::default(),
//! );
//! maintainer.insert_zone(zone, endpoint, credentials);
//! tokio::spawn(maintainer.clone().run());
//! ```

pub mod directory;
pub mod record;
pub mod store;
pub mod sync;
pub mod usn;
pub mod version;
pub mod zone;

pub use self::record::{RecordCodec, RecordData, RecordType};
pub use self::usn::Usn;
pub use self::version::{BehaviorVersion, VersionGate};
pub use self::zone::{NodeName, ZoneIdentity};
