//! Talking to the directory service.
//!
//! The wire protocol itself — connection establishment, authentication,
//! message framing, paging mechanics — is an external collaborator,
//! consumed through the [`DirectoryConnector`] and [`DirectoryConn`]
//! traits. This module owns everything layered directly on top of that
//! seam: bound sessions with operation deadlines, search requests and
//! result pages, the closed set of optional controls, and the root
//! descriptor an endpoint is addressed through.
//!
//! [`DirectoryConnector`]: session::DirectoryConnector
//! [`DirectoryConn`]: session::DirectoryConn

pub mod controls;
pub mod error;
pub mod rootdse;
pub mod search;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use self::controls::{ControlKind, SdParts, SearchControl};
pub use self::error::DirectoryError;
pub use self::rootdse::{
    RootCacheConfig, RootDescriptor, RootDescriptorLoader,
};
pub use self::search::{
    DirectoryObject, PageCursor, SearchPage, SearchRequest, SearchScope,
};
pub use self::session::{
    Credentials, DirectoryConn, DirectoryConnector, DirectorySession,
    Endpoint, SessionConfig,
};

//------------ Well-known attribute names ------------------------------------

// Object attributes consumed by zone materialization.
pub const ATTR_OBJECT_CLASS: &str = "objectClass";
pub const ATTR_USN_CHANGED: &str = "uSNChanged";
pub const ATTR_WHEN_CREATED: &str = "whenCreated";
pub const ATTR_WHEN_CHANGED: &str = "whenChanged";
pub const ATTR_RECORD_DATA: &str = "dnsRecord";
pub const ATTR_SECURITY_DESCRIPTOR: &str = "nTSecurityDescriptor";
pub const ATTR_NODE_TOMBSTONED: &str = "dNSTombstoned";

// Root entry attributes.
pub const ATTR_SERVER_IDENTITY: &str = "dnsHostName";
pub const ATTR_NAMING_CONTEXTS: &str = "namingContexts";
pub const ATTR_SCHEMA_CONTEXT: &str = "schemaNamingContext";
pub const ATTR_CONFIG_CONTEXT: &str = "configurationNamingContext";
pub const ATTR_DEFAULT_CONTEXT: &str = "defaultNamingContext";
pub const ATTR_HIGHEST_COMMITTED_USN: &str = "highestCommittedUSN";
pub const ATTR_SUPPORTED_PROTOCOL_VERSION: &str = "supportedLDAPVersion";
pub const ATTR_SUPPORTED_CONTROL: &str = "supportedControl";
pub const ATTR_FOREST_VERSION: &str = "forestFunctionality";
pub const ATTR_DOMAIN_VERSION: &str = "domainFunctionality";
pub const ATTR_SERVER_VERSION: &str = "domainControllerFunctionality";

// Configuration partition attributes.
pub const ATTR_TOMBSTONE_LIFETIME: &str = "tombstoneLifetime";

/// The object class of zone node objects.
pub const CLASS_DNS_NODE: &str = "dnsNode";
