//! Directory endpoints, credentials and bound sessions.
//!
//! Establishing and speaking the wire protocol is the job of an injected
//! [`DirectoryConnector`] implementation. What this module owns is the
//! session wrapper every other component talks to: it carries the
//! operation time limit, enforces it with an absolute deadline per call,
//! and remembers which optional controls the endpoint advertised.

use core::time::Duration;

use std::collections::HashSet;
use std::fmt::Debug;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tracing::debug;

use super::controls::ControlKind;
use super::error::DirectoryError;
use super::rootdse::RootDescriptor;
use super::search::{DirectoryObject, PageCursor, SearchPage, SearchRequest};

//------------ Endpoint ------------------------------------------------------

/// The network address of one directory server.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// The conventional directory service port.
    pub const DEFAULT_PORT: u16 = 389;

    /// Creates an endpoint for the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port number.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<(&str, u16)> for Endpoint {
    fn from((host, port): (&str, u16)) -> Self {
        Endpoint::new(host, port)
    }
}

//------------ Credentials ---------------------------------------------------

/// Credentials for authenticating a bind.
///
/// The secret never appears in debug output.
#[derive(Clone)]
pub struct Credentials {
    principal: String,
    secret: String,
}

impl Credentials {
    /// Creates credentials for the given principal.
    pub fn new(
        principal: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Credentials {
            principal: principal.into(),
            secret: secret.into(),
        }
    }

    /// Returns the principal name.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Returns the secret.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

//------------ DirectoryConnector / DirectoryConn ----------------------------

pub type BindFut<'a> =
    BoxFuture<'a, Result<Box<dyn DirectoryConn>, DirectoryError>>;

pub type PageFut<'a> = BoxFuture<'a, Result<SearchPage, DirectoryError>>;

pub type EntryFut<'a> =
    BoxFuture<'a, Result<Option<DirectoryObject>, DirectoryError>>;

pub type UnbindFut<'a> = BoxFuture<'a, ()>;

/// The consumed capability of establishing directory connections.
pub trait DirectoryConnector: Debug + Send + Sync {
    /// Establishes an authenticated connection to the endpoint.
    fn bind<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        credentials: &'a Credentials,
        time_limit: Duration,
    ) -> BindFut<'a>;
}

/// The consumed capability of one established connection.
///
/// Implementations own connection establishment, message framing and the
/// paging continuation mechanics; the engine only sees pages and opaque
/// cursors.
pub trait DirectoryConn: Debug + Send + Sync {
    /// Fetches one page of results for the request.
    ///
    /// Passing the cursor returned by the previous call continues that
    /// search; cursors are single-use and not restartable.
    fn search_page<'a>(
        &'a self,
        request: &'a SearchRequest,
        cursor: Option<PageCursor>,
    ) -> PageFut<'a>;

    /// Reads a single entry by distinguished name.
    fn read_entry<'a>(
        &'a self,
        dn: &'a str,
        attrs: &'a [&'static str],
    ) -> EntryFut<'a>;

    /// Releases the connection.
    fn unbind<'a>(&'a self) -> UnbindFut<'a>;
}

//------------ SessionConfig -------------------------------------------------

/// Knobs of a [`DirectorySession`].
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Absolute deadline applied to every single directory operation.
    ///
    /// Exceeding it fails the operation with [`DirectoryError::Timeout`],
    /// not a protocol error.
    pub op_time_limit: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            op_time_limit: Duration::from_secs(120),
        }
    }
}

//------------ DirectorySession ----------------------------------------------

/// A handle to an established, authenticated connection to one endpoint.
///
/// Carries the per-operation time limit and the set of optional controls
/// the endpoint advertised (populated by the root descriptor loader).
#[derive(Debug)]
pub struct DirectorySession {
    endpoint: Endpoint,
    conn: Box<dyn DirectoryConn>,
    config: SessionConfig,
    advertised_controls: RwLock<HashSet<ControlKind>>,
}

impl DirectorySession {
    /// Binds to the endpoint through the given connector.
    pub async fn establish(
        connector: &dyn DirectoryConnector,
        endpoint: Endpoint,
        credentials: &Credentials,
        config: SessionConfig,
    ) -> Result<Self, DirectoryError> {
        let conn = connector
            .bind(&endpoint, credentials, config.op_time_limit)
            .await?;
        debug!(%endpoint, "directory session established");
        Ok(DirectorySession {
            endpoint,
            conn,
            config,
            advertised_controls: RwLock::new(HashSet::new()),
        })
    }

    /// Wraps an already established connection.
    pub fn from_conn(
        endpoint: Endpoint,
        conn: Box<dyn DirectoryConn>,
        config: SessionConfig,
    ) -> Self {
        DirectorySession {
            endpoint,
            conn,
            config,
            advertised_controls: RwLock::new(HashSet::new()),
        }
    }

    /// Returns the endpoint this session is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Records the controls the endpoint advertises.
    ///
    /// Called by the root descriptor loader once the descriptor is known.
    pub fn negotiate(&self, root: &RootDescriptor) {
        let mut advertised = self.advertised_controls.write();
        advertised.clear();
        advertised.extend(root.advertised_controls());
    }

    /// Returns whether the endpoint advertised the given control.
    pub fn advertises(&self, kind: ControlKind) -> bool {
        self.advertised_controls.read().contains(&kind)
    }

    /// Fetches one page, enforcing the per-operation time limit.
    pub async fn search_page(
        &self,
        request: &SearchRequest,
        cursor: Option<PageCursor>,
    ) -> Result<SearchPage, DirectoryError> {
        tokio::time::timeout(
            self.config.op_time_limit,
            self.conn.search_page(request, cursor),
        )
        .await
        .unwrap_or(Err(DirectoryError::Timeout))
    }

    /// Reads a single entry, enforcing the per-operation time limit.
    pub async fn read_entry(
        &self,
        dn: &str,
        attrs: &[&'static str],
    ) -> Result<Option<DirectoryObject>, DirectoryError> {
        tokio::time::timeout(
            self.config.op_time_limit,
            self.conn.read_entry(dn, attrs),
        )
        .await
        .unwrap_or(Err(DirectoryError::Timeout))
    }

    /// Releases the underlying connection.
    pub async fn unbind(&self) {
        self.conn.unbind().await;
    }
}

//============ Testing =======================================================
