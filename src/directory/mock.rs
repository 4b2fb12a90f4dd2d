//! A scripted in-memory directory for tests.
//!
//! Searches are answered from a queue of prepared pages (or errors) in
//! order; entry reads are answered from a DN-keyed map. Every search call
//! is logged so tests can assert on the filters and controls the engine
//! actually sent.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::DirectoryError;
use super::search::{
    DirectoryObject, PageCursor, SearchPage, SearchRequest,
};
use super::session::{
    BindFut, Credentials, DirectoryConn, DirectoryConnector, Endpoint,
    EntryFut, PageFut, UnbindFut,
};
use super::{
    ATTR_CONFIG_CONTEXT, ATTR_DEFAULT_CONTEXT, ATTR_DOMAIN_VERSION,
    ATTR_FOREST_VERSION, ATTR_HIGHEST_COMMITTED_USN, ATTR_NAMING_CONTEXTS,
    ATTR_SCHEMA_CONTEXT, ATTR_SERVER_IDENTITY, ATTR_SERVER_VERSION,
    ATTR_SUPPORTED_CONTROL, ATTR_SUPPORTED_PROTOCOL_VERSION,
};

//------------ MockDirectory -------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct MockDirectory {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<String, DirectoryObject>>,
    pages: Mutex<VecDeque<Result<SearchPage, DirectoryError>>>,
    search_log: Mutex<Vec<(SearchRequest, bool)>>,
    root_reads: AtomicUsize,
    binds: AtomicUsize,
    bind_errors: Mutex<VecDeque<DirectoryError>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves the given object for reads of its DN.
    pub fn set_entry(&self, entry: DirectoryObject) {
        self.inner
            .entries
            .lock()
            .insert(entry.dn().to_string(), entry);
    }

    /// Serves the given object as the root entry.
    ///
    /// The object must have been built with an empty DN, as
    /// [`usable_root_entry()`] does.
    pub fn set_root(&self, entry: DirectoryObject) {
        self.inner.entries.lock().insert(String::new(), entry);
    }

    /// Queues the pages of one search, wiring continuation cursors.
    pub fn push_pages(&self, pages: Vec<Vec<DirectoryObject>>) {
        let mut queue = self.inner.pages.lock();
        let last = pages.len().saturating_sub(1);
        for (i, objects) in pages.into_iter().enumerate() {
            let cursor = if i < last {
                Some(PageCursor::new(&b"continue"[..]))
            } else {
                None
            };
            queue.push_back(Ok(SearchPage { objects, cursor }));
        }
    }

    /// Queues pages that all carry a continuation cursor, for scripts
    /// that end in an error or in later pushes.
    pub fn push_open_pages(&self, pages: Vec<Vec<DirectoryObject>>) {
        let mut queue = self.inner.pages.lock();
        for objects in pages {
            queue.push_back(Ok(SearchPage {
                objects,
                cursor: Some(PageCursor::new(&b"continue"[..])),
            }));
        }
    }

    /// Queues a search failure.
    pub fn push_search_error(&self, err: DirectoryError) {
        self.inner.pages.lock().push_back(Err(err));
    }

    /// Queues a bind failure for the next bind attempt.
    pub fn push_bind_error(&self, err: DirectoryError) {
        self.inner.bind_errors.lock().push_back(err);
    }

    /// Returns all logged search calls as (request, was continuation).
    pub fn searches(&self) -> Vec<(SearchRequest, bool)> {
        self.inner.search_log.lock().clone()
    }

    /// Returns how often the root entry was read.
    pub fn root_read_count(&self) -> usize {
        self.inner.root_reads.load(Ordering::Relaxed)
    }

    /// Returns how often a bind was attempted.
    pub fn bind_count(&self) -> usize {
        self.inner.binds.load(Ordering::Relaxed)
    }
}

//--- DirectoryConnector

impl DirectoryConnector for MockDirectory {
    fn bind<'a>(
        &'a self,
        _endpoint: &'a Endpoint,
        _credentials: &'a Credentials,
        _time_limit: core::time::Duration,
    ) -> BindFut<'a> {
        Box::pin(async move {
            self.inner.binds.fetch_add(1, Ordering::Relaxed);
            if let Some(err) = self.inner.bind_errors.lock().pop_front() {
                return Err(err);
            }
            Ok(Box::new(self.clone()) as Box<dyn DirectoryConn>)
        })
    }
}

//--- DirectoryConn

impl DirectoryConn for MockDirectory {
    fn search_page<'a>(
        &'a self,
        request: &'a SearchRequest,
        cursor: Option<PageCursor>,
    ) -> PageFut<'a> {
        Box::pin(async move {
            self.inner
                .search_log
                .lock()
                .push((request.clone(), cursor.is_some()));
            self.inner
                .pages
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(SearchPage::default()))
        })
    }

    fn read_entry<'a>(
        &'a self,
        dn: &'a str,
        _attrs: &'a [&'static str],
    ) -> EntryFut<'a> {
        Box::pin(async move {
            if dn.is_empty() {
                self.inner.root_reads.fetch_add(1, Ordering::Relaxed);
            }
            Ok(self.inner.entries.lock().get(dn).cloned())
        })
    }

    fn unbind<'a>(&'a self) -> UnbindFut<'a> {
        Box::pin(async {})
    }
}

//------------ Canned entries ------------------------------------------------

/// A root entry advertising everything the loader requires, with all
/// feature levels at the given ordinal.
pub fn usable_root_entry_at(host: &str, level: u32) -> DirectoryObject {
    let config = "CN=Configuration,DC=example,DC=com";
    let schema = "CN=Schema,CN=Configuration,DC=example,DC=com";
    let domain = "DC=example,DC=com";
    DirectoryObject::new("")
        .with_value(ATTR_SERVER_IDENTITY, host.to_string())
        .with_value(ATTR_NAMING_CONTEXTS, domain)
        .with_value(ATTR_NAMING_CONTEXTS, config)
        .with_value(ATTR_NAMING_CONTEXTS, schema)
        .with_value(ATTR_SCHEMA_CONTEXT, schema)
        .with_value(ATTR_CONFIG_CONTEXT, config)
        .with_value(ATTR_DEFAULT_CONTEXT, domain)
        .with_value(ATTR_HIGHEST_COMMITTED_USN, "1000")
        .with_value(ATTR_SUPPORTED_PROTOCOL_VERSION, "2")
        .with_value(ATTR_SUPPORTED_PROTOCOL_VERSION, "3")
        .with_value(ATTR_SUPPORTED_CONTROL, "1.2.840.113556.1.4.619")
        .with_value(ATTR_SUPPORTED_CONTROL, "1.2.840.113556.1.4.1339")
        .with_value(ATTR_SUPPORTED_CONTROL, "1.2.840.113556.1.4.801")
        .with_value(ATTR_FOREST_VERSION, level.to_string())
        .with_value(ATTR_DOMAIN_VERSION, level.to_string())
        .with_value(ATTR_SERVER_VERSION, level.to_string())
}

/// A root entry with all feature levels high enough for every control.
pub fn usable_root_entry(host: &str) -> DirectoryObject {
    usable_root_entry_at(host, 2)
}
