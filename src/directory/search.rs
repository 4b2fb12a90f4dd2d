//! Paged searches and their results.
//!
//! The engine consumes the directory protocol as a "paged query"
//! capability: a search request goes out, one bounded page of objects and
//! possibly a continuation cursor come back. The types here are the
//! vocabulary of that exchange. The cursor is deliberately opaque; the
//! synchronization logic may only ask whether one is present.

use core::fmt;
use core::time::Duration;

use std::collections::HashMap;

use bytes::Bytes;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use super::controls::SearchControl;

//------------ SearchScope ---------------------------------------------------

/// How far below the base entry a search extends.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SearchScope {
    /// The base entry only.
    Base,

    /// The base entry and its whole subtree.
    #[default]
    Subtree,
}

//------------ SearchRequest -------------------------------------------------

/// One paged search as handed to the directory client.
#[derive(Clone, Debug)]
pub struct SearchRequest {
    /// Distinguished name of the entry the search starts at.
    pub base_dn: String,

    /// Search scope.
    pub scope: SearchScope,

    /// Filter expression in string representation.
    pub filter: String,

    /// The attributes to return for each object.
    pub attrs: Vec<&'static str>,

    /// Maximum number of objects per returned page.
    pub page_size: usize,

    /// Server-side time limit for producing one page.
    pub time_limit: Duration,

    /// Optional controls attached to the request.
    pub controls: Vec<SearchControl>,

    /// Whether tombstoned objects are visible to this search.
    pub include_tombstoned: bool,
}

impl SearchRequest {
    /// Creates a request with the given addressing and default knobs.
    pub fn new(
        base_dn: impl Into<String>,
        scope: SearchScope,
        filter: impl Into<String>,
    ) -> Self {
        SearchRequest {
            base_dn: base_dn.into(),
            scope,
            filter: filter.into(),
            attrs: Vec::new(),
            page_size: 256,
            time_limit: Duration::from_secs(120),
            controls: Vec::new(),
            include_tombstoned: false,
        }
    }

    /// Returns whether a control of the given kind is attached.
    pub fn has_control(
        &self,
        kind: super::controls::ControlKind,
    ) -> bool {
        self.controls.iter().any(|c| c.kind() == kind)
    }
}

//------------ PageCursor ----------------------------------------------------

/// The continuation cursor of a paged search.
///
/// Cursors are produced by the directory client, handed back verbatim on
/// the next page request and valid exactly once. Consuming the cursor to
/// look inside ([`into_bytes()`]) is reserved to client implementations;
/// the synchronization logic only ever checks presence.
///
/// [`into_bytes()`]: PageCursor::into_bytes()
#[derive(Clone)]
pub struct PageCursor(Bytes);

impl PageCursor {
    /// Creates a cursor from the client's continuation token.
    pub fn new(token: impl Into<Bytes>) -> Self {
        PageCursor(token.into())
    }

    /// Consumes the cursor, yielding the raw continuation token.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageCursor({} bytes)", self.0.len())
    }
}

//------------ DirectoryObject -----------------------------------------------

/// One object returned by a search.
///
/// Attribute names are case-insensitive in the directory; they are
/// canonicalized to ASCII lowercase on insertion and lookup so consumers
/// never have to care.
#[derive(Clone, Debug, Default)]
pub struct DirectoryObject {
    dn: String,
    attributes: HashMap<String, Vec<Bytes>>,
}

impl DirectoryObject {
    /// Creates an object with the given distinguished name.
    pub fn new(dn: impl Into<String>) -> Self {
        DirectoryObject {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Adds a value to an attribute, creating the attribute if needed.
    pub fn push_value(
        &mut self,
        attr: impl AsRef<str>,
        value: impl Into<Bytes>,
    ) {
        self.attributes
            .entry(attr.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Builder-style variant of [`push_value()`][Self::push_value()].
    pub fn with_value(
        mut self,
        attr: impl AsRef<str>,
        value: impl Into<Bytes>,
    ) -> Self {
        self.push_value(attr, value);
        self
    }

    /// Returns the distinguished name of the object.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Returns the value of the first (often only) relative distinguished
    /// name component, i.e. the object's own name within its container.
    pub fn rdn_value(&self) -> Option<&str> {
        let first = self.dn.split(',').next()?;
        let (_, value) = first.split_once('=')?;
        Some(value.trim())
    }

    /// Returns all values of an attribute, empty if absent.
    pub fn values(&self, attr: &str) -> &[Bytes] {
        self.attributes
            .get(&attr.to_ascii_lowercase())
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the first value of an attribute.
    pub fn first(&self, attr: &str) -> Option<&Bytes> {
        self.values(attr).first()
    }

    /// Returns the first value of an attribute as UTF-8 text.
    pub fn first_str(&self, attr: &str) -> Option<&str> {
        self.first(attr)
            .and_then(|value| core::str::from_utf8(value).ok())
    }

    /// Returns the first value of an attribute parsed as a decimal
    /// integer.
    pub fn first_u64(&self, attr: &str) -> Option<u64> {
        self.first_str(attr).and_then(|s| s.trim().parse().ok())
    }

    /// Returns the first value of an attribute parsed as a directory
    /// boolean (`TRUE`/`FALSE`).
    pub fn first_bool(&self, attr: &str) -> Option<bool> {
        match self.first_str(attr)?.trim() {
            "TRUE" => Some(true),
            "FALSE" => Some(false),
            _ => None,
        }
    }

    /// Returns the first value of an attribute parsed as a generalized
    /// time stamp.
    ///
    /// Absent and malformed values both yield `None`; the distinction
    /// does not matter to callers, which treat either as the attribute
    /// being unusable.
    pub fn first_time(&self, attr: &str) -> Option<OffsetDateTime> {
        parse_generalized_time(self.first(attr)?)
    }

    /// Returns whether the object carries the given object class value.
    pub fn has_class(&self, class: &str) -> bool {
        self.values(super::ATTR_OBJECT_CLASS).iter().any(|value| {
            core::str::from_utf8(value)
                .map(|s| s.eq_ignore_ascii_case(class))
                .unwrap_or(false)
        })
    }
}

//------------ SearchPage ----------------------------------------------------

/// One page of search results.
#[derive(Debug, Default)]
pub struct SearchPage {
    /// The objects on this page, in server order.
    pub objects: Vec<DirectoryObject>,

    /// Continuation cursor; `None` means the search is exhausted.
    pub cursor: Option<PageCursor>,
}

//------------ Generalized time ----------------------------------------------

/// Parses a generalized time value (`YYYYMMDDHHMMSS`, optionally followed
/// by a fraction and `Z`) into a UTC timestamp.
pub fn parse_generalized_time(value: &[u8]) -> Option<OffsetDateTime> {
    if value.len() < 14 {
        return None;
    }
    let mut digits = [0u8; 14];
    for (i, b) in value[..14].iter().enumerate() {
        digits[i] = (*b as char).to_digit(10)? as u8;
    }
    let num =
        |range: core::ops::Range<usize>| -> i32 {
            digits[range].iter().fold(0i32, |acc, d| {
                acc * 10 + i32::from(*d)
            })
        };
    let year = num(0..4);
    let month = Month::try_from(num(4..6) as u8).ok()?;
    let date = Date::from_calendar_date(year, month, num(6..8) as u8)
        .ok()?;
    let time = Time::from_hms(
        num(8..10) as u8,
        num(10..12) as u8,
        num(12..14) as u8,
    )
    .ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

/// Formats a UTC timestamp as a generalized time value suitable for use
/// inside a filter expression.
pub fn format_generalized_time(when: OffsetDateTime) -> String {
    let when = when.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}.0Z",
        when.year(),
        u8::from(when.month()),
        when.day(),
        when.hour(),
        when.minute(),
        when.second()
    )
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        let obj = DirectoryObject::new("DC=www,DC=example.com")
            .with_value("uSNChanged", "42");
        assert_eq!(obj.first_u64("usnchanged"), Some(42));
        assert_eq!(obj.first_u64("USNCHANGED"), Some(42));
        assert_eq!(obj.first_u64("usnCreated"), None);
    }

    #[test]
    fn rdn_value_takes_the_leading_component() {
        let obj = DirectoryObject::new(
            "DC=www,DC=example.com,CN=Zones",
        );
        assert_eq!(obj.rdn_value(), Some("www"));
        assert_eq!(DirectoryObject::new("nonsense").rdn_value(), None);
    }

    #[test]
    fn booleans_use_directory_spelling() {
        let obj = DirectoryObject::new("DC=x")
            .with_value("a", "TRUE")
            .with_value("b", "FALSE")
            .with_value("c", "yes");
        assert_eq!(obj.first_bool("a"), Some(true));
        assert_eq!(obj.first_bool("b"), Some(false));
        assert_eq!(obj.first_bool("c"), None);
    }

    #[test]
    fn generalized_time_round_trips() {
        let when = datetime!(2024-03-07 15:04:05 UTC);
        let text = format_generalized_time(when);
        assert_eq!(text, "20240307150405.0Z");
        assert_eq!(
            parse_generalized_time(text.as_bytes()),
            Some(when)
        );
    }

    #[test]
    fn malformed_generalized_time_is_rejected() {
        assert_eq!(parse_generalized_time(b"2024"), None);
        assert_eq!(parse_generalized_time(b"2024130715040.0Z"), None);
        assert_eq!(parse_generalized_time(b"20241307150405.0Z"), None);
    }

    #[test]
    fn cursor_consumes_to_its_token() {
        let cursor = PageCursor::new(&b"opaque"[..]);
        assert_eq!(format!("{cursor:?}"), "PageCursor(6 bytes)");
        assert_eq!(cursor.into_bytes().as_ref(), b"opaque");
    }
}
