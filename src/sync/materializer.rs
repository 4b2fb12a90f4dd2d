//! Turning directory objects into zone node updates.
//!
//! One object in, one decision out: a node update, a reasoned skip, or a
//! per-object error. Errors here never abort a run; the session logs the
//! object, bumps a counter and moves on to the next one. The mapping from
//! attributes to fields is fixed; what varies per deployment is only the
//! record codec checking the blob attribute.

use core::fmt;

use std::sync::Arc;

use crate::directory::{
    DirectoryObject, ATTR_NODE_TOMBSTONED, ATTR_RECORD_DATA,
    ATTR_SECURITY_DESCRIPTOR, ATTR_USN_CHANGED, ATTR_WHEN_CHANGED,
    CLASS_DNS_NODE,
};
use crate::record::{RecordCodec, RecordDecodeError, WireRecordCodec};
use crate::usn::Usn;
use crate::zone::NodeName;

use super::types::{NodeContent, ZoneNodeUpdate};

//------------ SkipReason ----------------------------------------------------

/// Why an object was passed over without an update. Not an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The object is not a zone node.
    UnexpectedObjectClass,

    /// The object's change number predates the session's start
    /// watermark.
    StaleWatermark,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnexpectedObjectClass => {
                f.write_str("unexpected object class")
            }
            SkipReason::StaleWatermark => f.write_str("stale watermark"),
        }
    }
}

//------------ Materialized --------------------------------------------------

/// The outcome of materializing one object.
#[derive(Clone, Debug)]
pub enum Materialized {
    /// The object maps to this node update.
    Update(ZoneNodeUpdate),

    /// The object is deliberately not materialized.
    Skip(SkipReason),
}

//------------ MaterializeError ----------------------------------------------

/// One object could not be materialized.
///
/// Per-object and non-fatal: the session skips the object and continues
/// the page.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MaterializeError {
    /// The object's name could not be derived from its DN.
    MalformedName,

    /// A required attribute is absent or unreadable.
    MissingAttribute(&'static str),

    /// The record blob attribute failed the codec's validity check.
    AttributeDecode(RecordDecodeError),
}

impl From<RecordDecodeError> for MaterializeError {
    fn from(err: RecordDecodeError) -> Self {
        MaterializeError::AttributeDecode(err)
    }
}

impl fmt::Display for MaterializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterializeError::MalformedName => {
                write!(f, "Object name not derivable from its DN")
            }
            MaterializeError::MissingAttribute(attr) => {
                write!(f, "Missing required attribute {attr}")
            }
            MaterializeError::AttributeDecode(err) => {
                write!(f, "Record blob failed validity check: {err}")
            }
        }
    }
}

impl std::error::Error for MaterializeError {}

//------------ node_name_of --------------------------------------------------

/// Derives a node's owner name from its object's DN, when possible.
pub fn node_name_of(object: &DirectoryObject) -> Option<NodeName> {
    object.rdn_value().map(NodeName::new)
}

//------------ RecordMaterializer --------------------------------------------

/// Converts directory objects into independently owned node updates.
///
/// Stateless and idempotent per node: materializing the same object twice
/// yields equivalent updates, so re-application after a crash or a page
/// replay is safe.
#[derive(Clone, Debug)]
pub struct RecordMaterializer {
    codec: Arc<dyn RecordCodec>,
}

impl Default for RecordMaterializer {
    fn default() -> Self {
        RecordMaterializer {
            codec: Arc::new(WireRecordCodec),
        }
    }
}

impl RecordMaterializer {
    /// Creates a materializer using the default record codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a materializer using the given record codec.
    pub fn with_codec(codec: Arc<dyn RecordCodec>) -> Self {
        RecordMaterializer { codec }
    }

    /// Materializes one object.
    ///
    /// `start_watermark` is the session's defensive re-filter: objects
    /// with an older change number are skipped rather than re-applied.
    /// Full-load scans pass [`Usn::ZERO`] to disable the filter.
    pub fn materialize(
        &self,
        object: &DirectoryObject,
        start_watermark: Usn,
    ) -> Result<Materialized, MaterializeError> {
        if !object.has_class(CLASS_DNS_NODE) {
            return Ok(Materialized::Skip(
                SkipReason::UnexpectedObjectClass,
            ));
        }

        let node =
            node_name_of(object).ok_or(MaterializeError::MalformedName)?;

        let watermark = object
            .first_u64(ATTR_USN_CHANGED)
            .map(Usn::new)
            .ok_or(MaterializeError::MissingAttribute(ATTR_USN_CHANGED))?;
        if watermark < start_watermark {
            return Ok(Materialized::Skip(SkipReason::StaleWatermark));
        }

        let content = if object.first_bool(ATTR_NODE_TOMBSTONED)
            == Some(true)
        {
            let deleted_at =
                object.first_time(ATTR_WHEN_CHANGED).ok_or(
                    MaterializeError::MissingAttribute(ATTR_WHEN_CHANGED),
                )?;
            NodeContent::Tombstone { deleted_at }
        } else {
            let blobs = object.values(ATTR_RECORD_DATA);
            if blobs.is_empty() {
                return Err(MaterializeError::MissingAttribute(
                    ATTR_RECORD_DATA,
                ));
            }
            let records = blobs
                .iter()
                .map(|blob| self.codec.decode(blob))
                .collect::<Result<Vec<_>, _>>()?;
            NodeContent::Live(records)
        };

        Ok(Materialized::Update(ZoneNodeUpdate {
            node,
            content,
            watermark,
            security_descriptor: object
                .first(ATTR_SECURITY_DESCRIPTOR)
                .cloned(),
        }))
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::directory::ATTR_OBJECT_CLASS;
    use crate::record::test_support::mk_blob;
    use crate::record::RecordType;
    use bytes::Bytes;
    use rstest::rstest;

    fn live_node(name: &str, usn: u64) -> DirectoryObject {
        DirectoryObject::new(format!("DC={name},DC=example.com,CN=Zones"))
            .with_value(ATTR_OBJECT_CLASS, "top")
            .with_value(ATTR_OBJECT_CLASS, "dnsNode")
            .with_value(ATTR_USN_CHANGED, usn.to_string())
            .with_value(ATTR_RECORD_DATA, mk_blob(1, 300, &[192, 0, 2, 1]))
    }

    fn tombstoned_node(name: &str, usn: u64) -> DirectoryObject {
        DirectoryObject::new(format!("DC={name},DC=example.com,CN=Zones"))
            .with_value(ATTR_OBJECT_CLASS, "dnsNode")
            .with_value(ATTR_USN_CHANGED, usn.to_string())
            .with_value(ATTR_NODE_TOMBSTONED, "TRUE")
            .with_value(ATTR_WHEN_CHANGED, "20240301120000.0Z")
    }

    #[test]
    fn a_live_node_materializes_with_its_records() {
        let object = live_node("www", 42)
            .with_value(ATTR_SECURITY_DESCRIPTOR, &b"sd-blob"[..]);

        let materialized = RecordMaterializer::new()
            .materialize(&object, Usn::ZERO)
            .unwrap();
        let Materialized::Update(update) = materialized else {
            panic!("expected an update");
        };
        assert_eq!(update.node, NodeName::new("www"));
        assert_eq!(update.watermark, Usn::new(42));
        assert_eq!(
            update.security_descriptor,
            Some(Bytes::from_static(b"sd-blob"))
        );
        let NodeContent::Live(records) = update.content else {
            panic!("expected live content");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rtype, RecordType(1));
    }

    #[test]
    fn a_tombstoned_node_materializes_as_a_marker() {
        let update = match RecordMaterializer::new()
            .materialize(&tombstoned_node("gone", 50), Usn::ZERO)
            .unwrap()
        {
            Materialized::Update(update) => update,
            other => panic!("expected an update, got {other:?}"),
        };
        assert!(matches!(
            update.content,
            NodeContent::Tombstone { .. }
        ));
        assert_eq!(update.watermark, Usn::new(50));
    }

    #[rstest]
    #[case::foreign_class(
        DirectoryObject::new("CN=x")
            .with_value(ATTR_OBJECT_CLASS, "container"),
        SkipReason::UnexpectedObjectClass
    )]
    #[case::below_start(live_node("www", 3), SkipReason::StaleWatermark)]
    fn objects_outside_the_scan_are_skipped(
        #[case] object: DirectoryObject,
        #[case] reason: SkipReason,
    ) {
        let materialized = RecordMaterializer::new()
            .materialize(&object, Usn::new(4))
            .unwrap();
        assert!(
            matches!(materialized, Materialized::Skip(r) if r == reason)
        );
    }

    #[test]
    fn a_bad_record_blob_is_a_per_object_error() {
        let object = DirectoryObject::new("DC=www,DC=example.com")
            .with_value(ATTR_OBJECT_CLASS, "dnsNode")
            .with_value(ATTR_USN_CHANGED, "42")
            .with_value(ATTR_RECORD_DATA, &b"short"[..]);
        assert!(matches!(
            RecordMaterializer::new()
                .materialize(&object, Usn::ZERO)
                .unwrap_err(),
            MaterializeError::AttributeDecode(
                RecordDecodeError::Truncated
            )
        ));
    }

    #[rstest]
    #[case::no_change_number(
        DirectoryObject::new("DC=www,DC=example.com")
            .with_value(ATTR_OBJECT_CLASS, "dnsNode")
            .with_value(
                ATTR_RECORD_DATA,
                mk_blob(1, 300, &[192, 0, 2, 1])
            ),
        ATTR_USN_CHANGED
    )]
    #[case::no_records(
        DirectoryObject::new("DC=www,DC=example.com")
            .with_value(ATTR_OBJECT_CLASS, "dnsNode")
            .with_value(ATTR_USN_CHANGED, "42"),
        ATTR_RECORD_DATA
    )]
    #[case::tombstone_without_timestamp(
        DirectoryObject::new("DC=www,DC=example.com")
            .with_value(ATTR_OBJECT_CLASS, "dnsNode")
            .with_value(ATTR_USN_CHANGED, "42")
            .with_value(ATTR_NODE_TOMBSTONED, "TRUE"),
        ATTR_WHEN_CHANGED
    )]
    fn missing_required_attributes_are_per_object_errors(
        #[case] object: DirectoryObject,
        #[case] attr: &'static str,
    ) {
        assert_eq!(
            RecordMaterializer::new()
                .materialize(&object, Usn::ZERO)
                .unwrap_err(),
            MaterializeError::MissingAttribute(attr)
        );
    }

    #[test]
    fn the_apex_node_gets_the_apex_name() {
        let object = DirectoryObject::new("DC=@,DC=example.com,CN=Zones")
            .with_value(ATTR_OBJECT_CLASS, "dnsNode")
            .with_value(ATTR_USN_CHANGED, "7")
            .with_value(
                ATTR_RECORD_DATA,
                mk_blob(6, 3600, &[0, 1, 2, 3]),
            );
        let Materialized::Update(update) = RecordMaterializer::new()
            .materialize(&object, Usn::ZERO)
            .unwrap()
        else {
            panic!("expected an update");
        };
        assert!(update.node.is_apex());
    }
}
