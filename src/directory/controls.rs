//! Optional search controls.
//!
//! A control is an extension attached to an outgoing request that changes
//! how the server executes it. Controls are optional in two independent
//! ways: an endpoint may not advertise one at all, and even an advertised
//! control may be unsafe to use while any replication partner runs at a
//! feature level below the control's floor. The closed set below carries
//! both pieces of information so callers can gate attachment in one place.

use core::fmt;

use crate::version::BehaviorVersion;

//------------ SdParts -------------------------------------------------------

/// Which parts of a security descriptor to request inline.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SdParts {
    /// Owner and primary group only.
    OwnerGroup,

    /// The full descriptor including DACL and SACL.
    #[default]
    Full,
}

//------------ SearchControl -------------------------------------------------

/// An optional control attached to an outgoing search.
///
/// Deliberately a closed set of tagged variants rather than open-ended
/// flag bits; each variant knows its own gating floor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchControl {
    /// Allow the server to acknowledge writes before they are flushed.
    LazyCommit,

    /// Confine the search to the contacted server, suppressing referrals.
    NoReferral,

    /// Return (parts of) each object's security descriptor inline.
    SecurityDescriptorInclusion(SdParts),
}

impl SearchControl {
    /// Returns the kind of this control, dropping any variant payload.
    pub fn kind(&self) -> ControlKind {
        match self {
            SearchControl::LazyCommit => ControlKind::LazyCommit,
            SearchControl::NoReferral => ControlKind::NoReferral,
            SearchControl::SecurityDescriptorInclusion(_) => {
                ControlKind::SecurityDescriptorInclusion
            }
        }
    }

    /// Returns the feature level every contacted replication partner must
    /// report before this control may be attached.
    pub fn required_floor(&self) -> BehaviorVersion {
        self.kind().required_floor()
    }
}

//------------ ControlKind ---------------------------------------------------

/// The kind of a control, independent of any per-variant payload.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ControlKind {
    LazyCommit,
    NoReferral,
    SecurityDescriptorInclusion,
}

impl ControlKind {
    /// All recognized kinds.
    pub const ALL: [ControlKind; 3] = [
        ControlKind::LazyCommit,
        ControlKind::NoReferral,
        ControlKind::SecurityDescriptorInclusion,
    ];

    /// Returns the object identifier the endpoint advertises for this
    /// control.
    pub fn oid(self) -> &'static str {
        match self {
            ControlKind::LazyCommit => "1.2.840.113556.1.4.619",
            ControlKind::NoReferral => "1.2.840.113556.1.4.1339",
            ControlKind::SecurityDescriptorInclusion => {
                "1.2.840.113556.1.4.801"
            }
        }
    }

    /// Returns the kind advertised under the given object identifier.
    pub fn from_oid(oid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.oid() == oid)
    }

    /// Returns the gating floor for this kind.
    ///
    /// Floors are ordinal feature levels, not protocol revisions: a
    /// server can speak the control wire format while its replication
    /// partners cannot yet tolerate the side effects.
    pub fn required_floor(self) -> BehaviorVersion {
        match self {
            ControlKind::NoReferral => BehaviorVersion::new(0),
            ControlKind::LazyCommit => BehaviorVersion::new(1),
            ControlKind::SecurityDescriptorInclusion => {
                BehaviorVersion::new(2)
            }
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKind::LazyCommit => f.write_str("lazy-commit"),
            ControlKind::NoReferral => f.write_str("no-referral"),
            ControlKind::SecurityDescriptorInclusion => {
                f.write_str("security-descriptor-inclusion")
            }
        }
    }
}

//============ Testing =======================================================
