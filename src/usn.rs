//! Update sequence numbers.
//!
//! Directory servers stamp every object modification with a per-server,
//! monotonically increasing change counter. Synchronization uses these
//! counters as watermarks: "give me everything that changed at or after
//! number X." This module provides the type [`Usn`] wrapping such a
//! counter.
//!
//! Unlike DNS serial numbers, update sequence numbers do not wrap: they
//! are 64 bits wide and a server never reissues a smaller value. A value
//! observed to run backwards therefore indicates a restored or rolled-back
//! server, which callers must treat as a consistency failure rather than
//! as ordinary wrap-around.

use core::fmt;
use core::str::FromStr;

//------------ Usn -----------------------------------------------------------

/// An update sequence number.
///
/// Update sequence numbers order the modifications a single directory
/// server has committed. They are totally ordered and never wrap, so the
/// type simply derives [`Ord`]. There is deliberately no `impl Add`:
/// sequence numbers are assigned by the directory server, never computed
/// by a consumer. The one arithmetic operation a consumer legitimately
/// needs is [`saturating_back`][Self::saturating_back], used to apply an
/// allowed skew when checking for regressions.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Usn(u64);

impl Usn {
    /// The zero watermark, predating every committed change.
    pub const ZERO: Usn = Usn(0);

    /// Creates a sequence number from its raw integer value.
    pub const fn new(value: u64) -> Self {
        Usn(value)
    }

    /// Returns the sequence number as a raw integer.
    pub const fn into_int(self) -> u64 {
        self.0
    }

    /// Returns this sequence number moved back by `skew`, stopping at zero.
    pub const fn saturating_back(self, skew: u64) -> Self {
        Usn(self.0.saturating_sub(skew))
    }

    /// Returns the larger of `self` and `other`.
    pub fn max_with(self, other: Usn) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

//--- From and FromStr

impl From<u64> for Usn {
    fn from(value: u64) -> Self {
        Usn(value)
    }
}

impl From<Usn> for u64 {
    fn from(usn: Usn) -> Self {
        usn.0
    }
}

impl FromStr for Usn {
    type Err = <u64 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(Usn)
    }
}

//--- Display

impl fmt::Display for Usn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//============ Testing =======================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordering_is_total_and_unwrapped() {
        assert!(Usn::ZERO < Usn::new(1));
        assert!(Usn::new(u64::MAX) > Usn::new(u64::MAX - 1));
        assert_eq!(Usn::new(7), Usn::new(7));
    }

    #[test]
    fn saturating_back_stops_at_zero() {
        assert_eq!(Usn::new(10).saturating_back(3), Usn::new(7));
        assert_eq!(Usn::new(2).saturating_back(5), Usn::ZERO);
    }

    #[test]
    fn max_with_keeps_the_larger_value() {
        let mut highest = Usn::new(4);
        highest = highest.max_with(Usn::new(9));
        highest = highest.max_with(Usn::new(6));
        assert_eq!(highest, Usn::new(9));
    }

    #[test]
    fn parses_from_decimal_text() {
        assert_eq!(Usn::from_str("12345").unwrap(), Usn::new(12345));
        assert!(Usn::from_str("twelve").is_err());
    }
}
