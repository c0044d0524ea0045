//! Type-safe forwarding table identifiers.
//!
//! Service IDs and backend IDs are both small integers keyed into the
//! forwarding table. The phantom kind parameter keeps them apart at
//! compile time, so a backend ID can never be written where a service ID
//! is expected.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw table identifier (16-bit ID space).
pub type RawLbId = u16;

/// Marker trait for identifier kinds.
pub trait LbIdKind: Send + Sync + 'static {
    /// Returns the kind name for debugging.
    fn kind_name() -> &'static str;
}

/// A type-safe forwarding table identifier.
///
/// ID 0 is reserved as the "no ID assigned" sentinel and is never handed
/// out by the allocators.
///
/// ```
/// use lb_map::{BackendId, ServiceId};
///
/// let svc = ServiceId::from_raw(1).unwrap();
/// let be = BackendId::from_raw(1).unwrap();
/// assert_eq!(svc.as_raw(), be.as_raw());
///
/// // Different kinds do not compare:
/// // assert_eq!(svc, be); // error: expected ServiceId, found BackendId
/// assert!(ServiceId::from_raw(0).is_none());
/// ```
pub struct LbId<K: LbIdKind> {
    raw: RawLbId,
    _marker: PhantomData<K>,
}

impl<K: LbIdKind> LbId<K> {
    /// The reserved null ID.
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Creates an ID from a raw value.
    ///
    /// Returns `None` for the reserved value 0.
    pub fn from_raw(raw: RawLbId) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Returns the raw ID value.
    pub const fn as_raw(&self) -> RawLbId {
        self.raw
    }

    /// Returns true if this is the reserved null ID.
    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }
}

impl<K: LbIdKind> Clone for LbId<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: LbIdKind> Copy for LbId<K> {}

impl<K: LbIdKind> fmt::Debug for LbId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", K::kind_name(), self.raw)
    }
}

impl<K: LbIdKind> fmt::Display for LbId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl<K: LbIdKind> PartialEq for LbId<K> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<K: LbIdKind> Eq for LbId<K> {}

impl<K: LbIdKind> PartialOrd for LbId<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: LbIdKind> Ord for LbId<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<K: LbIdKind> Hash for LbId<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<K: LbIdKind> Default for LbId<K> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<K: LbIdKind> Serialize for LbId<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.raw)
    }
}

macro_rules! define_id_kind {
    ($name:ident, $kind_name:literal, $id_alias:ident) => {
        #[doc = concat!("Marker type for ", $kind_name, " identifiers.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl LbIdKind for $name {
            fn kind_name() -> &'static str {
                $kind_name
            }
        }

        #[doc = concat!("Identifier of a ", $kind_name, " record.")]
        pub type $id_alias = LbId<$name>;
    };
}

define_id_kind!(ServiceKind, "Service", ServiceId);
define_id_kind!(BackendKind, "Backend", BackendId);
