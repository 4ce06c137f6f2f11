//! Strongly-typed identifiers.
//!
//! `Id<T>` wraps a ULID and carries a zero-sized marker so a call id can
//! never be mixed up with a broker id. ULIDs need no coordination, which
//! matters here: ids are minted in whichever worker (thread or forked
//! process) happens to need one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait supplying the display prefix of an id kind.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Synchronous call correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Call {}

impl IdMarker for Call {
    fn prefix() -> &'static str {
        "call-"
    }
}

/// Queue broker instance (one per process that creates queues).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Broker {}

impl IdMarker for Broker {
    fn prefix() -> &'static str {
        "broker-"
    }
}

/// Correlates a `call_sync` request with its reply.
pub type CallId = Id<Call>;

pub type BrokerId = Id<Broker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        let call = CallId::generate();
        let broker = BrokerId::generate();
        assert!(call.to_string().starts_with("call-"));
        assert!(broker.to_string().starts_with("broker-"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = CallId::generate();
        let b = CallId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn call_ids_survive_the_wire() {
        let id = CallId::generate();
        let text = serde_json::to_string(&id).unwrap();
        let back: CallId = serde_json::from_str(&text).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn phantom_marker_is_free() {
        assert_eq!(std::mem::size_of::<CallId>(), std::mem::size_of::<Ulid>());
    }
}
