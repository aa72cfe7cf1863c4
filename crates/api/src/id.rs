//! Types naming the resources a fetch targets.

use std::sync::Arc;

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

macro_rules! imp_display {
    ($i:ty) => {
        impl std::fmt::Display for $i {
            fn fmt(
                &self,
                f: &mut std::fmt::Formatter<'_>,
            ) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::fmt::Debug for $i {
            fn fmt(
                &self,
                f: &mut std::fmt::Formatter<'_>,
            ) -> std::fmt::Result {
                f.debug_tuple(stringify!($i)).field(&&*self.0).finish()
            }
        }
    };
}

/// Names the resource a single fetch targets, for example the id of one
/// element of a parent collection.
///
/// Keys are compared by value and are cheap to clone. Integer ids coming
/// from the remote service are rendered as decimal strings, so `42_u64`
/// and `"42"` name the same resource.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct RequestKey(pub Arc<str>);

imp_deref!(RequestKey, str);
imp_display!(RequestKey);
imp_from!(RequestKey, &str, s => RequestKey(s.into()));
imp_from!(RequestKey, String, s => RequestKey(s.into_boxed_str().into()));
imp_from!(RequestKey, u64, n => RequestKey::from(n.to_string()));
imp_from!(RequestKey, i64, n => RequestKey::from(n.to_string()));

/// Names a parent collection served by a gateway, such as `photosets`
/// or `store`.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct CollectionId(pub Arc<str>);

imp_deref!(CollectionId, str);
imp_display!(CollectionId);
imp_from!(CollectionId, &str, s => CollectionId(s.into()));
imp_from!(CollectionId, String, s => CollectionId(s.into_boxed_str().into()));

/// One fan-out generation.
///
/// Epochs only ever move forward. A result tagged with an epoch other
/// than the coordinator's current one is stale.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl Epoch {
    /// The epoch a coordinator starts at, before any batch.
    pub const ZERO: Epoch = Epoch(0);

    /// The epoch following this one, if there is one.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Epoch)
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integer_and_string_keys_match() {
        assert_eq!(RequestKey::from(42_u64), RequestKey::from("42"));
        assert_eq!(RequestKey::from(-7_i64), RequestKey::from("-7"));
    }

    #[test]
    fn key_display_and_debug() {
        let key = RequestKey::from("listing-1");
        assert_eq!("listing-1", key.to_string());
        assert_eq!("RequestKey(\"listing-1\")", format!("{key:?}"));
        assert_eq!("photosets", CollectionId::from("photosets").to_string());
    }

    #[test]
    fn key_serializes_as_plain_string() {
        let key = RequestKey::from("a");
        assert_eq!("\"a\"", serde_json::to_string(&key).unwrap());
        let back: RequestKey = serde_json::from_str("\"a\"").unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn epochs_move_forward() {
        assert_eq!(Some(Epoch(1)), Epoch::ZERO.next());
        assert!(Epoch::ZERO < Epoch::ZERO.next().unwrap());
        assert_eq!(None, Epoch(u64::MAX).next());
        assert_eq!("epoch#3", Epoch(3).to_string());
    }
}
