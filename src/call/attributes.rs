//! Immutable key/value attribute snapshots.

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;

/// Read-only attribute map shared by reference.
///
/// Connection attributes are captured once when the connection is set up and
/// handed to every call on it; request attributes are captured once per call.
/// Cloning an `Attributes` only bumps a reference count.
///
/// ```
/// use bytes::Bytes;
/// use callframe::call::Attributes;
///
/// let attrs = Attributes::from_iter([("tenant", Bytes::from_static(b"acme"))]);
/// let shared = attrs.clone();
/// assert_eq!(shared.get("tenant").map(|v| &v[..]), Some(&b"acme"[..]));
/// assert!(attrs.ptr_eq(&shared));
/// ```
#[derive(Clone, Default)]
pub struct Attributes(Arc<HashMap<Box<str>, Bytes>>);

impl Attributes {
    /// An empty attribute set.
    #[must_use]
    pub fn empty() -> Self { Self::default() }

    /// Look up the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Bytes> { self.0.get(key) }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool { self.0.contains_key(key) }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns `true` when no attributes are set.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Iterate over all entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.0.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// Returns `true` if both handles point at the same snapshot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<Box<str>>,
    V: Into<Bytes>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(Arc::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }
}

impl From<HashMap<String, Vec<u8>>> for Attributes {
    fn from(map: HashMap<String, Vec<u8>>) -> Self { map.into_iter().collect() }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may be large or sensitive; only keys are printed.
        f.debug_set().entries(self.0.keys()).finish()
    }
}
