//! Label pairs, sorted label sets, and stable fingerprints.

use std::hash::Hasher;

use siphasher::sip::SipHasher24;

/// The mandatory label carrying the service a profile belongs to. Datasets
/// within a block are keyed by `(tenant, service_name)`.
pub const LABEL_NAME_SERVICE: &str = "service_name";

/// The metric-name label, when the producer supplies one.
pub const LABEL_NAME_METRIC: &str = "__name__";

/// Derived label holding the full profile type selector
/// (`name:type:unit:period_type:period_unit`).
pub const LABEL_NAME_PROFILE_TYPE: &str = "__profile_type__";

/// Derived label holding the sample type (e.g. `cpu`, `alloc_objects`).
pub const LABEL_NAME_TYPE: &str = "__type__";

/// Derived label holding the sample unit (e.g. `nanoseconds`, `count`).
pub const LABEL_NAME_UNIT: &str = "__unit__";

/// Derived label holding the period type.
pub const LABEL_NAME_PERIOD_TYPE: &str = "__period_type__";

/// Derived label holding the period unit.
pub const LABEL_NAME_PERIOD_UNIT: &str = "__period_unit__";

/// Marker label set on datasets containing samples whose mapping carries no
/// function info.
pub const LABEL_NAME_UNSYMBOLIZED: &str = "__unsymbolized__";

/// A single `(name, value)` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

/// An immutable set of labels, sorted by name, with unique names.
///
/// The empty value is a valid (empty) label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Labels(Vec<LabelPair>);

impl Labels {
    /// Build a label set from arbitrary pairs. Pairs are sorted by name; for
    /// duplicate names the last given value wins.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut v: Vec<LabelPair> = pairs
            .into_iter()
            .map(|(name, value)| LabelPair {
                name: name.into(),
                value: value.into(),
            })
            .collect();
        // Stable sort: insertion order survives within one name.
        v.sort_by(|a, b| a.name.cmp(&b.name));
        let mut out: Vec<LabelPair> = Vec::with_capacity(v.len());
        for p in v {
            match out.last_mut() {
                Some(last) if last.name == p.name => *last = p,
                _ => out.push(p),
            }
        }
        Self(out)
    }

    /// Build a label set from an even-length flat list of strings:
    /// `["name", "value", ...]`.
    ///
    /// # Panics
    ///
    /// Panics if the list length is odd. Intended for literals.
    pub fn from_strings<S: Into<String> + Clone>(flat: &[S]) -> Self {
        assert!(flat.len() % 2 == 0, "flat label list must have even length");
        Self::from_pairs(
            flat.chunks_exact(2)
                .map(|c| (c[0].clone().into(), c[1].clone().into())),
        )
    }

    /// Look up a label value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|p| p.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    /// Return a new label set with `name` set to `value`, replacing any
    /// existing value.
    pub fn with(&self, name: &str, value: &str) -> Self {
        let mut v = self.0.clone();
        match v.binary_search_by(|p| p.name.as_str().cmp(name)) {
            Ok(i) => v[i].value = value.to_string(),
            Err(i) => v.insert(
                i,
                LabelPair {
                    name: name.to_string(),
                    value: value.to_string(),
                },
            ),
        }
        Self(v)
    }

    /// Iterate the pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = &LabelPair> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A stable 64-bit fingerprint of the label set.
    ///
    /// Names and values are fed through SipHash-2-4 with separators that make
    /// `{"a": "b,c"}` and `{"a": "b", "c": ""}` distinct.
    pub fn fingerprint(&self) -> u64 {
        let mut h = SipHasher24::new_with_keys(0, 0);
        for p in &self.0 {
            h.write(p.name.as_bytes());
            h.write_u8(0xff);
            h.write(p.value.as_bytes());
            h.write_u8(0xfe);
        }
        h.finish()
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_and_deduped() {
        let l = Labels::from_pairs([("b", "2"), ("a", "1"), ("b", "3")]);
        assert_eq!(
            l.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
        assert_eq!(l.get("b"), Some("3"));
        assert_eq!(l.get("missing"), None);
    }

    #[test]
    fn with_replaces_and_inserts() {
        let l = Labels::from_strings(&["foo", "bar"]);
        let l = l.with(LABEL_NAME_SERVICE, "svc1").with("foo", "baz");
        assert_eq!(l.get("foo"), Some("baz"));
        assert_eq!(l.get(LABEL_NAME_SERVICE), Some("svc1"));
    }

    #[test]
    fn fingerprint_is_order_insensitive_and_collision_aware() {
        let a = Labels::from_pairs([("a", "1"), ("b", "2")]);
        let b = Labels::from_pairs([("b", "2"), ("a", "1")]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = Labels::from_pairs([("a", "1b"), ("", "2")]);
        assert_ne!(a.fingerprint(), c.fingerprint());

        let empty = Labels::default();
        assert_ne!(a.fingerprint(), empty.fingerprint());
    }
}
