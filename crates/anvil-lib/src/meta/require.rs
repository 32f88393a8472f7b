use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// A dependency or conflict edge to another package.
///
/// Ordering and equality look at `uid` only, so a [`RequireSet`] holds at
/// most one edge per package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Require {
    pub uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub equals: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suggests: String,
}

impl Require {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    pub fn equals(mut self, version: impl Into<String>) -> Self {
        self.equals = version.into();
        self
    }

    pub fn suggests(mut self, version: impl Into<String>) -> Self {
        self.suggests = version.into();
        self
    }
}

impl PartialEq for Require {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for Require {}

impl PartialOrd for Require {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Require {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uid.cmp(&other.uid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequireSet(BTreeSet<Require>);

impl RequireSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge. An existing edge for the same uid is replaced.
    pub fn insert(&mut self, require: Require) {
        self.0.replace(require);
    }

    pub fn get(&self, uid: &str) -> Option<&Require> {
        self.0.iter().find(|r| r.uid == uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.get(uid).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Require> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Compares every field, unlike the set's own uid-keyed ordering.
impl PartialEq for RequireSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(other.0.iter()).all(|(a, b)| {
                a.uid == b.uid && a.equals == b.equals && a.suggests == b.suggests
            })
    }
}

impl Eq for RequireSet {}

impl FromIterator<Require> for RequireSet {
    fn from_iter<I: IntoIterator<Item = Require>>(iter: I) -> Self {
        let mut set = RequireSet::new();
        for require in iter {
            set.insert(require);
        }
        set
    }
}

impl<'a> IntoIterator for &'a RequireSet {
    type Item = &'a Require;
    type IntoIter = std::collections::btree_set::Iter<'a, Require>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_uid_keeps_last_insert() {
        let set: RequireSet = vec![
            Require::new("net.minecraft").equals("1.20.1"),
            Require::new("org.lwjgl3"),
            Require::new("net.minecraft").equals("1.19.4"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("net.minecraft").unwrap().equals, "1.19.4");
    }

    #[test]
    fn test_set_equality_sees_versions() {
        let a: RequireSet = vec![Require::new("net.minecraft").equals("1.20.1")]
            .into_iter()
            .collect();
        let b: RequireSet = vec![Require::new("net.minecraft").equals("1.20.2")]
            .into_iter()
            .collect();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
