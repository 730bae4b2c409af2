use derive_more::{Deref, IntoIterator};

///
/// NameList
///
/// Sorted, duplicate-free list of store or index names, as returned by
/// `object_store_names()` and `index_names()`.
///

#[derive(Clone, Debug, Default, Deref, Eq, IntoIterator, PartialEq)]
pub struct NameList(#[into_iterator(owned, ref)] Vec<String>);

impl NameList {
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }
}

impl<S: Into<String>> FromIterator<S> for NameList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut names: Vec<String> = iter.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();

        Self(names)
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sorted_and_deduplicated() {
        let names: NameList = ["b", "a", "b"].into_iter().collect();

        assert_eq!(names.as_slice(), ["a", "b"]);
        assert!(names.contains("a"));
        assert!(!names.contains("c"));
        assert_eq!(names.len(), 2);
    }
}
