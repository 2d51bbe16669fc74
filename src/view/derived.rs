use std::collections::{BTreeMap, HashMap};

/// Records whose searchable text contains `query`, case-insensitively.
///
/// A blank query returns everything.
pub fn search<'a, T, F>(items: &'a [T], query: &str, text: F) -> Vec<&'a T>
where
    F: Fn(&T) -> Vec<&str>,
{
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return items.iter().collect();
    }
    items
        .iter()
        .filter(|item| {
            text(item)
                .into_iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .collect()
}

pub fn counts_by<T, K, F>(items: &[T], key: F) -> BTreeMap<K, usize>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(key(item)).or_insert(0) += 1;
    }
    counts
}

/// id -> display name lookup built from a snapshot.
pub fn name_index<T, F>(items: &[T], entry: F) -> HashMap<String, String>
where
    F: Fn(&T) -> (String, String),
{
    items.iter().map(entry).collect()
}
