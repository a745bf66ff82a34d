//! Temporary-id allocation and promotion.
//!
//! Commands issued before the store confirms get a session-local `tmp-<n>`
//! id. The coordinator's collections keep that local id forever; this table
//! records the canonical id the store eventually assigned, and references
//! are resolved through it at store-write time.

use std::collections::BTreeMap;

const TEMP_PREFIX: &str = "tmp-";

/// Side table mapping session-local temporary ids to store-assigned
/// canonical ids.
#[derive(Debug, Default)]
pub struct IdTable {
    next_temp: u64,
    canonical: BTreeMap<String, String>,
}

impl IdTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh temporary id, unique within this session.
    pub fn next_temp(&mut self) -> String {
        self.next_temp += 1;
        format!("{TEMP_PREFIX}{}", self.next_temp)
    }

    /// Whether `id` is a session-local temporary id.
    #[must_use]
    pub fn is_temp(id: &str) -> bool {
        id.starts_with(TEMP_PREFIX)
    }

    /// Advances the counter past `id` when it is a temporary id, so ids
    /// carried in from a snapshot cannot collide with future allocations.
    pub fn reserve(&mut self, id: &str) {
        if let Some(n) = id
            .strip_prefix(TEMP_PREFIX)
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            self.next_temp = self.next_temp.max(n);
        }
    }

    /// Records the canonical id the store assigned for `temp_id`.
    pub fn promote(&mut self, temp_id: &str, canonical_id: String) {
        self.canonical.insert(temp_id.to_string(), canonical_id);
    }

    /// The canonical id for `temp_id`, if it has been promoted.
    #[must_use]
    pub fn canonical_of(&self, temp_id: &str) -> Option<&str> {
        self.canonical.get(temp_id).map(String::as_str)
    }

    /// Resolves `id` to the id the store knows it by: the promoted canonical
    /// id when one exists, otherwise `id` itself.
    #[must_use]
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.canonical_of(id).unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_temp_ids_are_unique_and_recognizable() {
        let mut table = IdTable::new();
        let first = table.next_temp();
        let second = table.next_temp();
        assert_ne!(first, second);
        assert!(IdTable::is_temp(&first));
        assert!(!IdTable::is_temp("rec-1"));
    }

    #[test]
    fn test_resolve_follows_promotion() {
        let mut table = IdTable::new();
        let temp = table.next_temp();
        assert_eq!(table.resolve(&temp), temp);

        table.promote(&temp, "rec-7".to_string());
        assert_eq!(table.resolve(&temp), "rec-7");
        assert_eq!(table.canonical_of(&temp), Some("rec-7"));
    }

    #[test]
    fn test_reserve_skips_taken_temp_ids() {
        let mut table = IdTable::new();
        table.reserve("tmp-4");
        table.reserve("rec-9");
        assert_eq!(table.next_temp(), "tmp-5");
    }

    #[test]
    fn test_resolve_passes_canonical_ids_through() {
        let table = IdTable::new();
        assert_eq!(table.resolve("rec-3"), "rec-3");
    }
}
