// clipkeeper - Clipboard History Store
// Bounded, most-recent-first history with duplicate promotion

use std::ops::Range;

use chrono::Utc;

use crate::error::StoreError;
use crate::model::{ClipItem, HistoryFolder};

/// Size and presentation limits for the history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_items: usize,
    /// Items shown at the top level before the derived folders start
    pub display_count: usize,
    pub items_per_folder: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_items: 100,
            display_count: 10,
            items_per_folder: 10,
        }
    }
}

/// Result of a capture.
#[derive(Clone, Debug, PartialEq)]
pub struct Captured {
    pub item: ClipItem,
    /// The content was already present and was moved to the head
    pub promoted: bool,
}

/// Ordered clipboard history, newest first.
#[derive(Debug)]
pub struct ClipboardStore {
    items: Vec<ClipItem>,
    limits: HistoryLimits,
    dirty: bool,
}

impl ClipboardStore {
    pub fn new(limits: HistoryLimits) -> Self {
        Self {
            items: Vec::new(),
            limits: sanitize(limits),
            dirty: false,
        }
    }

    /// Rebuild from persisted items, dropping later duplicates and overflow.
    pub fn from_items(items: Vec<ClipItem>, limits: HistoryLimits) -> Self {
        let mut store = Self::new(limits);
        for item in items {
            if store.items.len() >= store.limits.max_items {
                break;
            }
            if store.position_of_content(&item.content).is_none() {
                store.items.push(item);
            }
        }
        store
    }

    /// Record new clipboard content at the head of the history.
    pub fn capture(
        &mut self,
        content: &str,
        source_app: Option<&str>,
    ) -> Result<Captured, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Invalid("content cannot be empty".to_string()));
        }

        self.dirty = true;
        if let Some(index) = self.position_of_content(content) {
            let mut item = self.items.remove(index);
            item.captured_at = Utc::now();
            self.items.insert(0, item.clone());
            return Ok(Captured {
                item,
                promoted: true,
            });
        }

        let item = ClipItem::new(content, source_app.map(str::to_string));
        self.items.insert(0, item.clone());
        self.items.truncate(self.limits.max_items);
        Ok(Captured {
            item,
            promoted: false,
        })
    }

    pub fn items(&self) -> &[ClipItem] {
        &self.items
    }

    /// The top-level entries shown before the derived folders
    pub fn recent(&self) -> &[ClipItem] {
        let end = self.limits.display_count.min(self.items.len());
        &self.items[..end]
    }

    pub fn get(&self, id: &str) -> Option<&ClipItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn delete(&mut self, id: &str) -> Result<ClipItem, StoreError> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| StoreError::clip_not_found(id))?;
        self.dirty = true;
        Ok(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.dirty = true;
        }
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// Change limits; shrinking `max_items` evicts the oldest entries.
    pub fn set_limits(&mut self, limits: HistoryLimits) {
        self.limits = sanitize(limits);
        if self.items.len() > self.limits.max_items {
            self.items.truncate(self.limits.max_items);
            self.dirty = true;
        }
    }

    /// History past `display_count`, grouped into `items_per_folder` ranges.
    pub fn folders(&self) -> Vec<HistoryFolder> {
        folder_ranges(
            self.items.len(),
            self.limits.display_count,
            self.limits.items_per_folder,
        )
        .into_iter()
        .map(|range| HistoryFolder {
            name: format!("{}-{}", range.start + 1, range.end),
            start_index: range.start,
            end_index: range.end,
            items: self.items[range].to_vec(),
        })
        .collect()
    }

    /// Case-insensitive substring search over content
    pub fn search(&self, query: &str) -> Vec<ClipItem> {
        let needle = query.to_lowercase();
        self.items
            .iter()
            .filter(|item| item.content.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn position_of_content(&self, content: &str) -> Option<usize> {
        self.items.iter().position(|item| item.content == content)
    }
}

fn sanitize(limits: HistoryLimits) -> HistoryLimits {
    HistoryLimits {
        max_items: limits.max_items.max(1),
        display_count: limits.display_count,
        items_per_folder: limits.items_per_folder.max(1),
    }
}

/// Partition `display_count..len` into contiguous ranges of `per_folder`.
///
/// The last range may be shorter.
pub fn folder_ranges(len: usize, display_count: usize, per_folder: usize) -> Vec<Range<usize>> {
    let per_folder = per_folder.max(1);
    (display_count..len)
        .step_by(per_folder)
        .map(|start| start..(start + per_folder).min(len))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn limits(max_items: usize, display_count: usize, items_per_folder: usize) -> HistoryLimits {
        HistoryLimits {
            max_items,
            display_count,
            items_per_folder,
        }
    }

    fn contents(store: &ClipboardStore) -> Vec<&str> {
        store.items().iter().map(|i| i.content.as_str()).collect()
    }

    #[test]
    fn capture_inserts_at_head() {
        let mut store = ClipboardStore::new(HistoryLimits::default());
        store.capture("first", None).unwrap();
        store.capture("second", Some("terminal")).unwrap();

        assert_eq!(contents(&store), vec!["second", "first"]);
        assert_eq!(store.items()[0].source_app.as_deref(), Some("terminal"));
        assert!(store.is_dirty());
    }

    #[test]
    fn duplicate_capture_promotes_instead_of_inserting() {
        let mut store = ClipboardStore::new(limits(5, 10, 10));
        let first = store.capture("a", None).unwrap();
        store.capture("b", None).unwrap();
        let again = store.capture("a", None).unwrap();

        assert_eq!(contents(&store), vec!["a", "b"]);
        assert!(again.promoted);
        assert_eq!(again.item.id, first.item.id);
    }

    #[test]
    fn duplicate_detection_is_exact() {
        let mut store = ClipboardStore::new(HistoryLimits::default());
        store.capture("Hello", None).unwrap();
        store.capture("hello", None).unwrap();
        store.capture("hello ", None).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn capture_evicts_oldest_past_max() {
        let mut store = ClipboardStore::new(limits(3, 10, 10));
        for content in ["1", "2", "3", "4", "5"] {
            store.capture(content, None).unwrap();
        }
        assert_eq!(contents(&store), vec!["5", "4", "3"]);
    }

    #[test]
    fn size_never_exceeds_max_for_any_sequence() {
        let mut store = ClipboardStore::new(limits(7, 2, 3));
        // Deterministic mix of new and repeated content
        for i in 0..500u32 {
            let content = format!("c{}", (i * 7919) % 13);
            store.capture(&content, None).unwrap();
            assert!(store.len() <= 7);
        }
    }

    #[parameterized(
        empty = { "" },
        spaces = { "   " },
        newlines = { "\n\t\n" },
    )]
    fn capture_rejects_blank_content(content: &str) {
        let mut store = ClipboardStore::new(HistoryLimits::default());
        assert!(matches!(store.capture(content, None), Err(StoreError::Invalid(_))));
        assert!(store.is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn surrounding_whitespace_is_kept() {
        let mut store = ClipboardStore::new(HistoryLimits::default());
        store.capture("  indented\n", None).unwrap();
        assert_eq!(contents(&store), ["  indented\n"]);
    }

    #[test]
    fn delete_and_clear() {
        let mut store = ClipboardStore::new(HistoryLimits::default());
        let a = store.capture("a", None).unwrap().item;
        store.capture("b", None).unwrap();

        assert_eq!(store.delete(&a.id).unwrap().content, "a");
        assert!(matches!(store.delete(&a.id), Err(StoreError::NotFound { .. })));

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn recent_is_capped_by_display_count() {
        let mut store = ClipboardStore::new(limits(50, 5, 10));
        for i in 0..8 {
            store.capture(&format!("item {i}"), None).unwrap();
        }
        assert_eq!(store.recent().len(), 5);
        assert_eq!(store.recent()[0].content, "item 7");
    }

    #[test]
    fn folders_are_named_by_position() {
        let mut store = ClipboardStore::new(limits(100, 10, 10));
        for i in 0..25 {
            store.capture(&format!("item {i}"), None).unwrap();
        }
        let folders = store.folders();
        let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["11-20", "21-25"]);
        assert_eq!(folders[1].items.len(), 5);
        assert_eq!(folders[0].items[0].content, "item 14");
    }

    #[test]
    fn changing_folder_size_repartitions_immediately() {
        let mut store = ClipboardStore::new(limits(100, 10, 10));
        for i in 0..40 {
            store.capture(&format!("item {i}"), None).unwrap();
        }
        assert_eq!(store.folders().len(), 3);

        store.set_limits(limits(100, 10, 7));
        let folders = store.folders();
        assert_eq!(folders.len(), 5);
        let total: usize = folders.iter().map(|f| f.items.len()).sum();
        assert_eq!(total, 30);
    }

    #[parameterized(
        empty = { 0, 10, 10 },
        below_display = { 8, 10, 10 },
        exact_display = { 10, 10, 10 },
        one_partial = { 13, 10, 10 },
        many_even = { 50, 10, 10 },
        many_uneven = { 47, 10, 7 },
        bucket_of_one = { 12, 3, 1 },
        no_display = { 9, 0, 4 },
    )]
    fn folder_ranges_partition_the_tail(len: usize, display_count: usize, per_folder: usize) {
        let ranges = folder_ranges(len, display_count, per_folder);
        let mut expected_start = display_count.min(len);
        for range in &ranges {
            assert_eq!(range.start, expected_start, "ranges must be contiguous");
            assert!(!range.is_empty());
            assert!(range.len() <= per_folder);
            expected_start = range.end;
        }
        assert_eq!(expected_start, len);
        // every bucket but the last is full
        if let Some((_, full)) = ranges.split_last() {
            assert!(full.iter().all(|r| r.len() == per_folder));
        }
    }

    #[test]
    fn from_items_dedupes_and_caps() {
        let a = ClipItem::new("a", None);
        let b = ClipItem::new("b", None);
        let a_again = ClipItem::new("a", None);
        let c = ClipItem::new("c", None);
        let store = ClipboardStore::from_items(vec![a.clone(), b, a_again, c], limits(2, 10, 10));

        assert_eq!(contents(&store), vec!["a", "b"]);
        assert_eq!(store.items()[0].id, a.id);
        assert!(!store.is_dirty());
    }

    #[test]
    fn shrinking_max_evicts() {
        let mut store = ClipboardStore::new(limits(10, 10, 10));
        for i in 0..10 {
            store.capture(&format!("{i}"), None).unwrap();
        }
        store.mark_clean();
        store.set_limits(limits(4, 10, 10));
        assert_eq!(store.len(), 4);
        assert!(store.is_dirty());
    }

    #[test]
    fn search_is_case_insensitive() {
        let mut store = ClipboardStore::new(HistoryLimits::default());
        store.capture("Hello World", None).unwrap();
        store.capture("Python code", None).unwrap();
        store.capture("HELLO python", None).unwrap();

        assert_eq!(store.search("hello").len(), 2);
        assert_eq!(store.search("PYTHON").len(), 2);
        assert!(store.search("missing").is_empty());
    }
}
