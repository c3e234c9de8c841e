//! Versioned reference to the index that queries run against.
//!
//! Readers clone an `Arc` out of the lock and search without holding it, so a
//! rebuild never blocks queries for longer than a pointer swap and no reader
//! ever observes a half-built index.

use std::sync::{Arc, RwLock};

use crate::semantic::index::CatalogIndex;

/// The index a request runs against, tagged with the version it was
/// published under.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub version: u64,
    pub index: Arc<CatalogIndex>,
}

#[derive(Debug)]
pub struct ActiveIndex {
    current: RwLock<IndexSnapshot>,
}

impl ActiveIndex {
    /// Publish `index` as version 1.
    pub fn new(index: CatalogIndex) -> Self {
        Self {
            current: RwLock::new(IndexSnapshot {
                version: 1,
                index: Arc::new(index),
            }),
        }
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Replace the active index, returning the new version.
    pub fn swap(&self, index: CatalogIndex) -> u64 {
        let index = Arc::new(index);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        guard.version += 1;
        guard.index = index;

        log::info!(
            "published index version {} ({} items)",
            guard.version,
            guard.index.items().len()
        );

        guard.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogItem;
    use crate::semantic::index::SearchIndex;
    use crate::semantic::preprocess::EmbedVariant;

    fn single_item_index(id: &str) -> CatalogIndex {
        let items = vec![CatalogItem::new(id, id, id, format!("https://example.com/{id}"))];
        CatalogIndex::from_parts(2, items, vec![(0, EmbedVariant::Full, vec![1.0, 0.0])]).unwrap()
    }

    #[test]
    fn test_swap_bumps_version() {
        let active = ActiveIndex::new(CatalogIndex::empty(2));
        assert_eq!(active.version(), 1);

        assert_eq!(active.swap(single_item_index("a")), 2);
        assert_eq!(active.swap(single_item_index("b")), 3);

        let snapshot = active.snapshot();
        assert_eq!(snapshot.version, 3);
        assert!(snapshot.index.item("b").is_some());
    }

    #[test]
    fn test_snapshot_outlives_swap() {
        let active = ActiveIndex::new(single_item_index("old"));
        let before = active.snapshot();

        active.swap(single_item_index("new"));

        assert!(before.index.item("old").is_some());
        assert!(before.index.item("new").is_none());
        assert!(active.snapshot().index.item("new").is_some());
    }

    #[test]
    fn test_concurrent_readers_see_whole_index() {
        let active = Arc::new(ActiveIndex::new(single_item_index("v1")));

        let readers = (0..4)
            .map(|_| {
                let active = Arc::clone(&active);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = active.snapshot();
                        assert_eq!(snapshot.index.item_count(), 1);
                        let hits = snapshot.index.search(&[1.0, 0.0], 5).unwrap();
                        assert_eq!(hits.len(), 1);
                    }
                })
            })
            .collect::<Vec<_>>();

        for i in 0..50 {
            active.swap(single_item_index(&format!("v{i}")));
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(active.version(), 51);
    }
}
