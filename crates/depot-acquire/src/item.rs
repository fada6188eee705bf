use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use depot_hashes::{HashStringList, MultiHasher};

/// One fetch request as handed to a method by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct FetchItem {
    pub uri: String,
    pub dest_file: PathBuf,
    pub last_modified: Option<DateTime<Utc>>,
    pub expected_hashes: HashStringList,
    pub index_file: bool,
    pub maximum_size: Option<u64>,
    pub fail_ignore: bool,
    /// Raw `Signed-By` override for verification methods: keyring
    /// paths, fingerprints, or an inline armored key.
    pub signed_by: Option<String>,
}

/// What a method reports back on completion.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub filename: PathBuf,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub hashes: HashStringList,
    pub resume_point: u64,
    pub ims_hit: bool,
    pub alt_uris: Vec<String>,
    /// Fingerprints of accepted signers, one per line, when a
    /// verification method produced this result.
    pub signed_by: Vec<String>,
}

impl FetchResult {
    /// Adopt the digest state of a hasher that consumed the payload.
    pub fn take_hashes(&mut self, hasher: MultiHasher) {
        self.size = hasher.consumed();
        self.hashes = hasher.result();
    }
}

/// FIFO of pending fetch items. An item leaves the queue only once its
/// final `URI Done` or `URI Failure` went out.
#[derive(Debug, Default)]
pub struct FetchQueue {
    items: VecDeque<FetchItem>,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, item: FetchItem) {
        self.items.push_back(item);
    }

    pub fn front(&self) -> Option<&FetchItem> {
        self.items.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut FetchItem> {
        self.items.front_mut()
    }

    pub fn dequeue(&mut self) -> Option<FetchItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FetchItem> {
        self.items.iter()
    }

    /// Move the item at `index` to the front, keeping the relative
    /// order of the others. Used by pipeline reordering.
    pub fn promote(&mut self, index: usize) {
        if index > 0 && index < self.items.len() {
            if let Some(item) = self.items.remove(index) {
                self.items.push_front(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let mut queue = FetchQueue::new();
        for uri in ["a", "b", "c"] {
            queue.enqueue(FetchItem {
                uri: uri.to_string(),
                ..FetchItem::default()
            });
        }
        queue.promote(2);
        let order: Vec<String> = std::iter::from_fn(|| queue.dequeue().map(|i| i.uri)).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn take_hashes_fills_size_and_list() {
        let mut hasher = MultiHasher::new();
        hasher.add(b"abcd");
        let mut result = FetchResult::default();
        result.take_hashes(hasher);
        assert_eq!(result.size, 4);
        assert!(result.hashes.find(depot_hashes::HashKind::Sha256).is_some());
    }
}
