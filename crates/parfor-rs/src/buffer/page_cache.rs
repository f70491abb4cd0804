use std::collections::HashMap;
use std::sync::Mutex;

/// Pages kept per distinct length.
const MAX_PAGES_PER_LENGTH: usize = 16;

/// Pool of byte pages keyed by exact length, recycled between serializations of equally
/// sized blocks.
#[derive(Debug, Default)]
pub struct PageCache {
    pages: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a cached page whose length is exactly `len`.
    pub fn get_page(&self, len: usize) -> Option<Vec<u8>> {
        let mut pages = self.pages.lock().expect("page cache poisoned");
        let bucket = pages.get_mut(&len)?;
        let page = bucket.pop();
        if bucket.is_empty() {
            pages.remove(&len);
        }
        page
    }

    pub fn put_page(&self, page: Vec<u8>) {
        if page.is_empty() {
            return;
        }
        let mut pages = self.pages.lock().expect("page cache poisoned");
        let bucket = pages.entry(page.len()).or_default();
        if bucket.len() < MAX_PAGES_PER_LENGTH {
            bucket.push(page);
        }
    }

    pub fn len(&self) -> usize {
        self.pages
            .lock()
            .expect("page cache poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.pages.lock().expect("page cache poisoned").clear();
    }
}
