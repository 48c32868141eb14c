use super::*;

/// Bounded store of recently distributed work, keyed by request id.
/// Eviction follows insertion recency only; looking a template up does not
/// keep it alive.
pub(crate) struct WorkCache {
    entries: LruCache<u64, BlockTemplate>,
}

impl WorkCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(WORK_CACHE_SIZE).expect("should be non-zero")),
        }
    }

    pub(crate) fn insert(&mut self, request_id: u64, template: BlockTemplate) {
        self.entries.put(request_id, template);
    }

    pub(crate) fn get(&self, request_id: u64) -> Option<&BlockTemplate> {
        self.entries.peek(&request_id)
    }

    pub(crate) fn get_mut(&mut self, request_id: u64) -> Option<&mut BlockTemplate> {
        self.entries.peek_mut(&request_id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
