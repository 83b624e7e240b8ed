/// Hands out chunk indices for one direction in strictly sequential order.
///
/// Each index in `0..total` is returned exactly once, in increasing order,
/// after which [`next`][ChunkScheduler::next] keeps returning `None`.
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    next: usize,
    total: usize,
}

impl ChunkScheduler {
    pub fn new(total: usize) -> ChunkScheduler {
        ChunkScheduler { next: 0, total }
    }

    /// Take the next unsent chunk index and advance the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<usize> {
        if self.next == self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(index)
    }

    /// Number of chunks handed out so far.
    pub fn submitted(&self) -> usize {
        self.next
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.next == self.total
    }
}
