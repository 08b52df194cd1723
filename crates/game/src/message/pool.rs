/// Counters for a [`BufferPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub released: u64,
    pub discarded: u64,
}

/// Free list of byte buffers for payloads and datagrams.
///
/// Buffers move in and out by value: once handed back with [`BufferPool::release`] the
/// caller no longer owns it and cannot read it.
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<Vec<u8>>,
    buffer_capacity: usize,
    max_pooled: usize,
    stats: PoolStats,
}

impl BufferPool {
    pub fn new(buffer_capacity: usize, max_pooled: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_pooled.min(64)),
            buffer_capacity,
            max_pooled,
            stats: PoolStats::default(),
        }
    }

    /// An empty buffer with at least the pool's buffer capacity.
    pub fn acquire(&mut self) -> Vec<u8> {
        match self.free.pop() {
            Some(buffer) => {
                self.stats.reused += 1;
                buffer
            }
            None => {
                self.stats.allocated += 1;
                Vec::with_capacity(self.buffer_capacity)
            }
        }
    }

    pub fn release(&mut self, mut buffer: Vec<u8>) {
        if self.free.len() >= self.max_pooled || buffer.capacity() < self.buffer_capacity {
            self.stats.discarded += 1;
            return;
        }
        buffer.clear();
        self.stats.released += 1;
        self.free.push(buffer);
    }

    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Drops every pooled buffer.
    pub fn clear(&mut self) {
        self.free.clear();
        self.free.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffers_come_back_empty() {
        let mut pool = BufferPool::new(64, 4);
        let mut buffer = pool.acquire();
        buffer.extend_from_slice(b"stale payload");
        let pointer = buffer.as_ptr();
        pool.release(buffer);

        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert_eq!(buffer.as_ptr(), pointer);
        assert_eq!(pool.stats().reused, 1);
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn pool_is_bounded() {
        let mut pool = BufferPool::new(16, 2);
        let buffers: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        for buffer in buffers {
            pool.release(buffer);
        }
        assert_eq!(pool.pooled(), 2);
        assert_eq!(pool.stats().discarded, 1);

        pool.release(Vec::new());
        assert_eq!(pool.stats().discarded, 2);

        pool.clear();
        assert_eq!(pool.pooled(), 0);
    }
}
