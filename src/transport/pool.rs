//! Datagram Buffer Pool
//!
//! Receive buffers for the UDP loop are checked out of a small pool and
//! checked back in when the guard drops, so the return happens on every exit
//! path. One task owns a buffer at a time.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// A fixed-size-buffer pool.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buf_size: usize,
    max_pooled: usize,
}

impl BufferPool {
    /// Creates a pool handing out `buf_size`-byte buffers and retaining at
    /// most `max_pooled` of them between uses.
    pub fn new(buf_size: usize, max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            buf_size,
            max_pooled,
        })
    }

    /// Checks a buffer out. Allocates when the pool is empty.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = {
            let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
            buffers.pop()
        }
        .unwrap_or_else(|| vec![0u8; self.buf_size]);

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

/// A checked-out buffer. Returns itself to the pool on drop.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused() {
        let pool = BufferPool::new(1024, 4);
        {
            let _a = pool.acquire();
            let _b = pool.acquire();
            assert_eq!(pool.pooled(), 0);
        }
        assert_eq!(pool.pooled(), 2);

        let c = pool.acquire();
        assert_eq!(pool.pooled(), 1);
        assert_eq!(c.len(), 1024);
    }

    #[test]
    fn test_pool_caps_retained_buffers() {
        let pool = BufferPool::new(64, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_buffer_returns_on_early_exit() {
        let pool = BufferPool::new(64, 4);
        let result: Result<(), ()> = (|| {
            let _buf = pool.acquire();
            Err(())
        })();
        assert!(result.is_err());
        assert_eq!(pool.pooled(), 1);
    }
}
