use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

/// How many buffers a single size class keeps around. Anything returned
/// beyond this is simply freed.
const SHELF_DEPTH: usize = 64;

/// Size classes, smallest first. Rent requests are rounded up to the first
/// class that fits; oversized requests get a plain allocation.
const CLASSES: [usize; 6] = [64, 256, 1024, 4096, 16384, 32768];

/// A process-wide pool of byte buffers.
///
/// Buffers are rented exactly-sized-or-larger and come back automatically
/// when their [`PooledBuf`] is dropped, so "dispose exactly once" falls out
/// of ownership.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Shelves>,
}

struct Shelves {
    classes: [Mutex<Vec<Vec<u8>>>; CLASSES.len()],
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shelves {
                classes: std::array::from_fn(|_| Mutex::new(Vec::new())),
            }),
        }
    }

    /// The shared pool every connection rents from.
    pub fn global() -> &'static BufferPool {
        static GLOBAL: OnceLock<BufferPool> = OnceLock::new();
        GLOBAL.get_or_init(BufferPool::new)
    }

    /// Rent a zero-length buffer with capacity for at least `len` bytes.
    pub fn rent(&self, len: usize) -> PooledBuf {
        let data = match class_index(len) {
            Some(i) => {
                let mut shelf = self.inner.classes[i].lock().unwrap_or_else(|e| e.into_inner());
                shelf.pop().unwrap_or_else(|| Vec::with_capacity(CLASSES[i]))
            }
            None => Vec::with_capacity(len),
        };
        PooledBuf {
            data,
            pool: self.inner.clone(),
        }
    }

    #[cfg(test)]
    fn shelved(&self) -> usize {
        self.inner
            .classes
            .iter()
            .map(|s| s.lock().unwrap().len())
            .sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Shelves {
    fn put_back(&self, mut data: Vec<u8>) {
        data.clear();
        if let Some(i) = class_index(data.capacity()) {
            // Only buffers that still match their class exactly go back;
            // grown ones would lie about their capacity to the next renter.
            if data.capacity() == CLASSES[i] {
                let mut shelf = self.classes[i].lock().unwrap_or_else(|e| e.into_inner());
                if shelf.len() < SHELF_DEPTH {
                    shelf.push(data);
                }
            }
        }
    }
}

fn class_index(len: usize) -> Option<usize> {
    CLASSES.iter().position(|&c| len <= c)
}

/// An owned, rented byte buffer. Returns itself to the pool on drop.
pub struct PooledBuf {
    data: Vec<u8>,
    pool: Arc<Shelves>,
}

impl PooledBuf {
    pub fn as_vec(&self) -> &Vec<u8> {
        &self.data
    }

    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl std::ops::DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.put_back(data);
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.data.len())
            .field("cap", &self.data.capacity())
            .finish()
    }
}
