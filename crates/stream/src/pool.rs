use crate::chunk::Chunk;

/// Recycles disposed [`Chunk`] objects.
///
/// Released chunks must already be disposed; the pool never touches device
/// buffers. With a capacity set, surplus chunks are dropped.
#[derive(Debug, Default)]
pub struct ChunkPool {
    free: Vec<Chunk>,
    capacity: Option<usize>,
    created: u64,
    recycled: u64,
}

impl ChunkPool {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// A recycled chunk if one is free, otherwise a new one. Always unbound.
    pub fn acquire(&mut self) -> Chunk {
        match self.free.pop() {
            Some(chunk) => {
                self.recycled += 1;
                chunk
            }
            None => {
                self.created += 1;
                Chunk::new()
            }
        }
    }

    pub fn release(&mut self, mut chunk: Chunk) {
        chunk.unbind();
        if self.capacity.is_some_and(|cap| self.free.len() >= cap) {
            return;
        }
        self.free.push(chunk);
    }

    /// Chunks waiting for reuse.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Chunks constructed because the pool was empty.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Acquisitions served from the pool.
    pub fn recycled(&self) -> u64 {
        self.recycled
    }
}
