//! Fixed-capacity PCM staging buffer

/// Collects one audio chunk worth of samples before it is sent
pub struct StagingBuffer {
    samples: Box<[i16]>,
    len: usize,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0i16; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append a sample and report whether the buffer is now full.
    ///
    /// A full buffer rejects further samples until it is cleared.
    pub fn push(&mut self, sample: i16) -> bool {
        if self.is_full() {
            return true;
        }
        self.samples[self.len] = sample;
        self.len += 1;
        self.is_full()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.samples.len()
    }
}
