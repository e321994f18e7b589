//! Bounded byte accumulator for newline-joined log lines.
//!
//! A [`Buffer`] never grows past its capacity. Each appended unit is followed
//! by a single `\n`. Once [`Buffer::seal`] is called the contents are frozen
//! into [`Bytes`] and can only be read.

use bytes::{BufMut, Bytes, BytesMut};

/// Outcome of [`Buffer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// The unit and its separator were written.
    Appended,

    /// Zero-length unit, nothing written.
    Skipped,

    /// The unit fits in an empty buffer but not in this one. Buffer untouched.
    Full,

    /// The unit can never fit, even alone.
    Rejected,
}

/// Accumulates units up to a fixed capacity.
#[derive(Debug)]
pub struct Buffer {
    bytes: BytesMut,
    capacity: usize,
}

impl Buffer {
    /// Create an empty buffer, preallocating the full capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `unit` followed by a newline, if it fits.
    pub fn push(&mut self, unit: &[u8]) -> Append {
        if !Self::fits_empty(unit.len(), self.capacity) {
            return Append::Rejected;
        }

        if unit.is_empty() {
            return Append::Skipped;
        }

        if self.bytes.len() + unit.len() + 1 > self.capacity {
            return Append::Full;
        }

        self.bytes.put_slice(unit);
        self.bytes.put_u8(b'\n');
        Append::Appended
    }

    /// Whether a unit of `len` bytes can fit in an empty buffer of `capacity`.
    pub fn fits_empty(len: usize, capacity: usize) -> bool {
        // unit plus its separator
        len < capacity
    }

    /// Freeze the contents. The buffer is consumed.
    pub fn seal(self) -> Bytes {
        self.bytes.freeze()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes left before the capacity ceiling.
    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }
}
