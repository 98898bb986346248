// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Ring allocation over a GPU vertex buffer region.
//!
//! Sprites upload with a no-overwrite hint while the current region has
//! room, and wrap to the start with a discard hint once it is exhausted.
//! The discard orphans the old region on the device side, so the CPU never
//! stalls on a buffer range the GPU may still be drawing from.

use tracing::debug;

/// How a vertex range should be uploaded to the device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadHint {
    /// Write at the offset without touching in-flight ranges.
    NoOverwrite,
    /// Orphan the buffer and write from the start.
    Discard,
}

/// Write-cursor management for a fixed-capacity vertex buffer.
#[derive(Debug)]
pub struct VertexBufferRing {
    capacity: u32,
    cursor: u32,
}

impl VertexBufferRing {
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "vertex buffer capacity must be non-zero");
        Self {
            capacity,
            cursor: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reserves `count` vertices, growing the buffer when a single batch
    /// exceeds it. Returns the write offset and the upload hint.
    pub fn allocate(&mut self, count: u32) -> (u32, UploadHint) {
        if count > self.capacity {
            let mut capacity = self.capacity;
            while capacity < count {
                capacity *= 2;
            }
            debug!(
                old = self.capacity,
                new = capacity,
                "vertex buffer grown; discarding region"
            );
            self.capacity = capacity;
            self.cursor = count;
            return (0, UploadHint::Discard);
        }
        if self.cursor + count <= self.capacity {
            let offset = self.cursor;
            self.cursor += count;
            (offset, UploadHint::NoOverwrite)
        } else {
            self.cursor = count;
            (0, UploadHint::Discard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_allocations_do_not_overwrite() {
        let mut ring = VertexBufferRing::new(16);
        assert_eq!(ring.allocate(4), (0, UploadHint::NoOverwrite));
        assert_eq!(ring.allocate(8), (4, UploadHint::NoOverwrite));
        assert_eq!(ring.allocate(4), (12, UploadHint::NoOverwrite));
    }

    #[test]
    fn exhausted_region_wraps_with_discard() {
        let mut ring = VertexBufferRing::new(16);
        ring.allocate(12);
        assert_eq!(ring.allocate(8), (0, UploadHint::Discard));
        // The wrapped cursor keeps advancing without overwrite.
        assert_eq!(ring.allocate(4), (8, UploadHint::NoOverwrite));
    }

    #[test]
    fn oversized_batch_grows_capacity() {
        let mut ring = VertexBufferRing::new(16);
        let (offset, hint) = ring.allocate(40);
        assert_eq!(offset, 0);
        assert_eq!(hint, UploadHint::Discard);
        assert!(ring.capacity() >= 40);
    }
}
