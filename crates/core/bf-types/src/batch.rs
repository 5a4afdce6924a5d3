//! Pooled unit of prefetched work.

use crate::blob::Blob;

/// One pooled unit of prefetched data plus optional labels.
///
/// Batches are allocated once when a pipeline is built and then recycled.
/// Ownership moves between the free-list, the worker and the consumer by
/// moving the boxed batch, so exactly one party can touch its buffers at a
/// time.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Fill counter assigned by the prefetch worker (1-based, 0 = never filled)
    sequence: u64,

    /// Data buffer
    data: Blob,

    /// Label buffer, present when the producer emits labels
    label: Option<Blob>,
}

impl Batch {
    /// Creates an empty batch, with a label buffer if `with_labels`.
    pub fn new(with_labels: bool) -> Self {
        Self {
            sequence: 0,
            data: Blob::new(),
            label: with_labels.then(Blob::new),
        }
    }

    /// Fill counter of the most recent fill.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sets the fill counter.
    #[inline]
    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Returns the data buffer.
    #[inline]
    pub fn data(&self) -> &Blob {
        &self.data
    }

    /// Returns the data buffer for writing.
    #[inline]
    pub fn data_mut(&mut self) -> &mut Blob {
        &mut self.data
    }

    /// Returns the label buffer, if any.
    #[inline]
    pub fn label(&self) -> Option<&Blob> {
        self.label.as_ref()
    }

    /// Returns the label buffer for writing, if any.
    #[inline]
    pub fn label_mut(&mut self) -> Option<&mut Blob> {
        self.label.as_mut()
    }

    /// Whether this batch carries labels.
    #[inline]
    pub fn has_labels(&self) -> bool {
        self.label.is_some()
    }

    /// Mutable access to data and labels at once.
    pub fn buffers_mut(&mut self) -> (&mut Blob, Option<&mut Blob>) {
        (&mut self.data, self.label.as_mut())
    }

    /// Size in bytes of the logical contents of all buffers.
    pub fn size_bytes(&self) -> usize {
        self.data.size_bytes() + self.label.as_ref().map_or(0, Blob::size_bytes)
    }
}
