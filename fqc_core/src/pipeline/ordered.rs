use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{Error, Result};
use crate::types::BlockId;

/// Items that carry their position in the output sequence.
pub trait Sequenced {
    fn sequence_id(&self) -> BlockId;
}

/// Anything that accepts items in ascending sequence order.
pub trait BlockSink<T> {
    fn write_block(&mut self, item: T) -> Result<()>;
}

impl<T, S: BlockSink<T> + ?Sized> BlockSink<T> for &mut S {
    fn write_block(&mut self, item: T) -> Result<()> {
        (**self).write_block(item)
    }
}

/// Restores ascending order in front of a [`BlockSink`].
///
/// Only the writer stage touches it, so the pending map needs no lock.
pub struct OrderedWriter<T, S> {
    sink: S,
    next_expected: BlockId,
    pending: BTreeMap<BlockId, T>,
    written: u64,
}

impl<T: Sequenced, S: BlockSink<T>> OrderedWriter<T, S> {
    pub fn new(sink: S) -> Self {
        Self::starting_at(sink, 0)
    }

    /// For runs that begin mid-archive (range extraction).
    pub fn starting_at(sink: S, first: BlockId) -> Self {
        Self {
            sink,
            next_expected: first,
            pending: BTreeMap::new(),
            written: 0,
        }
    }

    /// Persists `item` if it is next, then drains whatever became ready;
    /// otherwise parks it. Returns the number of items persisted.
    pub fn write_block(&mut self, item: T) -> Result<usize> {
        let id = item.sequence_id();
        if id < self.next_expected || self.pending.contains_key(&id) {
            return Err(Error::Internal(format!("block {id} delivered twice")));
        }
        if id != self.next_expected {
            self.pending.insert(id, item);
            return Ok(0);
        }
        self.sink.write_block(item)?;
        self.next_expected += 1;
        let mut persisted = 1;
        while let Some(ready) = self.pending.remove(&self.next_expected) {
            self.sink.write_block(ready)?;
            self.next_expected += 1;
            persisted += 1;
        }
        self.written += persisted as u64;
        Ok(persisted)
    }

    pub fn next_expected(&self) -> BlockId {
        self.next_expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Flushes any parked items in ascending order and hands the sink back.
    pub fn finalize(mut self) -> Result<S> {
        if !self.pending.is_empty() {
            warn!(
                pending = self.pending.len(),
                next_expected = self.next_expected,
                "flushing blocks that arrived after a gap"
            );
            for (id, item) in std::mem::take(&mut self.pending) {
                self.sink.write_block(item)?;
                self.next_expected = id + 1;
                self.written += 1;
            }
        }
        Ok(self.sink)
    }

    /// Drops parked items without persisting them.
    pub fn into_sink(self) -> S {
        self.sink
    }
}
