use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::BlockIterator;
use crate::sstable::footer::BlockHandle;
use crate::sstable::reader::Table;

/// Two-level iterator over one table: an index cursor selects data
/// blocks, a block cursor walks entries within the selected block.
///
/// Blocks are fetched lazily through the table's block cache as the
/// index cursor moves, in either direction.
pub struct TableIterator {
    table: Arc<Table>,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
    /// Handle of the block `data_iter` was built from, to skip redundant
    /// reads when the index lands on the same block again.
    data_handle: Option<BlockHandle>,
}

impl TableIterator {
    pub(crate) fn new(table: Arc<Table>) -> TableIterator {
        let index_iter = table.index_iter();
        TableIterator {
            table,
            index_iter,
            data_iter: None,
            data_handle: None,
        }
    }

    /// (Re)build the data cursor for the block the index currently
    /// points at.
    fn init_data_block(&mut self) -> Result<()> {
        if !self.index_iter.is_valid() {
            self.data_iter = None;
            self.data_handle = None;
            return Ok(());
        }
        let handle = BlockHandle::decode(self.index_iter.value())?;
        if self.data_handle == Some(handle) && self.data_iter.is_some() {
            return Ok(());
        }
        let block = self.table.read_block(handle)?;
        self.data_iter = Some(block.iter(self.table.comparator().clone()));
        self.data_handle = Some(handle);
        Ok(())
    }

    /// After forward movement: if the data cursor ran off its block, hop
    /// to the next block until an entry or the table end is reached.
    fn skip_empty_blocks_forward(&mut self) -> Result<()> {
        while self.data_iter.as_ref().is_none_or(|it| !it.is_valid()) {
            if !self.index_iter.is_valid() {
                self.data_iter = None;
                self.data_handle = None;
                return Ok(());
            }
            self.index_iter.next()?;
            self.init_data_block()?;
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_first()?;
            }
        }
        Ok(())
    }

    /// Mirror image for backward movement.
    fn skip_empty_blocks_backward(&mut self) -> Result<()> {
        while self.data_iter.as_ref().is_none_or(|it| !it.is_valid()) {
            if !self.index_iter.is_valid() {
                self.data_iter = None;
                self.data_handle = None;
                return Ok(());
            }
            self.index_iter.prev()?;
            self.init_data_block()?;
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl StorageIterator for TableIterator {
    fn is_valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.is_valid())
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator not positioned").key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter
            .as_ref()
            .expect("iterator not positioned")
            .value()
    }

    fn next(&mut self) -> Result<()> {
        self.data_iter
            .as_mut()
            .expect("iterator not positioned")
            .next()?;
        self.skip_empty_blocks_forward()
    }

    fn prev(&mut self) -> Result<()> {
        self.data_iter
            .as_mut()
            .expect("iterator not positioned")
            .prev()?;
        self.skip_empty_blocks_backward()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index_iter.seek(target)?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek(target)?;
        }
        self.skip_empty_blocks_forward()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first()?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_first()?;
        }
        self.skip_empty_blocks_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index_iter.seek_to_last()?;
        self.init_data_block()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_last()?;
        }
        self.skip_empty_blocks_backward()
    }
}
