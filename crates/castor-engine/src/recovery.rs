//! Crash recovery: logical REDO into the tree.
//!
//! The replay handler ignores the page IDs recorded in the log; pages
//! are reallocated as the tree is rebuilt. What matters is the logical
//! operation sequence, which the tree re-applies idempotently (duplicate
//! inserts overwrite, deleting a missing key is a no-op).

use castor_common::error::CastorResult;
use castor_common::types::PageId;
use castor_common::{KeyCodec, ValueCodec};
use castor_tree::BTree;
use castor_wal::ReplayHandler;

pub(crate) struct RedoApplier<'a, K: KeyCodec, V: ValueCodec> {
    tree: &'a mut BTree<K, V>,
}

impl<'a, K: KeyCodec, V: ValueCodec> RedoApplier<'a, K, V> {
    pub(crate) fn new(tree: &'a mut BTree<K, V>) -> Self {
        Self { tree }
    }
}

impl<K: KeyCodec, V: ValueCodec> ReplayHandler<K> for RedoApplier<'_, K, V> {
    fn on_insert(&mut self, _page_id: PageId, key: &K, value: &[u8]) -> CastorResult<()> {
        let value = V::read_from(value)?;
        self.tree.insert(key.clone(), &value)
    }

    fn on_delete(&mut self, _page_id: PageId, key: &K) -> CastorResult<()> {
        self.tree.delete(key)?;
        Ok(())
    }

    fn on_update(
        &mut self,
        _page_id: PageId,
        key: &K,
        _old: &[u8],
        new: &[u8],
    ) -> CastorResult<()> {
        let value = V::read_from(new)?;
        self.tree.insert(key.clone(), &value)
    }
}
