//! コネクションレジストリ
//!
//! 識別子ごとの状態は次の 3 つのどれか 1 つだけ:
//!
//! ```text
//! unknown  : entries にも closed にも無い
//! open     : entries にある
//! closed   : closed にある（永久。二度と開かない）
//! ```
//!
//! サーバーだけが所有し、変更する。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use stream_crypto::SharedSecret;

use crate::address::ConnectionId;

/// 開いているコネクション 1 つ分のエントリ
pub struct Entry<C> {
    pub connection: Arc<C>,
    /// 初回接触で導出した共有鍵
    pub shared_secret: SharedSecret,
}

impl<C> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Entry {
            connection: Arc::clone(&self.connection),
            shared_secret: self.shared_secret.clone(),
        }
    }
}

/// 同じ識別子のエントリが既にある（正しい実装では起きない）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEntry(pub ConnectionId);

pub struct Registry<C> {
    entries: HashMap<ConnectionId, Entry<C>>,
    closed: HashSet<ConnectionId>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Registry {
            entries: HashMap::new(),
            closed: HashSet::new(),
        }
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Entry<C>> {
        self.entries.get(id)
    }

    pub fn is_closed(&self, id: &ConnectionId) -> bool {
        self.closed.contains(id)
    }

    /// エントリを追加する
    ///
    /// 既に開いている、または終了済みの識別子なら `DuplicateEntry`。
    pub fn insert(&mut self, id: ConnectionId, entry: Entry<C>) -> Result<(), DuplicateEntry> {
        if self.entries.contains_key(&id) || self.closed.contains(&id) {
            return Err(DuplicateEntry(id));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    /// エントリを削除して終了済みにする（冪等）
    ///
    /// 削除したエントリがあれば返す。
    pub fn remove_and_close(&mut self, id: &ConnectionId) -> Option<Entry<C>> {
        self.closed.insert(id.clone());
        self.entries.remove(id)
    }

    /// 開いているコネクションを識別子付きで返す
    pub fn open_entries(&self) -> Vec<(ConnectionId, Arc<C>)> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.connection)))
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.entries.len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }
}
