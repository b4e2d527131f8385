//! 偏移量账本：唯一持有 [`Offset`] 结构体的地方。
//!
//! # 教案式说明
//! - **意图 (Why)**：流引擎、检查点管理器都需要读写每个 vBucket 的偏移量，但只有
//!   账本知道哪些条目自上次保存以来发生了变化（脏标记）。把这个职责集中到一处，
//!   避免脏标记逻辑散落在多个调用方里彼此不一致。
//! - **并发模型 (What)**：单把 [`tokio::sync::Mutex`] 保护全部状态；`lock`/`unlock`
//!   暴露一个粗粒度屏障，供检查点管理器在拍摄快照期间阻止新的 `set` 插入进来，
//!   代价是吞吐量换取正确性——检查点保存频率低，这个权衡是合理的。

use crate::model::{Offset, VbucketId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
struct LedgerState {
    offsets: HashMap<VbucketId, Offset>,
    dirty: HashSet<VbucketId>,
}

/// 账本在某一时刻的快照：全部偏移量、脏集合、以及是否存在任何脏条目。
pub struct LedgerSnapshot {
    pub offsets: HashMap<VbucketId, Offset>,
    pub dirty: HashSet<VbucketId>,
    pub any_dirty: bool,
}

/// 持有账本屏障期间返回的令牌；丢弃或传给 [`Ledger::unlock`] 都会释放屏障。
pub struct LedgerGuard(OwnedMutexGuard<LedgerState>);

#[derive(Clone)]
pub struct Ledger {
    state: Arc<Mutex<LedgerState>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
        }
    }

    pub async fn get(&self, vb_id: VbucketId) -> Option<Offset> {
        self.state.lock().await.offsets.get(&vb_id).copied()
    }

    /// 写入一个新偏移量并标记为脏，供下一次检查点保存捕获。
    pub async fn set(&self, vb_id: VbucketId, offset: Offset) {
        let mut state = self.state.lock().await;
        state.offsets.insert(vb_id, offset);
        state.dirty.insert(vb_id);
    }

    pub async fn snapshot_all(&self) -> LedgerSnapshot {
        let state = self.state.lock().await;
        LedgerSnapshot {
            offsets: state.offsets.clone(),
            dirty: state.dirty.clone(),
            any_dirty: !state.dirty.is_empty(),
        }
    }

    /// 清除给定 vBucket 集合的脏标记（保存成功后调用）。
    pub async fn unmark_dirty(&self, vb_ids: impl IntoIterator<Item = VbucketId>) {
        let mut state = self.state.lock().await;
        for vb_id in vb_ids {
            state.dirty.remove(&vb_id);
        }
    }

    /// 获取粗粒度屏障：持有期间，任何并发 `get`/`set`/`snapshot_all` 调用都会阻塞。
    pub async fn lock(&self) -> LedgerGuard {
        LedgerGuard(self.state.clone().lock_owned().await)
    }

    /// 显式释放屏障；等价于丢弃 [`LedgerGuard`]，但让调用点的意图更明显。
    pub fn unlock(&self, guard: LedgerGuard) {
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_marks_dirty_until_unmarked() {
        let ledger = Ledger::new();
        ledger.set(3, Offset::new(1, 10, 0, 10)).await;

        let snapshot = ledger.snapshot_all().await;
        assert!(snapshot.any_dirty);
        assert!(snapshot.dirty.contains(&3));

        ledger.unmark_dirty([3]).await;
        let snapshot = ledger.snapshot_all().await;
        assert!(!snapshot.any_dirty);
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_vbucket() {
        let ledger = Ledger::new();
        assert_eq!(ledger.get(99).await, None);
    }

    #[tokio::test]
    async fn lock_blocks_concurrent_set_until_released() {
        let ledger = Arc::new(Ledger::new());
        let guard = ledger.lock().await;

        let ledger2 = ledger.clone();
        let set_task = tokio::spawn(async move {
            ledger2.set(1, Offset::new(1, 1, 0, 1)).await;
        });

        tokio::task::yield_now().await;
        assert!(ledger.get(1).await.is_none());

        ledger.unlock(guard);
        set_task.await.unwrap();
        assert!(ledger.get(1).await.is_some());
    }
}
