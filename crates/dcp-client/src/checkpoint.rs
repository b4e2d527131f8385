//! 检查点管理器：账本与元数据后端之间的保存/加载协调者。
//!
//! # 教案式说明
//! - **意图 (Why)**：账本只知道"谁脏了"，后端只知道"怎么落盘"；检查点管理器把两者
//!   粘合起来，并在加载阶段处理"找不到历史检查点"的策略分歧——`auto_reset=latest`
//!   从源集群当前高水位开始（典型用于新拉起的消费者组，避免重放全部历史），
//!   `auto_reset=none` 则老实从零开始。
//! - **脏跳过优化 (What)**：`save()` 在账本完全干净时直接返回，不触碰后端，避免
//!   周期性自动保存在空闲期间产生无意义的 I/O。

use crate::cluster::ClusterClient;
use crate::config::AutoResetPolicy;
use crate::ledger::Ledger;
use crate::metadata::MetadataBackend;
use crate::model::{CheckpointDocument, Offset, VbucketId};
use dcp_core::error::Result;
use dcp_core::logging::{null_logger, SharedLogger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct CheckpointManager {
    backend: Arc<dyn MetadataBackend>,
    cluster: Arc<dyn ClusterClient>,
    ledger: Arc<Ledger>,
    bucket_uuid: String,
    auto_reset: AutoResetPolicy,
    logger: SharedLogger,
    // 保存操作串行化；与账本自身的屏障是两把不同的锁，
    // 这里只防止两个并发的 save() 调用互相踩踏后端写入。
    save_lock: Mutex<()>,
}

impl CheckpointManager {
    pub fn new(
        backend: Arc<dyn MetadataBackend>,
        cluster: Arc<dyn ClusterClient>,
        ledger: Arc<Ledger>,
        bucket_uuid: impl Into<String>,
        auto_reset: AutoResetPolicy,
    ) -> Self {
        Self {
            backend,
            cluster,
            ledger,
            bucket_uuid: bucket_uuid.into(),
            auto_reset,
            logger: null_logger(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    /// 为给定 vBucket 集合确定起始偏移量并写入账本；已持久化的检查点原样恢复，
    /// 缺失的按 `auto_reset` 策略决定。
    pub async fn load(&self, vb_ids: &[VbucketId]) -> Result<()> {
        let seqnos = self.cluster.vbucket_seqnos().await?;

        for &vb_id in vb_ids {
            let persisted = self.backend.load(vb_id).await?;
            match persisted {
                Some(doc) if doc.bucket_uuid == self.bucket_uuid => {
                    self.ledger.set(vb_id, doc.to_offset()).await;
                    self.ledger.unmark_dirty([vb_id]).await;
                }
                other => {
                    if other.is_some() {
                        self.logger.warn(
                            "discarding checkpoint from a different bucket incarnation",
                            &[("vb_id", &vb_id)],
                        );
                    }
                    let offset = match self.auto_reset {
                        AutoResetPolicy::Latest => {
                            let high = seqnos.get(&vb_id).copied().unwrap_or(0);
                            Offset::new(0, high, high, high)
                        }
                        AutoResetPolicy::None => Offset::zero(),
                    };
                    self.ledger.set(vb_id, offset).await;
                    // A vBucket with seqNo 0 has nothing to persist yet; only a
                    // positive seqNo represents real progress worth a dirty flag.
                    if offset.seq_no == 0 {
                        self.ledger.unmark_dirty([vb_id]).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// 保存账本中全部脏条目；账本完全干净时直接跳过。
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.ledger.snapshot_all().await;
        if !snapshot.any_dirty {
            return Ok(());
        }

        let mut saved = Vec::with_capacity(snapshot.dirty.len());
        for vb_id in &snapshot.dirty {
            let offset = match snapshot.offsets.get(vb_id) {
                Some(offset) => *offset,
                None => continue,
            };
            let document = CheckpointDocument::from_offset(offset, self.bucket_uuid.clone());
            self.backend.save(*vb_id, &document).await?;
            saved.push(*vb_id);
        }

        self.ledger.unmark_dirty(saved.iter().copied()).await;
        self.logger
            .info("checkpoint saved", &[("count", &saved.len())]);
        Ok(())
    }

    pub async fn clear(&self, vb_id: VbucketId) -> Result<()> {
        self.backend.clear(vb_id).await
    }

    /// 以固定周期反复调用 [`Self::save`]，用于 `checkpoint.type = auto`。
    /// 返回的句柄在被丢弃时并不会停止任务；调用方应当 `abort()` 它。
    pub fn spawn_auto_save(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.save().await {
                    self.logger
                        .error("periodic checkpoint save failed", &[("error", &err)]);
                }
            }
        })
    }
}
