//! 内存集群客户端：测试替身，不依赖任何真实网络连接。
//!
//! # 教案式说明
//! - **意图 (Why)**：集群客户端的真实实现需要一个完整的 Couchbase 二进制协议栈，
//!   超出本 crate 的职责范围；但引擎的行为（回滚恢复、重平衡、检查点往返）必须能在
//!   CI 中被确定性地验证,因此提供这个内存替身。
//! - **契约 (What)**：`get`/`set`/`delete` 用 [`DashMap`] 模拟元数据桶的 KV 存储；
//!   `script_rollback` 让测试预先安排某个 vBucket 的首次 `open_stream` 触发一次回滚。

use super::{
    ChangeEvent, ClusterClient, FailoverLogEntry, FilterOptions, Observer, OpenStreamOutcome,
};
use crate::model::VbucketId;
use async_trait::async_trait;
use dashmap::DashMap;
use dcp_core::error::{DcpError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    num_vbuckets: u16,
    bucket_uuid: String,
    vbucket_seqnos: HashMap<VbucketId, u64>,
    failover_logs: HashMap<VbucketId, Vec<FailoverLogEntry>>,
    pending_rollback: HashMap<VbucketId, u64>,
    open_calls: Vec<(VbucketId, u64, u64)>,
    closed: Vec<VbucketId>,
}

/// 内存集群客户端，供单元测试与集成测试共用。
pub struct MockClusterClient {
    state: Mutex<MockState>,
    kv: DashMap<String, Vec<u8>>,
    healthy: AtomicBool,
}

impl MockClusterClient {
    pub fn new(num_vbuckets: u16, bucket_uuid: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MockState {
                num_vbuckets,
                bucket_uuid: bucket_uuid.into(),
                ..Default::default()
            }),
            kv: DashMap::new(),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn set_vbucket_seqno(&self, vb_id: VbucketId, seq_no: u64) {
        self.state.lock().unwrap().vbucket_seqnos.insert(vb_id, seq_no);
    }

    pub fn set_failover_log(&self, vb_id: VbucketId, entries: Vec<FailoverLogEntry>) {
        self.state
            .lock()
            .unwrap()
            .failover_logs
            .insert(vb_id, entries);
    }

    /// 安排下一次对该 vBucket 的 `open_stream` 调用触发一次回滚到 `rollback_seq_no`。
    pub fn script_rollback(&self, vb_id: VbucketId, rollback_seq_no: u64) {
        self.state
            .lock()
            .unwrap()
            .pending_rollback
            .insert(vb_id, rollback_seq_no);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn open_calls(&self) -> Vec<(VbucketId, u64, u64)> {
        self.state.lock().unwrap().open_calls.clone()
    }

    pub fn closed_streams(&self) -> Vec<VbucketId> {
        self.state.lock().unwrap().closed.clone()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn ping(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DcpError::UnhealthyServices {
                detail: "mock cluster marked unhealthy".to_owned(),
            })
        }
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn dcp_connect(&self) -> Result<()> {
        Ok(())
    }

    async fn num_vbuckets(&self) -> Result<u16> {
        Ok(self.state.lock().unwrap().num_vbuckets)
    }

    async fn bucket_uuid(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().bucket_uuid.clone())
    }

    async fn vbucket_seqnos(&self) -> Result<HashMap<VbucketId, u64>> {
        Ok(self.state.lock().unwrap().vbucket_seqnos.clone())
    }

    async fn failover_log(&self, vb_id: VbucketId) -> Result<Vec<FailoverLogEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .failover_logs
            .get(&vb_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_stream(
        &self,
        vb_id: VbucketId,
        vb_uuid: u64,
        seq_no: u64,
        _start_seq_no: u64,
        _end_seq_no: u64,
        observer: Arc<dyn Observer>,
        _filter: FilterOptions,
    ) -> Result<OpenStreamOutcome> {
        let rollback = {
            let mut state = self.state.lock().unwrap();
            state.open_calls.push((vb_id, vb_uuid, seq_no));
            state.pending_rollback.remove(&vb_id)
        };

        if let Some(rollback_seq_no) = rollback {
            observer
                .set_failover_logs(
                    vb_id,
                    vec![FailoverLogEntry {
                        vb_uuid: 0,
                        seq_no: rollback_seq_no,
                    }],
                )
                .await;
            return Ok(OpenStreamOutcome::RolledBack { rollback_seq_no });
        }

        Ok(OpenStreamOutcome::Opened)
    }

    async fn close_stream(&self, vb_id: VbucketId) -> Result<()> {
        self.state.lock().unwrap().closed.push(vb_id);
        Ok(())
    }

    async fn collection_ids(&self, _scope: &str, names: &[String]) -> Result<Vec<u32>> {
        Ok((0..names.len() as u32).collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.kv.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.kv.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.kv.remove(key);
        Ok(())
    }
}

/// 测试中常用的“静默观察者”——记录事件但不执行任何业务逻辑。
pub struct RecordingObserver {
    pub markers: Mutex<Vec<(VbucketId, u64, u64)>>,
    pub mutations: Mutex<Vec<ChangeEvent>>,
    pub failover_logs: Mutex<HashMap<VbucketId, Vec<FailoverLogEntry>>>,
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self {
            markers: Mutex::new(Vec::new()),
            mutations: Mutex::new(Vec::new()),
            failover_logs: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Observer for RecordingObserver {
    async fn snapshot_marker(&self, vb_id: VbucketId, start_seq_no: u64, end_seq_no: u64) {
        self.markers
            .lock()
            .unwrap()
            .push((vb_id, start_seq_no, end_seq_no));
    }

    async fn mutation(&self, event: ChangeEvent) -> Result<()> {
        self.mutations.lock().unwrap().push(event);
        Ok(())
    }

    async fn deletion(&self, event: ChangeEvent) -> Result<()> {
        self.mutations.lock().unwrap().push(event);
        Ok(())
    }

    async fn expiration(&self, event: ChangeEvent) -> Result<()> {
        self.mutations.lock().unwrap().push(event);
        Ok(())
    }

    async fn stream_end(&self, _vb_id: VbucketId, _reason: super::StreamEndReason) {}

    async fn set_failover_logs(&self, vb_id: VbucketId, entries: Vec<FailoverLogEntry>) {
        self.failover_logs.lock().unwrap().insert(vb_id, entries);
    }
}
