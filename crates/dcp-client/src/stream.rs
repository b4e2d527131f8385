//! 流引擎：vBucket 生命周期状态机的唯一所有者，也是账本的唯一写入者。
//!
//! # 教案式说明
//! - **意图 (Why)**：集群客户端只管一次 RPC 调用的成败；把"这个 vBucket 现在该不该
//!   打开、打开失败要不要重开、收到变更之后偏移量该推进到哪"这些跨调用的状态，
//!   集中在一个地方，别的模块都不直接碰 [`crate::model::Offset`]。
//! - **回滚收尾 (What)**：[`ClusterClient::open_stream`] 已经在内部吸收了一次回滚，
//!   这里只需要把 [`OpenStreamOutcome::RolledBack`] 携带的新序号写回账本——
//!   不需要自己重试 RPC。
//! - **失败传播 (Trade-offs)**：监听器回调失败时绝不推进偏移量，哪怕事件已经到达；
//!   宁可在下次重启时重放这一条变更，也不能丢失它。

use crate::cluster::{
    ChangeEvent, ClusterClient, FailoverLogEntry, FilterOptions, Observer, OpenStreamOutcome,
    StreamEndReason,
};
use crate::discovery::diff_ownership;
use crate::ledger::Ledger;
use crate::model::{Offset, StreamState, VbucketId};
use async_trait::async_trait;
use dcp_core::error::{DcpError, Result};
use dcp_core::logging::{null_logger, SharedLogger};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// 面向最终用户的回调契约；比 [`Observer`] 窄——快照标记、回滚、failover 日志
/// 这些流控制细节由引擎内部吸收，不暴露给业务代码。
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    async fn mutation(&self, event: ChangeEvent) -> Result<()>;
    async fn deletion(&self, event: ChangeEvent) -> Result<()>;
    async fn expiration(&self, event: ChangeEvent) -> Result<()>;
}

type StateMap = Mutex<HashMap<VbucketId, StreamState>>;

struct StreamObserver {
    ledger: Arc<Ledger>,
    listener: Arc<dyn Listener>,
    states: Arc<StateMap>,
    logger: SharedLogger,
}

#[async_trait]
impl Observer for StreamObserver {
    async fn snapshot_marker(&self, vb_id: VbucketId, start_seq_no: u64, end_seq_no: u64) {
        let mut offset = self.ledger.get(vb_id).await.unwrap_or_default();
        offset.apply_snapshot_marker(start_seq_no, end_seq_no);
        self.ledger.set(vb_id, offset).await;
    }

    async fn mutation(&self, event: ChangeEvent) -> Result<()> {
        self.dispatch(event, |listener, event| {
            Box::pin(async move { listener.mutation(event).await })
        })
        .await
    }

    async fn deletion(&self, event: ChangeEvent) -> Result<()> {
        self.dispatch(event, |listener, event| {
            Box::pin(async move { listener.deletion(event).await })
        })
        .await
    }

    async fn expiration(&self, event: ChangeEvent) -> Result<()> {
        self.dispatch(event, |listener, event| {
            Box::pin(async move { listener.expiration(event).await })
        })
        .await
    }

    async fn stream_end(&self, vb_id: VbucketId, reason: StreamEndReason) {
        self.logger.info(
            "stream ended",
            &[("vb_id", &vb_id), ("reason", &format!("{reason:?}"))],
        );
        if reason != StreamEndReason::Rollback {
            let mut states = self.states.lock().unwrap();
            states.insert(vb_id, StreamState::Closed);
        }
    }

    async fn set_failover_logs(&self, vb_id: VbucketId, entries: Vec<FailoverLogEntry>) {
        if let Some(newest) = entries.first() {
            let mut offset = self.ledger.get(vb_id).await.unwrap_or_default();
            if offset.vb_uuid == 0 {
                offset.vb_uuid = newest.vb_uuid;
                self.ledger.set(vb_id, offset).await;
            }
        }
    }
}

impl StreamObserver {
    /// 监听器回调失败时绝不推进偏移量，只把错误包装后上抛；成功时才推进
    /// `seq_no` 并标记账本为脏。
    async fn dispatch<F>(&self, event: ChangeEvent, call: F) -> Result<()>
    where
        F: FnOnce(
            Arc<dyn Listener>,
            ChangeEvent,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>,
    {
        let vb_id = event.vb_id;
        let seq_no = event.seq_no;
        let result = call(self.listener.clone(), event).await;
        match result {
            Ok(()) => {
                let mut offset = self.ledger.get(vb_id).await.unwrap_or_default();
                offset.advance_seq_no(seq_no);
                self.ledger.set(vb_id, offset).await;
                Ok(())
            }
            Err(err) => {
                self.logger
                    .error("listener callback failed", &[("vb_id", &vb_id), ("error", &err)]);
                Err(DcpError::listener_failed(vb_id, seq_no, err))
            }
        }
    }
}

/// vBucket 流生命周期的编排者。
pub struct StreamEngine {
    cluster: Arc<dyn ClusterClient>,
    ledger: Arc<Ledger>,
    observer: Arc<StreamObserver>,
    states: Arc<StateMap>,
    filter: FilterOptions,
    logger: SharedLogger,
}

impl StreamEngine {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        ledger: Arc<Ledger>,
        listener: Arc<dyn Listener>,
        filter: FilterOptions,
    ) -> Self {
        let states: Arc<StateMap> = Arc::new(Mutex::new(HashMap::new()));
        let logger = null_logger();
        let observer = Arc::new(StreamObserver {
            ledger: ledger.clone(),
            listener,
            states: states.clone(),
            logger: logger.clone(),
        });
        Self {
            cluster,
            ledger,
            observer,
            states,
            filter,
            logger,
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    fn state_of(&self, vb_id: VbucketId) -> StreamState {
        self.states
            .lock()
            .unwrap()
            .get(&vb_id)
            .copied()
            .unwrap_or(StreamState::Closed)
    }

    fn transition(&self, vb_id: VbucketId, target: StreamState) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        let current = states.get(&vb_id).copied().unwrap_or(StreamState::Closed);
        if !current.can_transition_to(target) {
            return Err(DcpError::Protocol {
                context: "stream state machine",
                detail: format!("cannot go from {current:?} to {target:?} for vbucket {vb_id}"),
            });
        }
        states.insert(vb_id, target);
        Ok(())
    }

    /// 打开单个 vBucket 的流；若服务端在本次调用中吸收了一次回滚，按新序号更新账本。
    pub async fn open(&self, vb_id: VbucketId) -> Result<()> {
        self.transition(vb_id, StreamState::Opening)?;

        let mut offset = self.ledger.get(vb_id).await.unwrap_or_default();
        if offset.vb_uuid == 0 {
            let failover_log = self.cluster.failover_log(vb_id).await?;
            if let Some(newest) = failover_log.first() {
                offset.vb_uuid = newest.vb_uuid;
                self.ledger.set(vb_id, offset).await;
            }
        }

        let outcome = self
            .cluster
            .open_stream(
                vb_id,
                offset.vb_uuid,
                offset.seq_no,
                offset.start_seq_no,
                crate::cluster::INFINITE_END_SEQ_NO,
                self.observer.clone(),
                self.filter.clone(),
            )
            .await?;

        match outcome {
            OpenStreamOutcome::Opened => {}
            OpenStreamOutcome::RolledBack { rollback_seq_no } => {
                self.logger.warn(
                    "stream open absorbed a server-side rollback",
                    &[("vb_id", &vb_id), ("rollback_seq_no", &rollback_seq_no)],
                );
                let corrected = Offset::new(0, rollback_seq_no, rollback_seq_no, rollback_seq_no);
                self.ledger.set(vb_id, corrected).await;
            }
        }

        self.transition(vb_id, StreamState::Open)
    }

    /// 关闭单个 vBucket 的流。`graceful = false` 用于引擎整体关停时的快速路径，
    /// 仍然会等待集群客户端确认关闭，只是不做额外的重平衡记账。
    pub async fn close(&self, vb_id: VbucketId, graceful: bool) -> Result<()> {
        if self.state_of(vb_id) == StreamState::Closed {
            return Ok(());
        }
        self.transition(vb_id, StreamState::Closing)?;
        self.cluster.close_stream(vb_id).await?;
        self.transition(vb_id, StreamState::Closed)?;
        self.logger
            .info("stream closed", &[("vb_id", &vb_id), ("graceful", &graceful)]);
        Ok(())
    }

    /// vBuckets currently in `Open`/`Opening` state; used to drive shutdown without
    /// relying on a possibly-stale externally-tracked ownership list.
    pub fn open_vbuckets(&self) -> Vec<VbucketId> {
        self.currently_open()
    }

    fn currently_open(&self) -> Vec<VbucketId> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, state)| matches!(state, StreamState::Open | StreamState::Opening))
            .map(|(vb_id, _)| *vb_id)
            .collect()
    }

    /// 根据新的 vBucket 归属集合增量打开/关闭流。
    pub async fn rebalance(&self, owned_vb_ids: &[VbucketId]) -> Result<()> {
        let diff = diff_ownership(&self.currently_open(), owned_vb_ids);
        for vb_id in diff.removed {
            self.close(vb_id, true).await?;
        }
        for vb_id in diff.added {
            self.open(vb_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterClient;

    struct RecordingListener {
        mutations: Mutex<Vec<ChangeEvent>>,
        fail_next: std::sync::atomic::AtomicBool,
    }

    impl Default for RecordingListener {
        fn default() -> Self {
            Self {
                mutations: Mutex::new(Vec::new()),
                fail_next: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Listener for RecordingListener {
        async fn mutation(&self, event: ChangeEvent) -> Result<()> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(DcpError::config_invalid("forced failure"));
            }
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
    }

    fn engine(cluster: Arc<MockClusterClient>) -> (Arc<StreamEngine>, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let ledger = Arc::new(Ledger::new());
        let engine = Arc::new(StreamEngine::new(
            cluster,
            ledger,
            listener.clone(),
            FilterOptions::default(),
        ));
        (engine, listener)
    }

    fn sample_event(vb_id: VbucketId, seq_no: u64) -> ChangeEvent {
        ChangeEvent {
            vb_id,
            seq_no,
            vb_uuid: 42,
            key: bytes::Bytes::from_static(b"key"),
            value: bytes::Bytes::from_static(b"value"),
            cas: 1,
            flags: 0,
            expiry: 0,
            collection_id: 0,
        }
    }

    #[tokio::test]
    async fn open_transitions_to_open_and_records_the_call() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        let (engine, _listener) = engine(cluster.clone());
        engine.open(0).await.unwrap();
        assert_eq!(engine.state_of(0), StreamState::Open);
        assert_eq!(cluster.open_calls().len(), 1);
    }

    #[tokio::test]
    async fn open_absorbs_a_scripted_rollback_and_updates_the_ledger() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        cluster.script_rollback(0, 77);
        let (engine, _listener) = engine(cluster);
        engine.open(0).await.unwrap();
        assert_eq!(engine.state_of(0), StreamState::Open);
        let offset = engine.ledger.get(0).await.unwrap();
        assert_eq!(offset.seq_no, 77);
    }

    #[tokio::test]
    async fn successful_mutation_advances_the_ledger_seq_no() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        let (engine, listener) = engine(cluster);
        engine.open(0).await.unwrap();
        engine.observer.mutation(sample_event(0, 10)).await.unwrap();

        assert_eq!(engine.ledger.get(0).await.unwrap().seq_no, 10);
        assert_eq!(listener.mutations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_listener_callback_does_not_advance_the_ledger() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        let (engine, listener) = engine(cluster);
        engine.open(0).await.unwrap();
        listener
            .fail_next
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = engine.observer.mutation(sample_event(0, 10)).await;
        assert!(err.is_err());
        assert_eq!(engine.ledger.get(0).await.unwrap().seq_no, 0);
    }

    #[tokio::test]
    async fn rebalance_opens_added_and_closes_removed_vbuckets() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        let (engine, _listener) = engine(cluster.clone());
        engine.open(0).await.unwrap();
        engine.open(1).await.unwrap();

        engine.rebalance(&[1, 2]).await.unwrap();

        assert_eq!(engine.state_of(0), StreamState::Closed);
        assert_eq!(engine.state_of(1), StreamState::Open);
        assert_eq!(engine.state_of(2), StreamState::Open);
        assert_eq!(cluster.closed_streams(), vec![0]);
    }
}
