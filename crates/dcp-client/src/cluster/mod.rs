//! 集群客户端契约：到源集群的低层异步 RPC 面。
//!
//! # 教案式说明
//! - **意图 (Why)**：DCP 编解码、鉴权握手、集群拓扑刷新等细节完全交给具体实现
//!   （生产环境对接真实 Couchbase SDK，测试环境使用 [`mock::MockClusterClient`]）；
//!   引擎本身只依赖这个 trait，从不关心字节是怎么到达线路上的。
//! - **契约 (What)**：每个方法都是 `async fn`，调用方通过 `tokio::time::timeout`
//!   施加截止时间；瞬时 `Transport` 失败由调用方结合 [`dcp_core::retry`] 重试。
//! - **回滚处理 (Where)**：`open_stream` 在服务端返回 Rollback 时就地吸收——重新以
//!   `vb_uuid=0, seq_no=R, start=end=R` 发起请求——并把结果报告为
//!   [`OpenStreamOutcome::RolledBack`]，而不是把 `DcpError::Rollback` 抛给调用方。
//!   账本的更新职责仍然留在流引擎，因为只有账本拥有 [`crate::model::Offset`]。

pub mod mock;

use crate::model::VbucketId;
use async_trait::async_trait;
use bytes::Bytes;
use dcp_core::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// 服务端历史分支点：`(vbUUID, seqNo)`。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FailoverLogEntry {
    pub vb_uuid: u64,
    pub seq_no: u64,
}

/// `open_stream` 的过滤选项。
#[derive(Clone, Debug, Default)]
pub struct FilterOptions {
    /// `None` 表示不过滤，流经所有 collection。
    pub collection_ids: Option<Vec<u32>>,
}

/// 终止一个流的原因，决定流引擎是否应在下次 `rebalance()` 时重新打开它。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamEndReason {
    /// 客户端主动发起的关闭（rebalance 收缩、引擎关闭）。
    ClosedByClient,
    /// 连接异常断开。
    Disconnected,
    /// 服务端因拓扑变化移动了该 vBucket；不应立即重开，等待下一次 rebalance。
    VbucketMoved,
    /// 回滚触发的流结束；重新打开由集群客户端的回调驱动，观察者无需采取行动。
    Rollback,
}

/// `open_stream` 成功路径的结果：要么直接打开，要么经历了一次服务端回滚。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenStreamOutcome {
    Opened,
    RolledBack { rollback_seq_no: u64 },
}

/// 单条 DCP 变更事件的公共字段，`mutation`/`deletion`/`expiration` 共用。
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub vb_id: VbucketId,
    pub seq_no: u64,
    pub vb_uuid: u64,
    pub key: Bytes,
    pub value: Bytes,
    pub cas: u64,
    pub flags: u32,
    pub expiry: u32,
    pub collection_id: u32,
}

/// 流引擎实现的观察者契约，由集群客户端的 DCP 会话驱动回调。
///
/// 所有方法都是 `async fn`；`mutation`/`deletion`/`expiration` 的 `Result` 直接关联
/// 监听器的执行结果——监听器失败时，引擎必须保证偏移量不会越过这条失败的事件。
#[async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn snapshot_marker(&self, vb_id: VbucketId, start_seq_no: u64, end_seq_no: u64);
    async fn mutation(&self, event: ChangeEvent) -> Result<()>;
    async fn deletion(&self, event: ChangeEvent) -> Result<()>;
    async fn expiration(&self, event: ChangeEvent) -> Result<()>;
    async fn stream_end(&self, vb_id: VbucketId, reason: StreamEndReason);
    async fn set_failover_logs(&self, vb_id: VbucketId, entries: Vec<FailoverLogEntry>);
}

/// 到源集群的低层异步 RPC 面：数据会话与 DCP 会话。
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// 仅当 memcached 与管理服务均至少有一个健康端点时成功。
    async fn ping(&self) -> Result<()>;

    async fn connect(&self) -> Result<()>;
    async fn dcp_connect(&self) -> Result<()>;

    async fn num_vbuckets(&self) -> Result<u16>;
    async fn bucket_uuid(&self) -> Result<String>;
    async fn vbucket_seqnos(&self) -> Result<HashMap<VbucketId, u64>>;
    async fn failover_log(&self, vb_id: VbucketId) -> Result<Vec<FailoverLogEntry>>;

    async fn open_stream(
        &self,
        vb_id: VbucketId,
        vb_uuid: u64,
        seq_no: u64,
        start_seq_no: u64,
        end_seq_no: u64,
        observer: Arc<dyn Observer>,
        filter: FilterOptions,
    ) -> Result<OpenStreamOutcome>;

    async fn close_stream(&self, vb_id: VbucketId) -> Result<()>;

    async fn collection_ids(&self, scope: &str, names: &[String]) -> Result<Vec<u32>>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// 无穷大的结束序号哨兵，匹配协议约定的 `0xFFFF_FFFF_FFFF_FFFF`。
pub const INFINITE_END_SEQ_NO: u64 = u64::MAX;
