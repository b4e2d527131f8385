//! dcp-client：面向 Couchbase DCP 的集群感知变更数据捕获引擎。
//!
//! # 模块地图
//! - [`model`] — 偏移量、检查点文档、成员关系、流状态机等公共数据类型。
//! - [`config`] — 类型化配置与校验规则。
//! - [`cluster`] — 到源集群的异步 RPC 契约（[`cluster::ClusterClient`]）及其内存测试替身。
//! - [`metadata`] — 检查点持久化后端（Couchbase / 文件 / 只读装饰器）。
//! - [`ledger`] — 偏移量账本，唯一持有 [`model::Offset`] 的地方。
//! - [`checkpoint`] — 账本与元数据后端之间的保存/加载协调者。
//! - [`discovery`] — 纯函数式的 vBucket 区间分配算法。
//! - [`membership`] — 心跳式成员关系追踪与 leader 选举。
//! - [`health`] — 周期性健康检查与失败阈值通知。
//! - [`stream`] — 流生命周期状态机与监听器分发。
//! - [`engine`] — 把以上组件装配成一个可运行进程的顶层编排器。

pub mod checkpoint;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod health;
pub mod ledger;
pub mod membership;
pub mod metadata;
pub mod model;
pub mod stream;

pub use config::Config;
pub use engine::Engine;
pub use model::{CheckpointDocument, Membership, Offset, StreamState, VbucketId};
pub use stream::Listener;
