//! 核心数据模型：偏移量、检查点文档、成员关系与流状态机。
//!
//! 这些类型是账本 ([`crate::ledger`])、检查点管理器 ([`crate::checkpoint`]) 与流引擎
//! ([`crate::stream`]) 之间传递的公共语言；它们本身不持有任何锁或 I/O 能力。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// vBucket 标识符。Couchbase 典型配置下每个 bucket 有 1024 个 vBucket。
pub type VbucketId = u16;

/// 单个 vBucket 的消费位置。
///
/// # 教案式说明
/// - **意图 (Why)**：`vb_uuid` 标识服务端的历史分支，`seq_no` 是最后一次成功处理的序号；
///   `start_seq_no`/`end_seq_no` 描述当前快照标记窗口。三者合起来是恢复一个流所需的
///   全部状态，不多不少。
/// - **不变量 (What)**：`start_seq_no <= seq_no <= end_seq_no` 在任意时刻都应成立；
///   [`Offset::advance_seq_no`] 与 [`Offset::apply_snapshot_marker`] 是仅有的两个
///   允许打破并重建该不变量的入口。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    pub vb_uuid: u64,
    pub seq_no: u64,
    pub start_seq_no: u64,
    pub end_seq_no: u64,
}

impl Offset {
    pub fn new(vb_uuid: u64, seq_no: u64, start_seq_no: u64, end_seq_no: u64) -> Self {
        Self {
            vb_uuid,
            seq_no,
            start_seq_no,
            end_seq_no,
        }
    }

    /// 构造一个代表“从头开始”的偏移量。
    pub fn zero() -> Self {
        Self::default()
    }

    /// 推进 `seq_no`；调用方负责保证 `seq_no` 落在当前快照窗口内。
    pub fn advance_seq_no(&mut self, seq_no: u64) {
        self.seq_no = seq_no;
    }

    /// 应用一条快照标记，返回窗口是否发生了变化（供脏标记判定使用）。
    pub fn apply_snapshot_marker(&mut self, start: u64, end: u64) -> bool {
        let changed = self.start_seq_no != start || self.end_seq_no != end;
        self.start_seq_no = start;
        self.end_seq_no = end;
        changed
    }
}

/// 快照标记窗口，独立于 [`Offset`] 表达，便于检查点文档序列化。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SnapshotWindow {
    #[serde(rename = "startSeqNo")]
    pub start_seq_no: u64,
    #[serde(rename = "endSeqNo")]
    pub end_seq_no: u64,
}

/// 单个 vBucket 的检查点负载。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    #[serde(rename = "vbUUID")]
    pub vb_uuid: u64,
    #[serde(rename = "seqNo")]
    pub seq_no: u64,
    pub snapshot: SnapshotWindow,
}

/// 持久化形态的检查点文档，`bucket_uuid` 防止在同名但重建过的 bucket 上误恢复。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub checkpoint: CheckpointPayload,
    #[serde(rename = "bucketUUID")]
    pub bucket_uuid: String,
}

impl CheckpointDocument {
    pub fn from_offset(offset: Offset, bucket_uuid: impl Into<String>) -> Self {
        Self {
            checkpoint: CheckpointPayload {
                vb_uuid: offset.vb_uuid,
                seq_no: offset.seq_no,
                snapshot: SnapshotWindow {
                    start_seq_no: offset.start_seq_no,
                    end_seq_no: offset.end_seq_no,
                },
            },
            bucket_uuid: bucket_uuid.into(),
        }
    }

    pub fn to_offset(&self) -> Offset {
        Offset::new(
            self.checkpoint.vb_uuid,
            self.checkpoint.seq_no,
            self.checkpoint.snapshot.start_seq_no,
            self.checkpoint.snapshot.end_seq_no,
        )
    }
}

pub type CheckpointMap = HashMap<VbucketId, CheckpointDocument>;

/// 成员关系模型：`member_number` 从 1 开始。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Membership {
    pub member_number: u32,
    pub total_members: u32,
}

impl Membership {
    pub fn single() -> Self {
        Self {
            member_number: 1,
            total_members: 1,
        }
    }
}

/// 单个 vBucket 的流生命周期状态机。
///
/// 合法跃迁：`Closed -> Opening -> Open -> Closing -> Closed`，外加旁支
/// `Open -> Rollback -> Opening`。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum StreamState {
    Closed,
    Opening,
    Open,
    Rollback,
    Closing,
}

impl StreamState {
    pub fn can_transition_to(self, target: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, target),
            (Closed, Opening)
                | (Opening, Open)
                | (Opening, Closed)
                | (Open, Rollback)
                | (Open, Closing)
                | (Open, Closed)
                | (Rollback, Opening)
                | (Closing, Closed)
        )
    }
}
