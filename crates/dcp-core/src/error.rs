//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为整个客户端提供集中的错误分类，覆盖传输、鉴权、协议、回滚、健康检查、
//!   元数据持久化、配置校验与监听器回调失败等场景；
//! - 每个变体都携带足够的结构化上下文（vBucket id、服务端序号、底层原因），
//!   既能驱动日志，也能被调用方按 [`ErrorKind`] 做程序化匹配，而不必下转型。
//!
//! ## 设计要求（What）
//! - 所有变体实现 `std::error::Error`（通过 `thiserror`），可在 `anyhow`/`?`
//!   场景下自然组合；
//! - `Rollback` 由集群客户端内部吸收，理论上不会逃逸到引擎之外，但仍保留为
//!   独立变体以便测试与日志观察其发生。

use std::io;

/// 客户端对外暴露的稳定错误分类。
///
/// `DcpError::kind()` 返回该枚举，供调用方做无需下转型的粗粒度判定。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    Transport,
    Auth,
    Protocol,
    Rollback,
    UnhealthyServices,
    MetadataIo,
    ConfigInvalid,
    ListenerFailed,
}

/// 统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：将集群客户端、元数据后端、检查点管理器等不同层次产生的
///   故障收敛为一个可观测的错误域，方便日志与重试策略做精确分类。
/// - **契约 (What)**：每个变体实现 [`ErrorKind`] 的一对一映射（见 [`DcpError::kind`]）；
///   可恢复的传输错误与不可恢复的配置错误使用不同变体，不靠字符串区分。
/// - **风险 (Trade-offs)**：使用 `String` 保存上下文换取可读性，牺牲少量堆分配；
///   若未来需要零分配版本，可引入 `Arc<str>`。
#[derive(Debug, thiserror::Error)]
pub enum DcpError {
    #[error("transport failure during `{context}`: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("authentication failed for user `{username}`")]
    Auth { username: String },

    #[error("protocol violation while decoding `{context}`: {detail}")]
    Protocol { context: &'static str, detail: String },

    #[error("server requested rollback for vbucket {vb_id} to seqno {rollback_seq_no} (client was at {failed_seq_no})")]
    Rollback {
        vb_id: u16,
        failed_seq_no: u64,
        rollback_seq_no: u64,
    },

    #[error("cluster services are unhealthy: {detail}")]
    UnhealthyServices { detail: String },

    #[error("metadata backend I/O failure during `{context}`: {source}")]
    MetadataIo {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid configuration: {detail}")]
    ConfigInvalid { detail: String },

    #[error("listener failed while handling vbucket {vb_id} seqno {seq_no}: {source}")]
    ListenerFailed {
        vb_id: u16,
        seq_no: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl DcpError {
    /// 返回该错误的稳定分类，供调用方做无需下转型的粗粒度匹配。
    pub fn kind(&self) -> ErrorKind {
        match self {
            DcpError::Transport { .. } => ErrorKind::Transport,
            DcpError::Auth { .. } => ErrorKind::Auth,
            DcpError::Protocol { .. } => ErrorKind::Protocol,
            DcpError::Rollback { .. } => ErrorKind::Rollback,
            DcpError::UnhealthyServices { .. } => ErrorKind::UnhealthyServices,
            DcpError::MetadataIo { .. } => ErrorKind::MetadataIo,
            DcpError::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            DcpError::ListenerFailed { .. } => ErrorKind::ListenerFailed,
        }
    }

    /// 该错误是否属于可由集群客户端自动重试的瞬时类别。
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }

    pub fn metadata_io(
        context: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DcpError::MetadataIo {
            context,
            source: Box::new(source),
        }
    }

    pub fn listener_failed(
        vb_id: u16,
        seq_no: u64,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DcpError::ListenerFailed {
            vb_id,
            seq_no,
            source: Box::new(source),
        }
    }

    pub fn config_invalid(detail: impl Into<String>) -> Self {
        DcpError::ConfigInvalid {
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DcpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_one_to_one() {
        let err = DcpError::Rollback {
            vb_id: 7,
            failed_seq_no: 40,
            rollback_seq_no: 42,
        };
        assert_eq!(err.kind(), ErrorKind::Rollback);
        assert!(!err.is_transient());
    }

    #[test]
    fn transport_is_transient() {
        let err = DcpError::Transport {
            context: "connect",
            source: io::Error::new(io::ErrorKind::TimedOut, "timed out"),
        };
        assert!(err.is_transient());
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
