//! 元数据后端：检查点文档的持久化契约与三种实现。
//!
//! # 教案式说明
//! - **意图 (Why)**：检查点既可以存回源集群自身的一个系统 bucket（生产默认），也可以
//!   存一个本地 JSON 文件（单机调试、CI），只读模式则用于灾难排查时挂载只读副本。
//!   三者共享同一个 trait，引擎不关心具体落地方式。
//! - **键派生 (What)**：Couchbase 后端的 key 格式为
//!   `{key_prefix}{group_name}:checkpoint:{vb_id}#{crc32(hex(vb_id)):08x}`，
//!   CRC32 后缀只是为了在管理 UI 里把同一分组的文档聚簇展示，不参与任何一致性判断。

pub mod couchbase;
pub mod file;
pub mod readonly;

use crate::model::{CheckpointDocument, CheckpointMap, VbucketId};
use async_trait::async_trait;
use dcp_core::error::Result;

#[async_trait]
pub trait MetadataBackend: Send + Sync + 'static {
    async fn save(&self, vb_id: VbucketId, document: &CheckpointDocument) -> Result<()>;
    async fn load(&self, vb_id: VbucketId) -> Result<Option<CheckpointDocument>>;
    async fn load_all(&self) -> Result<CheckpointMap>;
    async fn clear(&self, vb_id: VbucketId) -> Result<()>;
}

/// Couchbase 后端使用的 key 派生规则，抽成自由函数以便被其它实现或测试复用。
pub fn derive_key(key_prefix: &str, group_name: &str, vb_id: VbucketId) -> String {
    let suffix = crc32fast::hash(format!("{vb_id:04x}").as_bytes());
    format!("{key_prefix}{group_name}:checkpoint:{vb_id}#{suffix:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key("_dcp:", "default", 7);
        let b = derive_key("_dcp:", "default", 7);
        assert_eq!(a, b);
        assert!(a.starts_with("_dcp:default:checkpoint:7#"));
    }

    #[test]
    fn derive_key_differs_per_vbucket() {
        let a = derive_key("_dcp:", "default", 7);
        let b = derive_key("_dcp:", "default", 8);
        assert_ne!(a, b);
    }
}
