//! 只读装饰器：包裹任意后端，丢弃所有写操作。
//!
//! 用于灾难排查时挂载生产检查点做只读分析，避免误写。对应 `metadata.read_only = true`。

use super::MetadataBackend;
use crate::model::{CheckpointDocument, CheckpointMap, VbucketId};
use async_trait::async_trait;
use dcp_core::error::Result;
use std::sync::Arc;

pub struct ReadOnlyMetadataBackend {
    inner: Arc<dyn MetadataBackend>,
}

impl ReadOnlyMetadataBackend {
    pub fn new(inner: Arc<dyn MetadataBackend>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MetadataBackend for ReadOnlyMetadataBackend {
    async fn save(&self, _vb_id: VbucketId, _document: &CheckpointDocument) -> Result<()> {
        Ok(())
    }

    async fn load(&self, vb_id: VbucketId) -> Result<Option<CheckpointDocument>> {
        self.inner.load(vb_id).await
    }

    async fn load_all(&self) -> Result<CheckpointMap> {
        self.inner.load_all().await
    }

    async fn clear(&self, _vb_id: VbucketId) -> Result<()> {
        Ok(())
    }
}
