//! 集群自托管的元数据后端：检查点文档就存放在源 bucket 的一个系统 key 下。

use super::{derive_key, MetadataBackend};
use crate::cluster::ClusterClient;
use crate::model::{CheckpointDocument, CheckpointMap, VbucketId};
use async_trait::async_trait;
use dcp_core::error::{DcpError, Result};
use std::sync::Arc;

pub struct CouchbaseMetadataBackend {
    cluster: Arc<dyn ClusterClient>,
    key_prefix: String,
    group_name: String,
    num_vbuckets: u16,
}

impl CouchbaseMetadataBackend {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        key_prefix: impl Into<String>,
        group_name: impl Into<String>,
        num_vbuckets: u16,
    ) -> Self {
        Self {
            cluster,
            key_prefix: key_prefix.into(),
            group_name: group_name.into(),
            num_vbuckets,
        }
    }

    fn key(&self, vb_id: VbucketId) -> String {
        derive_key(&self.key_prefix, &self.group_name, vb_id)
    }
}

#[async_trait]
impl MetadataBackend for CouchbaseMetadataBackend {
    async fn save(&self, vb_id: VbucketId, document: &CheckpointDocument) -> Result<()> {
        let bytes = serde_json::to_vec(document)
            .map_err(|source| DcpError::metadata_io("encode checkpoint document", source))?;
        self.cluster.set(&self.key(vb_id), bytes).await
    }

    async fn load(&self, vb_id: VbucketId) -> Result<Option<CheckpointDocument>> {
        match self.cluster.get(&self.key(vb_id)).await? {
            Some(bytes) => {
                let document = serde_json::from_slice(&bytes)
                    .map_err(|source| DcpError::metadata_io("decode checkpoint document", source))?;
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<CheckpointMap> {
        let mut map = CheckpointMap::new();
        for vb_id in 0..self.num_vbuckets {
            if let Some(document) = self.load(vb_id).await? {
                map.insert(vb_id, document);
            }
        }
        Ok(map)
    }

    async fn clear(&self, vb_id: VbucketId) -> Result<()> {
        self.cluster.delete(&self.key(vb_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterClient;
    use crate::model::Offset;

    #[tokio::test]
    async fn round_trips_a_single_checkpoint() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        let backend = CouchbaseMetadataBackend::new(cluster, "_dcp:", "default", 4);
        let doc = CheckpointDocument::from_offset(Offset::new(1, 10, 0, 10), "bucket-uuid");

        backend.save(2, &doc).await.unwrap();
        assert_eq!(backend.load(2).await.unwrap(), Some(doc));
        assert_eq!(backend.load(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_all_collects_every_saved_vbucket() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        let backend = CouchbaseMetadataBackend::new(cluster, "_dcp:", "default", 4);
        let doc = CheckpointDocument::from_offset(Offset::new(1, 10, 0, 10), "bucket-uuid");
        backend.save(0, &doc).await.unwrap();
        backend.save(3, &doc).await.unwrap();

        let all = backend.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key(&0));
        assert!(all.contains_key(&3));
    }

    #[tokio::test]
    async fn clear_removes_the_document() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        let backend = CouchbaseMetadataBackend::new(cluster, "_dcp:", "default", 4);
        let doc = CheckpointDocument::from_offset(Offset::new(1, 10, 0, 10), "bucket-uuid");
        backend.save(1, &doc).await.unwrap();
        backend.clear(1).await.unwrap();
        assert_eq!(backend.load(1).await.unwrap(), None);
    }
}
