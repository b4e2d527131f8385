//! 单机/调试用途的文件元数据后端：所有检查点挤在一个 JSON 文件里。
//!
//! 写入采用“写临时文件再 rename”的老办法，保证并发读者要么看到旧文件要么看到
//! 完整的新文件，不会撞见半写状态。

use super::MetadataBackend;
use crate::model::{CheckpointDocument, CheckpointMap, VbucketId};
use async_trait::async_trait;
use dcp_core::error::{DcpError, Result};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

pub struct FileMetadataBackend {
    path: PathBuf,
    // 整个文件的读改写序列化在这一把锁后面；检查点写入频率低，串行化不是瓶颈。
    guard: Mutex<()>,
}

impl FileMetadataBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    async fn read_map(&self) -> Result<CheckpointMap> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(CheckpointMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| DcpError::metadata_io("decode checkpoint file", source)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointMap::new()),
            Err(source) => Err(DcpError::metadata_io("read checkpoint file", source)),
        }
    }

    async fn write_map(&self, map: &CheckpointMap) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(map)
            .map_err(|source| DcpError::metadata_io("encode checkpoint file", source))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|source| DcpError::metadata_io("write checkpoint temp file", source))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| DcpError::metadata_io("rename checkpoint temp file", source))
    }
}

#[async_trait]
impl MetadataBackend for FileMetadataBackend {
    async fn save(&self, vb_id: VbucketId, document: &CheckpointDocument) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut map = self.read_map().await?;
        map.insert(vb_id, document.clone());
        self.write_map(&map).await
    }

    async fn load(&self, vb_id: VbucketId) -> Result<Option<CheckpointDocument>> {
        let _guard = self.guard.lock().await;
        Ok(self.read_map().await?.get(&vb_id).cloned())
    }

    async fn load_all(&self) -> Result<CheckpointMap> {
        let _guard = self.guard.lock().await;
        self.read_map().await
    }

    async fn clear(&self, vb_id: VbucketId) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut map = self.read_map().await?;
        map.remove(&vb_id);
        self.write_map(&map).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Offset;

    #[tokio::test]
    async fn round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let backend = FileMetadataBackend::new(&path);

        let doc = CheckpointDocument::from_offset(Offset::new(9, 50, 0, 50), "bucket-uuid");
        backend.save(5, &doc).await.unwrap();

        assert_eq!(backend.load(5).await.unwrap(), Some(doc.clone()));

        let reopened = FileMetadataBackend::new(&path);
        assert_eq!(reopened.load(5).await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn missing_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let backend = FileMetadataBackend::new(&path);
        assert!(backend.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_removes_a_single_entry_and_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let backend = FileMetadataBackend::new(&path);

        let doc = CheckpointDocument::from_offset(Offset::new(1, 1, 0, 1), "bucket-uuid");
        backend.save(0, &doc).await.unwrap();
        backend.save(1, &doc).await.unwrap();
        backend.clear(0).await.unwrap();

        let all = backend.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&1));
    }
}
