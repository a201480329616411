//! 进程内存储，用于试运行（--dry-run）和测试

use super::{ByteStream, ObjectEntry, ObjectMeta, Storage};
use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    meta: ObjectMeta,
    content_type: String,
}

pub struct MemoryStorage {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// 直接放入对象，可指定修改时间
    pub async fn insert(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        last_modified: Option<DateTime<Utc>>,
    ) {
        let data = data.into();
        let meta = ObjectMeta {
            size: data.len() as u64,
            last_modified,
            etag: None,
        };
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                meta,
                content_type: super::DEFAULT_CONTENT_TYPE.to_string(),
            },
        );
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).map(|o| o.data.clone())
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.content_type.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectEntry {
                key: key.clone(),
                meta: obj.meta.clone(),
            })
            .collect())
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        Ok(self.objects.read().await.get(key).map(|o| o.meta.clone()))
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let data = self
            .get(key)
            .await
            .ok_or_else(|| anyhow::anyhow!("object not found: {}", key))?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn write_stream(
        &self,
        key: &str,
        mut stream: ByteStream,
        content_type: &str,
    ) -> Result<u64> {
        // 收齐所有数据后才放入，流出错时不留下对象
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let data = buf.freeze();
        let size = data.len() as u64;

        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                meta: ObjectMeta {
                    size,
                    last_modified: Some(Utc::now()),
                    etag: None,
                },
                content_type: content_type.to_string(),
            },
        );
        Ok(size)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut objects = self.objects.write().await;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory://"
    }
}
