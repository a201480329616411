pub mod local;
pub mod memory;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;

use crate::config::{StorageConfig, StorageType};

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 默认内容类型
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 字节流，源下载和目标写入共用
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 对象元数据
///
/// 对象不存在由 `Storage::stat` 返回 `Ok(None)` 表示，不会用零值元数据代替。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    /// 部分存储不返回修改时间
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// 列表项
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub meta: ObjectMeta,
}

/// 对象存储抽象接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出前缀下的所有对象（不含目录）
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;

    /// 获取对象元数据，不存在时返回 None
    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// 流式读取对象
    async fn read_stream(&self, key: &str) -> Result<ByteStream>;

    /// 流式写入对象，返回写入的字节数
    ///
    /// 写入完成前对象不可见；流出错时不得留下部分写入的对象。
    async fn write_stream(&self, key: &str, stream: ByteStream, content_type: &str)
        -> Result<u64>;

    /// 写入整个对象
    async fn write(&self, key: &str, data: Bytes, content_type: &str) -> Result<u64> {
        let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(data) }));
        self.write_stream(key, stream, content_type).await
    }

    /// 批量删除，不存在的对象视为已删除
    async fn delete_many(&self, keys: &[String]) -> Result<()>;

    /// 检查对象是否存在
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.stat(key).await?.is_some())
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config.typ {
        StorageType::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Local storage requires path"))?;
            tracing::info!("初始化本地存储: {}", path);
            Ok(Arc::new(LocalStorage::new(path)?) as Arc<dyn Storage>)
        }
        StorageType::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires bucket"))?;
            let region = config
                .region
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires region"))?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(
                S3Storage::new(
                    bucket,
                    region,
                    config.access_key.as_deref(),
                    config.secret_key.as_deref(),
                    config.endpoint.clone(),
                    config.root.clone(),
                )
                .await?,
            ) as Arc<dyn Storage>)
        }
        StorageType::Memory => {
            tracing::info!("初始化内存存储");
            Ok(Arc::new(MemoryStorage::new()) as Arc<dyn Storage>)
        }
    }
}

/// 取 key 的最后一段作为文件名
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("bls/pr/pr.data.0.Current"), "pr.data.0.Current");
        assert_eq!(file_name("plain"), "plain");
        assert_eq!(file_name("dir/"), "");
    }

    #[tokio::test]
    async fn test_create_memory_storage() {
        let config = StorageConfig {
            typ: StorageType::Memory,
            ..Default::default()
        };
        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.name(), "memory://");
        assert!(!storage.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_s3_storage_requires_bucket() {
        let config = StorageConfig {
            typ: StorageType::S3,
            region: Some("us-east-1".to_string()),
            ..Default::default()
        };
        assert!(create_storage(&config).await.is_err());
    }
}
