pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub use http::HttpSource;

use crate::storage::ByteStream;

/// 源文件元数据（HEAD 请求获得）
///
/// 响应缺少对应头时字段为 None，不能当作 0 或纪元时间。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetadata {
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// 源文件内容
pub struct SourceBody {
    pub stream: ByteStream,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// 远程源接口
#[async_trait]
pub trait Source: Send + Sync {
    /// 读取完整响应体（目录页、JSON 接口）
    async fn fetch(&self, url: &str) -> Result<Bytes>;

    /// 仅获取元数据，不下载内容
    async fn head(&self, url: &str) -> Result<SourceMetadata>;

    /// 打开内容流
    async fn open(&self, url: &str) -> Result<SourceBody>;
}
