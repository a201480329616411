//! 测试用的源与存储替身

use crate::source::{Source, SourceBody, SourceMetadata};
use crate::storage::{ByteStream, MemoryStorage, ObjectEntry, ObjectMeta, Storage};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

#[derive(Clone)]
struct FakeFile {
    data: Bytes,
    size_header: Option<u64>,
    /// GET 响应声明的长度
    content_length: Option<u64>,
    last_modified: Option<DateTime<Utc>>,
}

/// 可编排的远程源
#[derive(Default)]
pub struct ScriptedSource {
    listing: Option<String>,
    listing_error: Option<String>,
    files: HashMap<String, FakeFile>,
    payloads: HashMap<String, Bytes>,
    failing_heads: HashSet<String>,
    broken_streams: HashSet<String>,
    stalled_streams: HashSet<String>,
    cancel_on_head: Option<CancellationToken>,
    fetch_calls: AtomicUsize,
    head_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, html: &str) -> Self {
        self.listing = Some(html.to_string());
        self
    }

    pub fn with_listing_error(mut self, message: &str) -> Self {
        self.listing_error = Some(message.to_string());
        self
    }

    /// 添加文件，HEAD 返回实际大小和指定日期（1 月 `last_day` 日）
    pub fn with_file(mut self, url: &str, data: &[u8], last_day: Option<u32>) -> Self {
        self.files.insert(
            url.to_string(),
            FakeFile {
                data: Bytes::copy_from_slice(data),
                size_header: Some(data.len() as u64),
                content_length: Some(data.len() as u64),
                last_modified: last_day.map(day),
            },
        );
        self
    }

    /// HEAD 不返回 Content-Length
    pub fn without_size(mut self, url: &str) -> Self {
        if let Some(file) = self.files.get_mut(url) {
            file.size_header = None;
        }
        self
    }

    /// fetch 返回的原始内容（JSON 接口）
    pub fn with_payload(mut self, url: &str, body: &str) -> Self {
        self.payloads
            .insert(url.to_string(), Bytes::copy_from_slice(body.as_bytes()));
        self
    }

    pub fn fail_head(mut self, url: &str) -> Self {
        self.failing_heads.insert(url.to_string());
        self
    }

    /// 内容流在传输中途出错
    pub fn break_stream(mut self, url: &str) -> Self {
        self.broken_streams.insert(url.to_string());
        self
    }

    /// GET 响应声明的长度与实际内容不一致
    pub fn with_content_length(mut self, url: &str, length: u64) -> Self {
        if let Some(file) = self.files.get_mut(url) {
            file.content_length = Some(length);
        }
        self
    }

    /// 内容流发送一半后不再有数据
    pub fn stall_stream(mut self, url: &str) -> Self {
        self.stalled_streams.insert(url.to_string());
        self
    }

    /// 第一次 HEAD 请求时触发取消（模拟运行中途取消）
    pub fn cancel_on_head(mut self, token: CancellationToken) -> Self {
        self.cancel_on_head = Some(token);
        self
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn file(&self, url: &str) -> Result<&FakeFile> {
        self.files
            .get(url)
            .ok_or_else(|| anyhow::anyhow!("HTTP status client error (404 Not Found) for url ({})", url))
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(body) = self.payloads.get(url) {
            return Ok(body.clone());
        }
        if let Some(message) = &self.listing_error {
            anyhow::bail!("{}", message);
        }
        match &self.listing {
            Some(html) => Ok(Bytes::copy_from_slice(html.as_bytes())),
            None => anyhow::bail!("HTTP status client error (404 Not Found) for url ({})", url),
        }
    }

    async fn head(&self, url: &str) -> Result<SourceMetadata> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_head {
            token.cancel();
        }
        if self.failing_heads.contains(url) {
            anyhow::bail!("HTTP status server error (503 Service Unavailable) for url ({})", url);
        }
        let file = self.file(url)?;
        Ok(SourceMetadata {
            size: file.size_header,
            last_modified: file.last_modified,
        })
    }

    async fn open(&self, url: &str) -> Result<SourceBody> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let file = self.file(url)?.clone();
        let content_length = file.content_length;

        let stream: ByteStream = if self.stalled_streams.contains(url) {
            let half = file.data.slice(..file.data.len() / 2);
            Box::pin(futures::stream::iter(vec![Ok(half)]).chain(futures::stream::pending()))
        } else if self.broken_streams.contains(url) {
            let half = file.data.slice(..file.data.len() / 2);
            Box::pin(futures::stream::iter(vec![
                Ok(half),
                Err(anyhow::anyhow!("connection reset by peer")),
            ]))
        } else {
            Box::pin(futures::stream::iter(vec![Ok(file.data)]))
        };

        Ok(SourceBody {
            stream,
            content_type: Some("text/plain".to_string()),
            content_length,
        })
    }
}

/// 可注入故障的存储包装
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_list: bool,
    failing_stats: HashSet<String>,
    failing_deletes: HashSet<String>,
    delete_calls: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            fail_list: false,
            failing_stats: HashSet::new(),
            failing_deletes: HashSet::new(),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn fail_stat(mut self, key: &str) -> Self {
        self.failing_stats.insert(key.to_string());
        self
    }

    /// 包含该 key 的删除批次失败
    pub fn fail_delete(mut self, key: &str) -> Self {
        self.failing_deletes.insert(key.to_string());
        self
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        if self.fail_list {
            anyhow::bail!("AccessDenied: list objects");
        }
        self.inner.list(prefix).await
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        if self.failing_stats.contains(key) {
            anyhow::bail!("Unexpected: service unavailable");
        }
        self.inner.stat(key).await
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        self.inner.read_stream(key).await
    }

    async fn write_stream(&self, key: &str, stream: ByteStream, content_type: &str) -> Result<u64> {
        self.inner.write_stream(key, stream, content_type).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if keys.iter().any(|k| self.failing_deletes.contains(k)) {
            anyhow::bail!("InternalError: delete objects");
        }
        self.inner.delete_many(keys).await
    }

    fn name(&self) -> &str {
        "flaky://"
    }
}
