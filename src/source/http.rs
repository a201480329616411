use super::{Source, SourceBody, SourceMetadata};
use crate::config::SourceConfig;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;

/// 基于 reqwest 的 HTTP 源
pub struct HttpSource {
    client: Client,
    head_timeout: Duration,
    get_timeout: Duration,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        // 部分站点要求带 Referer，否则返回 403
        let referer = config.referer.as_deref().unwrap_or(&config.url);
        if !referer.is_empty() {
            headers.insert(header::REFERER, HeaderValue::from_str(referer)?);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            // 内容流读取间隔超时，源站发送中途停顿时不会无限等待
            .read_timeout(Duration::from_secs(config.get_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            head_timeout: Duration::from_secs(config.head_timeout_secs),
            get_timeout: Duration::from_secs(config.get_timeout_secs),
        })
    }
}

/// 从响应头解析元数据
pub fn parse_metadata(headers: &HeaderMap) -> SourceMetadata {
    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<u64>().ok());

    let last_modified = headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    SourceMetadata {
        size,
        last_modified,
    }
}

/// 解析 HTTP 日期（RFC 2822 格式，如 "Wed, 21 Oct 2015 07:28:00 GMT"）
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .timeout(self.get_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    async fn head(&self, url: &str) -> Result<SourceMetadata> {
        let response = self
            .client
            .head(url)
            .timeout(self.head_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(parse_metadata(response.headers()))
    }

    async fn open(&self, url: &str) -> Result<SourceBody> {
        // 内容流不设整体超时（大文件下载时间不可预估），只受读取间隔超时限制
        let response = self.client.get(url).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = parse_metadata(response.headers()).size;

        Ok(SourceBody {
            stream: Box::pin(response.bytes_stream().map_err(anyhow::Error::from)),
            content_type,
            content_length,
        })
    }
}
