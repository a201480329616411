//! 传输执行：源内容直接流式写入目标，不在内存中缓存整个文件

use super::error::{reason, MirrorError};
use super::lister::Candidate;
use super::retry::{RetryError, RetryPolicy};
use crate::source::Source;
use crate::storage::{ByteStream, Storage, DEFAULT_CONTENT_TYPE};
use futures::{StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 在流末尾校验总长度
///
/// 长度不符时以流错误结束，存储在提交前看到错误并放弃写入，目标保持原样。
fn enforce_length(stream: ByteStream, expected: u64) -> ByteStream {
    let received = Arc::new(AtomicU64::new(0));
    let counter = received.clone();

    let body = stream.inspect_ok(move |chunk| {
        counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    });
    let tail = futures::stream::once(async move {
        let actual = received.load(Ordering::Relaxed);
        (actual != expected).then(|| {
            Err::<bytes::Bytes, _>(anyhow::anyhow!(
                "内容长度不一致: 期望 {} 字节, 实际 {} 字节",
                expected,
                actual
            ))
        })
    })
    .filter_map(futures::future::ready);

    Box::pin(body.chain(tail))
}

pub struct TransferExecutor {
    retry: RetryPolicy,
}

impl TransferExecutor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// 单次传输尝试
    async fn transfer_once(
        source: &dyn Source,
        storage: &dyn Storage,
        candidate: &Candidate,
    ) -> anyhow::Result<u64> {
        let body = source.open(&candidate.source_url).await?;
        let content_type = body
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        debug!(
            "传输: {} -> {} ({:?} 字节, {})",
            candidate.source_url, candidate.destination_key, body.content_length, content_type
        );

        let stream = match body.content_length {
            Some(expected) => enforce_length(body.stream, expected),
            None => body.stream,
        };

        storage
            .write_stream(&candidate.destination_key, stream, &content_type)
            .await
    }

    /// 传输候选文件，失败时按策略重试，返回写入字节数
    pub async fn transfer(
        &self,
        source: &dyn Source,
        storage: &dyn Storage,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<u64, MirrorError> {
        self.retry
            .run(cancel, &format!("上传 {}", candidate.destination_key), || {
                Self::transfer_once(source, storage, candidate)
            })
            .await
            .map_err(|e| match e {
                RetryError::Cancelled => MirrorError::Cancelled,
                RetryError::Exhausted(e) => MirrorError::TransferFailed {
                    key: candidate.destination_key.clone(),
                    reason: reason(&e),
                },
            })
    }
}

impl Default for TransferExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
