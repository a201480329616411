use super::error::{reason, MirrorError};
use super::lister::Candidate;
use super::retry::{RetryError, RetryPolicy};
use crate::source::{Source, SourceMetadata};
use crate::storage::{ObjectMeta, Storage};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 需要上传的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReason {
    /// 目标不存在（新文件）
    NotFound,
    /// 目标查询出错，保守起见仍上传
    LookupFailed,
    /// 大小不同，或源时间更新
    Changed,
    /// 元数据不足，无法判定相同
    Inconclusive,
}

/// 判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Upload(UploadReason),
}

/// 比较配置
#[derive(Debug, Clone, Default)]
pub struct CompareConfig {
    /// 大小已知且不同时，源时间不晚于目标也跳过
    pub timestamp_overrides_size_mismatch: bool,
}

/// 单个候选文件的检测结果
#[derive(Debug)]
pub struct Detection {
    pub decision: Decision,
    /// 非 NotFound 的目标查询错误，需计为一次错误
    pub lookup_error: Option<MirrorError>,
}

/// 变更检测器
pub struct ChangeDetector {
    config: CompareConfig,
    retry: RetryPolicy,
}

impl ChangeDetector {
    pub fn new(config: CompareConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    /// 比较源与已存在的目标对象
    ///
    /// 大小相等是最强的信号；时间只在大小未知时作为后备，
    /// 且只在源不比目标新时跳过。
    pub fn compare(&self, source: &SourceMetadata, dest: &ObjectMeta) -> Decision {
        if let Some(size) = source.size {
            if size == dest.size {
                return Decision::Skip;
            }
        }

        let size_differs = source.size.is_some();
        if !size_differs || self.config.timestamp_overrides_size_mismatch {
            if let (Some(src_time), Some(dst_time)) = (source.last_modified, dest.last_modified) {
                if src_time <= dst_time {
                    return Decision::Skip;
                }
                return Decision::Upload(UploadReason::Changed);
            }
        }

        if size_differs {
            Decision::Upload(UploadReason::Changed)
        } else {
            Decision::Upload(UploadReason::Inconclusive)
        }
    }

    /// 检测单个候选文件
    ///
    /// 源元数据获取失败返回 `SourceMetadataUnavailable`，该文件本次既不跳过也不上传。
    pub async fn detect(
        &self,
        source: &dyn Source,
        storage: &dyn Storage,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<Detection, MirrorError> {
        let src_meta = self
            .retry
            .run(cancel, &format!("HEAD {}", candidate.source_url), || {
                source.head(&candidate.source_url)
            })
            .await
            .map_err(|e| match e {
                RetryError::Cancelled => MirrorError::Cancelled,
                RetryError::Exhausted(e) => MirrorError::SourceMetadataUnavailable {
                    url: candidate.source_url.clone(),
                    reason: reason(&e),
                },
            })?;

        let dst_meta = self
            .retry
            .run(cancel, &format!("stat {}", candidate.destination_key), || {
                storage.stat(&candidate.destination_key)
            })
            .await;

        let detection = match dst_meta {
            Ok(None) => Detection {
                decision: Decision::Upload(UploadReason::NotFound),
                lookup_error: None,
            },
            Ok(Some(dst_meta)) => {
                let decision = self.compare(&src_meta, &dst_meta);
                debug!(
                    "比较 {}: src_size={:?}, dst_size={}, src_time={:?}, dst_time={:?} -> {:?}",
                    candidate.name,
                    src_meta.size,
                    dst_meta.size,
                    src_meta.last_modified,
                    dst_meta.last_modified,
                    decision
                );
                Detection {
                    decision,
                    lookup_error: None,
                }
            }
            Err(RetryError::Cancelled) => return Err(MirrorError::Cancelled),
            Err(RetryError::Exhausted(e)) => Detection {
                decision: Decision::Upload(UploadReason::LookupFailed),
                lookup_error: Some(MirrorError::DestinationLookupFailed {
                    key: candidate.destination_key.clone(),
                    reason: reason(&e),
                }),
            },
        };

        Ok(detection)
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(CompareConfig::default(), RetryPolicy::default())
    }
}
