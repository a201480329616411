use thiserror::Error;

/// 镜像同步错误
///
/// 单个候选文件的错误只计数，不会中断整个运行；
/// `SourceUnreachable` 和 `ReconciliationFailed` 是致命错误。
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("源目录不可访问 {url}: {reason}")]
    SourceUnreachable { url: String, reason: String },

    #[error("源文件元数据获取失败 {url}: {reason}")]
    SourceMetadataUnavailable { url: String, reason: String },

    #[error("目标对象查询失败 {key}: {reason}")]
    DestinationLookupFailed { key: String, reason: String },

    #[error("传输失败 {key}: {reason}")]
    TransferFailed { key: String, reason: String },

    #[error("清理过期对象失败 {prefix}: {reason}")]
    ReconciliationFailed { prefix: String, reason: String },

    #[error("通知发送失败: {0}")]
    NotificationFailed(String),

    #[error("同步已取消")]
    Cancelled,
}

impl MirrorError {
    /// 是否应中止整个运行
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MirrorError::SourceUnreachable { .. } | MirrorError::ReconciliationFailed { .. }
        )
    }
}

/// 展开 anyhow 错误链，便于日志排查
pub(crate) fn reason(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
