use crate::config::{AppConfig, SyncConfig};
use crate::core::detector::{ChangeDetector, CompareConfig, Decision};
use crate::core::error::MirrorError;
use crate::core::lister::{list_candidates, Candidate, SeenSet};
use crate::core::reconciler::Reconciler;
use crate::core::retry::RetryPolicy;
use crate::core::stats::{RunAggregator, RunResult};
use crate::core::transfer::TransferExecutor;
use crate::notify::Notifier;
use crate::source::Source;
use crate::storage::Storage;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 镜像目标：一个源目录对应一个目标前缀
#[derive(Debug, Clone)]
pub struct MirrorTarget {
    /// 源目录页地址
    pub source_url: String,
    /// 链接路径前缀
    pub link_prefix: String,
    /// 目标 key 前缀（非空时以 / 结尾）
    pub dest_prefix: String,
}

impl MirrorTarget {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            source_url: config.source.url.clone(),
            link_prefix: config.source.link_prefix.clone(),
            dest_prefix: config.destination.key_prefix(),
        }
    }
}

/// 工作任务共享的上下文
struct WorkerContext {
    source: Arc<dyn Source>,
    storage: Arc<dyn Storage>,
    detector: ChangeDetector,
    executor: TransferExecutor,
    aggregator: RunAggregator,
    cancel: CancellationToken,
}

/// 镜像同步引擎
pub struct MirrorEngine {
    source: Arc<dyn Source>,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    target: MirrorTarget,
    config: SyncConfig,
    notify_subject: String,
    cancel: CancellationToken,
}

impl MirrorEngine {
    pub fn new(
        source: Arc<dyn Source>,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        target: MirrorTarget,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            storage,
            notifier,
            target,
            config,
            notify_subject: "Source mirror sync failed".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_notify_subject(mut self, subject: impl Into<String>) -> Self {
        self.notify_subject = subject.into();
        self
    }

    /// 取消同步：正在进行的请求和退避等待会立即中断
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 与引擎共享的取消令牌
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_retries, self.config.retry_base_delay_ms)
    }

    /// 运行一次镜像同步
    ///
    /// 顺序：列出源目录 -> 并行检测/传输 -> 等待全部完成 -> 清理过期对象 -> 汇总。
    pub async fn run(&self) -> RunResult {
        let ctx = Arc::new(WorkerContext {
            source: self.source.clone(),
            storage: self.storage.clone(),
            detector: ChangeDetector::new(
                CompareConfig {
                    timestamp_overrides_size_mismatch: self.config.timestamp_overrides_size_mismatch,
                },
                self.retry_policy(),
            ),
            executor: TransferExecutor::new(self.retry_policy()),
            aggregator: RunAggregator::new(),
            cancel: self.cancel.clone(),
        });

        info!(
            "开始镜像同步 [{}]: {} -> {}/{}",
            ctx.aggregator.run_id(),
            self.target.source_url,
            self.storage.name(),
            self.target.dest_prefix
        );

        // 1. 列出源目录
        let candidates = match list_candidates(
            self.source.as_ref(),
            &self.target.source_url,
            &self.target.link_prefix,
            &self.target.dest_prefix,
        )
        .await
        {
            Ok(c) => c,
            Err(e) => return self.fail(&ctx.aggregator, e).await,
        };

        // 已见集合在任何工作任务开始前构建完成，之后只读
        let seen = SeenSet::from_candidates(&candidates);
        if seen.is_empty() {
            warn!("源目录没有候选文件，{} 下的对象都将被清理", self.target.dest_prefix);
        } else {
            debug!("已见 {} 个文件", seen.len());
        }

        if self.is_cancelled() {
            return self.cancelled_result(&ctx.aggregator);
        }

        // 2. 并行处理候选文件
        self.process_candidates(&ctx, candidates).await;

        // 所有工作任务已结束；取消时不进入删除阶段
        if self.is_cancelled() {
            return self.cancelled_result(&ctx.aggregator);
        }

        // 3. 清理过期对象
        let reconciler = Reconciler::new(self.config.delete_batch_size);
        if let Err(e) = reconciler
            .reconcile(
                self.storage.as_ref(),
                &self.target.dest_prefix,
                &seen,
                &ctx.aggregator,
            )
            .await
        {
            return self.fail(&ctx.aggregator, e).await;
        }

        // 4. 汇总
        let result = ctx.aggregator.finalize();
        info!(
            "镜像同步完成 [{}]: 上传 {}, 跳过 {}, 删除 {}, 错误 {} ({})",
            result.run_id, result.uploaded, result.skipped, result.deleted, result.errors, result.status
        );
        result
    }

    /// 并行处理所有候选文件，返回时所有工作任务均已结束
    async fn process_candidates(&self, ctx: &Arc<WorkerContext>, candidates: Vec<Candidate>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let mut handles = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if self.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let ctx = ctx.clone();

            let handle = tokio::spawn(async move {
                Self::process_candidate(&ctx, &candidate).await;
                drop(permit);
            });
            handles.push(handle);
        }

        // 等待所有任务完成（清理阶段的前置条件）
        for handle in handles {
            if let Err(e) = handle.await {
                error!("工作任务异常退出: {}", e);
                ctx.aggregator.record_error();
            }
        }
    }

    /// 处理单个候选文件；每个文件的最终结果只记录一次
    async fn process_candidate(ctx: &WorkerContext, candidate: &Candidate) {
        let detection = match ctx
            .detector
            .detect(
                ctx.source.as_ref(),
                ctx.storage.as_ref(),
                candidate,
                &ctx.cancel,
            )
            .await
        {
            Ok(d) => d,
            Err(MirrorError::Cancelled) => return,
            Err(e) => {
                error!("{}", e);
                ctx.aggregator.record_error();
                return;
            }
        };

        if let Some(lookup_error) = detection.lookup_error {
            warn!("{}，仍尝试上传", lookup_error);
            ctx.aggregator.record_error();
        }

        match detection.decision {
            Decision::Skip => {
                debug!("无变化，跳过: {}", candidate.name);
                ctx.aggregator.record_skipped();
            }
            Decision::Upload(reason) => {
                match ctx
                    .executor
                    .transfer(
                        ctx.source.as_ref(),
                        ctx.storage.as_ref(),
                        candidate,
                        &ctx.cancel,
                    )
                    .await
                {
                    Ok(bytes) => {
                        info!(
                            "已上传 {} -> {} ({} 字节, {:?})",
                            candidate.name, candidate.destination_key, bytes, reason
                        );
                        ctx.aggregator.record_uploaded(bytes);
                    }
                    Err(MirrorError::Cancelled) => {}
                    Err(e) => {
                        error!("{}", e);
                        ctx.aggregator.record_error();
                    }
                }
            }
        }
    }

    fn cancelled_result(&self, aggregator: &RunAggregator) -> RunResult {
        warn!("镜像同步已取消 [{}]", aggregator.run_id());
        aggregator.finalize_cancelled()
    }

    /// 致命错误：发送通知（尽力而为），返回 Failed
    async fn fail(&self, aggregator: &RunAggregator, err: MirrorError) -> RunResult {
        error!("镜像同步失败 [{}]: {}", aggregator.run_id(), err);
        let mut result = aggregator.finalize_failed(&err);

        let message = format!(
            "Run {} failed: {} (uploaded {}, skipped {}, deleted {}, errors {})",
            result.run_id, err, result.uploaded, result.skipped, result.deleted, result.errors
        );
        if let Err(e) = self.notifier.publish(&self.notify_subject, &message).await {
            let notify_err = MirrorError::NotificationFailed(format!("{:#}", e));
            error!("{}", notify_err);
            result.notification_error = Some(notify_err.to_string());
        } else {
            info!("已发送失败通知: {}", self.notify_subject);
        }

        result
    }
}
