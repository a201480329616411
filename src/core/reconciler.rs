use super::error::{reason, MirrorError};
use super::lister::SeenSet;
use super::stats::RunAggregator;
use crate::storage::{ObjectEntry, Storage};
use tracing::{error, info};

/// 清理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub stale: usize,
    pub deleted: usize,
    pub failed_batches: usize,
}

/// 清理器：删除目标前缀下源站已不存在的对象
pub struct Reconciler {
    batch_size: usize,
}

impl Reconciler {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// 计算过期对象：目标名称集合 - 已见名称集合
    ///
    /// 名称为去掉前缀后的相对路径；前缀下的嵌套对象不会出现在已见集合中，因此也视为过期。
    pub fn stale_keys(entries: &[ObjectEntry], prefix: &str, seen: &SeenSet) -> Vec<String> {
        let mut stale: Vec<String> = entries
            .iter()
            .filter_map(|entry| {
                let name = entry.key.strip_prefix(prefix)?;
                (!name.is_empty() && !seen.contains(name)).then(|| entry.key.clone())
            })
            .collect();
        stale.sort();
        stale.dedup();
        stale
    }

    /// 执行清理
    ///
    /// 列表失败返回 `ReconciliationFailed`（已完成的上传不回滚）；
    /// 单个删除批次失败只计一次错误，继续下一批。
    pub async fn reconcile(
        &self,
        storage: &dyn Storage,
        prefix: &str,
        seen: &SeenSet,
        aggregator: &RunAggregator,
    ) -> Result<ReconcileOutcome, MirrorError> {
        let entries = storage
            .list(prefix)
            .await
            .map_err(|e| MirrorError::ReconciliationFailed {
                prefix: prefix.to_string(),
                reason: reason(&e),
            })?;

        let stale = Self::stale_keys(&entries, prefix, seen);
        let mut outcome = ReconcileOutcome {
            stale: stale.len(),
            ..Default::default()
        };

        if stale.is_empty() {
            info!("目标 {} 下没有需要清理的对象", prefix);
            return Ok(outcome);
        }

        info!("目标 {} 下有 {} 个过期对象", prefix, stale.len());

        for batch in stale.chunks(self.batch_size) {
            match storage.delete_many(batch).await {
                Ok(()) => {
                    for key in batch {
                        info!("DELETED: {}", key);
                    }
                    aggregator.record_deleted(batch.len() as u64);
                    outcome.deleted += batch.len();
                }
                Err(e) => {
                    error!(
                        "批量删除失败 ({} 个对象, 首个 {}): {:#}",
                        batch.len(),
                        batch[0],
                        e
                    );
                    aggregator.record_error();
                    outcome.failed_batches += 1;
                }
            }
        }

        Ok(outcome)
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lister::Candidate;
    use crate::core::testing::FlakyStorage;
    use crate::storage::{MemoryStorage, ObjectMeta};

    fn seen(names: &[&str]) -> SeenSet {
        let candidates: Vec<Candidate> = names
            .iter()
            .map(|n| Candidate {
                name: n.to_string(),
                source_url: format!("https://example.org/{}", n),
                destination_key: format!("mirror/{}", n),
            })
            .collect();
        SeenSet::from_candidates(&candidates)
    }

    fn entry(key: &str) -> ObjectEntry {
        ObjectEntry {
            key: key.to_string(),
            meta: ObjectMeta {
                size: 1,
                last_modified: None,
                etag: None,
            },
        }
    }

    #[test]
    fn test_stale_keys_set_difference() {
        let entries = vec![
            entry("mirror/a.txt"),
            entry("mirror/c.txt"),
            entry("mirror/nested/a.txt"),
            entry("other/c.txt"),
        ];
        let stale = Reconciler::stale_keys(&entries, "mirror/", &seen(&["a.txt", "b.txt"]));
        assert_eq!(stale, vec!["mirror/c.txt", "mirror/nested/a.txt"]);
    }

    #[tokio::test]
    async fn test_reconcile_deletes_in_batches() {
        let storage = FlakyStorage::new(MemoryStorage::new());
        for name in ["keep", "s1", "s2", "s3", "s4", "s5"] {
            storage.inner().insert(&format!("mirror/{}", name), &b"x"[..], None).await;
        }
        storage.inner().insert("elsewhere/s1", &b"x"[..], None).await;

        let aggregator = RunAggregator::new();
        let outcome = Reconciler::new(2)
            .reconcile(&storage, "mirror/", &seen(&["keep"]), &aggregator)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome {
                stale: 5,
                deleted: 5,
                failed_batches: 0
            }
        );
        assert_eq!(storage.delete_calls(), 3);
        assert_eq!(storage.inner().keys().await, vec!["elsewhere/s1", "mirror/keep"]);
        assert_eq!(aggregator.finalize().deleted, 5);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.insert("mirror/a", &b"x"[..], None).await;
        storage.insert("mirror/gone", &b"x"[..], None).await;
        let reconciler = Reconciler::default();
        let seen = seen(&["a"]);

        let first = RunAggregator::new();
        reconciler.reconcile(&storage, "mirror/", &seen, &first).await.unwrap();
        let second = RunAggregator::new();
        let outcome = reconciler
            .reconcile(&storage, "mirror/", &seen, &second)
            .await
            .unwrap();

        assert_eq!(first.finalize().deleted, 1);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(second.finalize().deleted, 0);
    }

    #[tokio::test]
    async fn test_list_failure_is_fatal() {
        let storage = FlakyStorage::new(MemoryStorage::new()).fail_list();
        let err = Reconciler::default()
            .reconcile(&storage, "mirror/", &seen(&[]), &RunAggregator::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::ReconciliationFailed { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_failed_batch_counts_error_and_continues() {
        let storage = FlakyStorage::new(MemoryStorage::new()).fail_delete("mirror/s1");
        for name in ["s1", "s2", "s3"] {
            storage.inner().insert(&format!("mirror/{}", name), &b"x"[..], None).await;
        }

        let aggregator = RunAggregator::new();
        let outcome = Reconciler::new(2)
            .reconcile(&storage, "mirror/", &seen(&[]), &aggregator)
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.failed_batches, 1);
        let result = aggregator.finalize();
        assert_eq!((result.deleted, result.errors), (1, 1));
        assert_eq!(storage.inner().keys().await, vec!["mirror/s1", "mirror/s2"]);
    }
}
