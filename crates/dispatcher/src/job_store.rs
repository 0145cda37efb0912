use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use platform_domain::entities::{Job, JobRecordState};

/// 结果归账时定位到的执行记录
#[derive(Debug, Clone)]
pub struct CompletedRecord {
    pub job_id: Uuid,
    pub workflow_id: i64,
    pub workflow_name: String,
    pub module_hash: String,
    pub module_name: String,
    pub state: JobRecordState,
}

/// 超时检查命中的执行记录
#[derive(Debug, Clone)]
pub struct TimedOutRecord {
    pub job_id: Uuid,
    pub workflow_id: i64,
    pub workflow_name: String,
    pub module_hash: String,
    pub module_name: String,
}

/// 执行单存储
///
/// 所有状态转换在同一把锁下完成，保证每条等待中的记录
/// 只会被归账一次：结果上报和超时检查不会同时命中。
pub struct JobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, job: Job) {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.id, job);
    }

    /// 按 (workflow_id, module_hash) 匹配一条等待中的记录并归账
    ///
    /// 同一组合有多条等待记录时取下发最早的一条；没有匹配的
    /// 等待记录返回None，由调用方决定丢弃。
    pub async fn complete(
        &self,
        workflow_id: i64,
        module_hash: &str,
        success: bool,
        detail: Option<String>,
    ) -> Option<CompletedRecord> {
        let mut jobs = self.jobs.lock().await;
        let mut candidate: Option<(Uuid, usize, DateTime<Utc>)> = None;
        for (id, job) in jobs.iter() {
            if job.workflow_id != workflow_id {
                continue;
            }
            for (idx, record) in job.records.iter().enumerate() {
                if record.state == JobRecordState::AwaitingResult
                    && record.module_hash == module_hash
                {
                    let dispatched = record.dispatched_at.unwrap_or(job.trigger_time);
                    if candidate.map_or(true, |(_, _, t)| dispatched < t) {
                        candidate = Some((*id, idx, dispatched));
                    }
                }
            }
        }
        let (job_id, idx, _) = candidate?;
        let job = jobs.get_mut(&job_id)?;
        let next = if success {
            JobRecordState::Succeeded
        } else {
            JobRecordState::Failed
        };
        let record = &mut job.records[idx];
        if !record.update_state(next) {
            return None;
        }
        record.detail = detail;
        let completed = CompletedRecord {
            job_id,
            workflow_id: job.workflow_id,
            workflow_name: job.workflow_name.clone(),
            module_hash: record.module_hash.clone(),
            module_name: record.module_name.clone(),
            state: next,
        };
        if job.is_finalized() {
            job.finalized_at = Some(Utc::now());
        }
        Some(completed)
    }

    /// 把指定执行单里的一条记录置为失败
    ///
    /// 下发失败时由引擎调用；记录已被结果上报或超时检查抢先
    /// 归账时不再转换，返回false。
    pub async fn fail_record(&self, job_id: Uuid, record_idx: usize, detail: String) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return false;
        };
        let Some(record) = job.records.get_mut(record_idx) else {
            return false;
        };
        if !record.update_state(JobRecordState::Failed) {
            return false;
        }
        record.detail = Some(detail);
        if job.finalized_at.is_none() && job.is_finalized() {
            job.finalized_at = Some(Utc::now());
        }
        true
    }

    /// 把截止时间已过的等待记录置为超时并返回
    pub async fn collect_timeouts(&self, now: DateTime<Utc>) -> Vec<TimedOutRecord> {
        let mut jobs = self.jobs.lock().await;
        let mut timed_out = Vec::new();
        for (id, job) in jobs.iter_mut() {
            for record in &mut job.records {
                let expired = record.state == JobRecordState::AwaitingResult
                    && record.deadline.is_some_and(|d| d <= now);
                if expired && record.update_state(JobRecordState::TimedOut) {
                    record.detail = Some("等待执行结果超时".to_string());
                    timed_out.push(TimedOutRecord {
                        job_id: *id,
                        workflow_id: job.workflow_id,
                        workflow_name: job.workflow_name.clone(),
                        module_hash: record.module_hash.clone(),
                        module_name: record.module_name.clone(),
                    });
                }
            }
            if job.finalized_at.is_none() && job.is_finalized() {
                job.finalized_at = Some(now);
            }
        }
        timed_out
    }

    /// 删除在截止时间之前进入终态的执行单，返回删除数量
    pub async fn prune_finalized(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.finalized_at.is_some_and(|t| t < cutoff));
        before - jobs.len()
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().await.get(&id).cloned()
    }

    /// 全量快照，按触发时间排序
    pub async fn snapshot(&self) -> Vec<Job> {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by_key(|j| j.trigger_time);
        all
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use platform_domain::entities::JobRecord;

    fn job_with_awaiting(workflow_id: i64, hashes: &[&str], deadline: DateTime<Utc>) -> Job {
        let mut job = Job::new(workflow_id, format!("wf-{workflow_id}"), Utc::now());
        for hash in hashes {
            let mut record = JobRecord::new(hash.to_string(), format!("mod-{hash}"));
            record.update_state(JobRecordState::Dispatched);
            record.update_state(JobRecordState::AwaitingResult);
            record.deadline = Some(deadline);
            job.records.push(record);
        }
        job
    }

    #[tokio::test]
    async fn test_complete_matches_awaiting_record() {
        let store = JobStore::new();
        let job = job_with_awaiting(1, &["h1"], Utc::now() + Duration::minutes(2));
        let job_id = job.id;
        store.insert(job).await;

        let completed = store.complete(1, "h1", true, None).await.unwrap();
        assert_eq!(completed.job_id, job_id);
        assert_eq!(completed.state, JobRecordState::Succeeded);
        // 归账后执行单进入终态
        assert!(store.get(job_id).await.unwrap().finalized_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_is_exactly_once() {
        let store = JobStore::new();
        store
            .insert(job_with_awaiting(1, &["h1"], Utc::now() + Duration::minutes(2)))
            .await;
        assert!(store.complete(1, "h1", false, None).await.is_some());
        // 第二次上报没有等待中的记录可归账
        assert!(store.complete(1, "h1", true, None).await.is_none());
    }

    #[tokio::test]
    async fn test_complete_unmatched_returns_none() {
        let store = JobStore::new();
        store
            .insert(job_with_awaiting(1, &["h1"], Utc::now() + Duration::minutes(2)))
            .await;
        assert!(store.complete(2, "h1", true, None).await.is_none());
        assert!(store.complete(1, "h2", true, None).await.is_none());
    }

    #[tokio::test]
    async fn test_collect_timeouts_transitions_once() {
        let store = JobStore::new();
        let deadline = Utc::now() - Duration::seconds(1);
        store.insert(job_with_awaiting(1, &["h1", "h2"], deadline)).await;

        let timed_out = store.collect_timeouts(Utc::now()).await;
        assert_eq!(timed_out.len(), 2);
        // 已超时的记录不会再被归账或再次判定超时
        assert!(store.complete(1, "h1", true, None).await.is_none());
        assert!(store.collect_timeouts(Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn test_fail_record_targets_single_record() {
        let store = JobStore::new();
        let job = job_with_awaiting(1, &["h1", "h2"], Utc::now() + Duration::minutes(2));
        let job_id = job.id;
        store.insert(job).await;

        assert!(store.fail_record(job_id, 0, "模块不在线".to_string()).await);
        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.records[0].state, JobRecordState::Failed);
        assert_eq!(job.records[1].state, JobRecordState::AwaitingResult);
        assert!(job.finalized_at.is_none());
        // 已被归账的记录不再转换
        assert!(store.complete(1, "h2", true, None).await.is_some());
        assert!(!store.fail_record(job_id, 1, "模块不在线".to_string()).await);
        assert!(store.get(job_id).await.unwrap().finalized_at.is_some());
    }

    #[tokio::test]
    async fn test_prune_only_removes_old_finalized() {
        let store = JobStore::new();
        let mut old = job_with_awaiting(1, &["h1"], Utc::now());
        old.records[0].update_state(JobRecordState::Succeeded);
        old.finalized_at = Some(Utc::now() - Duration::days(10));
        store.insert(old).await;
        store
            .insert(job_with_awaiting(2, &["h2"], Utc::now() + Duration::minutes(2)))
            .await;

        let removed = store.prune_finalized(Utc::now() - Duration::days(7)).await;
        assert_eq!(removed, 1);
        assert_eq!(store.snapshot().await.len(), 1);
    }
}
