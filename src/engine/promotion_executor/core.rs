use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

use rusqlite::Connection;
use serde::Serialize;

use crate::config::LifecycleConfigReader;
use crate::domain::batch::{BatchTarget, PromotionBatch};
use crate::domain::student::StudentLifecycleRecord;
use crate::engine::collaborators::Collaborators;
use crate::engine::eligibility::EligibilityEvaluator;
use crate::engine::error::{LifecycleError, LifecycleResult};
use crate::engine::repositories::LifecycleRepositories;
use crate::repository::StudentLifecycleRepository;

// ==========================================
// 返回视图
// ==========================================

/// 批次及其候选记录（按入批顺序）
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    pub batch: PromotionBatch,
    pub records: Vec<StudentLifecycleRecord>,
}

impl BatchView {
    pub fn selected_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.is_selected())
            .map(|r| r.student_id.clone())
            .collect()
    }

    pub fn record(&self, student_id: &str) -> Option<&StudentLifecycleRecord> {
        self.records.iter().find(|r| r.student_id == student_id)
    }
}

/// 批次执行结果
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub batch: PromotionBatch,
    pub promoted: Vec<String>,
    pub not_promoted: Vec<String>,
    pub projected_enrollment: u32,
}

// ==========================================
// PromotionBatchExecutor
// ==========================================
pub struct PromotionBatchExecutor {
    pub(super) repos: LifecycleRepositories,
    pub(super) collaborators: Collaborators,
    pub(super) config: Arc<dyn LifecycleConfigReader>,
    in_flight: Mutex<HashSet<String>>, // 正在执行的批次
    targets: Mutex<HashSet<String>>,   // 正在占用席位的目标班级/学年
    target_released: Condvar,
}

impl PromotionBatchExecutor {
    pub fn new(
        repos: LifecycleRepositories,
        collaborators: Collaborators,
        config: Arc<dyn LifecycleConfigReader>,
    ) -> Self {
        Self {
            repos,
            collaborators,
            config,
            in_flight: Mutex::new(HashSet::new()),
            targets: Mutex::new(HashSet::new()),
            target_released: Condvar::new(),
        }
    }

    /// 读取批次视图
    pub fn load_batch(&self, batch_id: &str) -> LifecycleResult<BatchView> {
        let conn = self.repos.lock()?;
        Self::view_tx(&conn, batch_id)
    }

    /// 源班级/学年的全部批次（新 → 旧）
    pub fn list_batches(&self, source_class: &str, source_year: &str) -> LifecycleResult<Vec<PromotionBatch>> {
        Ok(self.repos.batch_repo.list_by_source(source_class, source_year)?)
    }

    pub(super) fn view_tx(conn: &Connection, batch_id: &str) -> LifecycleResult<BatchView> {
        let batch = crate::repository::PromotionBatchRepository::find_by_id_tx(conn, batch_id)?
            .ok_or_else(|| LifecycleError::not_found("PromotionBatch", batch_id))?;
        let records = StudentLifecycleRepository::find_by_batch_tx(conn, batch_id)?;
        Ok(BatchView { batch, records })
    }

    /// 占用批次执行槽；同一批次同时只允许一个 execute
    pub(super) fn claim_execution(&self, batch_id: &str) -> LifecycleResult<ExecutionSlot<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|e| LifecycleError::invalid_state(batch_id, format!("执行槽锁获取失败: {}", e)))?;
        if !in_flight.insert(batch_id.to_string()) {
            return Err(LifecycleError::conflict(batch_id, "批次正在由其他会话执行"));
        }
        Ok(ExecutionSlot {
            in_flight: &self.in_flight,
            batch_id: batch_id.to_string(),
        })
    }

    /// 占用目标班级/学年；同一目标的容量复核到提交之间串行，后到者等待
    pub(super) fn claim_target(&self, target: &BatchTarget) -> LifecycleResult<TargetSlot<'_>> {
        let key = format!("{}/{}", target.class_id, target.academic_year);
        let lock_err = |e: String| LifecycleError::invalid_state(&key, format!("目标席位锁获取失败: {}", e));

        let targets = self.targets.lock().map_err(|e| lock_err(e.to_string()))?;
        let mut targets = self
            .target_released
            .wait_while(targets, |held| held.contains(&key))
            .map_err(|e| lock_err(e.to_string()))?;
        targets.insert(key.clone());
        tracing::debug!(class_target = %key, "已占用目标席位");

        Ok(TargetSlot {
            targets: &self.targets,
            released: &self.target_released,
            key,
        })
    }

    pub(super) fn evaluator(&self) -> LifecycleResult<EligibilityEvaluator> {
        EligibilityEvaluator::from_config(self.config.as_ref())
    }
}

/// 执行槽（drop 时释放）
pub(super) struct ExecutionSlot<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    batch_id: String,
}

impl Drop for ExecutionSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.batch_id);
        }
    }
}

/// 目标席位槽（drop 时释放并唤醒等待者）
pub(super) struct TargetSlot<'a> {
    targets: &'a Mutex<HashSet<String>>,
    released: &'a Condvar,
    key: String,
}

impl Drop for TargetSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut targets) = self.targets.lock() {
            targets.remove(&self.key);
        }
        self.released.notify_all();
    }
}

/// 协作方错误包装
pub(super) fn collaborator_err(
    service: &'static str,
) -> impl Fn(Box<dyn std::error::Error + Send + Sync>) -> LifecycleError {
    move |e| LifecycleError::Collaborator {
        service,
        message: e.to_string(),
    }
}

pub(super) fn require_field(value: &str, field: &'static str) -> LifecycleResult<()> {
    if value.trim().is_empty() {
        return Err(crate::engine::error::ValidationFailure::BlankField(field).into());
    }
    Ok(())
}
