// ==========================================
// 批次执行安全性测试
// ==========================================
// 职责: 容量复核、外部副作用回滚、乐观锁与并发执行
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod execution_safety_test {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use student_lifecycle::api::ApiError;
    use student_lifecycle::domain::{LifecycleStatus, Placement};
    use student_lifecycle::domain::ClassCapacity;
    use student_lifecycle::engine::{CapacityService, CollaboratorResult, FeeService};
    use student_lifecycle::repository::{FeeLedgerRepository, RosterDirectoryRepository};
    use student_lifecycle::{BatchStatus, ExamResult};

    use crate::test_helpers::*;

    // ==========================================
    // 容量
    // ==========================================

    #[test]
    fn test_capacity_exceeded_at_confirm_keeps_draft() {
        let env = setup_env();
        seed_demo_cohort(&env);
        set_capacity(&env.directory, TARGET_CLASS, TARGET_YEAR, 35, 32);
        let (batch_id, revision) = draft_batch_with_target(&env);

        let err = env
            .api
            .confirm_batch(&batch_id, revision, None, Some(OPERATOR))
            .unwrap_err();
        match err {
            ApiError::CapacityExceeded {
                class_id,
                projected,
                capacity,
            } => {
                assert_eq!(class_id, TARGET_CLASS);
                assert_eq!(projected, 36);
                assert_eq!(capacity, 35);
            }
            other => panic!("unexpected: {:?}", other),
        }

        let view = env.api.get_batch(&batch_id).unwrap();
        assert_eq!(view.batch.status, BatchStatus::Draft);
        assert_eq!(view.batch.revision, revision);
    }

    #[test]
    fn test_capacity_shrinks_between_confirm_and_execute() {
        let env = setup_env();
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);
        let batch = env.api.confirm_batch(&batch_id, revision, None, Some(OPERATOR)).unwrap();
        assert_eq!(batch.confirmed_projection, Some(16));

        // 其他渠道在确认后占用了座位
        set_capacity(&env.directory, TARGET_CLASS, TARGET_YEAR, 35, 32);

        let err = env
            .api
            .execute_batch(&batch_id, batch.revision, Some(OPERATOR))
            .unwrap_err();
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");
        assert_eq!(err.details()["projected"], 36);

        // 批次退回 Draft，学生记录未改动
        let view = env.api.get_batch(&batch_id).unwrap();
        assert_eq!(view.batch.status, BatchStatus::Draft);
        assert_eq!(view.selected_ids().len(), 4);
        let s1 = view.record("S1").unwrap();
        assert_eq!(s1.placement, Some(Placement::new(SOURCE_CLASS, "A", 1)));
        assert_eq!(env.fees.count_active("S1", TARGET_YEAR).unwrap(), 0);
        assert!(env.repos.snapshot_repo.find_by_student("S1").unwrap().is_empty());

        let aborted = env.api.audit_by_action("promotion-aborted", None).unwrap();
        assert_eq!(aborted.len(), 1);
        assert!(aborted[0].detail.is_some());

        // 取消一人后重新确认即可执行
        let view = env
            .api
            .toggle_selection(&batch_id, view.batch.revision, "S7", Some(OPERATOR))
            .unwrap();
        let batch = env
            .api
            .confirm_batch(&batch_id, view.batch.revision, None, Some(OPERATOR))
            .unwrap();
        let report = env.api.execute_batch(&batch_id, batch.revision, Some(OPERATOR)).unwrap();
        assert_eq!(report.projected_enrollment, 35);
    }

    // ==========================================
    // 外部副作用回滚
    // ==========================================

    fn env_with_failing_fee(student_id: &str) -> TestEnv {
        // 失败注入需与测试环境共用连接
        let base = setup_env();
        let inner = Arc::new(FeeLedgerRepository::new(base.conn.clone()));
        let fees: Arc<dyn FeeService> = Arc::new(FailingFeeService {
            inner,
            fail_for: student_id.to_string(),
        });
        rebuild_with_fees(base, fees)
    }

    fn rebuild_with_fees(env: TestEnv, fees: Arc<dyn FeeService>) -> TestEnv {
        use student_lifecycle::api::LifecycleApi;
        use student_lifecycle::engine::{Collaborators, LoggingNotificationService};

        let collaborators = Collaborators {
            roster: env.directory.clone(),
            capacity: env.directory.clone(),
            fees,
            notifier: Arc::new(LoggingNotificationService),
        };
        let api = LifecycleApi::new(env.conn.clone(), collaborators, env.config.clone());
        TestEnv { api, ..env }
    }

    #[test]
    fn test_fee_failure_rolls_back_every_side_effect() {
        let env = env_with_failing_fee("S4");
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);
        let batch = env.api.confirm_batch(&batch_id, revision, None, Some(OPERATOR)).unwrap();

        let err = env
            .api
            .execute_batch(&batch_id, batch.revision, Some(OPERATOR))
            .unwrap_err();
        match &err {
            ApiError::BatchExecutionError {
                failed_student_ids,
                reason,
            } => {
                assert_eq!(failed_student_ids, &vec!["S4".to_string()]);
                assert!(reason.contains("S4"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        // 花名册与容量恢复
        assert_eq!(env.directory.list_cohort(SOURCE_CLASS, SOURCE_YEAR).unwrap().len(), 7);
        assert!(env.directory.list_cohort(TARGET_CLASS, TARGET_YEAR).unwrap().is_empty());
        assert_eq!(env.directory.get_capacity(TARGET_CLASS, TARGET_YEAR).unwrap().current_enrolled, 12);

        // 已分配的收费全部撤销
        for id in ["S1", "S2", "S7"] {
            assert_eq!(env.fees.count_active(id, TARGET_YEAR).unwrap(), 0);
        }

        // 记录、快照、出箱均未写入；批次保持 Confirmed
        let view = env.api.get_batch(&batch_id).unwrap();
        assert_eq!(view.batch.status, BatchStatus::Confirmed);
        assert_eq!(view.batch.revision, batch.revision);
        let s1 = view.record("S1").unwrap();
        assert_eq!(s1.academic_year.as_deref(), Some(SOURCE_YEAR));
        assert!(s1.is_selected());
        assert!(env.repos.snapshot_repo.find_by_student("S1").unwrap().is_empty());
        assert!(env.repos.outbox_repo.list_by_student("S1").unwrap().is_empty());
        assert_eq!(
            env.repos
                .action_log_repo
                .count_for_entity("S1", "promotion-executed")
                .unwrap(),
            0
        );
    }

    // ==========================================
    // 乐观锁
    // ==========================================

    #[test]
    fn test_stale_revision_is_conflict() {
        let env = setup_env();
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);

        let view = env
            .api
            .toggle_selection(&batch_id, revision, "S1", Some("session-a"))
            .unwrap();
        assert_eq!(view.batch.revision, revision + 1);

        // 另一会话仍持有旧 revision
        let err = env
            .api
            .toggle_selection(&batch_id, revision, "S2", Some("session-b"))
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        let err = env
            .api
            .apply_override("S5", "Medical exemption", Some("principal"), revision)
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        let s5 = env.repos.student_repo.find_by_id("S5").unwrap().unwrap();
        assert_eq!(s5.status, LifecycleStatus::Retained);
        assert!(env.repos.override_repo.find_by_student("S5").unwrap().is_empty());

        let err = env
            .api
            .confirm_batch(&batch_id, revision, None, Some("session-b"))
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[test]
    fn test_concurrent_execute_applies_once() {
        let env = Arc::new(setup_env());
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);
        let batch = env.api.confirm_batch(&batch_id, revision, None, Some(OPERATOR)).unwrap();
        let confirmed_revision = batch.revision;

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let env = env.clone();
                let batch_id = batch_id.clone();
                let actor = format!("session-{}", i);
                thread::spawn(move || env.api.execute_batch(&batch_id, confirmed_revision, Some(&actor)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(err.code(), "ALREADY_EXECUTED" | "CONFLICT" | "BATCH_EXECUTION_ERROR"),
                "unexpected: {:?}",
                err
            );
        }

        assert_eq!(env.fees.count_active("S1", TARGET_YEAR).unwrap(), 1);
        assert_eq!(env.directory.get_capacity(TARGET_CLASS, TARGET_YEAR).unwrap().current_enrolled, 16);
        assert_eq!(env.directory.list_cohort(TARGET_CLASS, TARGET_YEAR).unwrap().len(), 4);
    }

    // ==========================================
    // 同一目标班级的并发执行
    // ==========================================

    /// 读取容量后停顿，放大复核与编班之间的窗口
    struct SlowCapacity {
        inner: Arc<RosterDirectoryRepository>,
        delay: Duration,
    }

    impl CapacityService for SlowCapacity {
        fn get_capacity(&self, class_id: &str, academic_year: &str) -> CollaboratorResult<ClassCapacity> {
            let capacity = self.inner.get_capacity(class_id, academic_year)?;
            thread::sleep(self.delay);
            Ok(capacity)
        }
    }

    fn env_with_slow_capacity() -> TestEnv {
        use student_lifecycle::api::LifecycleApi;
        use student_lifecycle::engine::{Collaborators, LoggingNotificationService};

        let env = setup_env();
        let collaborators = Collaborators {
            roster: env.directory.clone(),
            capacity: Arc::new(SlowCapacity {
                inner: env.directory.clone(),
                delay: Duration::from_millis(200),
            }),
            fees: env.fees.clone(),
            notifier: Arc::new(LoggingNotificationService),
        };
        let api = LifecycleApi::new(env.conn.clone(), collaborators, env.config.clone());
        TestEnv { api, ..env }
    }

    /// 建立源班级 4 人全部可升级的批次并确认到 G6，返回 (batch_id, revision)
    fn confirmed_batch_from(env: &TestEnv, class_id: &str, prefix: &str) -> (String, i64) {
        let members: Vec<_> = (1..=4)
            .map(|i| member_in(class_id, &format!("{}{}", prefix, i), i, 90.0, ExamResult::Pass))
            .collect();
        env.directory.upsert_members(&members).unwrap();
        set_capacity(&env.directory, class_id, SOURCE_YEAR, 40, 4);

        let view = env.api.select_cohort(class_id, SOURCE_YEAR, Some(OPERATOR)).unwrap();
        assert_eq!(view.selected_ids().len(), 4);
        let view = env
            .api
            .set_target(&view.batch.batch_id, view.batch.revision, TARGET_CLASS, TARGET_YEAR, Some(OPERATOR))
            .unwrap();
        let batch = env
            .api
            .confirm_batch(&view.batch.batch_id, view.batch.revision, None, Some(OPERATOR))
            .unwrap();
        assert_eq!(batch.confirmed_projection, Some(34));
        (batch.batch_id, batch.revision)
    }

    #[test]
    fn test_batches_sharing_target_never_overcommit() {
        let env = Arc::new(env_with_slow_capacity());
        set_capacity(&env.directory, TARGET_CLASS, TARGET_YEAR, 35, 30);
        let first = confirmed_batch_from(&env, "G5", "A");
        let second = confirmed_batch_from(&env, "G5B", "B");

        let handles: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|(batch_id, revision)| {
                let env = env.clone();
                thread::spawn(move || env.api.execute_batch(&batch_id, revision, Some(OPERATOR)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].projected_enrollment, 34);
        let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");
        assert_eq!(err.details()["projected"], 38);

        assert_eq!(env.directory.get_capacity(TARGET_CLASS, TARGET_YEAR).unwrap().current_enrolled, 34);
        assert_eq!(env.directory.list_cohort(TARGET_CLASS, TARGET_YEAR).unwrap().len(), 4);

        // 落败批次退回 Draft，学生编班与收费未改动
        let (loser_id, loser_class, prefix) = if winners[0].batch.batch_id == first.0 {
            (second.0, "G5B", "B")
        } else {
            (first.0, "G5", "A")
        };
        let view = env.api.get_batch(&loser_id).unwrap();
        assert_eq!(view.batch.status, BatchStatus::Draft);
        assert_eq!(view.selected_ids().len(), 4);
        assert_eq!(env.directory.list_cohort(loser_class, SOURCE_YEAR).unwrap().len(), 4);
        for i in 1..=4 {
            let id = format!("{}{}", prefix, i);
            assert_eq!(env.fees.count_active(&id, TARGET_YEAR).unwrap(), 0);
            let record = view.record(&id).unwrap();
            assert_eq!(record.placement, Some(Placement::new(loser_class, "A", i)));
        }
    }
}
