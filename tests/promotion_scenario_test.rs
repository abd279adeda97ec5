// ==========================================
// 升级批次端到端场景测试
// ==========================================
// 场景: 7 人班级 → 默认判定 → 例外升级 → 确认 → 执行
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod promotion_scenario_test {
    use student_lifecycle::api::ApiError;
    use student_lifecycle::domain::{LifecycleStatus, OutboxStatus, Placement};
    use student_lifecycle::BatchStatus;

    use crate::test_helpers::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_selection_follows_eligibility() {
        let env = setup_env();
        seed_demo_cohort(&env);

        let view = env.api.select_cohort(SOURCE_CLASS, SOURCE_YEAR, Some(OPERATOR)).unwrap();
        assert_eq!(view.batch.status, BatchStatus::Draft);
        assert_eq!(view.batch.revision, 1);
        assert_eq!(view.records.len(), 7);
        assert_eq!(view.selected_ids(), ids(&["S1", "S2", "S4", "S7"]));

        for id in ["S3", "S5", "S6"] {
            let record = view.record(id).unwrap();
            assert_eq!(record.status, LifecycleStatus::Retained);
            assert!(!record.is_selected());
        }

        // 选中 ⇒ Eligible / Conditional
        for record in &view.records {
            if record.is_selected() {
                assert!(record.status.is_selectable());
            }
        }

        // 建批审计带每名学生的判定原因
        let trail = env.api.audit_trail(&view.batch.batch_id).unwrap();
        let created = trail.iter().find(|l| l.action_type == "batch-created").unwrap();
        let payload = created.payload_json.as_ref().unwrap();
        assert_eq!(payload["selected_count"], 4);
        assert!(!payload["decisions"]["S3"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_full_scenario_with_override() {
        let env = setup_env();
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);

        // 留级学生不能直接勾选
        let err = env
            .api
            .toggle_selection(&batch_id, revision, "S5", Some(OPERATOR))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        // 例外升级 S5
        let outcome = env
            .api
            .apply_override("S5", "Medical exemption", Some("principal"), revision)
            .unwrap();
        assert!(matches!(outcome.record.status, LifecycleStatus::Conditional { .. }));
        assert!(outcome.record.is_selected());
        assert_eq!(outcome.override_record.reason.as_str(), "Medical exemption");
        let revision = outcome.batch_revision;

        let batch = env.api.confirm_batch(&batch_id, revision, None, Some(OPERATOR)).unwrap();
        assert_eq!(batch.status, BatchStatus::Confirmed);
        assert_eq!(batch.confirmed_projection, Some(17));

        let report = env.api.execute_batch(&batch_id, batch.revision, Some(OPERATOR)).unwrap();
        assert_eq!(report.projected_enrollment, 17);
        assert_eq!(report.promoted, ids(&["S1", "S2", "S4", "S5", "S7"]));
        assert_eq!(report.not_promoted, ids(&["S3", "S6"]));
        assert_eq!(report.batch.status, BatchStatus::Executed);

        // 升级学生: 新编班（学号接在 12 之后）、新学年、未选中
        let s1 = env.repos.student_repo.find_by_id("S1").unwrap().unwrap();
        assert_eq!(s1.placement, Some(Placement::new(TARGET_CLASS, "A", 13)));
        assert_eq!(s1.academic_year.as_deref(), Some(TARGET_YEAR));
        assert_eq!(s1.status, LifecycleStatus::Eligible);
        assert!(!s1.is_selected());
        assert!(s1.batch_id.is_none());

        // 留级学生编班不变
        for id in ["S3", "S6"] {
            let record = env.repos.student_repo.find_by_id(id).unwrap().unwrap();
            assert_eq!(record.status, LifecycleStatus::Retained);
            assert_eq!(record.placement.as_ref().unwrap().class_id, SOURCE_CLASS);
            assert_eq!(record.academic_year.as_deref(), Some(SOURCE_YEAR));
        }

        // 外部副作用: 花名册、容量、收费
        let target = env.directory.get_capacity(TARGET_CLASS, TARGET_YEAR).unwrap();
        assert_eq!(target.current_enrolled, 17);
        assert_eq!(env.directory.list_cohort(TARGET_CLASS, TARGET_YEAR).unwrap().len(), 5);
        assert_eq!(env.fees.count_active("S5", TARGET_YEAR).unwrap(), 1);
        assert_eq!(env.fees.count_active("S3", TARGET_YEAR).unwrap(), 0);

        // 学年快照保留执行前状态与例外升级ID
        let snapshots = env.repos.snapshot_repo.find_by_student("S5").unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].placement, Some(Placement::new(SOURCE_CLASS, "A", 5)));
        assert_eq!(snapshots[0].override_id.as_deref(), Some(outcome.override_record.override_id.as_str()));

        // 通知入出箱，占用已释放
        assert_eq!(env.repos.outbox_repo.count_by_status(OutboxStatus::Pending).unwrap(), 5);
        assert!(env.repos.claim_repo.find_claim("S3").unwrap().is_none());

        // 审计: 例外升级原因同时出现在执行条目中，执行审计带配置快照
        let s5_trail = env.api.audit_trail("S5").unwrap();
        let kinds: Vec<&str> = s5_trail.iter().map(|l| l.action_type.as_str()).collect();
        assert!(kinds.contains(&"override-promotion"));
        let executed = s5_trail
            .iter()
            .find(|l| l.action_type == "promotion-executed")
            .unwrap();
        assert_eq!(executed.reason.as_deref(), Some("Medical exemption"));

        let batch_trail = env.api.audit_trail(&batch_id).unwrap();
        let batch_executed = batch_trail
            .iter()
            .find(|l| l.action_type == "batch-executed")
            .unwrap();
        assert_eq!(
            batch_executed.payload_json.as_ref().unwrap()["config"]["attendance_threshold_pct"],
            "75"
        );
    }

    #[test]
    fn test_four_selected_projects_sixteen() {
        let env = setup_env();
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);

        let batch = env.api.confirm_batch(&batch_id, revision, None, Some(OPERATOR)).unwrap();
        assert_eq!(batch.confirmed_projection, Some(16));
        let report = env.api.execute_batch(&batch_id, batch.revision, Some(OPERATOR)).unwrap();
        assert_eq!(report.projected_enrollment, 16);
        assert_eq!(report.promoted.len(), 4);
    }

    #[test]
    fn test_execute_twice_runs_side_effects_once() {
        let env = setup_env();
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);
        let batch = env.api.confirm_batch(&batch_id, revision, None, Some(OPERATOR)).unwrap();

        env.api.execute_batch(&batch_id, batch.revision, Some(OPERATOR)).unwrap();
        let err = env
            .api
            .execute_batch(&batch_id, batch.revision, Some(OPERATOR))
            .unwrap_err();
        assert!(matches!(err, ApiError::AlreadyExecuted { .. }));

        assert_eq!(env.fees.count_active("S1", TARGET_YEAR).unwrap(), 1);
        assert_eq!(env.repos.snapshot_repo.find_by_student("S1").unwrap().len(), 1);
        assert_eq!(
            env.repos
                .action_log_repo
                .count_for_entity(&batch_id, "batch-executed")
                .unwrap(),
            1
        );
        assert_eq!(env.directory.get_capacity(TARGET_CLASS, TARGET_YEAR).unwrap().current_enrolled, 16);
    }

    #[test]
    fn test_confirm_requires_target_and_selection() {
        let env = setup_env();
        seed_demo_cohort(&env);
        let view = env.api.select_cohort(SOURCE_CLASS, SOURCE_YEAR, Some(OPERATOR)).unwrap();

        let err = env
            .api
            .confirm_batch(&view.batch.batch_id, view.batch.revision, None, Some(OPERATOR))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let view = env
            .api
            .bulk_select(&view.batch.batch_id, view.batch.revision, false, Some(OPERATOR))
            .unwrap();
        assert!(view.selected_ids().is_empty());
        let err = env
            .api
            .confirm_batch(
                &view.batch.batch_id,
                view.batch.revision,
                Some((TARGET_CLASS, TARGET_YEAR)),
                Some(OPERATOR),
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn test_selection_edit_demotes_confirmed_batch() {
        let env = setup_env();
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);
        let batch = env.api.confirm_batch(&batch_id, revision, None, Some(OPERATOR)).unwrap();

        let view = env
            .api
            .toggle_selection(&batch_id, batch.revision, "S7", Some(OPERATOR))
            .unwrap();
        assert_eq!(view.batch.status, BatchStatus::Draft);
        assert!(view.batch.confirmed_projection.is_none());
        assert!(!view.record("S7").unwrap().is_selected());

        let err = env
            .api
            .execute_batch(&batch_id, view.batch.revision, Some(OPERATOR))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn test_proposed_placement_and_preserve_numbering() {
        let env = setup_env();
        seed_demo_cohort(&env);
        env.api.set_config("roll_numbering", "PRESERVE").unwrap();
        let (batch_id, revision) = draft_batch_with_target(&env);

        let view = env
            .api
            .set_proposed_placement(&batch_id, revision, "S2", "B", 40, Some(OPERATOR))
            .unwrap();
        assert_eq!(view.record("S2").unwrap().proposed, Some(Placement::new(TARGET_CLASS, "B", 40)));

        let err = env
            .api
            .set_proposed_placement(&batch_id, view.batch.revision, "S2", "B", 0, Some(OPERATOR))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let batch = env
            .api
            .confirm_batch(&batch_id, view.batch.revision, None, Some(OPERATOR))
            .unwrap();
        env.api.execute_batch(&batch_id, batch.revision, Some(OPERATOR)).unwrap();

        let s2 = env.repos.student_repo.find_by_id("S2").unwrap().unwrap();
        assert_eq!(s2.placement, Some(Placement::new(TARGET_CLASS, "B", 40)));
        let s4 = env.repos.student_repo.find_by_id("S4").unwrap().unwrap();
        assert_eq!(s4.placement, Some(Placement::new(TARGET_CLASS, "A", 4)));
    }

    #[test]
    fn test_refresh_keeps_conditional_and_picks_up_new_inputs() {
        let env = setup_env();
        seed_demo_cohort(&env);
        let (batch_id, revision) = draft_batch_with_target(&env);
        let outcome = env
            .api
            .apply_override("S5", "Medical exemption", Some("principal"), revision)
            .unwrap();

        // S3 补考通过、出勤达标；S5 出勤进一步下降
        let mut members = demo_cohort();
        members[2].performance.attendance_pct = 90.0;
        members[2].performance.exam_result = student_lifecycle::ExamResult::Pass;
        members[4].performance.attendance_pct = 50.0;
        env.directory.upsert_members(&members).unwrap();

        let view = env
            .api
            .refresh_cohort(&batch_id, outcome.batch_revision, Some(OPERATOR))
            .unwrap();
        let s3 = view.record("S3").unwrap();
        assert_eq!(s3.status, LifecycleStatus::Eligible);
        assert!(s3.is_selected());
        let s5 = view.record("S5").unwrap();
        assert!(matches!(s5.status, LifecycleStatus::Conditional { .. }));
        assert!(s5.is_selected());
    }

    #[test]
    fn test_notifications_dispatched_after_commit() {
        let notifier = std::sync::Arc::new(RecordingNotifier::failing(1));
        let env = setup_env_with(
            None,
            Some(notifier.clone() as std::sync::Arc<dyn student_lifecycle::engine::NotificationService>),
        );
        seed_demo_cohort(&env);
        env.api.set_config("notification_max_attempts", "2").unwrap();

        let (batch_id, revision) = draft_batch_with_target(&env);
        let batch = env.api.confirm_batch(&batch_id, revision, None, Some(OPERATOR)).unwrap();

        // 执行前没有投递
        assert_eq!(notifier.sent_count(), 0);
        env.api.execute_batch(&batch_id, batch.revision, Some(OPERATOR)).unwrap();
        assert_eq!(notifier.sent_count(), 0);

        let first = env.api.dispatch_notifications(None).unwrap();
        assert_eq!(first.sent, 3);
        assert_eq!(first.failed, 1);
        assert_eq!(first.parked, 0);

        let second = env.api.dispatch_notifications(None).unwrap();
        assert_eq!(second.sent, 1);
        assert_eq!(notifier.sent_count(), 4);
        assert_eq!(env.repos.outbox_repo.count_by_status(OutboxStatus::Sent).unwrap(), 4);
    }
}
