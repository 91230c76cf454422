//! End-to-end flows through the orchestrator

use std::sync::Arc;

use agora_common::audit::{AuditKind, AuditLog};
use agora_common::events::AgoraEvent;
use agora_common::{Account, CycleId, SkillProfile, TaskId, TaskSpec, TaskStatus, TokenKind, WorkerId, WorkerRegistration};
use agora_governor::{InMemoryLedger, Ledger};
use agora_orchestrator::{AgoraConfig, AllowAll, Orchestrator, RewardStatus};
use agora_venture::{PhaseTemplate, VentureStatus};
use rust_decimal_macros::dec;

fn quiet_config() -> AgoraConfig {
    let mut config = AgoraConfig::default();
    config.audit.console = false;
    config.ranking.retry_backoff_ms = 1;
    config
}

fn skills(pairs: &[(&str, f64)]) -> SkillProfile {
    SkillProfile::from_pairs(pairs.iter().copied()).unwrap()
}

fn python_task(name: &str) -> TaskSpec {
    TaskSpec::new(name, skills(&[("python", 0.8)]), dec!(10))
}

fn worker_of(orch: &Orchestrator, task_id: TaskId) -> WorkerId {
    orch.get_task(task_id).unwrap().assigned_worker.unwrap()
}

#[tokio::test]
async fn test_ranking_cycle_removes_promotes_and_conserves_supply() {
    let orch = Orchestrator::new(quiet_config()).await.unwrap();
    for id in ["a", "b", "c"] {
        orch.register_worker(WorkerRegistration::new(id, skills(&[("python", 1.0)])))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for name in ["t1", "t2", "t3"] {
        tasks.push(orch.submit_task(python_task(name)).await.unwrap());
    }
    for task_id in tasks {
        let worker = worker_of(&orch, task_id);
        let quality = match worker.as_str() {
            "a" => 0.2,
            "b" => 0.6,
            _ => 1.0,
        };
        orch.complete_task(task_id, &worker, quality).await.unwrap();
    }

    // Lowest id is idle again, so "a" picks this up
    let in_flight = orch.submit_task(python_task("t4")).await.unwrap();
    assert_eq!(worker_of(&orch, in_flight).as_str(), "a");

    let cycle = CycleId::new("cycle-1");
    let result = orch.run_ranking_cycle(&cycle).await.unwrap();

    assert_eq!(result.removed, vec![WorkerId::from("a")]);
    assert_eq!(result.promoted, vec![WorkerId::from("c")]);
    assert_eq!(result.retained, vec![WorkerId::from("b")]);
    assert_eq!(result.redistributed_amount, dec!(80.08));
    assert_eq!(result.bonuses[&WorkerId::from("c")], dec!(80.4));

    assert!(orch.get_worker(&WorkerId::from("a")).is_err());
    let c = orch.get_worker(&WorkerId::from("c")).unwrap();
    assert_eq!(c.rank_tier, 4);
    assert_eq!(c.utility_balance, dec!(80.4) + dec!(80.4) + dec!(80.08));
    assert_eq!(c.governance_balance, dec!(100));

    // The removed worker's task went back to the queue and on to "b"
    let task = orch.get_task(in_flight).unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_worker, Some(WorkerId::from("b")));

    let ledger = orch.governor().ledger().clone();
    for kind in TokenKind::ALL {
        let mut total = ledger.balance(&Account::Treasury, kind).await.unwrap();
        for id in ["a", "b", "c"] {
            total += ledger.balance(&Account::worker(&WorkerId::from(id)), kind).await.unwrap();
        }
        assert_eq!(total, ledger.total_supply(kind).await.unwrap());
    }

    // Same id, same result, nothing re-applied
    let audit_len = orch.audit().len();
    let again = orch.run_ranking_cycle(&cycle).await.unwrap();
    assert_eq!(again, result);
    assert_eq!(orch.audit().len(), audit_len);
    assert!(orch.audit().verify_chain());

    let cycle_events = orch
        .events()
        .recent(100)
        .into_iter()
        .filter(|e| matches!(e.event, AgoraEvent::RankCycleResult { .. }))
        .count();
    assert_eq!(cycle_events, 1);
}

#[tokio::test]
async fn test_reward_deferred_until_treasury_funded() {
    let ledger = Arc::new(InMemoryLedger::new());
    let orch = Orchestrator::with_components(quiet_config(), ledger.clone(), Arc::new(AllowAll), AuditLog::silent())
        .unwrap();

    let worker = orch
        .register_worker(WorkerRegistration::new("w-1", skills(&[("python", 1.0)])))
        .await
        .unwrap();
    let task_id = orch.submit_task(python_task("etl")).await.unwrap();

    let report = orch.complete_task(task_id, &worker, 1.0).await.unwrap();
    assert!(matches!(report.reward, RewardStatus::Deferred { .. }));
    assert_eq!(orch.governor().backlog_len(), 1);
    assert!(orch
        .audit()
        .entries()
        .iter()
        .any(|e| e.record.kind == AuditKind::RewardDeferred));

    ledger
        .mint(&Account::Treasury, dec!(1000), TokenKind::Utility)
        .await
        .unwrap();
    let tick = orch.tick().await;
    assert_eq!(tick.rewards_reissued, 1);
    assert_eq!(tick.rewards_still_deferred, 0);
    assert_eq!(orch.get_worker(&worker).unwrap().utility_balance, dec!(80.4));

    // Retrying again must not pay twice
    orch.tick().await;
    assert_eq!(ledger.balance(&Account::worker(&worker), TokenKind::Utility).await.unwrap(), dec!(80.4));
}

#[tokio::test]
async fn test_timeout_fails_and_requeues() {
    let mut config = quiet_config();
    config.dispatch.task_timeout_ms = 1_000;
    let orch = Orchestrator::new(config).await.unwrap();

    let worker = orch
        .register_worker(WorkerRegistration::new("w-1", skills(&[("python", 1.0)])))
        .await
        .unwrap();
    let task_id = orch.submit_task(python_task("slow")).await.unwrap();
    orch.start_task(task_id, &worker).await.unwrap();

    let report = orch.tick_at(agora_common::now_millis() + 60_000).await;
    assert_eq!(report.timed_out, 1);

    // Back in the queue and picked up again by the only worker
    let task = orch.get_task(task_id).unwrap();
    assert_eq!(task.attempts, 1);
    assert_eq!(task.status, TaskStatus::Assigned);

    let summary = orch.snapshot().performance_records;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].quality(), 0.0);
}

#[tokio::test]
async fn test_venture_blocks_and_advances() {
    let mut config = quiet_config();
    config.dispatch.max_retries = 0;
    let orch = Orchestrator::new(config).await.unwrap();

    let all_skills = skills(&[
        ("research", 1.0),
        ("analysis", 1.0),
        ("writing", 1.0),
        ("strategy", 1.0),
        ("communication", 1.0),
    ]);
    let worker = orch
        .register_worker(WorkerRegistration::new("w-1", all_skills).with_capacity(10))
        .await
        .unwrap();

    let venture_id = orch
        .create_venture("acme", dec!(10000), PhaseTemplate::standard())
        .await
        .unwrap();
    let venture = orch.list_ventures().pop().unwrap();
    let first = venture.phases[0].tasks[0].task_id;
    let second = venture.phases[0].tasks[1].task_id;
    assert_eq!(orch.get_task_status(first).unwrap(), TaskStatus::Assigned);
    assert_eq!(orch.get_task(first).unwrap().max_cost, dec!(500));

    let failure = orch.fail_task(first, &worker, "crashed").await.unwrap();
    assert!(!failure.requeued);
    assert_eq!(failure.status, TaskStatus::Failed);

    let status = orch.get_venture_status(venture_id).unwrap();
    assert_eq!(status.status, VentureStatus::Blocked);
    assert_eq!(status.blocked_tasks, vec![first]);

    let replacement = orch.resubmit_venture_task(venture_id, first).await.unwrap();
    assert_eq!(orch.get_task_status(replacement).unwrap(), TaskStatus::Assigned);

    orch.complete_task(replacement, &worker, 0.9).await.unwrap();
    orch.complete_task(second, &worker, 0.9).await.unwrap();

    let status = orch.get_venture_status(venture_id).unwrap();
    assert_eq!(status.status, VentureStatus::Active);
    assert_eq!(status.phase, "validation");
    assert_eq!(status.phase_budget, dec!(1500));

    let events: Vec<_> = orch.events().recent(100).into_iter().map(|e| e.event).collect();
    assert!(events.iter().any(|e| matches!(e, AgoraEvent::VentureBlocked { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        AgoraEvent::VenturePhaseAdvanced { to_phase: Some(p), .. } if p == "validation"
    )));
}

#[tokio::test]
async fn test_concurrent_submissions_bind_each_task_once() {
    let orch = Arc::new(Orchestrator::new(quiet_config()).await.unwrap());
    for i in 0..4 {
        orch.register_worker(WorkerRegistration::new(format!("w-{i}"), skills(&[("python", 1.0)])).with_capacity(2))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..16 {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move {
            orch.submit_task(python_task(&format!("job-{i}"))).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = orch.snapshot();
    let assigned = snapshot.tasks.iter().filter(|t| t.status == TaskStatus::Assigned).count();
    assert_eq!(assigned, 8);
    assert!(snapshot
        .workers
        .iter()
        .all(|w| w.active_tasks <= w.max_concurrent_tasks));
    assert_eq!(
        snapshot.workers.iter().map(|w| w.active_tasks).sum::<u32>() as usize,
        assigned
    );
    let pending = snapshot.tasks.iter().filter(|t| t.status == TaskStatus::Pending).count();
    assert_eq!(pending, 8);
}
