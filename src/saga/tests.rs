use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;

use super::*;
use crate::config::RetryPolicy;
use crate::coordinator::ExecutionCoordinator;
use crate::storage::{MemoryLogStore, StoreError, StoreKind};
use crate::subtx::{BusinessFailure, BusinessResult};

type Journal = Arc<Mutex<Vec<String>>>;

fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        max_retries,
        jitter: 0.0,
    }
}

/// Coordinator with steps `a`, `b`, `c` that write to a shared journal.
/// Listed actions or compensations report business failures.
fn journaling_coordinator(
    journal: &Journal,
    fail_actions: &[&'static str],
    fail_comps: &[&'static str],
    config: CoordinatorConfig,
) -> ExecutionCoordinator {
    let mut builder = ExecutionCoordinator::builder();
    for name in ["a", "b", "c"] {
        let action_journal = Arc::clone(journal);
        let comp_journal = Arc::clone(journal);
        let action_fails = fail_actions.contains(&name);
        let comp_fails = fail_comps.contains(&name);
        builder = builder
            .sub_tx(
                name,
                move |_ctx: SagaContext, _args: ()| {
                    let journal = Arc::clone(&action_journal);
                    async move {
                        note(&journal, format!("action:{name}"));
                        if action_fails {
                            return Err(BusinessFailure::new(format!("{name} action failed")));
                        }
                        BusinessResult::Ok(())
                    }
                },
                move |_ctx: SagaContext, _args: ()| {
                    let journal = Arc::clone(&comp_journal);
                    async move {
                        if comp_fails {
                            note(&journal, format!("comp-fail:{name}"));
                            return Err(BusinessFailure::new(format!("{name} compensation failed")));
                        }
                        note(&journal, format!("comp:{name}"));
                        BusinessResult::Ok(())
                    }
                },
            )
            .unwrap();
    }
    builder.config(config).build()
}

async fn decoded_log(saga: &Saga) -> Vec<LogEntry> {
    saga.log()
        .lookup()
        .await
        .unwrap()
        .iter()
        .map(|r| LogEntry::decode(r).unwrap())
        .collect()
}

fn kinds(entries: &[LogEntry]) -> Vec<EntryKind> {
    entries.iter().map(|e| e.kind.clone()).collect()
}

fn action_start(sub_tx_id: &str) -> EntryKind {
    EntryKind::ActionStart {
        sub_tx_id: sub_tx_id.to_string(),
        params: ().encode().unwrap(),
    }
}

fn action_end(sub_tx_id: &str) -> EntryKind {
    EntryKind::ActionEnd {
        sub_tx_id: sub_tx_id.to_string(),
    }
}

fn compensate_start(sub_tx_id: &str) -> EntryKind {
    EntryKind::CompensateStart {
        sub_tx_id: sub_tx_id.to_string(),
    }
}

fn compensate_end(sub_tx_id: &str) -> EntryKind {
    EntryKind::CompensateEnd {
        sub_tx_id: sub_tx_id.to_string(),
    }
}

#[tokio::test]
async fn successful_saga_logs_forward_pass_then_clears() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &[], &[], CoordinatorConfig::default());
    let mut saga = coordinator
        .start_saga(SagaContext::new(), 1u64, StoreKind::Memory)
        .await
        .unwrap();

    saga.exec_sub("a", ())
        .await
        .unwrap()
        .exec_sub("b", ())
        .await
        .unwrap();

    let entries = decoded_log(&saga).await;
    assert_eq!(
        kinds(&entries),
        vec![
            EntryKind::SagaStart,
            action_start("a"),
            action_end("a"),
            action_start("b"),
            action_end("b"),
        ]
    );
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

    saga.end_saga().await.unwrap();
    assert_eq!(saga.state(), SagaState::Completed);
    assert!(saga.log().lookup().await.unwrap().is_empty());
    assert!(saga.abort_report().is_none());
    assert_eq!(*journal.lock().unwrap(), vec!["action:a", "action:b"]);

    // Ending an already-ended saga is a quiet no-op.
    saga.end_saga().await.unwrap();
    assert_eq!(saga.state(), SagaState::Completed);
    assert!(saga.log().lookup().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_action_compensates_in_reverse_order() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &["c"], &[], CoordinatorConfig::default());
    let mut saga = coordinator
        .start_saga(SagaContext::new(), 2u64, StoreKind::Memory)
        .await
        .unwrap();

    saga.exec_sub("a", ())
        .await
        .unwrap()
        .exec_sub("b", ())
        .await
        .unwrap()
        .exec_sub("c", ())
        .await
        .unwrap()
        .exec_sub("a", ())
        .await
        .unwrap();

    assert_eq!(saga.state(), SagaState::Aborted);
    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "action:a", "action:b", "action:c", "comp:c", "comp:b", "comp:a"
        ]
    );

    let report = saga.abort_report().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.compensated, vec!["c", "b", "a"]);

    // Retained by default; the full history stays readable.
    let entries = decoded_log(&saga).await;
    assert_eq!(
        kinds(&entries),
        vec![
            EntryKind::SagaStart,
            action_start("a"),
            action_end("a"),
            action_start("b"),
            action_end("b"),
            action_start("c"),
            EntryKind::SagaAbort,
            compensate_start("c"),
            compensate_end("c"),
            compensate_start("b"),
            compensate_end("b"),
            compensate_start("a"),
            compensate_end("a"),
        ]
    );
}

#[tokio::test]
async fn aborted_saga_ignores_end_saga() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &["b"], &[], CoordinatorConfig::default());
    let mut saga = coordinator
        .start_saga(SagaContext::new(), 3u64, StoreKind::Memory)
        .await
        .unwrap();

    saga.exec_sub("a", ())
        .await
        .unwrap()
        .exec_sub("b", ())
        .await
        .unwrap();
    assert_eq!(saga.state(), SagaState::Aborted);

    let len_before = saga.log().lookup().await.unwrap().len();
    saga.end_saga().await.unwrap();
    assert_eq!(saga.state(), SagaState::Aborted);

    let entries = decoded_log(&saga).await;
    assert_eq!(entries.len(), len_before);
    assert!(!kinds(&entries).contains(&EntryKind::SagaEnd));
}

#[tokio::test]
async fn explicit_abort_rolls_back_completed_actions() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &[], &[], CoordinatorConfig::default());
    let mut saga = coordinator
        .start_saga(SagaContext::new(), 4u64, StoreKind::Memory)
        .await
        .unwrap();

    saga.exec_sub("a", ())
        .await
        .unwrap()
        .exec_sub("b", ())
        .await
        .unwrap();
    saga.abort().await.unwrap();

    assert_eq!(saga.state(), SagaState::Aborted);
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["action:a", "action:b", "comp:b", "comp:a"]
    );

    // Repeated aborts stay no-ops.
    saga.abort().await.unwrap();
    assert_eq!(journal.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn abort_before_any_action_records_only_the_decision() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &[], &[], CoordinatorConfig::default());
    let mut saga = coordinator
        .start_saga(SagaContext::new(), 5u64, StoreKind::Memory)
        .await
        .unwrap();

    saga.abort().await.unwrap();

    assert_eq!(saga.state(), SagaState::Aborted);
    assert_eq!(
        kinds(&decoded_log(&saga).await),
        vec![EntryKind::SagaStart, EntryKind::SagaAbort]
    );
    let report = saga.abort_report().unwrap();
    assert!(report.is_clean());
    assert!(report.compensated.is_empty());
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn action_without_logged_end_is_still_compensated() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &["a"], &[], CoordinatorConfig::default());
    let mut saga = coordinator
        .start_saga(SagaContext::new(), 6u64, StoreKind::Memory)
        .await
        .unwrap();

    saga.exec_sub("a", ()).await.unwrap();

    assert_eq!(*journal.lock().unwrap(), vec!["action:a", "comp:a"]);
    let entry_kinds = kinds(&decoded_log(&saga).await);
    assert!(entry_kinds.contains(&action_start("a")));
    assert!(!entry_kinds.contains(&action_end("a")));
    assert!(entry_kinds.contains(&compensate_end("a")));
}

#[tokio::test]
async fn compensation_retries_until_it_succeeds() {
    let attempts = Arc::new(AtomicU32::new(0));
    let comp_attempts = Arc::clone(&attempts);
    let coordinator = ExecutionCoordinator::builder()
        .sub_tx(
            "flaky",
            |_ctx: SagaContext, _args: ()| async move {
                Err(BusinessFailure::new("forward always fails"))
            },
            move |_ctx: SagaContext, _args: ()| {
                let attempts = Arc::clone(&comp_attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(BusinessFailure::new("not yet"));
                    }
                    BusinessResult::Ok(())
                }
            },
        )
        .unwrap()
        .config(CoordinatorConfig {
            compensation_retry: fast_retry(3),
            ..Default::default()
        })
        .build();

    let mut saga = coordinator
        .start_saga(SagaContext::new(), 7u64, StoreKind::Memory)
        .await
        .unwrap();
    saga.exec_sub("flaky", ()).await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let report = saga.abort_report().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.compensated, vec!["flaky"]);
    assert!(kinds(&decoded_log(&saga).await).contains(&compensate_end("flaky")));
}

#[tokio::test]
async fn exhausted_compensation_escalates_and_scan_continues() {
    let journal = new_journal();
    let config = CoordinatorConfig {
        compensation_retry: fast_retry(1),
        ..Default::default()
    };
    let coordinator = journaling_coordinator(&journal, &[], &["b"], config);
    let mut saga = coordinator
        .start_saga(SagaContext::new(), 8u64, StoreKind::Memory)
        .await
        .unwrap();

    saga.exec_sub("a", ())
        .await
        .unwrap()
        .exec_sub("b", ())
        .await
        .unwrap();
    saga.abort().await.unwrap();

    assert_eq!(saga.state(), SagaState::Aborted);
    assert_eq!(
        *journal.lock().unwrap(),
        vec![
            "action:a",
            "action:b",
            "comp-fail:b",
            "comp-fail:b",
            "comp:a"
        ]
    );

    let report = saga.abort_report().unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.compensated, vec!["a"]);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.sub_tx_id, "b");
    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.reason, "b compensation failed");

    // The dangling CompensateStart stays behind for follow-up.
    let entry_kinds = kinds(&decoded_log(&saga).await);
    assert!(entry_kinds.contains(&compensate_start("b")));
    assert!(!entry_kinds.contains(&compensate_end("b")));
    assert!(entry_kinds.contains(&compensate_end("a")));
}

#[tokio::test]
async fn clear_policy_empties_the_log_after_abort() {
    let journal = new_journal();
    let config = CoordinatorConfig {
        abort_log: AbortLogPolicy::Clear,
        ..Default::default()
    };
    let coordinator = journaling_coordinator(&journal, &["b"], &[], config);
    let mut saga = coordinator
        .start_saga(SagaContext::new(), 9u64, StoreKind::Memory)
        .await
        .unwrap();

    saga.exec_sub("a", ())
        .await
        .unwrap()
        .exec_sub("b", ())
        .await
        .unwrap();

    assert_eq!(saga.state(), SagaState::Aborted);
    assert!(saga.log().lookup().await.unwrap().is_empty());
    // The report still says what happened even though the log is gone.
    assert_eq!(saga.abort_report().unwrap().compensated, vec!["b", "a"]);
}

#[tokio::test]
async fn compensation_receives_the_logged_arguments() {
    let seen: Arc<Mutex<Vec<(String, String, i64)>>> = Arc::new(Mutex::new(Vec::new()));
    let action_seen = Arc::clone(&seen);
    let comp_seen = Arc::clone(&seen);

    let coordinator = ExecutionCoordinator::builder()
        .sub_tx(
            "transfer",
            move |_ctx: SagaContext, (account, amount): (String, i64)| {
                let seen = Arc::clone(&action_seen);
                async move {
                    seen.lock().unwrap().push(("action".to_string(), account, amount));
                    BusinessResult::Ok(())
                }
            },
            move |_ctx: SagaContext, (account, amount): (String, i64)| {
                let seen = Arc::clone(&comp_seen);
                async move {
                    seen.lock().unwrap().push(("comp".to_string(), account, amount));
                    BusinessResult::Ok(())
                }
            },
        )
        .unwrap()
        .sub_tx(
            "boom",
            |_ctx: SagaContext, _args: ()| async move { Err(BusinessFailure::new("boom")) },
            |_ctx: SagaContext, _args: ()| async move { BusinessResult::Ok(()) },
        )
        .unwrap()
        .build();

    let mut saga = coordinator
        .start_saga(SagaContext::new(), 10u64, StoreKind::Memory)
        .await
        .unwrap();
    saga.exec_sub("transfer", ("foo".to_string(), 100i64))
        .await
        .unwrap()
        .exec_sub("boom", ())
        .await
        .unwrap();

    assert_eq!(saga.state(), SagaState::Aborted);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("action".to_string(), "foo".to_string(), 100),
            ("comp".to_string(), "foo".to_string(), 100),
        ]
    );
}

#[tokio::test]
async fn append_failure_is_fatal_before_the_action_runs() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &[], &[], CoordinatorConfig::default());
    let store = Arc::new(MemoryLogStore::new());
    let mut saga = coordinator
        .start_saga_with_store(SagaContext::new(), 11u64, store.clone())
        .await
        .unwrap();

    store.set_fail_on_append(true).await;
    let err = saga.exec_sub("a", ()).await.unwrap_err();

    assert!(matches!(
        err,
        SagaError::Store(StoreError::Backend(_))
    ));
    // ActionStart never made it to the log, so the action never ran.
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_log_makes_abort_fatal() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &[], &[], CoordinatorConfig::default());
    let store = Arc::new(MemoryLogStore::new());
    let mut saga = coordinator
        .start_saga_with_store(SagaContext::new(), 12u64, store.clone())
        .await
        .unwrap();
    saga.exec_sub("a", ()).await.unwrap();

    store.set_fail_on_lookup(true).await;
    let err = saga.abort().await.unwrap_err();

    assert!(matches!(err, SagaError::Store(StoreError::Backend(_))));
    assert_eq!(*journal.lock().unwrap(), vec!["action:a"]);
}

#[tokio::test]
async fn context_values_reach_every_call() {
    let hits = Arc::new(AtomicU32::new(0));
    let action_hits = Arc::clone(&hits);
    let coordinator = ExecutionCoordinator::builder()
        .sub_tx(
            "check",
            move |ctx: SagaContext, _args: ()| {
                let hits = Arc::clone(&action_hits);
                async move {
                    if ctx.value("tenant") == Some(&json!("acme")) {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }
                    BusinessResult::Ok(())
                }
            },
            |_ctx: SagaContext, _args: ()| async move { BusinessResult::Ok(()) },
        )
        .unwrap()
        .build();

    let ctx = SagaContext::new().with_value("tenant", json!("acme"));
    let correlation = ctx.correlation_id().to_string();
    let mut saga = coordinator
        .start_saga(ctx, 13u64, StoreKind::Memory)
        .await
        .unwrap();
    saga.exec_sub("check", ()).await.unwrap().end_saga().await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(saga.context().correlation_id(), correlation);
}

#[tokio::test]
async fn concurrent_sagas_share_one_coordinator() {
    let journal = new_journal();
    let coordinator = journaling_coordinator(&journal, &[], &[], CoordinatorConfig::default());

    let mut handles = Vec::new();
    for i in 0..4u64 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let mut saga = coordinator
                .start_saga(SagaContext::new(), i, StoreKind::Memory)
                .await
                .unwrap();
            saga.exec_sub("a", ())
                .await
                .unwrap()
                .exec_sub("b", ())
                .await
                .unwrap()
                .end_saga()
                .await
                .unwrap();
            saga.state()
        }));
    }

    for outcome in join_all(handles).await {
        assert_eq!(outcome.unwrap(), SagaState::Completed);
    }
    assert_eq!(journal.lock().unwrap().len(), 8);
}

mod pending_scan {
    use super::*;

    fn entry(sequence: u64, kind: EntryKind) -> LogEntry {
        LogEntry::new(sequence, kind)
    }

    #[test]
    fn uncompensated_actions_come_back_newest_first() {
        let entries = vec![
            entry(0, EntryKind::SagaStart),
            entry(1, action_start("a")),
            entry(2, action_end("a")),
            entry(3, action_start("b")),
        ];
        let pending = pending_compensations(&entries);
        let ids: Vec<&str> = pending.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn recorded_compensations_are_credited() {
        let entries = vec![
            entry(0, EntryKind::SagaStart),
            entry(1, action_start("a")),
            entry(2, action_start("b")),
            entry(3, EntryKind::SagaAbort),
            entry(4, compensate_start("b")),
            entry(5, compensate_end("b")),
        ];
        let pending = pending_compensations(&entries);
        let ids: Vec<&str> = pending.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn repeated_ids_credit_the_most_recent_start() {
        let first_params = (1i64,).encode().unwrap();
        let second_params = (2i64,).encode().unwrap();
        let entries = vec![
            entry(0, EntryKind::SagaStart),
            entry(
                1,
                EntryKind::ActionStart {
                    sub_tx_id: "x".to_string(),
                    params: first_params.clone(),
                },
            ),
            entry(2, action_end("x")),
            entry(
                3,
                EntryKind::ActionStart {
                    sub_tx_id: "x".to_string(),
                    params: second_params,
                },
            ),
            entry(4, EntryKind::SagaAbort),
            entry(5, compensate_start("x")),
            entry(6, compensate_end("x")),
        ];
        let pending = pending_compensations(&entries);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, "x");
        assert_eq!(pending[0].1, first_params);
    }

    #[test]
    fn clean_logs_have_nothing_pending() {
        assert!(pending_compensations(&[]).is_empty());
        let entries = vec![entry(0, EntryKind::SagaStart), entry(1, EntryKind::SagaEnd)];
        assert!(pending_compensations(&entries).is_empty());
    }
}
