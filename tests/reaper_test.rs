//! Claim reaper against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use packflow::dispatch::Dispatcher;
use packflow::error::Error;
use packflow::model::action::{NewAction, Outcome, State};
use packflow::model::pack::NewPack;
use packflow::reaper::{ClaimReaper, ReaperConfig};
use packflow::store::memory::MemoryStore;

async fn dispatcher_with(count: usize) -> Dispatcher {
    let dispatcher = Dispatcher::from_store(Arc::new(MemoryStore::new()));
    dispatcher
        .registry()
        .register(NewPack::new("packA"))
        .await
        .unwrap();
    for _ in 0..count {
        dispatcher
            .create_action(NewAction::new("packA", "actionA"))
            .await
            .unwrap();
    }
    dispatcher
}

fn config(requeue: bool) -> ReaperConfig {
    ReaperConfig {
        claim_timeout: Duration::from_millis(1),
        interval: Duration::from_millis(10),
        requeue_expired: requeue,
    }
}

#[test]
fn zero_durations_are_rejected() {
    let dispatcher = Dispatcher::from_store(Arc::new(MemoryStore::new()));

    let err = ClaimReaper::new(dispatcher.clone(), ReaperConfig::new(Duration::ZERO))
        .err()
        .unwrap();
    assert!(matches!(err, Error::Config(_)));

    let mut cfg = ReaperConfig::new(Duration::from_secs(60));
    cfg.interval = Duration::ZERO;
    assert!(ClaimReaper::new(dispatcher.clone(), cfg).is_err());

    let far = ReaperConfig::new(Duration::from_secs(1_000_000_000_000_000));
    let err = ClaimReaper::new(dispatcher, far).err().unwrap();
    assert!(matches!(err, Error::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn sweep_expires_only_abandoned_claims() {
    let dispatcher = dispatcher_with(3).await;
    let abandoned = dispatcher.take_action("packA", "actionA").await.unwrap().unwrap();
    let finished = dispatcher.take_action("packA", "actionA").await.unwrap().unwrap();
    dispatcher
        .report_outcome(finished.id, Outcome::Completed, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let reaper = ClaimReaper::new(dispatcher.clone(), config(false)).unwrap();
    let report = reaper.sweep().await.unwrap();

    assert_eq!(report.expired.len(), 1);
    assert_eq!(report.expired[0].id, abandoned.id);
    assert_eq!(report.requeued, 0);
    assert_eq!(
        dispatcher.get_action(abandoned.id).await.unwrap().state,
        State::Timeout
    );
    assert_eq!(
        dispatcher.get_action(finished.id).await.unwrap().state,
        State::Completed
    );

    // Already expired; nothing left to do.
    assert!(reaper.sweep().await.unwrap().expired.is_empty());
}

#[tokio::test]
async fn sweep_can_requeue_for_another_worker() {
    let dispatcher = dispatcher_with(1).await;
    let abandoned = dispatcher
        .take_action_as("packA", "actionA", "crashed")
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let reaper = ClaimReaper::new(dispatcher.clone(), config(true)).unwrap();
    let report = reaper.sweep().await.unwrap();
    assert_eq!(report.requeued, 1);

    let retaken = dispatcher
        .take_action_as("packA", "actionA", "healthy")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retaken.id, abandoned.id);
    assert_eq!(retaken.requeue_count, 1);
}

#[tokio::test]
async fn run_sweeps_until_shutdown() {
    let dispatcher = dispatcher_with(1).await;
    let taken = dispatcher.take_action("packA", "actionA").await.unwrap().unwrap();

    let reaper = ClaimReaper::new(dispatcher.clone(), config(false)).unwrap();
    let handle = tokio::spawn({
        let reaper = reaper.clone();
        async move { reaper.run().await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    reaper.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reaper did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(
        dispatcher.get_action(taken.id).await.unwrap().state,
        State::Timeout
    );
}
