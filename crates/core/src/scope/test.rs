use super::*;
use bytes::Bytes;
use folio_test_utils::{gateway::GatedGateway, handler::RecordingHandler, *};
use std::time::Duration;
use tokio::sync::oneshot;

fn make_tracker() -> DynTracker {
    let builder = crate::default_test_builder().build().unwrap();
    builder.tracker.create(builder.clone()).unwrap()
}

fn make_coordinator(
    gateway: Arc<GatedGateway>,
    handler: Arc<RecordingHandler>,
) -> DynCoordinator {
    let builder = crate::default_test_builder()
        .with_default_config()
        .unwrap()
        .build()
        .unwrap();
    builder
        .coordinator
        .create(builder.clone(), gateway, handler)
        .unwrap()
}

#[test]
fn enter_exit_cancels_token() {
    let scope = CancellationScope::new();
    let token = scope.enter();
    assert!(scope.is_active(&token));
    assert!(!token.is_cancelled());

    let clone = token.clone();
    scope.exit(&token);
    assert!(clone.is_cancelled());
    assert!(!scope.is_active(&token));

    // exiting again is harmless
    scope.exit(&token);
}

#[test]
fn reenter_gives_a_fresh_token() {
    let scope = CancellationScope::new();
    let t1 = scope.enter();
    scope.exit(&t1);
    let t2 = scope.enter();
    assert_ne!(t1, t2);
    assert!(t1.is_cancelled());
    assert!(!t2.is_cancelled());
    assert!(scope.is_active(&t2));
}

#[test]
fn enter_while_active_exits_previous() {
    let scope = CancellationScope::new();
    let t1 = scope.enter();
    let tracker = make_tracker();
    assert!(scope.bind_tracker(&t1, tracker.clone()));
    assert!(tracker.acquire("a".into()));

    let t2 = scope.enter();
    assert!(t1.is_cancelled());
    assert!(!t2.is_cancelled());
    assert_eq!(0, tracker.in_flight_count());
}

#[test]
fn foreign_token_exit_is_a_noop() {
    let other = CancellationScope::new();
    let foreign = other.enter();

    let scope = CancellationScope::new();
    let token = scope.enter();
    let tracker = make_tracker();
    assert!(scope.bind_tracker(&token, tracker.clone()));
    assert!(tracker.acquire("a".into()));

    // same id, different lifetime
    assert_eq!(foreign.id(), token.id());
    assert_ne!(foreign, token);
    scope.exit(&foreign);
    scope.exit(&ScopeToken::new(token.id()));
    assert!(scope.is_active(&token));
    assert!(tracker.is_in_flight(&"a".into()));
}

#[test]
fn bind_requires_an_active_token() {
    let scope = CancellationScope::new();
    let token = scope.enter();
    scope.exit(&token);
    assert!(!scope.bind_tracker(&token, make_tracker()));
}

#[test]
fn exit_releases_bound_trackers() {
    let scope = CancellationScope::new();
    let token = scope.enter();
    let tracker = make_tracker();
    assert!(scope.bind_tracker(&token, tracker.clone()));
    assert!(tracker.acquire("a".into()));
    assert!(tracker.acquire("b".into()));

    scope.exit(&token);
    assert_eq!(0, tracker.in_flight_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_aborts_spawned_tasks() {
    let scope = CancellationScope::new();
    let token = scope.enter();

    let (tx, rx) = oneshot::channel::<()>();
    assert!(scope.spawn(&token, async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let _ = tx.send(());
    }));
    assert_eq!(1, scope.pending_task_count());

    scope.exit(&token);

    // the sender is dropped unsent when the task is aborted
    let res = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("task was not aborted");
    assert!(res.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn spawn_refused_after_exit() {
    let scope = CancellationScope::new();
    let token = scope.enter();
    assert!(scope.can_spawn(&token));
    scope.exit(&token);
    assert!(!scope.can_spawn(&token));
    assert!(!scope.spawn(&token, async {}));
}

#[test]
fn spawn_refused_without_runtime() {
    let scope = CancellationScope::new();
    let token = scope.enter();
    assert!(scope.is_active(&token));
    assert!(!scope.can_spawn(&token));
    assert!(!scope.spawn(&token, async {}));
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_silences_bound_coordinator() {
    enable_tracing();

    let gateway = GatedGateway::new(items(&["a", "b", "c"]));
    let handler = RecordingHandler::new();
    let coordinator = make_coordinator(gateway.clone(), handler.clone());

    let scope = CancellationScope::new();
    let token = scope.enter();
    assert!(scope.bind_coordinator(&token, coordinator.clone()));

    let epoch = coordinator.begin_epoch();
    coordinator
        .start_batch(items(&["a", "b", "c"]), epoch)
        .unwrap();
    gateway.wait_pending(3).await;

    assert!(gateway.release(&"a".into(), Ok(payload_for("a"))));
    iter_check!({
        if coordinator.outstanding_count() == 2 {
            break;
        }
    });

    scope.exit(&token);

    assert!(coordinator.current_epoch() > epoch);
    assert_eq!(0, coordinator.outstanding_count());
    assert!(coordinator.snapshot().is_empty());

    // late results for the cancelled epoch change nothing
    coordinator.on_sub_fetch_complete("b".into(), epoch, Ok(Bytes::new()));
    coordinator.on_sub_fetch_complete("c".into(), epoch, Ok(Bytes::new()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(0, handler.stable_count());
    assert!(handler.updated().is_empty());
    assert!(coordinator.snapshot().is_empty());
}

#[test]
fn drop_ends_the_active_lifetime() {
    let tracker = make_tracker();
    let token = {
        let scope = CancellationScope::new();
        let token = scope.enter();
        assert!(scope.bind_tracker(&token, tracker.clone()));
        assert!(tracker.acquire("a".into()));
        token
    };
    assert!(token.is_cancelled());
    assert_eq!(0, tracker.in_flight_count());
}
