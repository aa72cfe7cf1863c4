use super::*;
use folio_api::aggregate::error_code;
use folio_test_utils::{gateway::GatedGateway, handler::RecordingHandler, *};
use std::time::Duration;

const PHOTOSETS: &str = "photosets";

async fn make_session(
    gateway: &Arc<GatedGateway>,
    config: ViewSessionConfig,
) -> (ViewSession, Arc<RecordingHandler>) {
    let mut builder = crate::default_builder(gateway.factory())
        .with_default_config()
        .unwrap();
    builder
        .config
        .set_module_config(&ViewSessionModConfig {
            view_session: config,
        })
        .unwrap();
    let builder = builder.build().unwrap();
    let handler = RecordingHandler::new();
    let session =
        ViewSession::new(builder, PHOTOSETS.into(), handler.clone())
            .await
            .unwrap();
    (session, handler)
}

fn lazy() -> ViewSessionConfig {
    ViewSessionConfig {
        fan_out: false,
        ..Default::default()
    }
}

async fn wait_stable(handler: &RecordingHandler, count: usize) {
    iter_check!({
        if handler.stable_count() >= count {
            break;
        }
    });
}

#[test]
fn config_defaults() {
    let config = ViewSessionConfig::default();
    assert!(config.fan_out);
    assert!(!config.empty_collection_is_error);

    let json = serde_json::to_string(&ViewSessionModConfig::default()).unwrap();
    assert_eq!(
        r#"{"viewSession":{"fanOut":true,"emptyCollectionIsError":false}}"#,
        json
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn load_fans_out_and_stabilizes_once() {
    enable_tracing();

    let gateway = GatedGateway::new(items(&["a", "b", "c"]));
    let (session, handler) =
        make_session(&gateway, ViewSessionConfig::default()).await;
    assert_eq!(&CollectionId::from(PHOTOSETS), session.collection());

    let token = session.enter().unwrap();
    assert!(session.load(&token));
    gateway.wait_pending(3).await;
    assert!(!session.is_stable());

    assert!(gateway.release(&"c".into(), Ok(payload_for("c"))));
    assert!(gateway.release(
        &"b".into(),
        Err(FolioError::remote(
            error_code::API_ERROR,
            error_code::API_ERROR_DESCRIPTION
        ))
    ));
    assert!(gateway.release(&"a".into(), Ok(payload_for("a"))));

    wait_stable(&handler, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(1, handler.stable_count());

    let model = handler.last_stable().unwrap();
    assert_eq!(session.current_epoch(), model.epoch());
    assert_eq!(
        vec!["a", "b", "c"],
        model.keys().map(|k| &**k).collect::<Vec<_>>()
    );
    assert_eq!(Some(payload_for("a")), model.get(&"a".into()).unwrap().payload);
    assert_eq!(Some(payload_for("c")), model.get(&"c".into()).unwrap().payload);

    let b = model.get(&"b".into()).unwrap();
    assert_eq!(None, b.payload);
    assert_eq!(error_code::API_ERROR, b.error.code);
    assert_eq!(Some("There was an error"), b.error.description.as_deref());
}

#[tokio::test(flavor = "multi_thread")]
async fn lazy_rows_fetch_once_per_key() {
    let gateway = GatedGateway::new(items(&["a", "b"]));
    let (session, handler) = make_session(&gateway, lazy()).await;

    let token = session.enter().unwrap();
    assert!(session.load(&token));
    wait_stable(&handler, 1).await;
    assert_eq!(0, gateway.sub_fetch_count());
    assert_eq!(2, handler.last_stable().unwrap().len());

    assert!(session.row_visible(&token, "a".into()));
    assert!(!session.row_visible(&token, "a".into()));
    assert!(!session.row_visible(&token, "a".into()));
    assert_eq!(1, session.in_flight_rows());

    gateway.wait_pending(1).await;
    assert_eq!(1, gateway.sub_fetch_count());
    assert!(gateway.release(&"a".into(), Ok(payload_for("a"))));

    iter_check!({
        if session.in_flight_rows() == 0 {
            break;
        }
    });

    assert_eq!(
        vec![(session.current_epoch(), RequestKey::from("a"))],
        handler.updated()
    );
    assert_eq!(
        Some(payload_for("a")),
        session.snapshot().get(&"a".into()).unwrap().payload
    );

    // the row already has its payload
    assert!(!session.row_visible(&token, "a".into()));
    // unknown keys are not fetched
    assert!(!session.row_visible(&token, "zz".into()));
    assert_eq!(1, gateway.sub_fetch_count());
    assert_eq!(1, handler.stable_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_row_may_be_retried() {
    let gateway = GatedGateway::new(items(&["a"]));
    let (session, handler) = make_session(&gateway, lazy()).await;

    let token = session.enter().unwrap();
    session.load(&token);
    wait_stable(&handler, 1).await;

    assert!(session.row_visible(&token, "a".into()));
    gateway.wait_pending(1).await;
    gateway.release(&"a".into(), Err(FolioError::remote(500, "oops")));
    iter_check!({
        if handler.updated().len() == 1 {
            break;
        }
    });
    assert_eq!(500, session.snapshot().get(&"a".into()).unwrap().error.code);

    iter_check!({
        if session.in_flight_rows() == 0 {
            break;
        }
    });
    assert!(session.row_visible(&token, "a".into()));
    gateway.wait_pending(1).await;
    gateway.release(&"a".into(), Ok(payload_for("a")));
    iter_check!({
        if handler.updated().len() == 2 {
            break;
        }
    });

    let a = session.snapshot().get(&"a".into()).cloned().unwrap();
    assert_eq!(Some(payload_for("a")), a.payload);
    assert!(!a.error.is_error());
}

#[tokio::test(flavor = "multi_thread")]
async fn row_visible_waits_for_stable_batch() {
    let gateway = GatedGateway::new(items(&["a"]));
    let (session, handler) =
        make_session(&gateway, ViewSessionConfig::default()).await;

    let token = session.enter().unwrap();
    session.load(&token);
    gateway.wait_pending(1).await;

    // the fan-out owns the key until the batch is stable
    assert!(!session.row_visible(&token, "a".into()));
    assert_eq!(1, gateway.sub_fetch_count());

    gateway.release(&"a".into(), Err(FolioError::remote(503, "busy")));
    wait_stable(&handler, 1).await;

    assert!(session.row_visible(&token, "a".into()));
    gateway.wait_pending(1).await;
    assert_eq!(2, gateway.sub_fetch_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_collection_stabilizes_empty_by_default() {
    let gateway = GatedGateway::new(Vec::new());
    let (session, handler) =
        make_session(&gateway, ViewSessionConfig::default()).await;

    let token = session.enter().unwrap();
    session.load(&token);
    wait_stable(&handler, 1).await;

    assert!(handler.last_stable().unwrap().is_empty());
    assert_eq!(0, gateway.sub_fetch_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_collection_can_be_an_error() {
    let gateway = GatedGateway::new(Vec::new());
    let (session, handler) = make_session(
        &gateway,
        ViewSessionConfig {
            empty_collection_is_error: true,
            ..Default::default()
        },
    )
    .await;

    let token = session.enter().unwrap();
    session.load(&token);
    wait_stable(&handler, 1).await;

    let model = handler.last_stable().unwrap();
    assert!(model.is_parent_failure());
    assert_eq!(ErrorMarker::no_collection(), model.elements()[0].error);
}

#[tokio::test(flavor = "multi_thread")]
async fn collection_failure_is_a_parent_failure() {
    let gateway = GatedGateway::new(Vec::new());
    gateway.set_collection(Err(FolioError::remote(502, "bad gateway")));
    let (session, handler) =
        make_session(&gateway, ViewSessionConfig::default()).await;

    let token = session.enter().unwrap();
    session.load(&token);
    wait_stable(&handler, 1).await;

    let model = handler.last_stable().unwrap();
    assert!(model.is_parent_failure());
    assert_eq!(502, model.elements()[0].error.code);
    assert_eq!(
        Some("bad gateway"),
        model.elements()[0].error.description.as_deref()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reload_supersedes_outstanding_fan_out() {
    let gateway = GatedGateway::new(items(&["a", "b"]));
    let (session, handler) =
        make_session(&gateway, ViewSessionConfig::default()).await;

    let token = session.enter().unwrap();
    session.load(&token);
    gateway.wait_pending(2).await;
    let first = session.current_epoch();

    // retry while the first fan-out is still outstanding
    session.load(&token);
    iter_check!({
        if gateway.sub_fetch_count() == 4 && gateway.pending_count() == 2 {
            break;
        }
    });
    let second = session.current_epoch();
    assert!(second > first);

    for key in gateway.pending_keys() {
        assert!(gateway.release(&key, Ok(payload_for(&key))));
    }
    wait_stable(&handler, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stable = handler.stable();
    assert_eq!(1, stable.len());
    assert_eq!(second, stable[0].0);
    assert!(stable[0].1.is_complete());
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_stops_delivery_and_old_token_is_dead() {
    let gateway = GatedGateway::new(items(&["a", "b"]));
    let (session, handler) =
        make_session(&gateway, ViewSessionConfig::default()).await;

    let token = session.enter().unwrap();
    session.load(&token);
    gateway.wait_pending(2).await;
    let epoch = session.current_epoch();

    session.exit(&token);
    assert!(token.is_cancelled());
    assert!(session.current_epoch() > epoch);

    // the aborted calls are gone, nobody is listening anymore
    iter_check!({
        if gateway.pending_count() == 0 {
            break;
        }
    });
    assert!(!gateway.release(&"a".into(), Ok(payload_for("a"))));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(0, handler.stable_count());
    assert!(session.snapshot().is_empty());
    assert!(!session.load(&token));
    assert!(!session.row_visible(&token, "a".into()));

    // a new lifetime works again, with a newer epoch
    let token2 = session.enter().unwrap();
    assert!(session.load(&token2));
    iter_check!({
        if gateway.pending_count() == 2 {
            break;
        }
    });
    assert!(session.current_epoch() > epoch);
    for key in gateway.pending_keys() {
        gateway.release(&key, Ok(payload_for(&key)));
    }
    wait_stable(&handler, 1).await;
    assert_eq!(session.current_epoch(), handler.stable()[0].0);
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_during_row_fetch_drops_the_row() {
    let gateway = GatedGateway::new(items(&["a"]));
    let (session, handler) = make_session(&gateway, lazy()).await;

    let token = session.enter().unwrap();
    session.load(&token);
    wait_stable(&handler, 1).await;

    assert!(session.row_visible(&token, "a".into()));
    gateway.wait_pending(1).await;
    session.exit(&token);
    assert_eq!(0, session.in_flight_rows());

    // the row task was aborted, so the call has no receiver anymore
    iter_check!({
        if gateway.pending_count() == 0 {
            break;
        }
    });
    assert!(!gateway.release(&"a".into(), Ok(payload_for("a"))));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(handler.updated().is_empty());
    assert!(session.snapshot().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn lifetimes_do_not_share_tickets() {
    let gateway = GatedGateway::new(items(&["a"]));
    let (session, handler) = make_session(&gateway, lazy()).await;

    let t1 = session.enter().unwrap();
    session.load(&t1);
    wait_stable(&handler, 1).await;
    assert!(session.row_visible(&t1, "a".into()));

    // re-entering without exit ends the first lifetime
    let t2 = session.enter().unwrap();
    assert!(t1.is_cancelled());
    assert_eq!(0, session.in_flight_rows());

    session.load(&t2);
    wait_stable(&handler, 2).await;
    assert!(session.row_visible(&t2, "a".into()));
    assert_eq!(1, session.in_flight_rows());
    assert!(!session.row_visible(&t1, "a".into()));
}

#[tokio::test(flavor = "multi_thread")]
async fn load_without_runtime_keeps_the_stable_model() {
    let gateway = GatedGateway::new(items(&["a"]));
    let (session, handler) = make_session(&gateway, lazy()).await;

    let token = session.enter().unwrap();
    assert!(session.load(&token));
    wait_stable(&handler, 1).await;
    let epoch = session.current_epoch();

    // a plain thread has no runtime to spawn the collection fetch onto
    let loaded =
        std::thread::scope(|s| s.spawn(|| session.load(&token)).join())
            .unwrap();
    assert!(!loaded);

    assert_eq!(epoch, session.current_epoch());
    assert!(session.is_stable());
    assert_eq!(1, session.snapshot().len());
}
