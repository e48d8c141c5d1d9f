use std::sync::Arc;
use std::time::Duration;

use omnidocs_core_types::{Origin, WindowId};
use popup_lifecycle::{
    CancelController, CancelReason, InboundEnvelope, MemoryHost, PopupError, PopupLifecycle,
    PopupWindow, WindowHost,
};
use serde_json::json;
use url::Url;

fn popup_url() -> Url {
    Url::parse("https://capture.example.com/session?tenant=7").unwrap()
}

#[tokio::test(start_paused = true)]
async fn polling_detects_user_close() {
    let host = MemoryHost::new();
    let lifecycle = PopupLifecycle::new(Arc::new(host.clone()));
    let controller = CancelController::new();

    let opened = lifecycle.open(&popup_url(), &controller).unwrap();
    let window = host.last_window().unwrap();
    assert_eq!(window.target(), "_blank");
    assert!(window.features().ends_with("width=1500,height=1000"));

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(!controller.is_cancelled());

    window.user_close();
    let reason = tokio::time::timeout(Duration::from_secs(1), controller.cancelled())
        .await
        .expect("closure detected within a few polls");
    assert_eq!(reason, CancelReason::PopupClosed);

    tokio::task::yield_now().await;
    assert!(opened.watch.is_finished());
    assert_eq!(window.close_calls(), 0);
}

#[tokio::test]
async fn closure_event_cancels_without_polling() {
    let host = MemoryHost::new().with_close_events();
    let lifecycle =
        PopupLifecycle::new(Arc::new(host.clone())).with_poll_interval(Duration::from_secs(3600));
    let controller = CancelController::new();

    let _opened = lifecycle.open(&popup_url(), &controller).unwrap();
    host.last_window().unwrap().user_close();

    let reason = tokio::time::timeout(Duration::from_secs(1), controller.cancelled())
        .await
        .expect("closure event observed");
    assert_eq!(reason, CancelReason::PopupClosed);
}

#[tokio::test]
async fn blocked_popup_cancels_controller() {
    let host = MemoryHost::new();
    host.block_popups(true);
    let lifecycle = PopupLifecycle::new(Arc::new(host.clone()));
    let controller = CancelController::new();

    let err = lifecycle.open(&popup_url(), &controller).err().unwrap();
    assert!(matches!(
        err,
        PopupError::Blocked {
            reason: CancelReason::PopupBlocked,
            ..
        }
    ));
    assert_eq!(controller.reason(), Some(CancelReason::PopupBlocked));
    assert!(host.windows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopped_watch_never_fires() {
    let host = MemoryHost::new();
    let lifecycle = PopupLifecycle::new(Arc::new(host.clone()));
    let controller = CancelController::new();

    let opened = lifecycle.open(&popup_url(), &controller).unwrap();
    opened.watch.stop();
    tokio::task::yield_now().await;

    host.last_window().unwrap().user_close();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!controller.is_cancelled());
}

#[tokio::test]
async fn listeners_end_with_their_scope() {
    let host = MemoryHost::new();
    let controller = CancelController::new();
    let mut rx = host.listen(controller.scope());
    assert_eq!(host.active_listeners(), 1);

    let envelope = InboundEnvelope {
        source: WindowId::new(),
        origin: Origin::parse("https://capture.example.com").unwrap(),
        data: json!({"eventType": "omnidocs-init-request", "correlationId": "c"}),
    };
    assert_eq!(host.dispatch(envelope.clone()), 1);
    assert_eq!(rx.recv().await.unwrap().data, envelope.data);

    controller.cancel(CancelReason::Finished);
    assert_eq!(host.dispatch(envelope), 0);
    assert_eq!(host.active_listeners(), 0);
    assert_eq!(host.registrations(), 1);
}

#[tokio::test]
async fn posts_only_reach_matching_origin() {
    let host = MemoryHost::new();
    let window = host
        .open(&popup_url(), "_blank", &Default::default())
        .unwrap();
    let memory = host.last_window().unwrap();
    let origin = Origin::from_url(&popup_url()).unwrap();

    window.post_message(json!({"eventType": "a"}), &origin).unwrap();
    memory.navigate(&Url::parse("https://login.other.example/").unwrap());
    window.post_message(json!({"eventType": "b"}), &origin).unwrap();

    assert_eq!(memory.posted_event_types(), vec!["a".to_string()]);
    assert_eq!(memory.dropped().len(), 1);

    window.close();
    assert!(window.is_closed());
    assert!(window.post_message(json!({}), &origin).is_err());
}
