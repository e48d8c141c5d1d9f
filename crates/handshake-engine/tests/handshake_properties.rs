use std::sync::Arc;
use std::time::Duration;

use handshake_engine::{
    ClientConfig, DocumentClient, Ignored, LogDisplay, SessionError, SessionEvent, SessionState,
    StartError,
};
use omnidocs_core_types::WindowId;
use popup_lifecycle::{CancelReason, InboundEnvelope, MemoryHost, MemoryWindow, PopupWindow};
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use url::Url;

const POPUP_URL: &str = "https://capture.example.com/session?tenant=7";

fn client(host: &MemoryHost) -> DocumentClient {
    client_with(host, ClientConfig::default())
}

fn client_with(host: &MemoryHost, config: ClientConfig) -> DocumentClient {
    DocumentClient::new(Arc::new(host.clone()), Arc::new(LogDisplay), config)
}

async fn wait_for(
    rx: &mut broadcast::Receiver<SessionEvent>,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("expected session event")
}

fn init(correlation_id: &str) -> Value {
    json!({"eventType": "omnidocs-init-request", "correlationId": correlation_id})
}

fn data_request(id: &str, keys: &[&str]) -> Value {
    json!({
        "eventType": "omnidocs-data-request",
        "id": id,
        "correlationId": "corr-1",
        "formContext": "Initial",
        "data": keys
    })
}

fn delivery(event_type: &str, data: &str) -> Value {
    json!({
        "eventType": event_type,
        "id": "doc-1",
        "correlationId": "corr-1",
        "documentType": "Document",
        "data": data
    })
}

fn close() -> Value {
    json!({"eventType": "omnidocs-close-request", "correlationId": "corr-1"})
}

fn popup(host: &MemoryHost) -> Arc<MemoryWindow> {
    host.last_window().expect("popup opened")
}

#[tokio::test]
async fn init_request_is_answered_with_same_correlation_id() {
    let host = MemoryHost::new();
    let client = client(&host);
    let mut events = client.subscribe();
    let _pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);

    host.post_from(&window, init("corr-42"));
    wait_for(&mut events, |event| matches!(event, SessionEvent::InitCompleted { .. })).await;

    let posted = window.posted();
    assert_eq!(posted.len(), 1);
    assert_eq!(
        posted[0].message,
        json!({
            "eventType": "omnidocs-init-response",
            "correlationId": "corr-42",
            "postMessageType": "Document"
        })
    );
    assert_eq!(posted[0].target_origin.as_str(), "https://capture.example.com");
}

#[tokio::test]
async fn delivery_resolves_exactly_once() {
    let host = MemoryHost::new();
    let client = client(&host);
    let mut events = client.subscribe();
    let pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);

    host.post_from(&window, init("corr-1"));
    host.post_from(
        &window,
        delivery("omnidocs-delivery-request", "https://files.example.com/first.pdf"),
    );
    host.post_from(
        &window,
        delivery("omnidocs-deliver-request", "https://files.example.com/second.pdf"),
    );

    assert_eq!(pending.await, Ok("https://files.example.com/first.pdf".to_string()));
    let ignored = wait_for(&mut events, |event| {
        matches!(event, SessionEvent::MessageIgnored { .. })
    })
    .await;
    assert!(matches!(
        ignored,
        SessionEvent::MessageIgnored {
            reason: Ignored::OutOfState {
                state: SessionState::Delivering,
                ..
            },
            ..
        }
    ));
    assert_eq!(
        window.posted_event_types(),
        vec!["omnidocs-init-response", "omnidocs-deliver-response"]
    );
}

#[tokio::test]
async fn untrusted_sources_are_never_acted_upon() {
    let host = MemoryHost::new();
    let client = client(&host);
    let mut events = client.subscribe();
    let mut pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);
    let stranger = WindowId::new();

    let messages = [
        init("corr-1"),
        data_request("r-1", &["a"]),
        delivery("omnidocs-delivery-request", "https://evil.example/doc.pdf"),
        close(),
    ];
    for data in messages {
        host.dispatch(InboundEnvelope {
            source: stranger,
            origin: window.origin(),
            data,
        });
        let event = wait_for(&mut events, |event| {
            matches!(event, SessionEvent::MessageIgnored { .. })
        })
        .await;
        assert!(matches!(
            event,
            SessionEvent::MessageIgnored {
                reason: Ignored::UntrustedSource(source),
                ..
            } if source == stranger
        ));
    }

    assert!(window.posted().is_empty());
    assert_eq!(window.close_calls(), 0);
    assert!(client.pending_data_request().is_none());
    assert_eq!(pending.try_result(), None);
    assert!(client.active_session().is_some());
}

#[tokio::test(start_paused = true)]
async fn user_closing_popup_rejects_outcome() {
    let host = MemoryHost::new();
    let client = client(&host);
    let mut events = client.subscribe();
    let pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);

    host.post_from(&window, init("corr-1"));
    wait_for(&mut events, |event| matches!(event, SessionEvent::InitCompleted { .. })).await;
    window.user_close();

    let err = pending.await.unwrap_err();
    assert_eq!(err, SessionError::Cancelled(CancelReason::PopupClosed));
    assert_eq!(err.to_string(), "session cancelled: popup was closed");
    assert_eq!(client.join_session().await, Some(SessionState::Cancelled));

    assert_eq!(host.active_listeners(), 0);
    assert_eq!(
        host.post_from(
            &window,
            delivery("omnidocs-delivery-request", "https://files.example.com/late.pdf")
        ),
        0
    );
    assert_eq!(window.posted_event_types(), vec!["omnidocs-init-response"]);
}

#[tokio::test(start_paused = true)]
async fn closure_watch_ends_with_delivery() {
    let host = MemoryHost::new();
    let client = client(&host);
    let mut events = client.subscribe();
    let pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);

    host.post_from(&window, init("corr-1"));
    host.post_from(
        &window,
        delivery("omnidocs-delivery-request", "https://files.example.com/doc.pdf"),
    );
    assert_eq!(pending.await, Ok("https://files.example.com/doc.pdf".to_string()));

    tokio::time::sleep(Duration::from_secs(10)).await;
    window.user_close();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(client.active_session().is_some());
    assert_eq!(host.active_listeners(), 1);

    assert!(client.cancel());
    assert_eq!(client.join_session().await, Some(SessionState::Closed));
    wait_for(&mut events, |event| matches!(event, SessionEvent::Closed { .. })).await;
    assert_eq!(host.active_listeners(), 0);
}

#[tokio::test]
async fn closure_event_rejects_outcome() {
    let host = MemoryHost::new().with_close_events();
    let client = client_with(
        &host,
        ClientConfig {
            poll_interval: Duration::from_secs(3600),
            ..ClientConfig::default()
        },
    );
    let pending = client.get_document_url(POPUP_URL).unwrap();
    popup(&host).user_close();

    assert_eq!(
        pending.await,
        Err(SessionError::Cancelled(CancelReason::PopupClosed))
    );
}

#[tokio::test]
async fn data_response_carries_operator_values() {
    let host = MemoryHost::new();
    let client = client(&host);
    let mut events = client.subscribe();
    let _pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);

    host.post_from(&window, init("corr-1"));
    host.post_from(&window, data_request("r-1", &["a", "b"]));
    wait_for(&mut events, |event| matches!(event, SessionEvent::DataRequested { .. })).await;

    let context = client.pending_data_request().unwrap();
    assert_eq!(context.id, "r-1");
    assert_eq!(context.fields, vec!["a", "b"]);

    client.send_data_response(r#"{"a":"1","b":"2"}"#).unwrap();
    let responded = wait_for(&mut events, |event| {
        matches!(event, SessionEvent::DataResponded { .. })
    })
    .await;
    assert!(matches!(
        responded,
        SessionEvent::DataResponded { request_id: Some(ref id), .. } if id == "r-1"
    ));

    let posted = window.posted();
    assert_eq!(
        posted.last().unwrap().message,
        json!({"eventType": "omnidocs-data-response", "data": {"a": "1", "b": "2"}})
    );
    assert!(client.pending_data_request().is_none());
}

#[tokio::test]
async fn blocked_popup_fails_without_listening() {
    let host = MemoryHost::new();
    host.block_popups(true);
    let client = client(&host);
    let mut events = client.subscribe();

    let err = client.get_document_url(POPUP_URL).unwrap_err();
    assert_eq!(err, StartError::PopupBlocked(CancelReason::PopupBlocked));
    assert_eq!(
        err.to_string(),
        "popup blocked: Popup was not opened, make sure this function is run from a click action."
    );
    assert_eq!(host.registrations(), 0);
    assert!(client.active_session().is_none());

    let event = wait_for(&mut events, |event| matches!(event, SessionEvent::Cancelled { .. })).await;
    assert!(matches!(
        event,
        SessionEvent::Cancelled {
            reason: CancelReason::PopupBlocked,
            ..
        }
    ));
}

#[tokio::test]
async fn repeated_close_request_closes_window_once() {
    let host = MemoryHost::new();
    let client = client(&host);
    let mut events = client.subscribe();
    let pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);

    host.post_from(&window, init("corr-1"));
    host.post_from(
        &window,
        delivery("omnidocs-delivery-request", "https://files.example.com/doc.pdf"),
    );
    host.post_from(&window, close());
    host.post_from(&window, close());

    wait_for(&mut events, |event| matches!(event, SessionEvent::Closed { .. })).await;
    assert_eq!(client.join_session().await, Some(SessionState::Closed));
    assert_eq!(pending.await, Ok("https://files.example.com/doc.pdf".to_string()));

    assert_eq!(host.post_from(&window, close()), 0);
    assert_eq!(window.close_calls(), 1);
    assert!(client.active_session().is_none());
}

#[tokio::test]
async fn close_before_delivery_rejects_outcome() {
    let host = MemoryHost::new();
    let client = client(&host);
    let pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);

    host.post_from(&window, init("corr-1"));
    host.post_from(&window, close());

    assert_eq!(
        pending.await,
        Err(SessionError::Cancelled(CancelReason::ClosedByRemote))
    );
    assert_eq!(window.close_calls(), 1);
}

#[tokio::test]
async fn new_session_supersedes_previous_one() {
    let host = MemoryHost::new();
    let client = client(&host);
    let first = client.get_document_url(POPUP_URL).unwrap();
    let first_window = popup(&host);
    let _second = client.get_document_url(POPUP_URL).unwrap();
    let second_window = popup(&host);

    assert_eq!(
        first.await,
        Err(SessionError::Cancelled(CancelReason::Superseded))
    );
    assert_ne!(first_window.id(), second_window.id());
    assert_eq!(first_window.close_calls(), 1);
    assert_eq!(second_window.close_calls(), 0);
    assert_eq!(client.bridge().active_session(), client.active_session());
    assert_eq!(host.active_listeners(), 1);
}

#[tokio::test]
async fn host_cancel_aborts_session() {
    let host = MemoryHost::new();
    let client = client(&host);
    let pending = client.get_document_url(POPUP_URL).unwrap();

    assert!(client.cancel());
    assert!(!client.cancel());
    assert_eq!(
        pending.await,
        Err(SessionError::Cancelled(CancelReason::Aborted(
            "cancelled by host".into()
        )))
    );
    assert_eq!(
        client.send_data_response("{}").unwrap_err().to_string(),
        "no active session to answer"
    );
}

#[tokio::test]
async fn strict_origin_drops_messages_from_navigated_popup() {
    let host = MemoryHost::new();
    let client = client_with(
        &host,
        ClientConfig {
            strict_origin: true,
            ..ClientConfig::default()
        },
    );
    let mut events = client.subscribe();
    let _pending = client.get_document_url(POPUP_URL).unwrap();
    let window = popup(&host);
    window.navigate(&Url::parse("https://sso.other.example/login").unwrap());

    host.post_from(&window, init("corr-1"));
    let event = wait_for(&mut events, |event| {
        matches!(event, SessionEvent::MessageIgnored { .. })
    })
    .await;
    assert!(matches!(
        event,
        SessionEvent::MessageIgnored {
            reason: Ignored::ForeignOrigin(_),
            ..
        }
    ));
    assert!(window.posted().is_empty());
}

#[tokio::test]
async fn bad_urls_fail_synchronously() {
    let host = MemoryHost::new();
    let client = client(&host);
    assert!(matches!(
        client.get_document_url("not a url"),
        Err(StartError::InvalidUrl { .. })
    ));
    assert!(matches!(
        client.get_document_url("data:text/html,hello"),
        Err(StartError::OpaqueOrigin(_))
    ));
    assert!(host.windows().is_empty());
}

#[test]
fn starting_outside_a_runtime_fails() {
    let host = MemoryHost::new();
    let client = client(&host);
    assert_eq!(
        client.get_document_url(POPUP_URL).unwrap_err(),
        StartError::NoRuntime
    );
}
