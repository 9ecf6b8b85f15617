use super::*;
use crate::backend::test_backend::TestBackend;
use crate::identity::Identity;
use crate::protocol::frame::ServerFrame;
use crate::protocol::{Capabilities, Element, BASE_1_0};
use crate::session::accept::AcceptOptions;
use crate::session::test_client::TestClient;
use crate::session::{self, SessionReader};

struct Fixture {
    backend: TestBackend,
    client: TestClient,
    session: Arc<Session>,
    _reader: SessionReader,
    dispatcher: Dispatcher,
    shutdown: ShutdownFlag,
}

async fn fixture(client_caps: &[&str]) -> Fixture {
    let backend = TestBackend::new();
    let (mut client, input, output) = TestClient::new();
    client.send_hello(client_caps).await;
    let (session, reader) = session::accept(
        input,
        output,
        Capabilities::new([BASE_1_0, NOTIFICATION_CAPABILITY]),
        &Identity::ssh("alice"),
        AcceptOptions {
            session_id: 12,
            hello_timeout: Duration::from_secs(2),
            max_frame_bytes: 4096,
        },
    )
    .await
    .unwrap();
    client.next_hello().await;

    let shutdown = ShutdownFlag::new();
    let dispatcher = Dispatcher::new(
        backend.client("12"),
        shutdown.clone(),
        Duration::from_millis(10),
    );
    Fixture {
        backend,
        client,
        session,
        _reader: reader,
        dispatcher,
        shutdown,
    }
}

fn kill(target: Option<&str>) -> Rpc {
    let mut content = Element::new("kill-session");
    if let Some(target) = target {
        content = content.with_child(Element::new("session-id").with_text(target));
    }
    Rpc::new("7", "kill-session").with_content(content)
}

#[tokio::test]
async fn test_other_operation_goes_to_backend() {
    let mut f = fixture(&[BASE_1_0]).await;
    let rpc = Rpc::new("1", "get-config");

    f.dispatcher.dispatch(&f.session, &rpc).await;

    let reply = f.client.next_reply().await;
    assert_eq!(reply.message_id.as_deref(), Some("1"));
    assert_eq!(
        reply.reply,
        Reply::Data(Element::new("data").with_text("get-config"))
    );
    assert_eq!(f.backend.state().operations, vec![rpc]);
}

#[tokio::test]
async fn test_close_session_replies_ok_and_sets_flag() {
    let mut f = fixture(&[BASE_1_0]).await;

    f.dispatcher
        .dispatch(&f.session, &Rpc::new("2", "close-session"))
        .await;

    assert_eq!(f.client.next_reply().await.reply, Reply::Ok);
    assert!(f.shutdown.is_set());
    assert_eq!(f.backend.state().close_calls, 1);
    assert_eq!(f.session.status(), SessionStatus::Closing);
}

#[tokio::test]
async fn test_close_session_failure_still_sets_flag() {
    let mut f = fixture(&[BASE_1_0]).await;
    f.backend.state().fail_close = true;

    f.dispatcher
        .dispatch(&f.session, &Rpc::new("2", "close-session"))
        .await;

    let reply = f.client.next_reply().await.reply;
    assert_eq!(reply.errors()[0].tag, ErrorTag::OperationFailed);
    assert!(f.shutdown.is_set());
}

#[tokio::test]
async fn test_kill_session_forwards_target() {
    let mut f = fixture(&[BASE_1_0]).await;

    let rpc = kill(Some(" 44 "));
    f.dispatcher.dispatch(&f.session, &rpc).await;

    assert_eq!(f.client.next_reply().await.reply, Reply::Ok);
    assert_eq!(
        f.backend.state().kill_calls,
        vec![("12".to_string(), "44".to_string())]
    );
    assert!(!f.shutdown.is_set());
}

#[tokio::test]
async fn test_kill_session_returns_backend_error_verbatim() {
    let mut f = fixture(&[BASE_1_0]).await;

    f.dispatcher.dispatch(&f.session, &kill(Some("12"))).await;

    let reply = f.client.next_reply().await.reply;
    assert_eq!(reply.errors()[0].tag, ErrorTag::InvalidValue);
    assert_eq!(
        reply.errors()[0].message.as_deref(),
        Some("Cannot kill own session.")
    );
}

#[tokio::test]
async fn test_kill_session_without_session_id() {
    let mut f = fixture(&[BASE_1_0]).await;

    f.dispatcher.dispatch(&f.session, &kill(None)).await;

    let reply = f.client.next_reply().await.reply;
    assert_eq!(reply.errors()[0].tag, ErrorTag::MissingElement);
    assert_eq!(reply.errors()[0].bad_element.as_deref(), Some("session-id"));
    assert!(f.backend.state().kill_calls.is_empty());
}

#[tokio::test]
async fn test_kill_session_with_wrong_first_child() {
    let mut f = fixture(&[BASE_1_0]).await;
    let content = Element::new("kill-session")
        .with_child(Element::new("reason"))
        .with_child(Element::new("session-id").with_text("3"));
    let rpc = Rpc::new("7", "kill-session").with_content(content);

    f.dispatcher.dispatch(&f.session, &rpc).await;

    let reply = f.client.next_reply().await.reply;
    assert_eq!(reply.errors()[0].tag, ErrorTag::MissingElement);
}

#[tokio::test]
async fn test_kill_session_with_corrupted_payload() {
    let mut f = fixture(&[BASE_1_0]).await;

    for rpc in [
        Rpc::new("8", "kill-session"),
        Rpc::new("8", "kill-session").with_content(Element::new("get")),
    ] {
        f.dispatcher.dispatch(&f.session, &rpc).await;
        let reply = f.client.next_reply().await.reply;
        assert_eq!(reply.errors()[0].tag, ErrorTag::OperationFailed);
        assert_eq!(
            reply.errors()[0].message.as_deref(),
            Some("Corrupted RPC message.")
        );
    }
}

#[tokio::test]
async fn test_subscription_requires_capability() {
    let mut f = fixture(&[BASE_1_0]).await;

    f.dispatcher
        .dispatch(&f.session, &Rpc::new("3", "create-subscription"))
        .await;

    let reply = f.client.next_reply().await.reply;
    assert_eq!(reply.errors()[0].tag, ErrorTag::OperationNotSupported);
    assert!(f.session.notification_allowed());
}

#[tokio::test]
async fn test_subscription_then_duplicate() {
    let mut f = fixture(&[BASE_1_0, NOTIFICATION_CAPABILITY]).await;

    f.dispatcher
        .dispatch(&f.session, &Rpc::new("3", "create-subscription"))
        .await;
    assert_eq!(f.client.next_reply().await.reply, Reply::Ok);
    assert!(!f.session.notification_allowed());

    f.dispatcher
        .dispatch(&f.session, &Rpc::new("4", "create-subscription"))
        .await;
    let reply = f.client.next_reply().await;
    assert_eq!(reply.message_id.as_deref(), Some("4"));
    let error = &reply.reply.errors()[0];
    assert_eq!(error.tag, ErrorTag::OperationFailed);
    assert_eq!(error.error_type, ErrorType::Protocol);
    assert_eq!(error.message.as_deref(), Some(DUPLICATE_SUBSCRIPTION));
}

#[tokio::test]
async fn test_invalid_subscription_releases_slot() {
    let mut f = fixture(&[BASE_1_0, NOTIFICATION_CAPABILITY]).await;
    let content = Element::new("create-subscription").with_child(Element::new("bogus"));
    let rpc = Rpc::new("3", "create-subscription").with_content(content);

    f.dispatcher.dispatch(&f.session, &rpc).await;

    let reply = f.client.next_reply().await.reply;
    assert_eq!(reply.errors()[0].tag, ErrorTag::UnknownElement);
    assert!(f.session.notification_allowed());
}

#[tokio::test]
async fn test_subscription_does_not_block_later_requests() {
    let mut f = fixture(&[BASE_1_0, NOTIFICATION_CAPABILITY]).await;

    f.dispatcher
        .dispatch(&f.session, &Rpc::new("3", "create-subscription"))
        .await;
    let get = Rpc::new("4", "get");
    f.dispatcher.dispatch(&f.session, &get).await;

    assert_eq!(f.client.next_reply().await.message_id.as_deref(), Some("3"));
    assert_eq!(f.client.next_reply().await.message_id.as_deref(), Some("4"));

    // Live subscriptions only see events published after their first read.
    for _ in 0..100 {
        if f.backend.state().event_reads > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    f.backend.push_event("NETCONF", Utc::now(), "linkDown");
    match f.client.next_frame().await {
        ServerFrame::Notification(n) => assert_eq!(n.event.name, "linkDown"),
        other => panic!("expected notification, got {:?}", other),
    }
}

#[test]
fn test_subscription_spawn_fails_without_runtime() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut f = rt.block_on(fixture(&[BASE_1_0, NOTIFICATION_CAPABILITY]));

    // Outside the runtime context there is nowhere to spawn the task.
    let rpc = Rpc::new("3", "create-subscription");
    let (reply, release) = f.dispatcher.create_subscription(&f.session, &rpc);

    assert!(release.is_none());
    assert_eq!(
        reply.errors()[0].message.as_deref(),
        Some("Creating task for sending notifications failed.")
    );
    assert!(f.session.notification_allowed());

    rt.block_on(async {
        f.session.send_reply(&rpc, reply).await.unwrap();
        assert!(f.client.next_reply().await.reply.is_error());
    });
}
