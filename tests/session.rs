// tests/session.rs

//! Session behavior over a scripted transport: framing, escalation,
//! deadlines, cancellation, and reconnect.

mod common;

use cloudflock::shell::{HostEndpoint, Session};
use cloudflock::Error;
use common::{root_endpoint, ScriptedHost, ScriptedTransport, EOF, HANG};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn transport_with(hostname: &str, host: ScriptedHost) -> Arc<ScriptedTransport> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.add_host(hostname, host);
    transport
}

#[tokio::test]
async fn test_query_returns_trimmed_output() {
    let host = ScriptedHost::new();
    host.respond("uptime", "  10:02:11 up 3 days, load average: 0.31, 0.40, 0.52  ");
    let transport = transport_with("h1", host);

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    let out = session
        .query("uptime", Duration::from_secs(30), false)
        .await
        .unwrap();
    assert!(out.starts_with("10:02:11"));
    assert!(!out.ends_with(' '));
    session.close().await;
}

#[tokio::test]
async fn test_multiline_commands_are_normalized() {
    let host = ScriptedHost::new();
    let transport = transport_with("h1", host.clone());

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    session
        .query("echo a\necho b\r\necho c", Duration::from_secs(30), false)
        .await
        .unwrap();

    let commands = host.commands();
    assert_eq!(commands.len(), 1);
    assert!(!commands[0].contains('\n'));
    assert_eq!(commands[0], "echo a echo b  echo c");
    session.close().await;
}

#[tokio::test]
async fn test_hostname_is_cached() {
    let host = ScriptedHost::new();
    host.respond("hostname", "web01.example.com");
    let transport = transport_with("h1", host.clone());

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    assert_eq!(session.hostname().await.unwrap(), "web01.example.com");
    assert_eq!(session.hostname().await.unwrap(), "web01.example.com");
    assert_eq!(host.count("hostname"), 1);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_deadline_recoverable_returns_partial() {
    let host = ScriptedHost::new();
    host.respond("slowjob", &format!("partial line{}", HANG));
    let transport = transport_with("h1", host);

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    let out = session
        .query("slowjob", Duration::from_secs(5), true)
        .await
        .unwrap();
    assert_eq!(out, "partial line");
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_deadline_unrecoverable_errors_with_context() {
    let host = ScriptedHost::new();
    host.respond("slowjob", HANG);
    let transport = transport_with("h1", host);

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    session.set_phase("migrate").await;
    let err = session
        .query("slowjob", Duration::from_secs(5), false)
        .await
        .unwrap_err();
    match err {
        Error::DeadlineExceeded {
            host,
            phase,
            timeout_secs,
            ..
        } => {
            assert_eq!(host, "h1");
            assert_eq!(phase, "migrate");
            assert_eq!(timeout_secs, 5);
        }
        other => panic!("expected DeadlineExceeded, got {:?}", other),
    }
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_command() {
    let host = ScriptedHost::new();
    host.respond("longjob", HANG);
    let transport = transport_with("h1", host.clone());

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = session
        .query_cancellable("longjob", Duration::from_secs(7200), false, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
    session.close().await;
}

#[tokio::test]
async fn test_su_escalation_reaches_root() {
    let host = ScriptedHost::new();
    host.respond("whoami", "root")
        .respond("id", "uid=0(root) gid=0(root) groups=0(root)");
    let transport = transport_with("h1", host.clone());

    let endpoint = HostEndpoint::user_with_su("h1", "admin", "userpw", "rootpw");
    let session = Session::open(transport, endpoint).await.unwrap();
    let out = session
        .as_root("whoami", Duration::from_secs(30), false)
        .await
        .unwrap();
    assert_eq!(out, "root");

    // A follow-up id probe still reports uid 0.
    let id = session
        .as_root("id", Duration::from_secs(30), false)
        .await
        .unwrap();
    assert!(id.contains("uid=0"));

    // Elevation is sticky: exactly one `id` verification ran beyond the
    // explicit probe above.
    assert_eq!(host.count("id"), 2);
    session.close().await;
}

#[tokio::test]
async fn test_escalation_without_uid_zero_fails() {
    let host = ScriptedHost::new();
    host.respond("id", "uid=500(admin) gid=500(admin)");
    let transport = transport_with("h1", host);

    let endpoint = HostEndpoint::user_with_su("h1", "admin", "userpw", "badpw");
    let session = Session::open(transport, endpoint).await.unwrap();
    let err = session
        .as_root("whoami", Duration::from_secs(30), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotSuperuser { .. }));
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_login_retries_are_bounded() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.add_host("h1", ScriptedHost::new());
    transport.fail_logins("h1", 10);

    let err = Session::open(transport, root_endpoint("h1"))
        .await
        .unwrap_err();
    match err {
        Error::LoginFailed { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("expected LoginFailed, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_login_succeeds_after_transient_failures() {
    let host = ScriptedHost::new();
    host.respond("uptime", "up");
    let transport = Arc::new(ScriptedTransport::new());
    transport.add_host("h1", host);
    transport.fail_logins("h1", 2);

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    assert_eq!(
        session
            .query("uptime", Duration::from_secs(30), false)
            .await
            .unwrap(),
        "up"
    );
    session.close().await;
}

#[tokio::test]
async fn test_reconnect_once_on_transport_loss() {
    let host = ScriptedHost::new();
    host.respond_once("flaky", EOF).respond("flaky", "recovered");
    let transport = transport_with("h1", host);

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    let out = session
        .query("flaky", Duration::from_secs(30), false)
        .await
        .unwrap();
    assert_eq!(out, "recovered");
    assert_eq!(session.stats().reconnects(), 1);
    session.close().await;
}

#[tokio::test]
async fn test_output_tap_streams_raw_chunks() {
    let host = ScriptedHost::new();
    host.respond("uptime", "10:02 up 3 days");
    let transport = transport_with("h1", host);

    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    let captured = Arc::new(std::sync::Mutex::new(String::new()));
    let sink = Arc::clone(&captured);
    session.set_tap(Some(Arc::new(move |chunk: &str| {
        sink.lock().unwrap().push_str(chunk);
    })));

    session
        .query("uptime", Duration::from_secs(30), false)
        .await
        .unwrap();
    assert!(captured.lock().unwrap().contains("10:02 up 3 days"));

    session.set_tap(None);
    session
        .query("uptime", Duration::from_secs(30), false)
        .await
        .unwrap();
    // The tap saw the first command only.
    assert_eq!(captured.lock().unwrap().matches("10:02 up").count(), 1);
    session.close().await;
}

#[tokio::test]
async fn test_query_after_close_fails() {
    let transport = transport_with("h1", ScriptedHost::new());
    let session = Session::open(transport, root_endpoint("h1")).await.unwrap();
    session.close().await;
    session.close().await;

    let err = session
        .query("uptime", Duration::from_secs(30), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionLost { .. }));
}
