// Session-level integration tests against the in-process fake router.

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;

use wispctl_api::testing::FakeRouter;
use wispctl_api::{Error, Param, RouterSession, TransportConfig};

async fn logged_in_session(router: &FakeRouter) -> RouterSession {
    let transport = TransportConfig::default();
    let mut session = RouterSession::connect(&router.host(), router.port(), false, &transport)
        .await
        .expect("connect");
    session
        .login(router.username(), &SecretString::from(router.password().to_owned()))
        .await
        .expect("login");
    session
}

#[tokio::test]
async fn login_and_identity_read() {
    let router = FakeRouter::spawn().await;
    let mut session = logged_in_session(&router).await;

    let records = session
        .command("/system/identity/print", &[])
        .await
        .expect("identity");
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].get("name").map(String::as_str),
        Some("fake-router")
    );
}

#[tokio::test]
async fn bad_credentials_surface_authentication_error() {
    let router = FakeRouter::spawn().await;
    let transport = TransportConfig::default();
    let mut session = RouterSession::connect(&router.host(), router.port(), false, &transport)
        .await
        .expect("connect");

    let err = session
        .login("api", &SecretString::from("wrong".to_owned()))
        .await
        .expect_err("login must fail");
    assert!(matches!(err, Error::Authentication { .. }), "got {err:?}");
}

#[tokio::test]
async fn queries_filter_print_replies() {
    let router = FakeRouter::spawn().await;
    router.add_list_entry("isolated", "10.9.0.2", "expired");
    router.add_list_entry("portal-redirect", "10.9.0.2", "captive");
    router.add_list_entry("isolated", "10.9.0.6", "expired");

    let mut session = logged_in_session(&router).await;
    let records = session
        .command(
            "/ip/firewall/address-list/print",
            &[Param::query("list", "isolated")],
        )
        .await
        .expect("print");

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.get("list").map(String::as_str) == Some("isolated")));
}

#[tokio::test]
async fn write_then_read_round_trips() {
    let router = FakeRouter::spawn().await;
    let mut session = logged_in_session(&router).await;

    let reply = session
        .command(
            "/ip/firewall/address-list/add",
            &[
                Param::attr("list", "portal-redirect"),
                Param::attr("address", "172.16.4.2"),
                Param::attr("comment", "cust 7"),
            ],
        )
        .await
        .expect("add");
    // `!done` carries the created id as `=ret=`.
    assert!(reply.iter().any(|r| r.contains_key("ret")));
    assert!(router.in_list("portal-redirect", "172.16.4.2"));
}

#[tokio::test]
async fn traps_become_command_errors_and_keep_the_stream_framed() {
    let router = FakeRouter::spawn().await;
    router.add_list_entry("isolated", "10.9.0.2", "dup");

    let mut session = logged_in_session(&router).await;
    let err = session
        .command(
            "/ip/firewall/address-list/add",
            &[
                Param::attr("list", "isolated"),
                Param::attr("address", "10.9.0.2"),
            ],
        )
        .await
        .expect_err("duplicate add must trap");
    assert!(matches!(err, Error::Trap { .. }), "got {err:?}");

    // The session is still usable after a trap.
    let records = session
        .command("/system/identity/print", &[])
        .await
        .expect("identity after trap");
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn connect_timeout_is_bounded() {
    // RFC 5737 TEST-NET address: connect attempts black-hole.
    let transport = TransportConfig {
        timeout: Duration::from_millis(200),
        ..TransportConfig::default()
    };
    let started = std::time::Instant::now();
    let result = RouterSession::connect("203.0.113.1", 8728, false, &transport).await;

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(3));
}
