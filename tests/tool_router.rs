//! 多对端路由集成测试：使用 trainwreck-echo-peer 作为真实子进程工具服务器
#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use trainwreck::core::{ActionErrorKind, AgentError, RouterCleanup, ShutdownCoordinator};
use trainwreck::mcp::{PeerState, PeerTimeouts, ToolPeer, ToolRouter};

const ECHO_PEER: &str = env!("CARGO_BIN_EXE_trainwreck-echo-peer");

fn echo(label: &str, tools: &str, extra: &[&str]) -> Vec<String> {
    let mut cmd = vec![
        ECHO_PEER.to_string(),
        "--label".to_string(),
        label.to_string(),
        "--tools".to_string(),
        tools.to_string(),
    ];
    cmd.extend(extra.iter().map(|s| s.to_string()));
    cmd
}

fn text_of(result: &serde_json::Value) -> &str {
    result["content"][0]["text"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_last_registration_wins() {
    let router = ToolRouter::new(PeerTimeouts::default());
    let a = router.add_peer("A", echo("A", "x", &[])).await.unwrap();
    assert_eq!(a.len(), 1);
    let b = router.add_peer("B", echo("B", "x,y", &[])).await.unwrap();
    assert_eq!(b.len(), 2);

    let x = router.invoke("x", json!({"n": 1})).await.unwrap();
    assert_eq!(x.peer, "B");
    assert_eq!(text_of(&x.result), r#"B:x:{"n":1}"#);

    let y = router.invoke("y", json!({})).await.unwrap();
    assert_eq!(y.peer, "B");

    let err = router.invoke("z", json!({})).await.unwrap_err();
    assert!(matches!(err, AgentError::ToolNotFound(_)));
    assert_eq!(err.kind(), ActionErrorKind::ToolNotFound);

    // list_tools 是各对端描述的并集，带对端名
    let mut listed: Vec<(String, String)> = router
        .list_tools()
        .into_iter()
        .map(|t| (t.peer, t.name))
        .collect();
    listed.sort();
    assert_eq!(
        listed,
        vec![
            ("A".to_string(), "x".to_string()),
            ("B".to_string(), "x".to_string()),
            ("B".to_string(), "y".to_string()),
        ]
    );

    let report = router.close().await;
    assert_eq!(report.attempted, 2);
    assert!(report.failures.is_empty());
    assert!(router.list_tools().is_empty());
}

#[tokio::test]
async fn test_failed_peer_does_not_abort_router() {
    let router = ToolRouter::new(PeerTimeouts::default());
    assert!(router
        .add_peer("ghost", vec!["/definitely/not/here".to_string()])
        .await
        .is_err());
    router.add_peer("ok", echo("ok", "ping", &[])).await.unwrap();

    assert_eq!(router.peer_names(), vec!["ok".to_string()]);
    assert_eq!(router.failures().len(), 1);
    assert_eq!(router.failures()[0].peer, "ghost");
    assert!(router.invoke("ping", json!({})).await.is_ok());
    router.close().await;
}

#[tokio::test]
async fn test_correlation_skips_noise() {
    let router = ToolRouter::new(PeerTimeouts::default());
    router.add_peer("noisy", echo("noisy", "a,b", &["--noise"])).await.unwrap();
    for i in 0..3 {
        let routed = router.invoke("a", json!({ "i": i })).await.unwrap();
        assert_eq!(text_of(&routed.result), format!(r#"noisy:a:{{"i":{}}}"#, i));
    }
    router.close().await;
}

/// 以忽略 SIGTERM 的方式启动 echo peer
fn stubborn(label: &str, tools: &str) -> Vec<String> {
    let launch = shlex::try_join(echo(label, tools, &[]).iter().map(String::as_str)).unwrap();
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("trap '' TERM; exec {}", launch),
    ]
}

#[tokio::test]
async fn test_remove_peer_drops_routes() {
    let router = ToolRouter::new(PeerTimeouts::default());
    router.add_peer("A", echo("A", "x", &[])).await.unwrap();
    router.add_peer("B", echo("B", "y", &[])).await.unwrap();

    assert!(router.remove_peer("A").await.unwrap());
    assert!(!router.remove_peer("A").await.unwrap());
    assert!(matches!(
        router.invoke("x", json!({})).await,
        Err(AgentError::ToolNotFound(_))
    ));
    assert_eq!(router.route_of("y").as_deref(), Some("B"));
    router.close().await;

    // 移除同名冲突的胜者后，先登记的对端重新接管该工具
    let router = ToolRouter::new(PeerTimeouts::default());
    router.add_peer("A", echo("A", "x", &[])).await.unwrap();
    router.add_peer("B", echo("B", "x", &[])).await.unwrap();
    assert_eq!(router.route_of("x").as_deref(), Some("B"));

    assert!(router.remove_peer("B").await.unwrap());
    assert_eq!(router.route_of("x").as_deref(), Some("A"));
    let routed = router.invoke("x", json!({})).await.unwrap();
    assert_eq!(routed.peer, "A");
    assert_eq!(text_of(&routed.result), "A:x:{}");
    router.close().await;
}

#[tokio::test]
async fn test_cleanup_terminates_every_peer_concurrently() {
    let grace = Duration::from_secs(1);
    let router = Arc::new(ToolRouter::new(PeerTimeouts {
        request: Duration::from_secs(5),
        terminate_grace: grace,
    }));
    router.add_peer("stubborn-1", stubborn("s1", "a")).await.unwrap();
    router.add_peer("stubborn-2", stubborn("s2", "b")).await.unwrap();
    router.add_peer("polite", echo("polite", "c", &[])).await.unwrap();

    // 逐个终止需要两个宽限期，超出清理预算
    let mut coordinator = ShutdownCoordinator::new().with_timeout(grace + Duration::from_millis(800));
    coordinator.register(RouterCleanup::new(Arc::clone(&router)));

    let started = Instant::now();
    coordinator.run_cleanup().await;
    assert!(started.elapsed() < grace * 2, "{:?}", started.elapsed());

    assert_eq!(
        router.peer_states(),
        vec![
            ("stubborn-1".to_string(), PeerState::Closed),
            ("stubborn-2".to_string(), PeerState::Closed),
            ("polite".to_string(), PeerState::Closed),
        ]
    );
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let timeouts = PeerTimeouts {
        request: Duration::from_millis(300),
        terminate_grace: Duration::from_secs(1),
    };
    let peer = ToolPeer::spawn("mute", echo("mute", "slow", &["--mute-calls"]), timeouts).unwrap();
    peer.discover_tools().await.unwrap();

    let err = peer.invoke("slow", json!({})).await.unwrap_err();
    assert!(matches!(err, AgentError::Protocol(_)));

    peer.terminate().await.unwrap();
    peer.terminate().await.unwrap();
    assert_eq!(peer.state(), PeerState::Closed);
    assert!(matches!(
        peer.invoke("slow", json!({})).await,
        Err(AgentError::PeerUnavailable(_))
    ));
}
