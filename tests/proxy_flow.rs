//! End-to-end proxy tests against mock upstreams.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use rewrite_proxy::config::{PathRule, RewriteRule};
use rewrite_proxy::proxy::inspect::{BodyInspector, Inspection};
use rewrite_proxy::proxy::ReverseProxy;

mod common;

use common::MockResponse;

const PAGE: &str = r#"<html><head><script src="https://origin.example/app.js" integrity="sha384-abc"></script></head><body><a href="https://origin.example/login">go</a></body></html>"#;

#[tokio::test]
async fn html_is_rewritten_and_framing_headers_dropped() {
    let (upstream, _seen) = common::start_mock_backend(
        MockResponse::new(200, PAGE)
            .header("content-type", "text/html; charset=utf-8")
            .header("x-frame-options", "DENY")
            .header("content-security-policy", "default-src 'self'")
            .header("x-upstream", "kept"),
    )
    .await;

    let mut config = common::config_for(upstream);
    config.rewrite.push(RewriteRule {
        pattern: r"https://origin\.example".into(),
        replacement: "http://<DOMAIN>".into(),
    });
    let (addr, server) = common::start_proxy(config).await;

    let response = common::client()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("x-frame-options").is_none());
    assert!(response.headers().get("content-security-policy").is_none());
    assert_eq!(response.headers()["x-upstream"], "kept");

    let body = response.text().await.unwrap();
    assert!(!body.contains("integrity"));
    assert!(!body.contains("origin.example"));
    assert!(body.contains(&format!(r#"src="http://{addr}/app.js""#)));
    assert!(body.contains(&format!(r#"href="http://{addr}/login""#)));

    server.close().unwrap();
}

#[tokio::test]
async fn whitelisted_bodies_pass_through_byte_for_byte() {
    let mut binary = b"\x89PNG\r\n\x1a\n integrity=\"x\" https://origin.example ".to_vec();
    binary.extend((0u8..=255).rev());

    let (upstream, _seen) = common::start_mock_backend(
        MockResponse::new(200, binary.clone()).header("content-type", "text/html"),
    )
    .await;

    let mut config = common::config_for(upstream);
    config.filter.whitelisted_extensions.push("png".into());
    config.rewrite.push(RewriteRule {
        pattern: r"https://origin\.example".into(),
        replacement: "gone".into(),
    });
    let (addr, server) = common::start_proxy(config).await;
    let client = common::client();

    for path in ["/logo.png", "/assets/adaf93e1611d7934016a.js"] {
        let response = client.get(format!("http://{addr}{path}")).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.bytes().await.unwrap().as_ref(), binary.as_slice(), "{path}");
    }

    server.close().unwrap();
}

#[tokio::test]
async fn path_rule_routes_to_its_upstream() {
    let (default_upstream, mut default_seen) =
        common::start_mock_backend(MockResponse::new(200, "default")).await;
    let (api_upstream, mut api_seen) =
        common::start_mock_backend(MockResponse::new(200, "pong").header("content-type", "text/plain")).await;

    let mut config = common::config_for(default_upstream);
    config.paths.push(PathRule {
        path: "/api".into(),
        url: format!("http://{api_upstream}"),
    });
    let (addr, server) = common::start_proxy(config).await;
    let client = common::client();

    let pong = client.get(format!("http://{addr}/api/ping?x=1")).send().await.unwrap();
    assert_eq!(pong.text().await.unwrap(), "pong");
    assert_eq!(api_seen.recv().await.unwrap().request_line, "GET /ping?x=1 HTTP/1.1");

    let other = client.get(format!("http://{addr}/apiary")).send().await.unwrap();
    assert_eq!(other.text().await.unwrap(), "default");
    assert_eq!(default_seen.recv().await.unwrap().request_line, "GET /apiary HTTP/1.1");

    server.close().unwrap();
}

#[tokio::test]
async fn outbound_headers_are_transformed() {
    let (upstream, mut seen) = common::start_mock_backend(MockResponse::new(204, "")).await;

    let mut config = common::config_for(upstream);
    config.upstream.origin = Some("https://origin.example".into());
    let (addr, server) = common::start_proxy(config).await;

    let response = common::client()
        .get(format!("http://{addr}/x"))
        .header("x-return-to", "http://origin.example/next")
        .header("origin", "http://attacker.test")
        .header("accept-encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let recorded = seen.recv().await.unwrap();
    assert_eq!(recorded.header("origin"), Some("https://origin.example"));
    assert_eq!(recorded.header("referer"), Some(format!("http://{upstream}").as_str()));
    assert_eq!(recorded.header("x-return-to"), Some("https://origin.example/next"));
    assert_eq!(recorded.header("host"), Some(upstream.to_string().as_str()));
    assert!(recorded.header("accept-encoding").is_none());

    server.close().unwrap();
}

struct ChannelInspector(mpsc::UnboundedSender<Inspection>);

impl BodyInspector for ChannelInspector {
    fn inspect(&self, inspection: Inspection) {
        let _ = self.0.send(inspection);
    }
}

#[tokio::test]
async fn inspected_exchange_forwards_body_unchanged() {
    let (upstream, mut seen) = common::start_mock_backend(
        MockResponse::new(200, r#"{"ok":true}"#).header("content-type", "application/json"),
    )
    .await;

    let mut config = common::config_for(upstream);
    config.inspection.paths.push("/session".into());
    config.inspection.max_body_bytes = 4;
    let (tx, mut inspected) = mpsc::unbounded_channel();
    let proxy = ReverseProxy::with_inspector(config, Arc::new(ChannelInspector(tx))).unwrap();
    let (addr, server) = common::start_server(proxy).await;

    let payload = r#"{"hello":"world"}"#;
    let response = common::client()
        .post(format!("http://{addr}/v1/session"))
        .header("content-type", "application/json")
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"ok":true}"#);
    assert_eq!(seen.recv().await.unwrap().body, payload.as_bytes());

    let inspection = tokio::time::timeout(Duration::from_secs(5), inspected.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inspection.path, "/v1/session");
    assert_eq!(inspection.status, 200);
    assert_eq!(inspection.request_body.as_ref(), b"{\"he");
    assert_eq!(inspection.response_body.as_ref(), b"{\"ok");

    server.close().unwrap();
}

#[tokio::test]
async fn unreachable_upstream_maps_to_bad_gateway() {
    // Bind then drop to get a port nothing listens on.
    let vacant = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let (addr, server) = common::start_proxy(common::config_for(vacant)).await;
    let response = common::client().get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(response.text().await.unwrap(), "Upstream request failed");

    server.close().unwrap();
}

#[tokio::test]
async fn inspected_response_streams_while_request_body_is_open() {
    const LEN: usize = 1024 * 1024;
    let upstream = common::start_eager_backend(LEN).await;

    let mut config = common::config_for(upstream);
    config.upstream.tee_capacity = 2;
    config.inspection.paths.push("/upload".into());
    config.filter.whitelisted_content.push("application/octet-stream".into());
    let (addr, server) = common::start_proxy(config).await;

    // The request body never finishes, so its copy never completes.
    let open_body = stream::iter([Ok::<_, io::Error>(Bytes::from_static(b"first part"))]).chain(stream::pending());
    let exchange = async {
        let response = common::client()
            .post(format!("http://{addr}/upload"))
            .body(reqwest::Body::wrap_stream(open_body))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.bytes().await.unwrap()
    };

    let body = tokio::time::timeout(Duration::from_secs(10), exchange)
        .await
        .expect("response stalled behind the open request body");
    assert_eq!(body.len(), LEN);
    assert!(body.iter().all(|b| *b == b'x'));

    server.close().unwrap();
}

#[tokio::test]
async fn reload_routes_next_request_to_new_upstream() {
    let (old_upstream, mut old_seen) = common::start_mock_backend(MockResponse::new(200, "old")).await;
    let (new_upstream, mut new_seen) = common::start_mock_backend(MockResponse::new(200, "new")).await;

    let proxy = ReverseProxy::new(common::config_for(old_upstream)).unwrap();
    let (addr, server) = common::start_server(proxy.clone()).await;
    let client = common::client();

    let before = client.get(format!("http://{addr}/api/x")).send().await.unwrap();
    assert_eq!(before.text().await.unwrap(), "old");
    assert_eq!(old_seen.recv().await.unwrap().request_line, "GET /api/x HTTP/1.1");

    let mut config = common::config_for(old_upstream);
    config.paths.push(PathRule {
        path: "/api".into(),
        url: format!("http://{new_upstream}"),
    });
    proxy.reload(config);

    let after = client.get(format!("http://{addr}/api/x")).send().await.unwrap();
    assert_eq!(after.text().await.unwrap(), "new");
    assert_eq!(new_seen.recv().await.unwrap().request_line, "GET /x HTTP/1.1");

    server.close().unwrap();
}

#[tokio::test]
async fn silent_upstream_maps_to_gateway_timeout() {
    let upstream = common::start_silent_backend().await;

    let mut config = common::config_for(upstream);
    config.upstream.timeout_secs = 1;
    let (addr, server) = common::start_proxy(config).await;

    let started = std::time::Instant::now();
    let response = common::client().get(format!("http://{addr}/slow")).send().await.unwrap();
    assert_eq!(response.status(), 504);
    assert_eq!(response.text().await.unwrap(), "Upstream request failed");
    assert!(started.elapsed() >= Duration::from_secs(1));

    server.close().unwrap();
}
