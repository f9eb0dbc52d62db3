//! The reverse proxy handler.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, Response, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use http_body::Body as _;
use url::Url;

use crate::config::ProxyConfig;
use crate::http::{BoxError, ConnInfo, Handler};
use crate::observability::metrics;
use crate::proxy::filter::{needs_rewrite, FilterInput};
use crate::proxy::headers::{forward_request_headers, response_headers};
use crate::proxy::inspect::{should_inspect, BodyInspector, Inspection, LogInspector};
use crate::proxy::rewrite::{rewrite_body, RuleCache};
use crate::proxy::tee::{collect_limited, tee};
use crate::proxy::ProxyError;
use crate::routing::Router;

/// Configuration with the forwarding table and rewrite rules compiled from it.
struct Tables {
    config: ProxyConfig,
    router: Router,
    rules: RuleCache,
}

impl Tables {
    fn new(config: ProxyConfig) -> Self {
        let router = Router::from_config(&config);
        let rules = RuleCache::new(&config.rewrite);
        Self { config, router, rules }
    }
}

struct ProxyState {
    client: reqwest::Client,
    tables: ArcSwap<Tables>,
    inspector: Arc<dyn BodyInspector>,
}

/// Forwards each request upstream and rewrites eligible response bodies.
///
/// Cloning yields another handle to the same proxy.
#[derive(Clone)]
pub struct ReverseProxy {
    state: Arc<ProxyState>,
}

impl ReverseProxy {
    /// A proxy that logs inspected exchanges.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        Self::with_inspector(config, Arc::new(LogInspector))
    }

    /// A proxy that hands inspected exchanges to `inspector`.
    pub fn with_inspector(config: ProxyConfig, inspector: Arc<dyn BodyInspector>) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ProxyError::Client)?;

        Ok(Self {
            state: Arc::new(ProxyState {
                client,
                tables: ArcSwap::from_pointee(Tables::new(config)),
                inspector,
            }),
        })
    }

    /// Swap in new forwarding, filter, rewrite and inspection tables.
    pub fn reload(&self, config: ProxyConfig) {
        self.state.tables.store(Arc::new(Tables::new(config)));
    }

    /// Forward one request and build the response for the client.
    pub async fn handle(&self, request: Request<Body>, info: ConnInfo) -> Result<Response<Body>, ProxyError> {
        let tables = self.state.tables.load_full();
        let config = &tables.config;

        let (parts, body) = request.into_parts();
        let host = request_host(&parts.headers, &parts.uri).to_string();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let target = tables.router.resolve(&host, &path);
        let url = Url::parse(&target).map_err(|e| ProxyError::InvalidTarget {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(peer_addr = %info.remote_addr, target = %url, "Forwarding");

        let inspect = should_inspect(&path, &config.inspection.paths);
        let capacity = config.upstream.tee_capacity;
        let limit = config.inspection.max_body_bytes;

        let headers = forward_request_headers(&parts.headers, &config.forced_origin(), &config.forced_referer());
        let mut upstream_request = self
            .state
            .client
            .request(parts.method.clone(), url.clone())
            .headers(headers);

        // One copy goes upstream verbatim; the other is read in the background.
        let mut request_capture = None;
        if !body.is_end_stream() {
            if inspect {
                let (forwarded, copy) = tee(body.into_data_stream(), capacity);
                request_capture = Some(tokio::spawn(collect_limited(copy, limit)));
                upstream_request = upstream_request.body(reqwest::Body::wrap_stream(forwarded));
            } else {
                upstream_request = upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
            }
        }

        // Covers connecting and the response head; follows reloads.
        let timeout = Duration::from_secs(config.upstream.timeout_secs);
        let upstream = tokio::time::timeout(timeout, upstream_request.send())
            .await
            .map_err(|_| ProxyError::Timeout(timeout))?
            .map_err(ProxyError::Unreachable)?;

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let rewrite = needs_rewrite(
            &FilterInput {
                host: url.host_str().unwrap_or_default(),
                path: &path,
                content_type: header_str(&upstream_headers, header::CONTENT_TYPE),
                content_encoding: header_str(&upstream_headers, header::CONTENT_ENCODING),
                status,
            },
            &config.filter,
        );
        metrics::record_rewrite_decision(rewrite);

        let body = if inspect {
            let (returned, copy) = tee(upstream.bytes_stream(), capacity);
            self.spawn_inspection(Inspected {
                method: parts.method,
                path: path.clone(),
                status,
                request_capture,
                response_copy: copy,
                limit,
            });
            build_body(returned, rewrite, &host, &tables.rules).await?
        } else {
            build_body(upstream.bytes_stream(), rewrite, &host, &tables.rules).await?
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = response_headers(&upstream_headers, rewrite);
        Ok(response)
    }

    fn spawn_inspection(&self, inspected: Inspected) {
        let inspector = Arc::clone(&self.state.inspector);
        let Inspected {
            method,
            path,
            status,
            request_capture,
            response_copy,
            limit,
        } = inspected;
        tokio::spawn(async move {
            // Both copies drain together: the request may still be streaming
            // while the response is, and an unread copy backs up its tee.
            let request = async move {
                match request_capture {
                    Some(capture) => match capture.await {
                        Ok(Ok(bytes)) => bytes,
                        Ok(Err(e)) => {
                            tracing::debug!(error = %e, "Request copy ended early");
                            Bytes::new()
                        }
                        Err(_) => Bytes::new(),
                    },
                    None => Bytes::new(),
                }
            };
            let response = async move {
                collect_limited(response_copy, limit)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::debug!(error = %e, "Response copy ended early");
                        Bytes::new()
                    })
            };
            let (request_body, response_body) = tokio::join!(request, response);

            inspector.inspect(Inspection {
                method,
                path,
                status,
                request_body,
                response_body,
            });
        });
    }
}

struct Inspected {
    method: axum::http::Method,
    path: String,
    status: StatusCode,
    request_capture: Option<tokio::task::JoinHandle<std::io::Result<Bytes>>>,
    response_copy: crate::proxy::tee::TeeBody,
    limit: usize,
}

impl Handler for ReverseProxy {
    fn call(&self, request: Request<Body>, info: ConnInfo) -> BoxFuture<'static, Result<Response<Body>, BoxError>> {
        let proxy = self.clone();
        Box::pin(async move { proxy.handle(request, info).await.map_err(Into::into) })
    }
}

/// Stream the body through, or buffer and rewrite it.
async fn build_body<S, E>(stream: S, rewrite: bool, domain: &str, rules: &RuleCache) -> Result<Body, ProxyError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    if !rewrite {
        return Ok(Body::from_stream(stream));
    }

    let bytes = read_to_end(stream).await?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(Body::from(rewrite_body(&text, &rules.for_domain(domain))))
}

/// Host from the `host` header, else the URI authority (HTTP/2).
fn request_host<'a>(headers: &'a HeaderMap, uri: &'a axum::http::Uri) -> &'a str {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or_default()
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn read_to_end<S, E>(stream: S) -> Result<Bytes, ProxyError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    futures_util::pin_mut!(stream);
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk.map_err(|e| ProxyError::Body(e.into()))?);
    }
    Ok(buf.freeze())
}
