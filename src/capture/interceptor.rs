use crate::capture::body;
use crate::capture::builder::{self, Identity, RedactedExchange};
use crate::capture::filter::{RequestMeta, SkipReason};
use crate::capture::record::{Headers, RequestSnapshot, ResponseSnapshot, RouteInfo};
use crate::capture::ApiLogger;
use axum::{
    body::{to_bytes, Body, Bytes, HttpBody},
    extract::{ConnectInfo, FromRequestParts, MatchedPath, RawPathParams, Request, State},
    http::{request::Parts, Extensions},
    middleware::Next,
    response::Response,
};
use futures::FutureExt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Authenticated principal, inserted into request or response extensions by
/// the host's auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Session identifier, inserted the same way as [`AuthenticatedUser`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

/// Handler name recorded as `route_action` in metadata. Read from request
/// extensions, or from the response when the handler attaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAction(pub String);

/// Resolves who made a request
pub trait IdentityAccessor: Send + Sync {
    fn user_id(&self, extensions: &Extensions) -> Option<String>;

    fn session_id(&self, _extensions: &Extensions) -> Option<String> {
        None
    }
}

/// Reads [`AuthenticatedUser`] and [`SessionId`] extensions
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionIdentity;

impl IdentityAccessor for ExtensionIdentity {
    fn user_id(&self, extensions: &Extensions) -> Option<String> {
        extensions.get::<AuthenticatedUser>().map(|u| u.0.clone())
    }

    fn session_id(&self, extensions: &Extensions) -> Option<String> {
        extensions.get::<SessionId>().map(|s| s.0.clone())
    }
}

/// Axum middleware entry point
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/orders", post(create_order))
///     .layer(middleware::from_fn_with_state(logger, api_logger_middleware));
/// ```
pub async fn api_logger_middleware(
    State(logger): State<Arc<ApiLogger>>,
    req: Request,
    next: Next,
) -> Response {
    logger.intercept(req, |req| next.run(req)).await
}

/// Everything about an exchange except the response body
struct Exchange {
    request: RequestSnapshot,
    request_extensions: Extensions,
    response_extensions: Extensions,
    status: u16,
    response_headers: Headers,
    started: Instant,
    finished: Instant,
}

impl ApiLogger {
    /// Run `next` exactly once and log the exchange unless a skip rule matches
    ///
    /// The response is returned as produced by `next`; nothing that happens
    /// while building or persisting the record can change it. Bodies are
    /// never held back: a response whose length is unknown or above the body
    /// limit streams straight through and is logged once it has been sent.
    pub async fn intercept<F, Fut>(self: Arc<Self>, req: Request, next: F) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let ip = client_ip(req.extensions());
        let method = req.method().as_str().to_ascii_uppercase();

        let meta = RequestMeta { path: req.uri().path(), method: &method, ip };
        if let Some(reason) = self.filter.check_request(&meta) {
            tracing::debug!(reason = %reason, path = %req.uri().path(), "API log skipped");
            return next(req).await;
        }

        let limit = self.redactor.max_body_size();
        let (mut parts, body) = req.into_parts();
        let (body, captured) = body::peek(body, limit).await;
        let Some(request_body) = captured else {
            tracing::debug!(method = %method, uri = %parts.uri, "API log skipped, request body unreadable");
            return next(Request::from_parts(parts, body)).await;
        };

        let parameters: Vec<(String, String)> = RawPathParams::from_request_parts(&mut parts, &())
            .await
            .map(|params| {
                params
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let mut request = request_snapshot(&parts, method, ip, parameters, request_body);
        let request_extensions = parts.extensions.clone();

        let started = Instant::now();
        let response = next(Request::from_parts(parts, body)).await;
        let finished = Instant::now();

        if request.route.action.is_none() {
            request.route.action = response.extensions().get::<RouteAction>().map(|a| a.0.clone());
        }

        let status = response.status().as_u16();
        if let Some(reason) = self.filter.check_response(status) {
            tracing::debug!(reason = %reason, status = status, url = %request.url, "API log skipped");
            return response;
        }

        let (parts, body) = response.into_parts();
        let exchange = Exchange {
            request,
            request_extensions,
            response_extensions: parts.extensions.clone(),
            status,
            response_headers: Headers::from(&parts.headers),
            started,
            finished,
        };

        let known_length = body.size_hint().exact();
        match known_length {
            Some(len) if len <= limit as u64 => match to_bytes(body, usize::MAX).await {
                Ok(bytes) => {
                    self.log(exchange, bytes.clone()).await;
                    Response::from_parts(parts, Body::from(bytes))
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        reason = %SkipReason::MalformedResponse,
                        url = %exchange.request.url,
                        "API log skipped"
                    );
                    Response::from_parts(parts, Body::empty())
                }
            },
            _ => {
                let (body, captured) = body::tee(body, limit.saturating_add(1));
                tokio::spawn(async move {
                    match captured.await {
                        Ok(captured) if !captured.failed => self.log(exchange, captured.bytes).await,
                        _ => tracing::debug!(
                            reason = %SkipReason::MalformedResponse,
                            url = %exchange.request.url,
                            "API log skipped"
                        ),
                    }
                });
                Response::from_parts(parts, body)
            }
        }
    }

    /// Persist one exchange; a panic anywhere in here is contained and logged
    async fn log(&self, exchange: Exchange, response_body: Bytes) {
        let Exchange {
            request,
            request_extensions,
            response_extensions,
            status,
            response_headers,
            started,
            finished,
        } = exchange;
        let response = ResponseSnapshot { status, headers: response_headers, body: response_body };

        let logged = AssertUnwindSafe(async {
            let identity = self.resolve_identity(&request_extensions, &response_extensions);
            self.record(&request, &response, started, finished, identity).await;
        })
        .catch_unwind()
        .await;

        if let Err(panic) = logged {
            tracing::error!(
                panic = ?panic,
                method = %request.method,
                url = %request.url,
                "API log pipeline panicked"
            );
        }
    }

    /// Request extensions first; the auth layer may also attach identity to
    /// the response when it runs inside this middleware
    fn resolve_identity(&self, request: &Extensions, response: &Extensions) -> Identity {
        Identity {
            user_id: self
                .identity
                .user_id(request)
                .or_else(|| self.identity.user_id(response)),
            session_id: self
                .identity
                .session_id(request)
                .or_else(|| self.identity.session_id(response)),
        }
    }

    async fn record(
        &self,
        request: &RequestSnapshot,
        response: &ResponseSnapshot,
        started: Instant,
        finished: Instant,
        identity: Identity,
    ) {
        let redacted = RedactedExchange {
            request_headers: self.redactor.redact_headers(&request.headers),
            request_body: self.redactor.redact_body(&request.body),
            response_headers: self.redactor.redact_headers(&response.headers),
            response_body: self.redactor.redact_body(&response.body),
        };
        let correlation_id = self.correlation.resolve(&request.headers);

        let record = builder::build(
            request,
            response,
            redacted,
            started,
            finished,
            &identity,
            correlation_id,
        );

        if record.response_time_ms > self.slow_threshold_ms as f64 {
            tracing::info!(
                method = %record.method,
                url = %record.url,
                response_time_ms = record.response_time_ms,
                correlation_id = %record.correlation_id,
                "Slow request"
            );
        }

        self.sink.persist(record).await;
    }
}

fn client_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn request_snapshot(
    parts: &Parts,
    method: String,
    ip: Option<IpAddr>,
    parameters: Vec<(String, String)>,
    body: Bytes,
) -> RequestSnapshot {
    let query = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    RequestSnapshot {
        method,
        url: full_url(parts),
        path: parts.uri.path().to_string(),
        ip,
        headers: Headers::from(&parts.headers),
        query,
        route: RouteInfo {
            name: parts
                .extensions
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string()),
            action: parts.extensions.get::<RouteAction>().map(|a| a.0.clone()),
            parameters,
        },
        body,
    }
}

/// Rebuild the absolute URL the client used
fn full_url(parts: &Parts) -> String {
    if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        return parts.uri.to_string();
    }

    let scheme = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");
    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}", scheme, host, path_and_query)
}
