use super::{Decision, RateLimitEnforcer, RouteCategory};
use crate::config::RateLimitConfig;
use futures::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::Instrument;

/// Fallback client id when neither a forwarding header nor a peer address is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Applies one route category's policy to every request of the wrapped service.
///
/// Exempt paths reach the inner service untouched: no counter increment, no headers.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    enforcer: RateLimitEnforcer,
    category: RouteCategory,
    exempt_paths: Arc<[String]>,
}

impl RateLimitLayer {
    pub fn new(enforcer: RateLimitEnforcer, category: RouteCategory) -> Self {
        Self { enforcer, category, exempt_paths: Arc::from(Vec::new()) }
    }

    /// Layer with the exemptions from `config`.
    pub fn from_config(
        enforcer: RateLimitEnforcer,
        category: RouteCategory,
        config: &RateLimitConfig,
    ) -> Self {
        Self::new(enforcer, category).with_exempt_paths(config.exempt_paths.iter().cloned())
    }

    pub fn with_exempt_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.exempt_paths = paths.into_iter().map(Into::into).collect();
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            enforcer: self.enforcer.clone(),
            category: self.category,
            exempt_paths: self.exempt_paths.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    enforcer: RateLimitEnforcer,
    category: RouteCategory,
    exempt_paths: Arc<[String]>,
}

impl<S> RateLimitService<S> {
    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| exempt == path)
    }
}

/// Client identity: first `X-Forwarded-For` hop, else the peer address extension.
pub fn client_id<B>(req: &Request<B>) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    if let Some(hop) = forwarded {
        return hop.to_string();
    }
    req.extensions()
        .get::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.is_exempt(req.uri().path()) {
            return Box::pin(inner.call(req));
        }

        let enforcer = self.enforcer.clone();
        let category = self.category;
        let span = tracing::debug_span!(
            target: "catalog_mirror::rate_limit",
            "rate_limit",
            path = %req.uri().path(),
            category = %category
        );
        Box::pin(
            async move {
                let client = client_id(&req);
                match enforcer.check(category, &client).await {
                    Decision::Admitted { headers } => {
                        let mut response = inner.call(req).await?;
                        headers.apply(response.headers_mut());
                        Ok(response)
                    }
                    Decision::Limited { headers, body } => {
                        let json = serde_json::to_string(&body)
                            .unwrap_or_else(|_| r#"{"error":"Rate limit exceeded"}"#.to_string());
                        let mut response = Response::new(ResBody::from(json));
                        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                        response
                            .headers_mut()
                            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                        headers.apply(response.headers_mut());
                        Ok(response)
                    }
                }
            }
            .instrument(span),
        )
    }
}
