use axum::extract::MatchedPath;
use axum::http::Request;
use futures_util::future::BoxFuture;
use prometheus::core::Collector;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub http_duration: HistogramVec,
    pub lfs_requests: IntCounterVec,
    pub grants_issued: IntCounterVec,
    pub auth_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();
        let http_requests = IntCounterVec::new(
            Opts::new("lfsg_http_requests_total", "HTTP requests"),
            &["route", "method", "status"],
        )
        .expect("http_requests");
        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "lfsg_http_request_duration_seconds",
                "HTTP request duration",
            ),
            &["route", "method"],
        )
        .expect("http_duration");
        let lfs_requests = IntCounterVec::new(
            Opts::new("lfsg_lfs_requests_total", "LFS operations"),
            &["op", "status"],
        )
        .expect("lfs_requests");
        let grants_issued = IntCounterVec::new(
            Opts::new("lfsg_grants_issued_total", "Access grants issued"),
            &["method"],
        )
        .expect("grants_issued");
        let auth_failures = IntCounterVec::new(
            Opts::new("lfsg_auth_failures_total", "Rejected authorizations"),
            &["reason"],
        )
        .expect("auth_failures");

        register_collector(&registry, &http_requests);
        register_collector(&registry, &http_duration);
        register_collector(&registry, &lfs_requests);
        register_collector(&registry, &grants_issued);
        register_collector(&registry, &auth_failures);

        Arc::new(Self {
            registry,
            http_requests,
            http_duration,
            lfs_requests,
            grants_issued,
            auth_failures,
        })
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

fn register_collector<C>(registry: &Registry, collector: &C)
where
    C: Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone())).ok();
}

#[derive(Clone)]
pub struct MetricsLayer {
    metrics: Arc<Metrics>,
}

impl MetricsLayer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    metrics: Arc<Metrics>,
}

impl<S, B> Service<Request<B>> for MetricsService<S>
where
    S: Service<Request<B>, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = axum::response::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let mut inner = self.inner.clone();
        let metrics = self.metrics.clone();
        let method = req.method().clone();
        let route = route_label(&req);
        let start = Instant::now();
        Box::pin(async move {
            let response = inner.call(req).await?;
            let status = response.status().as_u16().to_string();
            metrics
                .http_requests
                .with_label_values(&[&route, method.as_str(), &status])
                .inc();
            metrics
                .http_duration
                .with_label_values(&[&route, method.as_str()])
                .observe(start.elapsed().as_secs_f64());
            Ok(response)
        })
    }
}

fn route_label<B>(req: &Request<B>) -> String {
    if let Some(matched) = req.extensions().get::<MatchedPath>() {
        return matched.as_str().to_string();
    }
    req.uri().path().to_string()
}
