//! Telemetry logic.
//! Support tracing, metrics and logging.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::AppState;
use crate::error::{Result, ServerError};

const DEFAULT_FILTER: &str = "info";

/// Install the `tracing` subscriber, filtered through `RUST_LOG`.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Create recorder for Prometheus metrics.
pub fn setup_metrics_recorder() -> std::result::Result<PrometheusHandle, BuildError>
{
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    metrics::describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "HTTP request latency."
    );
    metrics::describe_counter!(
        "verification_codes_total",
        "Verification codes issued, by delivery outcome."
    );
    metrics::describe_counter!(
        "legacy_migrations_total",
        "Legacy accounts converted on login."
    );
    metrics::describe_counter!(
        "moderation_actions_total",
        "Bans and unbans applied."
    );

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}

/// Render collected metrics in the Prometheus text format.
pub async fn metrics(State(state): State<AppState>) -> Result<String> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or(ServerError::NotFound)
}

/// Track every request into one function.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>()
    {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(latency);

    response
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::tests::state;
    use crate::*;

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let (state, _) = state();
        let response =
            make_request(None, app(state), Method::GET, "/metrics", String::new())
                .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
