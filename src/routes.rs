use crate::handlers::{self, AppState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    compression::CompressionLayer, decompression::RequestDecompressionLayer,
    limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

/// Builds the HTTP app.
///
/// Every endpoint is served both under `/{supplier}/{model}/{version}` and at
/// the root. The health check bypasses payload limits and rate limiting.
pub fn build_router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let config = state.config.clone();
    let base_path = state.service.model().base_path();

    let mut keys_routes = Router::new().route("/get_keys", post(handlers::get_keys));
    if config.reload_enabled {
        keys_routes = keys_routes.route("/reload", post(handlers::reload));
    }
    keys_routes = keys_routes.layer(
        ServiceBuilder::new()
            // gzip/deflate request bodies; the limit below applies to the inflated size
            .layer(RequestDecompressionLayer::new())
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(config.max_payload_bytes)),
    );

    if let Some(limit) = config.rate_limit {
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(limit.per_second)
                .burst_size(limit.burst)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
        );
        keys_routes = keys_routes.layer(GovernorLayer {
            config: governor_conf,
        });
    }

    let routes = Router::new()
        .route("/healthcheck", get(handlers::health))
        .merge(keys_routes);

    let mut app = Router::new()
        .nest(&base_path, routes.clone())
        .merge(routes)
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http());

    if config.compress_response {
        app = app.layer(CompressionLayer::new());
    }

    tracing::info!("Routes mounted at / and {}", base_path);
    Ok(app)
}
