mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::keys_data_dir;
use rust_keys_server::config::Config;
use rust_keys_server::handlers::AppState;
use rust_keys_server::routes::build_router;
use rust_keys_server::service::KeysService;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const LOCATIONS_CSV: &str = "LocationID,CountryCode,Latitude,Longitude\nL1,US,34.05,-118.25\nL2,JP,,\n";

fn app(config: Config) -> Router {
    let service = KeysService::initialize(&config).unwrap();
    build_router(Arc::new(AppState { service, config })).unwrap()
}

fn post(uri: &str, content_type: Option<&str>, accept: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    if let Some(accept) = accept {
        builder = builder.header(header::ACCEPT, accept);
    }
    builder
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn healthcheck_is_served_under_model_path_and_root() {
    let dir = keys_data_dir();
    let app = app(Config::default().with_keys_data_path(dir.path()));

    for uri in ["/Acme/Quake/1/healthcheck", "/healthcheck"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["model"]["model_id"], "Quake");
    }
}

#[tokio::test]
async fn healthcheck_ignores_missing_reference_data_unless_probing() {
    let dir = keys_data_dir();
    let config = Config::default().with_keys_data_path(dir.path());
    let passive = app(config.clone());
    let probing = app(Config {
        healthcheck_probe_reference_data: true,
        ..config
    });
    drop(dir);

    let response = passive.oneshot(get("/healthcheck")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = probing.oneshot(get("/healthcheck")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn csv_in_csv_out() {
    let dir = keys_data_dir();
    let app = app(Config::default().with_keys_data_path(dir.path()));

    let response = app
        .oneshot(post(
            "/Acme/Quake/1/get_keys",
            Some("text/csv"),
            Some("text/csv"),
            LOCATIONS_CSV,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let text = body_text(response).await;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "location_id,peril_id,coverage_type,status,area_peril_id,vulnerability_id,message"
    );
    assert_eq!(lines[1], "L1,QEQ,1,success,54,9,");
    assert!(lines[2].starts_with("L2,QEQ,1,nomatch,,,"));
    assert_eq!(lines.len(), 3);
}

#[tokio::test]
async fn json_in_defaults_to_json_envelope() {
    let dir = keys_data_dir();
    let app = app(Config::default().with_keys_data_path(dir.path()));

    let body = r#"[{"locationId": "L1", "countrycode": "US", "latitude": 34.05, "longitude": -118.25},
                   {"countrycode": "US"}]"#;
    let response = app
        .oneshot(post("/get_keys", Some("application/json"), None, body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    let items = json["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["location_id"], "L1");
    assert_eq!(items[0]["status"], "success");
    assert_eq!(items[0]["area_peril_id"], 54);
    assert_eq!(items[1]["location_id"], Value::Null);
    assert_eq!(items[1]["status"], "fail");
    assert_eq!(items[1]["message"], "missing locationId");
}

#[tokio::test]
async fn request_level_errors_map_to_status_codes() {
    let dir = keys_data_dir();
    let app = app(Config::default().with_keys_data_path(dir.path()));

    let cases = [
        (None, None, LOCATIONS_CSV, StatusCode::BAD_REQUEST),
        (Some("text/plain"), None, LOCATIONS_CSV, StatusCode::UNSUPPORTED_MEDIA_TYPE),
        (
            Some("text/csv"),
            Some("application/xml"),
            LOCATIONS_CSV,
            StatusCode::NOT_ACCEPTABLE,
        ),
        (Some("application/json"), None, "{not json", StatusCode::BAD_REQUEST),
        (
            Some("text/csv"),
            None,
            "id,countrycode\nA,US\nA,US\n",
            StatusCode::BAD_REQUEST,
        ),
    ];

    for (content_type, accept, body, expected) in cases {
        let response = app
            .clone()
            .oneshot(post("/get_keys", content_type, accept, body))
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "body: {}", body);
        assert_eq!(body_json(response).await["status"], "failure");
    }
}

#[tokio::test]
async fn reload_is_only_mounted_when_enabled() {
    let dir = keys_data_dir();
    let config = Config::default().with_keys_data_path(dir.path());

    let response = app(config.clone())
        .oneshot(post("/Acme/Quake/1/reload", None, None, ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(Config {
        reload_enabled: true,
        ..config
    })
    .oneshot(post("/Acme/Quake/1/reload", None, None, ""))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "reloaded");
    assert_eq!(json["generation"], 2);
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let dir = keys_data_dir();
    let app = app(Config {
        max_payload_bytes: 16,
        ..Config::default().with_keys_data_path(dir.path())
    });

    let response = app
        .oneshot(post("/get_keys", Some("text/csv"), None, LOCATIONS_CSV))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
