//! HttpGateway against an in-process axum server standing in for the gateway.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use sensor_console::config::GatewayConfig;
use sensor_console::{
    ClientError, Console, Gateway, HttpGateway, LightAck, LightStatus, QueryCache, QueryKey, ReadingsWindow,
    RetryPolicy, SensorId,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn gateway(base_url: &str) -> HttpGateway {
    HttpGateway::new(&GatewayConfig {
        base_url: base_url.to_string(),
        timeout_seconds: 1,
    })
    .unwrap()
}

fn reading_json(timestamp: i64, light_on: bool) -> Value {
    json!({
        "id": 1,
        "timestamp": timestamp,
        "temperature": 20.0,
        "humidity": 50.0,
        "luminosity": 10.0,
        "lightOn": light_on,
    })
}

#[tokio::test]
async fn test_sensor_list_keeps_response_order() {
    let app = Router::new().route("/sensors", get(|| async { Json(json!([3, 1, 2])) }));
    let base = serve(app).await;

    let ids = gateway(&base).fetch_sensor_list().await.unwrap();

    assert_eq!(ids, vec![SensorId(3), SensorId(1), SensorId(2)]);
}

#[tokio::test]
async fn test_null_lists_are_empty() {
    let app = Router::new()
        .route("/sensors", get(|| async { Json(Value::Null) }))
        .route("/sensors/:id/readings", get(|| async { Json(Value::Null) }));
    let base = serve(app).await;
    let gateway = gateway(&base);

    assert!(gateway.fetch_sensor_list().await.unwrap().is_empty());
    assert!(gateway
        .fetch_readings(SensorId(1), ReadingsWindow::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_trailing_slash_in_base_url() {
    let app = Router::new().route("/sensors", get(|| async { Json(json!([1])) }));
    let base = serve(app).await;

    let gateway = gateway(&format!("{}/", base));

    assert_eq!(gateway.base_url(), base);
    assert_eq!(gateway.fetch_sensor_list().await.unwrap(), vec![SensorId(1)]);
}

#[tokio::test]
async fn test_sensor_list_that_is_not_an_array_is_a_protocol_error() {
    let app = Router::new().route("/sensors", get(|| async { Json(json!({"sensors": [1, 2]})) }));
    let base = serve(app).await;

    let err = gateway(&base).fetch_sensor_list().await.unwrap_err();

    assert!(matches!(err, ClientError::Protocol(_)), "{:?}", err);
}

#[tokio::test]
async fn test_readings_forward_window_and_parse() {
    let seen: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::default();
    let app = Router::new()
        .route(
            "/sensors/:id/readings",
            get(
                |State(seen): State<Arc<Mutex<Vec<HashMap<String, String>>>>>,
                 Path(id): Path<i64>,
                 Query(params): Query<HashMap<String, String>>| async move {
                    seen.lock().unwrap().push(params);
                    Json(json!([reading_json(100 + id, false), reading_json(50, true)]))
                },
            ),
        )
        .with_state(seen.clone());
    let base = serve(app).await;

    let window = ReadingsWindow {
        start: chrono::NaiveDate::from_ymd_opt(2024, 1, 1),
        end: chrono::NaiveDate::from_ymd_opt(2024, 2, 1),
    };
    let readings = gateway(&base).fetch_readings(SensorId(7), window).await.unwrap();

    // gateway order, sorting is the cache's job
    assert_eq!(readings.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![107, 50]);
    assert!(readings[1].light_on);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].get("start").map(String::as_str), Some("2024-01-01"));
    assert_eq!(seen[0].get("end").map(String::as_str), Some("2024-02-01"));
}

#[tokio::test]
async fn test_reading_without_light_field_is_a_protocol_error() {
    let app = Router::new().route(
        "/sensors/:id/readings",
        get(|| async { Json(json!([{"timestamp": 1, "temperature": 1.0, "humidity": 1.0, "luminosity": 1.0}])) }),
    );
    let base = serve(app).await;

    let err = gateway(&base)
        .fetch_readings(SensorId(1), ReadingsWindow::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Protocol(ref m) if m.contains("lightOn")), "{:?}", err);
}

#[tokio::test]
async fn test_server_error_on_read_is_a_protocol_error() {
    let app = Router::new().route("/sensors", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let base = serve(app).await;

    let err = gateway(&base).fetch_sensor_list().await.unwrap_err();

    assert!(matches!(err, ClientError::Protocol(ref m) if m.contains("500")), "{:?}", err);
}

#[tokio::test]
async fn test_unreachable_gateway_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = gateway(&format!("http://{}", addr)).fetch_sensor_list().await.unwrap_err();

    assert!(matches!(err, ClientError::Network(_)), "{:?}", err);
}

#[tokio::test]
async fn test_slow_gateway_times_out_as_network_error() {
    let app = Router::new().route(
        "/sensors",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!([1]))
        }),
    );
    let base = serve(app).await;

    let err = gateway(&base).fetch_sensor_list().await.unwrap_err();

    assert!(matches!(err, ClientError::Network(_)), "{:?}", err);
}

#[tokio::test]
async fn test_light_command_posts_desired_state() {
    let app = Router::new().route(
        "/sensors/:id",
        get(|| async { Json(reading_json(0, false)) }).post(|Path(id): Path<i64>, Json(body): Json<Value>| async move {
            let light_on = body["lightOn"].as_bool().unwrap_or(false);
            Json(reading_json(1000 + id, light_on))
        }),
    );
    let base = serve(app).await;

    let ack = gateway(&base).set_light_state(SensorId(4), true).await.unwrap();

    match ack {
        LightAck::Reading(r) => {
            assert_eq!(r.timestamp, 1004);
            assert!(r.light_on);
        }
        other => panic!("expected a reading, got {:?}", other),
    }
}

#[tokio::test]
async fn test_light_command_accepts_bare_state() {
    let app = Router::new().route(
        "/sensors/:id",
        get(|| async { Json(reading_json(0, false)) }).post(|| async { Json(json!({"lightOn": false})) }),
    );
    let base = serve(app).await;

    let ack = gateway(&base).set_light_state(SensorId(1), false).await.unwrap();

    assert!(matches!(ack, LightAck::State(s) if !s.light_on));
}

#[tokio::test]
async fn test_missing_sensor_is_a_conflict() {
    let app = Router::new()
        .route(
            "/sensors/1",
            get(|| async { Json(reading_json(0, false)) }).post(|| async { StatusCode::NOT_FOUND }),
        )
        .route(
            "/sensors/2",
            get(|| async { Json(reading_json(0, false)) }).post(|| async { StatusCode::CONFLICT }),
        );
    let base = serve(app).await;
    let gateway = gateway(&base);

    assert_eq!(gateway.set_light_state(SensorId(1), true).await, Err(ClientError::Conflict(SensorId(1))));
    assert_eq!(gateway.set_light_state(SensorId(2), true).await, Err(ClientError::Conflict(SensorId(2))));
}

#[tokio::test]
async fn test_empty_acknowledgment_is_a_protocol_error() {
    let app = Router::new().route(
        "/sensors/:id",
        get(|| async { Json(reading_json(0, false)) }).post(|| async { StatusCode::OK }),
    );
    let base = serve(app).await;

    let err = gateway(&base).set_light_state(SensorId(1), true).await.unwrap_err();

    assert!(matches!(err, ClientError::Protocol(ref m) if m.contains("empty")), "{:?}", err);
}

#[tokio::test]
async fn test_latest_reading_of_unknown_sensor_is_none() {
    let app = Router::new()
        .route("/sensors/1", get(|| async { Json(reading_json(0, false)) }))
        .route("/sensors/2", get(|| async { Json(reading_json(500, true)) }));
    let base = serve(app).await;
    let gateway = gateway(&base);

    assert_eq!(gateway.fetch_latest_reading(SensorId(1)).await.unwrap(), None);
    let latest = gateway.fetch_latest_reading(SensorId(2)).await.unwrap().unwrap();
    assert_eq!(latest.timestamp, 500);
}

// ==============================================================================
// end to end through the console
// ==============================================================================

#[derive(Default)]
struct FakeBackend {
    history: HashMap<i64, Vec<Value>>,
    commands: Vec<(i64, bool)>,
}

type Backend = Arc<Mutex<FakeBackend>>;

async fn list_sensors(State(backend): State<Backend>) -> impl IntoResponse {
    let mut ids: Vec<i64> = backend.lock().unwrap().history.keys().copied().collect();
    ids.sort();
    Json(json!(ids))
}

async fn list_readings(State(backend): State<Backend>, Path(id): Path<i64>) -> impl IntoResponse {
    let history = backend.lock().unwrap().history.get(&id).cloned();
    Json(json!(history))
}

async fn set_light(State(backend): State<Backend>, Path(id): Path<i64>, Json(body): Json<Value>) -> impl IntoResponse {
    let mut backend = backend.lock().unwrap();
    let light_on = body["lightOn"].as_bool().unwrap_or(false);
    backend.commands.push((id, light_on));
    match backend.history.get_mut(&id) {
        Some(history) => {
            let next = history.len() as i64 + 100;
            let reading = reading_json(next, light_on);
            history.push(reading.clone());
            (StatusCode::OK, Json(reading)).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::test]
async fn test_console_toggles_light_through_http() {
    let backend: Backend = Arc::default();
    {
        let mut b = backend.lock().unwrap();
        b.history.insert(1, vec![reading_json(100, false)]);
        b.history.insert(2, vec![reading_json(100, true)]);
    }
    let app = Router::new()
        .route("/sensors", get(list_sensors))
        .route("/sensors/:id/readings", get(list_readings))
        .route("/sensors/:id", axum::routing::post(set_light))
        .with_state(backend.clone());
    let base = serve(app).await;
    let console = Console::new(gateway(&base), QueryCache::new(RetryPolicy::none()));

    let sensors = console.sensors().await;
    assert_eq!(sensors.sensors(), Some(&[SensorId(1), SensorId(2)][..]));

    console.select(Some(SensorId(1)));
    console.selected_readings().await;
    assert_eq!(console.light_status(), LightStatus::Off);

    console.toggle_light().await.unwrap();

    assert_eq!(backend.lock().unwrap().commands, vec![(1, true)]);
    let entry = console.cache().peek(QueryKey::Readings(SensorId(1)));
    assert_eq!(entry.readings().unwrap().len(), 2);
    assert!(entry.last_reading().unwrap().light_on);
    assert_eq!(console.light_status(), LightStatus::On);

    // the sensor disappears from the backend
    backend.lock().unwrap().history.remove(&1);
    let err = console.toggle_light().await.unwrap_err();
    assert_eq!(err, ClientError::Conflict(SensorId(1)));
    assert_eq!(console.selected(), None);

    let sensors = console.sensors().await;
    assert_eq!(sensors.sensors(), Some(&[SensorId(2)][..]));
}
