use std::sync::Arc;

use actix_web::{App, test, web};
use pseudodpms::{
    AppState, Direction, DisplayPowerController, EventCallbackHandler, MapSettings,
    MockSysfsBackend,
};
use serde_json::Value;

fn sample_settings() -> Arc<MapSettings> {
    Arc::new(MapSettings::new([
        ("inactivity_timeout", "10"),
        ("use_sense", "false"),
        ("export_pins", "true"),
        ("sense_pin", "5"),
        ("toggle_pin", "6"),
        ("toggle_duration", "0.05"),
        ("toggle_mode", "1"),
    ]))
}

fn sample_state(
    backend: &Arc<MockSysfsBackend>,
    settings: &Arc<MapSettings>,
) -> AppState<MockSysfsBackend> {
    let controller = DisplayPowerController::new(
        backend.clone(),
        settings.clone(),
        Arc::new(EventCallbackHandler::new(16, 32)),
    )
    .expect("valid sample settings");
    AppState { controller }
}

macro_rules! init_app {
    ($state:expr) => {{
        let state = $state;
        test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .service(state.api_scope("/api/v1")),
        )
        .await
    }};
}

#[actix_rt::test]
async fn display_status_reports_lines() {
    let backend = Arc::new(MockSysfsBackend::default());
    let app = init_app!(sample_state(&backend, &sample_settings()));

    let req = test::TestRequest::get().uri("/api/v1/display").to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(status["shared_line"], true);
    assert_eq!(status["last_commanded_state"], true);
    assert_eq!(status["timer_armed"], false);
    assert_eq!(status["toggle_mode"], "hold");
    assert_eq!(status["toggle"]["pin"], 6);
    assert_eq!(status["toggle"]["exported"], true);
    assert_eq!(status["toggle"]["direction"], "out");
}

#[actix_rt::test]
async fn screensaver_events_arm_and_cancel_the_timer() {
    let backend = Arc::new(MockSysfsBackend::default());
    let state = sample_state(&backend, &sample_settings());
    let app = init_app!(state.clone());

    let req = test::TestRequest::post()
        .uri("/api/v1/screensaver/activated")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(state.controller.timer_armed());

    let req = test::TestRequest::post()
        .uri("/api/v1/screensaver/deactivated")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(!state.controller.timer_armed());
    assert!(backend.value_writes(6).is_empty());
}

#[actix_rt::test]
async fn wrong_method_returns_405() {
    let backend = Arc::new(MockSysfsBackend::default());
    let app = init_app!(sample_state(&backend, &sample_settings()));

    let req = test::TestRequest::get()
        .uri("/api/v1/screensaver/activated")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 405);

    let req = test::TestRequest::post().uri("/api/v1/display").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 405);
}

#[actix_rt::test]
async fn power_request_drives_the_toggle_line() {
    let backend = Arc::new(MockSysfsBackend::default());
    let app = init_app!(sample_state(&backend, &sample_settings()));

    let req = test::TestRequest::post()
        .uri("/api/v1/display/power")
        .set_payload("0")
        .to_request();
    let action: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(action, "toggled");
    assert_eq!(backend.level(6), Some(false));

    let req = test::TestRequest::post()
        .uri("/api/v1/display/power")
        .set_payload("1")
        .to_request();
    let action: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(action, "toggled");
    assert_eq!(backend.level(6), Some(true));
}

#[actix_rt::test]
async fn invalid_power_payload_returns_400() {
    let backend = Arc::new(MockSysfsBackend::default());
    let app = init_app!(sample_state(&backend, &sample_settings()));

    for payload in ["", "2", "on"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/display/power")
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "payload {payload:?}");
    }
}

#[actix_rt::test]
async fn refused_direction_returns_409() {
    let backend = Arc::new(MockSysfsBackend::default());
    backend.preexport(5, Direction::Out);
    backend.preexport(6, Direction::Out);
    let settings = sample_settings();
    settings.set("export_pins", "false");
    settings.set("use_sense", "true");
    let app = init_app!(sample_state(&backend, &settings));

    let req = test::TestRequest::post()
        .uri("/api/v1/display/power")
        .set_payload("1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("Direction change refused")
    );
}

#[actix_rt::test]
async fn settings_reload_moves_the_toggle_line() {
    let backend = Arc::new(MockSysfsBackend::default());
    let settings = sample_settings();
    let app = init_app!(sample_state(&backend, &settings));

    settings.set("toggle_pin", "13");
    let req = test::TestRequest::post()
        .uri("/api/v1/settings/reload")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get().uri("/api/v1/display").to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["toggle"]["pin"], 13);
    assert!(!backend.is_exported(6));
    assert!(backend.is_exported(13));
}

#[actix_rt::test]
async fn events_endpoint_honours_limit() {
    let backend = Arc::new(MockSysfsBackend::default());
    let app = init_app!(sample_state(&backend, &sample_settings()));

    for uri in [
        "/api/v1/screensaver/activated",
        "/api/v1/screensaver/deactivated",
    ] {
        let req = test::TestRequest::post().uri(uri).to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/display/events")
        .to_request();
    let events: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    let kinds: Vec<&str> = events.iter().map(|e| e["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["timer-armed", "timer-cancelled", "suppressed"]);
    assert!(events[0]["timeout_ms"].as_u64().unwrap() >= 599_000);

    let req = test::TestRequest::get()
        .uri("/api/v1/display/events?limit=1")
        .to_request();
    let events: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["kind"], "suppressed");
}
