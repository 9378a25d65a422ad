use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use shelly_thermostat::{Error, Event, HvacAction, HvacMode, ShellyThermostat};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn status_body(ison: bool) -> serde_json::Value {
    json!({
        "ext_temperature": { "0": { "tC": "21.5" } },
        "relays": [{ "ison": ison }],
        "mac": "AA:BB"
    })
}

fn settings_body(over_act: &str, under_act: &str) -> serde_json::Value {
    json!({
        "ext_temperature": { "0": {
            "overtemp_threshold_tC": 22.2,
            "overtemp_act": over_act,
            "undertemp_threshold_tC": 21.8,
            "undertemp_act": under_act
        }},
        "name": "Shelly1",
        "device": { "type": "SHSW-1" }
    })
}

fn host(server: &MockServer) -> String {
    let addr = server.address();
    format!("{}:{}", addr.ip(), addr.port())
}

async fn mount_device(server: &MockServer, delay: Duration, expected_polls: Option<u64>) {
    let status = Mock::given(method("GET")).and(path("/status")).respond_with(
        ResponseTemplate::new(200)
            .set_body_json(status_body(true))
            .set_delay(delay),
    );
    let settings = Mock::given(method("GET")).and(path("/settings")).respond_with(
        ResponseTemplate::new(200).set_body_json(settings_body("relay_off", "relay_on")),
    );
    match expected_polls {
        Some(n) => {
            status.expect(n).mount(server).await;
            settings.expect(n).mount(server).await;
        }
        None => {
            status.mount(server).await;
            settings.mount(server).await;
        }
    }
}

async fn mount_writes(server: &MockServer, status: u16, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/settings/ext_temperature/0"))
        .respond_with(ResponseTemplate::new(status).set_body_string("{}"))
        .expect(expected)
        .mount(server)
        .await;
}

fn paths(requests: &[Request]) -> Vec<String> {
    requests
        .iter()
        .map(|r| match r.url.query() {
            Some(q) => format!("{}?{q}", r.url.path()),
            None => r.url.path().to_string(),
        })
        .collect()
}

#[tokio::test]
async fn refresh_publishes_heat_snapshot() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::ZERO, Some(1)).await;

    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();
    assert!(thermostat.snapshot().is_none());
    assert!(!thermostat.is_available());

    let state = thermostat.refresh(false).await.unwrap();
    assert_eq!(state.mode, HvacMode::Heat);
    assert_eq!(state.hvac_action, HvacAction::Heating);
    assert!(state.output_active);
    assert!((state.current_temperature.celsius() - 21.5).abs() < 1e-9);
    assert!((state.target_temperature.celsius() - 22.0).abs() < 1e-9);
    assert_eq!(state.mac, "AA:BB");
    assert_eq!(state.model, "SHSW-1");

    let published = thermostat.snapshot().expect("snapshot published");
    assert!(Arc::ptr_eq(&published, &state));
    assert!(thermostat.last_update_success());
}

#[tokio::test]
async fn concurrent_refreshes_share_one_round_trip() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::from_millis(300), Some(1)).await;

    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();
    let cloned = thermostat.clone();
    let (a, b, c, d) = tokio::join!(
        thermostat.refresh(false),
        thermostat.refresh(false),
        thermostat.refresh(true),
        cloned.refresh(false),
    );
    let (a, b, c, d) = (a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    assert!(Arc::ptr_eq(&a, &d));
}

#[tokio::test]
async fn concurrent_callers_share_one_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();
    let (a, b) = tokio::join!(thermostat.refresh(false), thermostat.refresh(false));
    assert!(matches!(a, Err(Error::DeviceUnreachable { .. })));
    assert!(matches!(b, Err(Error::DeviceUnreachable { .. })));
}

#[tokio::test]
async fn sequential_refreshes_each_poll() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::ZERO, Some(2)).await;

    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();
    let first = thermostat.refresh(false).await.unwrap();
    let second = thermostat.refresh(false).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn first_refresh_failure_fails_setup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = ShellyThermostat::builder(host(&server))
        .start()
        .await
        .err()
        .expect("setup should fail");
    match err {
        Error::Setup(inner) => assert!(matches!(*inner, Error::DeviceUnreachable { .. })),
        other => panic!("expected Setup, got {other:?}"),
    }
}

#[tokio::test]
async fn later_failure_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body(true)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/settings"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(settings_body("relay_off", "relay_on")),
        )
        .mount(&server)
        .await;

    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();
    let thermostat = ShellyThermostat::builder(host(&server))
        .on_event(move |event| events_clone.lock().unwrap().push(event.clone()))
        .build()
        .unwrap();
    let first = thermostat.first_refresh().await.unwrap();

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = thermostat.refresh(false).await.unwrap_err();
    assert!(matches!(err, Error::DeviceUnreachable { .. }), "got {err:?}");

    let kept = thermostat.snapshot().expect("previous snapshot kept");
    assert!(Arc::ptr_eq(&kept, &first));
    assert!(!thermostat.last_update_success());
    assert!(matches!(
        thermostat.last_error(),
        Some(Error::DeviceUnreachable { .. })
    ));
    assert!(matches!(
        events.lock().unwrap().last(),
        Some(Event::UpdateFailed { .. })
    ));

    // A failure after setup is not a setup failure.
    assert!(matches!(
        thermostat.first_refresh().await,
        Err(Error::DeviceUnreachable { .. })
    ));
}

#[tokio::test]
async fn malformed_settings_keep_nothing_published() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body(false)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Shelly1" })))
        .mount(&server)
        .await;

    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();
    let err = thermostat.first_refresh().await.unwrap_err();
    match err {
        Error::Setup(inner) => assert!(matches!(*inner, Error::MalformedResponse { .. })),
        other => panic!("expected Setup, got {other:?}"),
    }
    assert!(thermostat.snapshot().is_none());
}

#[tokio::test]
async fn set_hvac_mode_writes_pair_then_polls_once() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::ZERO, Some(1)).await;
    mount_writes(&server, 200, 2).await;

    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();
    thermostat.set_hvac_mode(HvacMode::Cool).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        paths(&requests),
        vec![
            "/settings/ext_temperature/0?overtemp_act=relay_on",
            "/settings/ext_temperature/0?undertemp_act=relay_off",
            "/status",
            "/settings",
        ]
    );
}

#[tokio::test]
async fn set_target_temperature_polls_after_write() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::ZERO, Some(1)).await;
    mount_writes(&server, 200, 2).await;

    let thermostat = ShellyThermostat::builder(host(&server))
        .hysteresis(1.0)
        .build()
        .unwrap();
    let state = thermostat.set_target_temperature(21.0).await.unwrap();
    assert_eq!(state.mode, HvacMode::Heat);

    let requests = server.received_requests().await.unwrap();
    let written: Vec<f64> = requests[..2]
        .iter()
        .map(|r| r.url.query_pairs().next().unwrap().1.parse().unwrap())
        .collect();
    assert!((written[0] - 21.5).abs() < 1e-9);
    assert!((written[1] - 20.5).abs() < 1e-9);
    assert_eq!(paths(&requests[2..]), vec!["/status", "/settings"]);
}

#[tokio::test]
async fn failed_write_still_polls_once() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::ZERO, Some(1)).await;
    mount_writes(&server, 500, 1).await;

    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();
    let err = thermostat.set_target_temperature(22.0).await.unwrap_err();
    assert!(matches!(err, Error::DeviceUnreachable { .. }), "got {err:?}");
    assert!(thermostat.snapshot().is_some());
}

#[tokio::test]
async fn invalid_requests_never_reach_the_device() {
    let server = MockServer::start().await;
    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();

    assert!(matches!(
        thermostat.set_hvac_mode(HvacMode::Unknown).await,
        Err(Error::InvalidMode(_))
    ));
    assert!(matches!(
        thermostat.set_target_temperature(80.0).await,
        Err(Error::InvalidTarget(_))
    ));
    assert!(matches!(
        thermostat.set_target_temperature(f64::NAN).await,
        Err(Error::InvalidTarget(_))
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn forced_refresh_does_not_join_a_poll_that_read_before_a_write() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::from_millis(300), Some(2)).await;
    mount_writes(&server, 200, 2).await;

    let thermostat = ShellyThermostat::builder(host(&server)).build().unwrap();
    let background = thermostat.clone();
    let early = tokio::spawn(async move { background.refresh(false).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after_write = thermostat.set_hvac_mode(HvacMode::Heat).await.unwrap();
    let early = early.await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&early, &after_write));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        paths(&requests),
        vec![
            "/status",
            "/settings",
            "/settings/ext_temperature/0?overtemp_act=relay_off",
            "/settings/ext_temperature/0?undertemp_act=relay_on",
            "/status",
            "/settings",
        ]
    );
}

#[tokio::test]
async fn snapshot_and_event_listeners_fire() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::ZERO, None).await;

    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let snapshots: Arc<Mutex<Vec<HvacMode>>> = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();
    let snapshots_clone = snapshots.clone();

    let thermostat = ShellyThermostat::builder(host(&server))
        .on_event(move |event| events_clone.lock().unwrap().push(event.clone()))
        .on_snapshot(move |state| snapshots_clone.lock().unwrap().push(state.mode))
        .build()
        .unwrap();

    thermostat.refresh(false).await.unwrap();
    assert_eq!(events.lock().unwrap().len(), 5);
    assert!(events
        .lock()
        .unwrap()
        .contains(&Event::ModeChanged { mode: HvacMode::Heat }));

    thermostat.refresh(false).await.unwrap();
    assert_eq!(events.lock().unwrap().len(), 5, "unchanged poll adds no events");
    assert_eq!(*snapshots.lock().unwrap(), vec![HvacMode::Heat, HvacMode::Heat]);
}

#[tokio::test]
async fn timer_polls_until_shutdown() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::ZERO, None).await;

    let thermostat = ShellyThermostat::builder(host(&server))
        .scan_interval(Duration::from_millis(100))
        .start()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    thermostat.shutdown();

    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/status")
        .count();
    assert!(polls >= 3, "expected startup plus timer polls, got {polls}");

    tokio::time::sleep(Duration::from_millis(250)).await;
    let after = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/status")
        .count();
    assert_eq!(polls, after, "no polls after shutdown");
}

#[tokio::test]
async fn timer_tick_joins_a_caller_refresh() {
    let server = MockServer::start().await;
    mount_device(&server, Duration::from_millis(300), Some(1)).await;

    let thermostat = ShellyThermostat::builder(host(&server))
        .scan_interval(Duration::from_millis(200))
        .build()
        .unwrap();
    thermostat.start_polling();

    // Starts 100ms before the first tick and ends well after it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = thermostat.refresh(false).await.unwrap();
    thermostat.shutdown();

    assert_eq!(state.hvac_action, HvacAction::Heating);
    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/status")
        .count();
    assert_eq!(polls, 1, "the tick must share the in-flight poll");
}

#[test]
fn zero_scan_interval_is_rejected() {
    let err = ShellyThermostat::builder("192.168.1.40")
        .scan_interval(Duration::ZERO)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidConfig(_)));

    let err = ShellyThermostat::builder("192.168.1.40")
        .hysteresis(-0.1)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidConfig(_)));
}
