//! Control API routing and error mapping

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use common::{bridge_config, target, tone, wait_until, MemoryConnector, MemoryLibrary, TEST_RATE};
use deckcast::api::server::router;
use deckcast::api::AppState;
use deckcast::config::AppConfig;
use deckcast::audio::AudioSource;
use deckcast::console::Console;
use deckcast::error::DecodeError;
use deckcast::sync::TrackLibrary;

fn app() -> (Router, Arc<AppState<MemoryConnector>>, Arc<MemoryConnector>) {
    let library = Arc::new(MemoryLibrary::new());
    library.insert("intro", tone("Intro", 0.2, 10.0));
    app_with(library)
}

fn app_with(library: Arc<dyn TrackLibrary>) -> (Router, Arc<AppState<MemoryConnector>>, Arc<MemoryConnector>) {
    let mut config = AppConfig::default();
    config.audio.sample_rate = TEST_RATE;
    config.broadcast = target();
    config.bridge = bridge_config();

    let mut console = Console::new(config, library);
    // Nothing renders in these tests
    drop(console.take_processor());

    let connector = Arc::new(MemoryConnector::new());
    let state = AppState::new(console, connector.clone());
    (router(state.clone()), state, connector)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_load_play_and_seek_through_the_api() {
    let (app, state, _) = app();

    let (status, body) = call(&app, "POST", "/api/decks/a/load", Some(json!({ "track": "intro" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = call(&app, "POST", "/api/decks/a/play", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", "/api/decks/a/seek", Some(json!({ "seconds": 99.0 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], 10.0);

    let (_, body) = call(&app, "GET", "/api/status", None).await;
    let deck = &body["data"]["decks"][0];
    assert_eq!(deck["deck"], "a");
    assert_eq!(deck["is_playing"], true);
    assert_eq!(deck["current_time"], 10.0);
    assert_eq!(body["data"]["decks"][1]["source_id"], Value::Null);

    let console = state.console.lock().await;
    assert_eq!(console.engine().deck(deckcast::engine::DeckId::A).snapshot().duration, 10.0);
}

#[tokio::test]
async fn test_errors_map_to_status_codes() {
    let (app, _, _) = app();

    let (status, body) = call(&app, "POST", "/api/decks/b/load", Some(json!({ "track": "missing" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("missing"));

    let (status, _) = call(&app, "POST", "/api/decks/a/rate", Some(json!({ "rate": -1.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "POST", "/api/stream/stop", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, "DELETE", "/api/decks/a/queue/3", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_queue_management() {
    let (app, _, _) = app();

    for track in ["one", "two", "three"] {
        let (status, _) = call(&app, "POST", "/api/decks/b/queue", Some(json!({ "track": track }))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = call(&app, "DELETE", "/api/decks/b/queue/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "two");

    let (_, body) = call(&app, "GET", "/api/decks/b/queue", None).await;
    assert_eq!(body["data"], json!(["one", "three"]));

    let (_, body) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(body["data"]["queues"]["deck_b"], json!(["one", "three"]));
    assert_eq!(body["data"]["queues"]["deck_a"], json!([]));

    call(&app, "DELETE", "/api/decks/b/queue", None).await;
    let (_, body) = call(&app, "GET", "/api/decks/b/queue", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_monitor_and_mixer_settings() {
    let (app, state, _) = app();

    let (status, _) = call(&app, "POST", "/api/monitor", Some(json!({ "volume": 0.25, "muted": true }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/api/mixer/crossfader", Some(json!({ "position": 0.0 }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/api/mixer/lanes/deck_b/mute", Some(json!({ "muted": true }))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "GET", "/api/status", None).await;
    let monitor = &body["data"]["monitor"];
    assert_eq!(monitor["volume"], 0.25);
    assert_eq!(monitor["muted"], true);

    let console = state.console.lock().await;
    let settings = console.engine().mixer().settings();
    assert_eq!(settings.crossfader, 0.0);
    assert!(settings.lane(deckcast::engine::LaneId::DeckB).muted);
}

#[tokio::test]
async fn test_stream_start_and_stop() {
    let (app, _, connector) = app();

    let (status, _) = call(&app, "POST", "/api/stream/start", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/api/stream/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(body["data"]["tap"]["attached"], true);
    assert_eq!(body["data"]["stream"]["bridge"]["state"]["state"], "connected");

    let (status, _) = call(&app, "POST", "/api/stream/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(body["data"]["tap"]["attached"], false);
    assert_eq!(connector.connection_count(), 1);

    connector.refuse_connects(1);
    let (status, body) = call(&app, "POST", "/api/stream/start", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("unreachable"));
}

/// Library whose decode blocks until released
struct SlowLibrary {
    entered: AtomicBool,
    release: Mutex<mpsc::Receiver<()>>,
}

impl TrackLibrary for SlowLibrary {
    fn resolve(&self, track: &str) -> Result<AudioSource, DecodeError> {
        self.entered.store(true, Ordering::SeqCst);
        let _ = self.release.lock().unwrap().recv();
        Ok(tone(track, 0.2, 5.0))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_answers_while_a_track_decodes() {
    let (release, rx) = mpsc::channel();
    let library = Arc::new(SlowLibrary {
        entered: AtomicBool::new(false),
        release: Mutex::new(rx),
    });
    let (app, _, _) = app_with(library.clone());

    let loading = {
        let app = app.clone();
        tokio::spawn(async move {
            call(&app, "POST", "/api/decks/a/load", Some(json!({ "track": "slow" }))).await
        })
    };
    wait_until(|| library.entered.load(Ordering::SeqCst)).await;

    let (status, body) = tokio::time::timeout(Duration::from_secs(1), call(&app, "GET", "/api/status", None))
        .await
        .expect("status blocked behind a decode");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["decks"][0]["source_id"], Value::Null);

    release.send(()).unwrap();
    let (status, body) = loading.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}
