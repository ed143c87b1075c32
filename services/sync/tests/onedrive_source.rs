//! OneDrive source behavior against a mock Graph endpoint: listing pages
//! and interrupted downloads.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use signage_sync::config::OneDriveConfig;
use signage_sync::{FileSource, OneDriveSource};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const FULL_BODY: &str = "FULL VIDEO BYTES";

#[derive(Clone, Default)]
struct GraphState {
    base: String,
    page_auth: Arc<Mutex<Vec<(String, String)>>>,
    downloads: Arc<Mutex<Vec<String>>>,
    flaky_hits: Arc<AtomicUsize>,
}

fn auth(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn item(base: &str, name: &str) -> Value {
    json!({
        "name": name,
        "@microsoft.graph.downloadUrl": format!("{}/dl/{}", base, name),
    })
}

async fn first_page(State(state): State<GraphState>, headers: HeaderMap) -> Json<Value> {
    state
        .page_auth
        .lock()
        .unwrap()
        .push(("page1".to_string(), auth(&headers)));

    Json(json!({
        "value": [item(&state.base, "a.mp4"), item(&state.base, "b.mp4")],
        "@odata.nextLink": format!("{}/paged/page2", state.base),
    }))
}

async fn second_page(State(state): State<GraphState>, headers: HeaderMap) -> Json<Value> {
    state
        .page_auth
        .lock()
        .unwrap()
        .push(("page2".to_string(), auth(&headers)));

    Json(json!({
        "value": [
            {"name": "Archive", "folder": {"childCount": 2}},
            item(&state.base, "c.mp4"),
        ],
    }))
}

async fn download(State(state): State<GraphState>, Path(name): Path<String>) -> Vec<u8> {
    state.downloads.lock().unwrap().push(name.clone());
    format!("bytes of {}", name).into_bytes()
}

async fn flaky_listing(State(state): State<GraphState>) -> Json<Value> {
    Json(json!({
        "value": [{
            "name": "promo.mp4",
            "@microsoft.graph.downloadUrl": format!("{}/flaky/promo.mp4", state.base),
        }],
    }))
}

/// First hit sends a few bytes and then breaks the body; later hits succeed
async fn flaky_download(State(state): State<GraphState>) -> Body {
    if state.flaky_hits.fetch_add(1, Ordering::SeqCst) == 0 {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"PARTIAL")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "upstream went away",
            )),
        ];
        Body::from_stream(futures::stream::iter(chunks))
    } else {
        Body::from(FULL_BODY)
    }
}

async fn start_graph() -> (SocketAddr, GraphState) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = GraphState {
        base: format!("http://{}", addr),
        ..GraphState::default()
    };

    let app = Router::new()
        .route("/paged/page1", get(first_page))
        .route("/paged/page2", get(second_page))
        .route("/dl/:name", get(download))
        .route("/flaky/children", get(flaky_listing))
        .route("/flaky/promo.mp4", get(flaky_download))
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

fn source(listing_url: String, download_dir: &std::path::Path) -> OneDriveSource {
    OneDriveSource::new(
        reqwest::Client::new(),
        OneDriveConfig {
            base_url: Some(listing_url),
            access_token: Some("graph-token".to_string()),
            download_dir: download_dir.display().to_string(),
        },
    )
}

#[tokio::test]
async fn test_listing_follows_next_link_in_order() {
    let (addr, state) = start_graph().await;
    let dir = tempfile::tempdir().unwrap();
    let source = source(format!("http://{}/paged/page1", addr), dir.path());

    let files = source.download_all().await.unwrap();

    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a.mp4", "b.mp4", "c.mp4"]);
    assert_eq!(*state.downloads.lock().unwrap(), vec!["a.mp4", "b.mp4", "c.mp4"]);

    for file in &files {
        let body = std::fs::read_to_string(&file.path).unwrap();
        assert_eq!(body, format!("bytes of {}", file.name));
    }

    let page_auth = state.page_auth.lock().unwrap();
    assert_eq!(
        *page_auth,
        vec![
            ("page1".to_string(), "Bearer graph-token".to_string()),
            ("page2".to_string(), "Bearer graph-token".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_interrupted_download_is_fetched_again() {
    let (addr, state) = start_graph().await;
    let dir = tempfile::tempdir().unwrap();
    let source = source(format!("http://{}/flaky/children", addr), dir.path());
    let target = dir.path().join("promo.mp4");

    assert!(source.download_all().await.is_err());
    assert!(!target.exists());
    assert!(!dir.path().join("promo.mp4.part").exists());

    let files = source.download_all().await.unwrap();

    assert_eq!(state.flaky_hits.load(Ordering::SeqCst), 2);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, target);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), FULL_BODY);
}

#[tokio::test]
async fn test_completed_download_is_reused() {
    let (addr, state) = start_graph().await;
    let dir = tempfile::tempdir().unwrap();
    let source = source(format!("http://{}/paged/page1", addr), dir.path());

    source.download_all().await.unwrap();
    source.download_all().await.unwrap();

    assert_eq!(state.downloads.lock().unwrap().len(), 3);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "part"))
        .collect();
    assert!(leftovers.is_empty());
}
