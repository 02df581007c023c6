mod fixtures;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use sighting_projector::cache::DirectionsCache;
use sighting_projector::config::ServerConfig;
use sighting_projector::haversine::StraightLineDirections;
use sighting_projector::server::Server;
use sighting_projector::traits::{DirectionsProvider, GroupRegistry};

use fixtures::{utrecht_groups, StaticRegistry};

struct Running {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<(usize, usize)>,
    cache_path: PathBuf,
}

impl Running {
    fn stop(self) -> (usize, usize) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.handle.join().expect("server thread")
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sighting_projector_server_{}_{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn start(name: &str, provider: Box<dyn DirectionsProvider>, registry: Box<dyn GroupRegistry>) -> Running {
    start_with(name, provider, registry, |_| {})
}

fn start_with(
    name: &str,
    provider: Box<dyn DirectionsProvider>,
    registry: Box<dyn GroupRegistry>,
    configure: impl FnOnce(&mut ServerConfig),
) -> Running {
    let cache_path = temp_dir(name).join("cache.bin");
    let mut config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        idle_timeout_secs: 2,
        cache_path: cache_path.clone(),
        ..ServerConfig::default()
    };
    configure(&mut config);

    let server = Server::start(&config, provider, registry).expect("server starts");
    let addr = server.local_addr().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let handle = thread::spawn(move || {
        let accepted = server.serve(&flag).expect("serve");
        let flushed = server.finish().expect("flush");
        (accepted, flushed)
    });

    Running {
        addr,
        shutdown,
        handle,
        cache_path,
    }
}

fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(request).unwrap();
    let mut response = Vec::new();
    // A rejected request may be answered with a reset instead of a clean close.
    let _ = stream.read_to_end(&mut response);
    response
}

fn request_body() -> String {
    let seen = (Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
    format!(
        r#"{{"lastLocations": [
            {{"subarea": "alpha", "location": [52.09, 5.11], "timestamp": "{seen}"}},
            {{"subarea": "BRAVO", "location": "52.068,5.115", "timestamp": "{seen}"}}
        ]}}"#
    )
}

#[test]
fn answers_one_request_per_connection() {
    let running = start(
        "answers",
        Box::new(StraightLineDirections::default()),
        Box::new(StaticRegistry::new(utrecht_groups())),
    );

    let response = exchange(running.addr, request_body().as_bytes());
    let json: Value = serde_json::from_slice(&response).expect("json response");

    let alternatives = json.as_array().expect("array");
    assert_eq!(alternatives.len(), 3);
    for alternative in alternatives {
        assert!(alternative["Alpha"].is_object());
        assert!(alternative["Bravo"].is_object());
    }
    assert!(alternatives[0]["Alpha"]["nextGroup"]["name"].is_string());

    let (accepted, _) = running.stop();
    assert_eq!(accepted, 1);
}

#[test]
fn malformed_request_closes_without_response() {
    let running = start(
        "malformed",
        Box::new(StraightLineDirections::default()),
        Box::new(StaticRegistry::new(utrecht_groups())),
    );

    let response = exchange(running.addr, b"{\"lastLocations\": [{\"subarea\": \"Golf\"}]}");
    assert!(response.is_empty());

    // The server keeps serving other clients.
    let response = exchange(running.addr, request_body().as_bytes());
    assert!(!response.is_empty());

    running.stop();
}

#[test]
fn unavailable_registry_yields_null_entries() {
    let running = start(
        "no_registry",
        Box::new(StraightLineDirections::default()),
        Box::new(StaticRegistry::unavailable()),
    );

    let response = exchange(running.addr, request_body().as_bytes());
    let json: Value = serde_json::from_slice(&response).unwrap();

    for alternative in json.as_array().unwrap() {
        assert!(alternative["Alpha"].is_null());
        assert!(alternative["Bravo"].is_null());
    }

    running.stop();
}

#[test]
fn serves_concurrent_connections() {
    let running = start(
        "concurrent",
        Box::new(StraightLineDirections::default()),
        Box::new(StaticRegistry::new(utrecht_groups())),
    );
    let addr = running.addr;

    let clients: Vec<_> = (0..8)
        .map(|_| thread::spawn(move || exchange(addr, request_body().as_bytes())))
        .collect();
    let responses: Vec<Value> = clients
        .into_iter()
        .map(|client| serde_json::from_slice(&client.join().unwrap()).unwrap())
        .collect();

    // Identical requests against independent registry copies agree.
    for response in &responses {
        assert_eq!(response[0]["Alpha"]["nextGroup"]["id"], responses[0][0]["Alpha"]["nextGroup"]["id"]);
        assert_eq!(response[0]["Alpha"]["waypoints"], responses[0][0]["Alpha"]["waypoints"]);
    }

    let (accepted, _) = running.stop();
    assert_eq!(accepted, 8);
}

#[test]
fn shutdown_flushes_cache_snapshot() {
    let running = start(
        "flush",
        Box::new(StraightLineDirections::default()),
        Box::new(StaticRegistry::new(utrecht_groups())),
    );
    let cache_path = running.cache_path.clone();

    exchange(running.addr, request_body().as_bytes());
    let (_, flushed) = running.stop();
    assert!(flushed >= 2, "both sightings' lookups are cached, got {flushed}");

    let restored = DirectionsCache::load(&cache_path, std::num::NonZeroUsize::new(64).unwrap()).unwrap();
    assert_eq!(restored.len(), flushed);
}

#[test]
fn warm_start_fills_cache_before_serving() {
    let running = start_with(
        "warm",
        Box::new(StraightLineDirections::default()),
        Box::new(StaticRegistry::new(utrecht_groups())),
        |config| config.warm_cache = true,
    );

    // No client ever connects; the flushed entries all come from warm-up.
    let (accepted, flushed) = running.stop();
    assert_eq!(accepted, 0);
    // One arrival lookup per post: four in Alpha, three in Bravo.
    assert_eq!(flushed, 7);
}

#[test]
fn silent_client_is_dropped_after_idle_timeout() {
    let running = start(
        "idle",
        Box::new(StraightLineDirections::default()),
        Box::new(StaticRegistry::new(utrecht_groups())),
    );

    let mut stream = TcpStream::connect(running.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let mut response = Vec::new();
    // Never sends anything; the server gives up after its 2 s idle timeout.
    stream.read_to_end(&mut response).unwrap();
    assert!(response.is_empty());

    running.stop();
}
