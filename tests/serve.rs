//! A real socket round trip through the connection loop, then graceful
//! shutdown.

use std::sync::{Arc, Mutex};

use keel::middleware::{CorsConfig, Middleware, Policy};
use keel::schema::SqliteSchema;
use keel::{Assembler, Request, RequestHead, Response, RouteGroup};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

async fn get_game(req: Request) -> Response {
    let id = req.param("id").unwrap_or_default().to_owned();
    Response::json_value(&serde_json::json!({ "id": id }))
}

/// Records the method of every request and response it sees.
#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Middleware for Recorder {
    fn name(&self) -> &'static str { "recorder" }

    fn on_request(&self, req: &mut Request) -> Option<Response> {
        self.0.lock().unwrap().push(format!("req {} {}", req.method(), req.path()));
        None
    }

    fn on_response(&self, head: &RequestHead, res: &mut Response) {
        self.0.lock().unwrap().push(format!("res {} {}", head.method(), res.status_code().as_u16()));
    }
}

async fn roundtrip(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    String::from_utf8(raw).unwrap()
}

#[tokio::test]
async fn serves_over_tcp_and_drains_on_shutdown() {
    let schema = SqliteSchema::in_memory("serve_roundtrip", keel::schema::GAMES_REPOSITORY.to_vec());
    let _keep = schema.connect().unwrap();

    let mut app = Assembler::new();
    app.initialize_schema(&schema).unwrap();
    let recorder = Arc::new(Recorder::default());
    app.register(Policy::Custom(recorder.clone())).unwrap();
    app.register(Policy::Cors(CorsConfig::default())).unwrap();
    app.mount(RouteGroup::new("/games", "games").get("/{id}", get_game)).unwrap();
    let server = app.build_server().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve_with_shutdown(listener, async move {
        let _ = stopped.await;
    }));

    let reply = roundtrip(
        addr,
        "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
    assert!(reply.ends_with(r#"{"message":"Welcome to Games Repository API"}"#), "{reply}");

    let reply = roundtrip(
        addr,
        "GET /games/9 HTTP/1.1\r\nHost: localhost\r\nOrigin: http://127.0.0.1:8000\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
    assert!(reply.to_ascii_lowercase().contains("access-control-allow-origin: http://127.0.0.1:8000"));
    assert!(reply.ends_with(r#"{"id":"9"}"#), "{reply}");

    let reply = roundtrip(
        addr,
        "GET /games/caf%C3%A9 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(reply.ends_with(r#"{"id":"café"}"#), "{reply}");

    let reply = roundtrip(
        addr,
        "BREW /games/9 HTTP/1.1\r\nHost: localhost\r\nOrigin: http://localhost:8000\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 405"), "{reply}");
    let lower = reply.to_ascii_lowercase();
    assert!(lower.contains("allow: get, head"), "{reply}");
    assert!(lower.contains("access-control-allow-origin: http://localhost:8000"), "{reply}");

    let log = recorder.0.lock().unwrap().clone();
    assert!(log.contains(&"req BREW /games/9".to_owned()), "{log:?}");
    assert!(log.contains(&"res BREW 405".to_owned()), "{log:?}");

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
