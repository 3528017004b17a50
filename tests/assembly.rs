//! End-to-end assembly: schema, middleware and groups wired the way the
//! Games Repository API wires them, then driven through `Server::dispatch`.

use std::sync::atomic::{AtomicUsize, Ordering};

use keel::middleware::{AllowList, CorsConfig, Policy};
use keel::schema::{SchemaInitializer, SqliteSchema};
use keel::{
    Assembler, ConfigError, Method, MountError, Phase, Request, Response, RouteGroup, Server,
    StartupError, StatusCode,
};

const LOCAL: &str = "http://localhost:8000";

fn tagged(tag: &'static str) -> impl Fn(Request) -> std::future::Ready<Response> {
    move |req: Request| {
        let id = req.param("id").unwrap_or("-");
        std::future::ready(Response::text(format!("{tag}:{id}")))
    }
}

fn schema(name: &str) -> SqliteSchema {
    SqliteSchema::in_memory(name, keel::schema::GAMES_REPOSITORY.to_vec())
}

fn games_api() -> Server {
    // Tests run in parallel; each gets its own database.
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let schema = schema(&format!("assembly_games_api_{}", NEXT.fetch_add(1, Ordering::Relaxed)));
    // Holds the shared in-memory database open during assembly.
    let _keep = schema.connect().unwrap();

    let mut app = Assembler::new();
    app.initialize_schema(&schema).unwrap();
    app.register(Policy::Trace).unwrap();
    app.register(Policy::Cors(CorsConfig::default())).unwrap();
    app.mount(
        RouteGroup::new("/users", "users")
            .post("/register", tagged("users"))
            .get("/me", tagged("users")),
    )
    .unwrap();
    app.mount(
        RouteGroup::new("/games", "games")
            .get("/", tagged("games"))
            .get("/{id}", tagged("games"))
            .post("/{id}/upvote", tagged("games")),
    )
    .unwrap();
    app.mount(RouteGroup::new("", "auth").post("/auth/token", tagged("auth")))
        .unwrap();
    app.build_server().unwrap()
}

fn text(res: &Response) -> &str {
    std::str::from_utf8(res.body()).unwrap()
}

#[tokio::test]
async fn requests_reach_the_owning_group() {
    let server = games_api();

    let res = server.dispatch(Request::builder(Method::Get, "/games/42").build()).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(text(&res), "games:42");

    let res = server.dispatch(Request::builder(Method::Post, "/games/7/upvote").build()).await;
    assert_eq!(text(&res), "games:7");

    let res = server.dispatch(Request::builder(Method::Post, "/auth/token").build()).await;
    assert_eq!(text(&res), "auth:-");

    let res = server.dispatch(Request::builder(Method::Get, "/users/me").build()).await;
    assert_eq!(text(&res), "users:-");
}

#[tokio::test]
async fn prefix_match_respects_segment_boundaries() {
    let server = games_api();
    let res = server.dispatch(Request::builder(Method::Get, "/gamesx/1").build()).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(res.body(), br#"{"detail":"Not Found"}"#);
}

#[tokio::test]
async fn known_path_with_wrong_method_is_405() {
    let server = games_api();
    let res = server.dispatch(Request::builder(Method::Delete, "/games/42").build()).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET, HEAD"));
}

#[tokio::test]
async fn root_welcome_survives_mounted_groups() {
    let server = games_api();
    let res = server.dispatch(Request::builder(Method::Get, "/").build()).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body(), br#"{"message":"Welcome to Games Repository API"}"#);
}

#[tokio::test]
async fn root_welcome_with_nothing_mounted() {
    let schema = schema("assembly_empty");
    let _keep = schema.connect().unwrap();

    let mut app = Assembler::new();
    app.initialize_schema(&schema).unwrap();
    let server = app.build_server().unwrap();
    assert!(server.mounts().is_empty());

    let res = server.dispatch(Request::builder(Method::Get, "/").build()).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("application/json"));

    let res = server.dispatch(Request::builder(Method::Get, "/games").build()).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn preflight_is_answered_before_routing() {
    let server = games_api();
    let req = Request::builder(Method::Options, "/users/register")
        .header("origin", LOCAL)
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "authorization, content-type")
        .build();

    let res = server.dispatch(req).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.header("access-control-allow-origin"), Some(LOCAL));
    assert_eq!(res.header("access-control-allow-credentials"), Some("true"));
    assert_eq!(
        res.header("access-control-allow-headers"),
        Some("authorization, content-type")
    );
    assert!(res.header("access-control-allow-methods").unwrap().contains("POST"));
}

#[tokio::test]
async fn preflight_from_foreign_origin_is_rejected() {
    let server = games_api();
    let req = Request::builder(Method::Options, "/games/")
        .header("origin", "https://evil.example")
        .header("access-control-request-method", "GET")
        .build();

    let res = server.dispatch(req).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(res.header("access-control-allow-origin"), None);
}

#[tokio::test]
async fn simple_requests_carry_cors_headers_for_allowed_origins() {
    let server = games_api();

    let req = Request::builder(Method::Get, "/games/1").header("origin", LOCAL).build();
    let res = server.dispatch(req).await;
    assert_eq!(res.header("access-control-allow-origin"), Some(LOCAL));
    assert_eq!(res.header("vary"), Some("Origin"));

    let req = Request::builder(Method::Get, "/games/1")
        .header("origin", "https://evil.example")
        .build();
    let res = server.dispatch(req).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.header("access-control-allow-origin"), None);
}

#[test]
fn second_group_on_a_taken_prefix_is_refused() {
    let schema = schema("assembly_duplicate");
    let _keep = schema.connect().unwrap();

    let mut app = Assembler::new();
    app.initialize_schema(&schema).unwrap();
    app.mount(RouteGroup::new("/games", "games").get("/", tagged("games"))).unwrap();

    let err = app
        .mount(RouteGroup::new("/games", "games-v2").get("/", tagged("v2")))
        .unwrap_err();
    assert!(matches!(err, MountError::DuplicatePrefix { .. }));
    assert_eq!(app.mounted(), vec![("/games", "games")]);
    assert_eq!(app.phase(), Phase::Failed);
}

#[test]
fn credentialed_wildcard_cors_aborts_startup() {
    let schema = schema("assembly_insecure");
    let _keep = schema.connect().unwrap();

    let mut app = Assembler::new();
    app.initialize_schema(&schema).unwrap();
    let config = CorsConfig { allowed_origins: AllowList::Any, ..CorsConfig::default() };

    let err = app.register(Policy::Cors(config)).unwrap_err();
    assert!(matches!(err, StartupError::Config(ConfigError::InsecureCorsPolicy)));
    assert!(matches!(app.build_server(), Err(StartupError::Failed(Phase::Failed))));
}

#[test]
fn schema_bootstrap_is_repeatable() {
    let schema = schema("assembly_repeatable");
    let _keep = schema.connect().unwrap();

    schema.ensure_schema().unwrap();
    let mut app = Assembler::new();
    app.initialize_schema(&schema).unwrap();
    assert_eq!(app.phase(), Phase::SchemaReady);
    assert!(schema.tables().unwrap().contains(&"games".to_owned()));
}

#[tokio::test]
async fn health_probes_mount_like_any_group() {
    let schema = schema("assembly_health");
    let _keep = schema.connect().unwrap();

    let mut app = Assembler::new();
    app.initialize_schema(&schema).unwrap();
    app.mount(keel::health::routes("/health")).unwrap();
    let server = app.build_server().unwrap();
    assert_eq!(server.mounts(), vec![("/health", "health")]);

    let res = server.dispatch(Request::builder(Method::Get, "/health/live").build()).await;
    assert_eq!(text(&res), "ok");
    let res = server.dispatch(Request::builder(Method::Head, "/health/ready").build()).await;
    assert_eq!(res.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn unroutable_methods_still_pass_through_middleware() {
    let server = games_api();
    let raw = http::Request::builder()
        .method("TRACE")
        .uri("/games/42")
        .header("origin", LOCAL)
        .body(bytes::Bytes::new())
        .unwrap();

    let res = server.dispatch(Request::from_http(raw)).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET, HEAD"));
    assert_eq!(res.header("access-control-allow-origin"), Some(LOCAL));

    let raw = http::Request::builder()
        .method("TRACE")
        .uri("/nowhere")
        .body(bytes::Bytes::new())
        .unwrap();
    let res = server.dispatch(Request::from_http(raw)).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn path_parameters_are_percent_decoded() {
    let server = games_api();
    let res = server.dispatch(Request::builder(Method::Get, "/games/caf%C3%A9").build()).await;
    assert_eq!(text(&res), "games:café");
}
