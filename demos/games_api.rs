//! Games Repository API wiring: schema, CORS, three route groups.
//!
//! The handlers here are read-only placeholders standing in for the real
//! users/games/auth services; the point is the assembly.
//!
//! Run with:
//!   RUST_LOG=keel=debug cargo run --example games_api
//!   GAMES_API_CONFIG=games.toml cargo run --example games_api
//!
//! Try:
//!   curl http://127.0.0.1:8001/
//!   curl http://127.0.0.1:8001/games/
//!   curl http://127.0.0.1:8001/games/1
//!   curl -i -X OPTIONS http://127.0.0.1:8001/users \
//!        -H 'origin: http://localhost:8000' \
//!        -H 'access-control-request-method: POST'

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use keel::middleware::Policy;
use keel::schema::SqliteSchema;
use keel::{
    Assembler, IntoResponse, Json, Request, Response, RouteGroup, ServerConfig, StatusCode, health,
    telemetry,
};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

type Db = Arc<Mutex<Connection>>;

#[derive(Serialize)]
struct Game {
    id: i64,
    name: String,
    emoji: Option<String>,
    description: String,
    game_type: Option<String>,
    upvotes: i64,
    downvotes: i64,
}

#[derive(Serialize)]
struct User {
    id: i64,
    username: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::var_os("GAMES_API_CONFIG") {
        Some(path) => ServerConfig::load(&PathBuf::from(path))?,
        None => ServerConfig::default(),
    };
    let schema = SqliteSchema::games_repository(&config.database_path);

    let mut app = Assembler::new();
    app.initialize_schema(&schema)?;
    app.register(Policy::Trace)?;
    app.register(Policy::Cors(config.cors.clone()))?;

    let db: Db = Arc::new(Mutex::new(schema.connect()?));
    app.mount(users(Arc::clone(&db)))?;
    app.mount(games(Arc::clone(&db)))?;
    app.mount(auth())?;
    app.mount(health::routes("/health"))?;

    let server = app.build_server()?;
    let listener = tokio::net::TcpListener::bind(config.socket_addr()?).await?;
    server.serve(listener).await?;
    Ok(())
}

fn users(db: Db) -> RouteGroup {
    RouteGroup::new("/users", "users").get("/{id}", move |req: Request| {
        let db = Arc::clone(&db);
        async move {
            let Some(id) = req.param("id").and_then(|id| id.parse::<i64>().ok()) else {
                return not_found();
            };
            let user = query(db, move |conn| {
                conn.query_row("SELECT id, username FROM users WHERE id = ?1", [id], |row| {
                    Ok(User { id: row.get(0)?, username: row.get(1)? })
                })
                .optional()
            })
            .await;
            match user {
                Ok(Some(user)) => Json(user).into_response(),
                Ok(None) => not_found(),
                Err(res) => res,
            }
        }
    })
}

fn games(db: Db) -> RouteGroup {
    let list_db = Arc::clone(&db);
    RouteGroup::new("/games", "games")
        .get("/", move |_req: Request| {
            let db = Arc::clone(&list_db);
            async move {
                let games = query(db, |conn| {
                    let sql = format!("{GAME_COLUMNS} ORDER BY upvotes - downvotes DESC");
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map([], game_from_row)?;
                    rows.collect::<rusqlite::Result<Vec<Game>>>()
                })
                .await;
                match games {
                    Ok(games) => Json(games).into_response(),
                    Err(res) => res,
                }
            }
        })
        .get("/{id}", move |req: Request| {
            let db = Arc::clone(&db);
            async move {
                let Some(id) = req.param("id").and_then(|id| id.parse::<i64>().ok()) else {
                    return not_found();
                };
                let game = query(db, move |conn| {
                    conn.query_row(&format!("{GAME_COLUMNS} WHERE id = ?1"), [id], game_from_row)
                        .optional()
                })
                .await;
                match game {
                    Ok(Some(game)) => Json(game).into_response(),
                    Ok(None) => not_found(),
                    Err(res) => res,
                }
            }
        })
}

/// Root-level group: its routes carry their own `/auth` segment.
fn auth() -> RouteGroup {
    RouteGroup::new("", "auth").post("/auth/token", |_req: Request| async {
        Response::builder()
            .status(StatusCode::NOT_IMPLEMENTED)
            .json(r#"{"detail":"token issuance is provided by the auth service"}"#)
    })
}

const GAME_COLUMNS: &str =
    "SELECT id, name, emoji, description, game_type, upvotes, downvotes FROM games";

fn game_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Game> {
    Ok(Game {
        id: row.get(0)?,
        name: row.get(1)?,
        emoji: row.get(2)?,
        description: row.get(3)?,
        game_type: row.get(4)?,
        upvotes: row.get(5)?,
        downvotes: row.get(6)?,
    })
}

/// Runs a blocking query off the async workers. Failures become `500`.
async fn query<T, F>(db: Db, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| "database lock poisoned".to_owned())?;
        f(&conn).map_err(|e| e.to_string())
    })
    .await;

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "query failed");
            Err(Response::status(StatusCode::INTERNAL_SERVER_ERROR))
        }
        Err(e) => {
            tracing::error!(error = %e, "query task failed");
            Err(Response::status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn not_found() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .json(r#"{"detail":"Not Found"}"#)
}
