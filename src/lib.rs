//! # keel
//!
//! The assembly layer of a small HTTP API: independently-owned route groups,
//! cross-cutting middleware and schema bootstrap, wired into one immutable
//! server surface.
//!
//! ## The contract
//!
//! Business logic lives in route groups owned by their collaborators (users,
//! games, auth). keel owns the seams between them:
//!
//! - **Schema first** — storage is initialized, idempotently, before any
//!   group is mounted. Unreachable storage aborts startup.
//! - **Ordered middleware** — policies run in registration order for every
//!   request. CORS preflights are answered before routing.
//! - **Explicit mounting** — `mount(group)` returns a `Result`; two groups
//!   can never claim the same prefix.
//! - **Longest prefix wins** — `/games/featured` beats `/games` beats `""`.
//! - **Root handler always present** — `GET /` answers with a welcome
//!   payload even with nothing mounted.
//!
//! Once built, the server is immutable and shared across connections with
//! no locking.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keel::middleware::Policy;
//! use keel::schema::SqliteSchema;
//! use keel::{Assembler, Request, Response, RouteGroup, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     keel::telemetry::init();
//!     let config = ServerConfig::default();
//!
//!     let mut app = Assembler::new();
//!     app.initialize_schema(&SqliteSchema::games_repository(&config.database_path))?;
//!     app.register(Policy::Trace)?;
//!     app.register(Policy::Cors(config.cors.clone()))?;
//!     app.mount(RouteGroup::new("/games", "games").get("/{id}", get_game))?;
//!     let server = app.build_server()?;
//!
//!     let listener = tokio::net::TcpListener::bind(config.socket_addr()?).await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//!
//! async fn get_game(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//! ```

mod assembler;
mod error;
mod group;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod health;
pub mod middleware;
pub mod schema;
pub mod telemetry;

pub use assembler::{Assembler, Phase};
pub use config::ServerConfig;
pub use error::{ConfigError, Error, MountError, StartupError, StorageError};
pub use group::RouteGroup;
pub use handler::Handler;
pub use http::StatusCode;
pub use method::{Method, UnknownMethod};
pub use request::{Request, RequestBuilder, RequestHead};
pub use response::{ContentType, IntoResponse, Json, Response, ResponseBuilder};
pub use server::{Server, WELCOME_MESSAGE};
