//! Startup assembly: schema, middleware and route groups in, one immutable
//! [`Server`] out.
//!
//! ```text
//! Uninitialized ──initialize_schema──▶ SchemaReady ──mount──▶ Mounting ──build_server──▶ Ready
//!        │                                  │                    │
//!        └──────────── any error ───────────┴────────────────────┴──▶ Failed
//! ```
//!
//! Every step returns a `Result` and is checked eagerly. Once an assembler
//! has failed it refuses to go on; a process must never serve traffic from a
//! half-built surface.

use std::fmt;

use crate::error::{MountError, StartupError};
use crate::group::{MountedGroup, RouteGroup};
use crate::middleware::{MiddlewareChain, Policy};
use crate::router::RouteTable;
use crate::schema::SchemaInitializer;
use crate::server::Server;

/// Lifecycle of the server surface while it is being assembled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Uninitialized,
    SchemaReady,
    Mounting,
    /// Reported by [`Server::phase`]. The assembler itself never holds it;
    /// `build_server` consumes the assembler on the way there.
    Ready,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::SchemaReady   => "schema-ready",
            Self::Mounting      => "mounting",
            Self::Ready         => "ready",
            Self::Failed        => "failed",
        })
    }
}

/// Builds the server surface step by step.
///
/// ```rust,no_run
/// use keel::{Assembler, Request, Response, RouteGroup, ServerConfig};
/// use keel::middleware::Policy;
/// use keel::schema::SqliteSchema;
///
/// # async fn list_games(_req: Request) -> Response { Response::json("[]") }
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServerConfig::default();
///
/// let mut assembler = Assembler::new();
/// assembler.initialize_schema(&SqliteSchema::games_repository(&config.database_path))?;
/// assembler.register(Policy::Cors(config.cors.clone()))?;
/// assembler.mount(RouteGroup::new("/games", "games").get("/", list_games))?;
/// let server = assembler.build_server()?;
/// # Ok(())
/// # }
/// ```
pub struct Assembler {
    phase: Phase,
    chain: MiddlewareChain,
    groups: Vec<MountedGroup>,
}

impl Assembler {
    pub fn new() -> Self {
        Self { phase: Phase::Uninitialized, chain: MiddlewareChain::new(), groups: Vec::new() }
    }

    pub fn phase(&self) -> Phase { self.phase }

    /// The middleware registered so far.
    pub fn middleware(&self) -> &MiddlewareChain { &self.chain }

    /// Mounted `(prefix, tag)` pairs, in mount order.
    pub fn mounted(&self) -> Vec<(&str, &str)> {
        self.groups.iter().map(|g| (g.prefix.as_str(), g.tag.as_str())).collect()
    }

    /// Runs schema initialization. Blocks until the store is ready.
    ///
    /// Allowed before any group is mounted; repeating it in `SchemaReady`
    /// re-runs the (idempotent) initializer.
    pub fn initialize_schema(&mut self, schema: &dyn SchemaInitializer) -> Result<(), StartupError> {
        match self.phase {
            Phase::Uninitialized | Phase::SchemaReady => {}
            phase => return Err(self.fail(StartupError::Failed(phase))),
        }

        schema.ensure_schema().map_err(|e| self.fail(e.into()))?;
        self.phase = Phase::SchemaReady;
        Ok(())
    }

    /// Appends a middleware policy. Policies run in the order registered.
    pub fn register(&mut self, policy: Policy) -> Result<(), StartupError> {
        if self.phase == Phase::Failed {
            return Err(StartupError::Failed(Phase::Failed));
        }
        self.chain.register(policy).map_err(|e| self.fail(e.into()))
    }

    /// Mounts a route group at its prefix.
    ///
    /// Fails with [`MountError::DuplicatePrefix`] if the prefix is taken; the
    /// group already there stays mounted.
    pub fn mount(&mut self, group: RouteGroup) -> Result<(), MountError> {
        match self.phase {
            Phase::SchemaReady | Phase::Mounting => {}
            Phase::Uninitialized => return Err(self.fail_mount(MountError::SchemaNotReady)),
            _ => return Err(MountError::Failed),
        }

        let route_count = group.routes().count();
        let mounted = group.compile().map_err(|e| self.fail_mount(e))?;

        if let Some(existing) = self.groups.iter().find(|g| g.prefix == mounted.prefix) {
            let err = MountError::DuplicatePrefix {
                prefix: mounted.prefix.clone(),
                existing: existing.tag.clone(),
            };
            return Err(self.fail_mount(err));
        }

        tracing::info!(prefix = %mounted.prefix, tag = %mounted.tag, routes = route_count, "route group mounted");
        self.groups.push(mounted);
        self.phase = Phase::Mounting;
        Ok(())
    }

    /// Freezes middleware and groups into an immutable [`Server`].
    ///
    /// The root handler is always present, so a server with zero groups is
    /// valid as long as the schema step ran.
    pub fn build_server(self) -> Result<Server, StartupError> {
        match self.phase {
            Phase::SchemaReady | Phase::Mounting => {}
            phase => {
                tracing::error!(%phase, "refusing to build server");
                return Err(StartupError::Failed(phase));
            }
        }

        let table = RouteTable::new(self.groups);
        tracing::info!(
            groups = ?table.mounts().collect::<Vec<_>>(),
            middleware = ?self.chain.names(),
            phase = %Phase::Ready,
            "server assembled"
        );
        Ok(Server::new(self.chain, table))
    }

    fn fail(&mut self, err: StartupError) -> StartupError {
        tracing::error!(phase = %self.phase, error = %err, "startup failed");
        self.phase = Phase::Failed;
        err
    }

    fn fail_mount(&mut self, err: MountError) -> MountError {
        tracing::error!(phase = %self.phase, error = %err, "mount failed");
        self.phase = Phase::Failed;
        err
    }
}

impl Default for Assembler {
    fn default() -> Self { Self::new() }
}
