//! Error types.
//!
//! Every variant here is a startup-time failure: a misconfigured deployment,
//! not a transient condition. Request-level failures (404, 422, auth) are
//! plain [`Response`](crate::Response) values produced by the route groups.

use thiserror::Error;

use crate::assembler::Phase;

/// Schema initialization could not complete.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store could not be opened or reached.
    #[error("cannot reach storage at `{location}`: {source}")]
    ConnectionFailed {
        location: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The store was reachable but a DDL statement failed.
    #[error("schema statement for `{table}` failed: {source}")]
    Statement {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
}

/// Invalid policy or configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Credentialed requests from any origin were requested.
    #[error("insecure CORS policy: allow_credentials cannot be combined with a wildcard origin")]
    InsecureCorsPolicy,

    /// A configured name or value cannot be sent as an HTTP header.
    #[error("`{0}` is not a valid header value")]
    InvalidHeader(String),

    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid bind address `{0}`")]
    InvalidAddress(String),
}

/// A route group could not be mounted.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("prefix `{prefix}` is already mounted by group `{existing}`")]
    DuplicatePrefix { prefix: String, existing: String },

    #[error("invalid prefix `{prefix}`: {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    /// The group answers `GET /`, which belongs to the built-in root handler.
    #[error("group `{tag}` collides with the root handler at `GET /`")]
    RootCollision { tag: String },

    #[error("invalid route `{path}` in group `{tag}`: {source}")]
    InvalidRoute {
        tag: String,
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("cannot mount before the schema is initialized")]
    SchemaNotReady,

    /// An earlier startup step failed.
    #[error("assembler has already failed")]
    Failed,
}

/// Any failure on the way to [`Phase::Ready`].
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mount(#[from] MountError),

    /// An earlier step failed; the assembler refuses to continue.
    #[error("startup cannot continue from phase `{0}`")]
    Failed(Phase),
}

/// The crate-level error: startup failures and listener I/O.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
