//! Built-in health-check route group.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `{prefix}/live` | Is the process alive? Failure → restart. |
//! | **Readiness** | `{prefix}/ready` | Can it serve traffic? Failure → pulled from the load balancer. |
//!
//! A [`Server`](crate::Server) only exists once startup reached `Ready`, so
//! answering at all means the schema is in place and every group mounted.
//!
//! ```rust
//! use keel::{Assembler, health};
//!
//! # fn wire(assembler: &mut Assembler) -> Result<(), keel::MountError> {
//! assembler.mount(health::routes("/health"))?;
//! # Ok(())
//! # }
//! ```

use crate::{Request, Response, RouteGroup};

/// Liveness and readiness probes under `prefix`.
pub fn routes(prefix: &str) -> RouteGroup {
    RouteGroup::new(prefix, "health")
        .get("/live", liveness)
        .get("/ready", readiness)
}

/// Always `200 OK` with body `"ok"`. No dependencies.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// `200 OK` with body `"ready"`.
pub async fn readiness(_req: Request) -> Response {
    Response::text("ready")
}
