//! cascade-health: liveness probing and failback for the export engine.
//!
//! # Architecture
//!
//! ```text
//! HealthProber (own timer, independent of the export period)
//!   ├── FailbackTarget::is_failed_over()   → skip tick while on local
//!   ├── LivenessCheck::check()             → ProbeResult
//!   │     └── HttpStatusCheck: GET http://<local-host>:13133/status
//!   └── FailbackTarget::restore_local()    on Healthy only
//! ```
//!
//! Probe failures are logged and otherwise ignored; the prober only ever
//! moves the selection toward the local endpoint.

pub mod checker;
pub mod prober;

pub use checker::{HttpStatusCheck, LivenessCheck, ProbeResult};
pub use prober::{FailbackTarget, HealthProber, ProbeOutcome};
