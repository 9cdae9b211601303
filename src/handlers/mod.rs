//! Handler modules for the orchestration API (spec §6).
//!
//! - `health` — health, readiness, system stats, auth mode
//! - `submit` — query submission, NDJSON event stream
//! - `queue_status` — queue-position tracker stream
//! - `admin` — breaker/registrar stats, shutdown trigger

pub mod admin;
pub mod health;
pub mod queue_status;
pub mod submit;

pub use admin::*;
pub use health::*;
pub use queue_status::*;
pub use submit::*;
