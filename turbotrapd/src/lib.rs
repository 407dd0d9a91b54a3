pub mod bus;
pub mod config;
pub mod context;
pub mod detector;
pub mod routes;
pub mod schema;
pub mod sinks;

pub use bus::{IncidentBus, RetryPolicy};
pub use config::Config;
pub use context::AppContext;
pub use detector::AttackDetector;
pub use schema::{AttackSummary, Classification, Incident, IncidentKind, Severity};
