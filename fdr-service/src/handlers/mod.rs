pub mod admin;
pub mod metrics;

pub use admin::{admin_router, AdminState};
pub use metrics::metrics_middleware;
