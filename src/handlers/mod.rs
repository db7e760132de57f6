mod health;
mod proxy;

pub use health::{HealthResponse, health_check};
pub use proxy::proxy_request;
