//! HTTP server for health checks and the actuator API

pub mod http_server;
pub use http_server::{router, run_http_server, ApiState};
