pub mod activation;
pub mod bridge;
pub mod config;
pub mod connector;
pub mod error;
pub mod idle;
pub mod lifecycle;
pub mod readiness;
pub mod session;
pub mod signal;
pub mod status;
