pub mod admission;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod state;
pub mod system;
pub mod tasks;
pub mod telemetry;
