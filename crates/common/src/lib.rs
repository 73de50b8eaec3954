pub mod config;
pub mod http;
pub mod observability;
pub mod proxy_pool;
pub mod types;
