pub mod config;
pub mod http;
pub mod proxy;
pub mod tls;
