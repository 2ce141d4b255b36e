pub mod cache;
pub mod client;
pub mod response;
pub mod types;

pub use cache::ProxyClientCache;
pub use client::HttpClient;
pub use types::{HttpRequestInput, HttpResponseOutput, RedirectInfo, TimingInfo};
