pub mod core;
pub mod logging;

// 便于调用方直接使用常用类型
pub use self::core::http::{HttpClient, HttpRequestInput, HttpResponseOutput, ProxyClientCache};
pub use self::core::proxy::{classify, parse_descriptor, ProxyConfig, ProxyError};
