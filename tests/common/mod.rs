#![allow(dead_code, unused_imports)]
//! 公共测试模块：内存双向流与回环 SOCKS5 脚本服务器

pub mod mock_stream;
pub mod socks5_server;
