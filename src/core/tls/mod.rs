pub mod verifier;

pub use verifier::{create_client_config, server_name_for};
