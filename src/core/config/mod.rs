pub mod loader;
pub mod model;

pub use loader::{load_or_init_at, save_at};
pub use model::AppConfig;
