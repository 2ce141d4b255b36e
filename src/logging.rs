// tracing 初始化：环境变量 RUST_LOG 优先，其次使用配置中的级别
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging(default_level: &str) {
    // 若已经初始化，避免重复 panic
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
    tracing::debug!(target = "app", "tracing initialized");
}
