use anyhow::{Context, Result};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use super::model::AppConfig;

/// `<base>/config/config.json`
pub fn config_path_at(base_dir: &Path) -> PathBuf {
    let mut p = base_dir.to_path_buf();
    p.push("config");
    p.push("config.json");
    p
}

/// 读取配置；文件不存在时写入默认配置并返回
pub fn load_or_init_at(base_dir: &Path) -> Result<AppConfig> {
    load_or_init_at_path(&config_path_at(base_dir))
}

pub fn save_at(cfg: &AppConfig, base_dir: &Path) -> Result<()> {
    save_at_path(cfg, &config_path_at(base_dir))
}

fn load_or_init_at_path(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let data = fs::read(path).with_context(|| format!("read config: {}", path.display()))?;
        let cfg: AppConfig = serde_json::from_slice(&data)
            .with_context(|| format!("parse config json: {}", path.display()))?;
        tracing::debug!(target = "config", path = %path.display(), "config loaded");
        Ok(cfg)
    } else {
        let cfg = AppConfig::default();
        save_at_path(&cfg, path)?;
        Ok(cfg)
    }
}

fn save_at_path(cfg: &AppConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create config dir: {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(cfg).context("serialize config")?;
    let mut f =
        fs::File::create(path).with_context(|| format!("create config: {}", path.display()))?;
    f.write_all(json.as_bytes()).context("write config")?;
    tracing::info!(target = "config", path = %path.display(), "config saved");
    Ok(())
}
