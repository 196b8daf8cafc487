use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::de::DeserializeOwned;

/// 环境变量前缀，如 `HASHFLEET_LISTEN`、`HASHFLEET_SERVER__CONNECT_TO`
pub const ENV_PREFIX: &str = "HASHFLEET";

/// 从配置文件和环境变量加载配置
///
/// 加载顺序：
/// 1. 结构体自身的默认值（`#[serde(default)]`）
/// 2. 配置文件（TOML 格式），`None` 时跳过
/// 3. 环境变量覆盖
pub fn load_config<T: DeserializeOwned>(config_path: Option<&str>) -> Result<T> {
    let mut builder = ConfigBuilder::builder();

    if let Some(path) = config_path {
        if !Path::new(path).exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", path));
        }
        builder = builder.add_source(File::new(path, FileFormat::Toml));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .context("构建配置失败")?
        .try_deserialize()
        .context("解析配置失败")
}
