//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `GLEANER__*` 覆盖（双下划线表示嵌套，如 `GLEANER__SYNC__BATCH_SIZE=50`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub browser: BrowserSection,
}

/// [storage] 段：SQLite 文件位置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("gleaner.db")
}

/// [sync] 段：同步节奏与批量参数（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    /// 点赞 / 个人推文需要的用户名；可被 start 的 handle 参数覆盖
    #[serde(default)]
    pub handle: Option<String>,
    /// 观察到结构变化后的额外稳定等待
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// 始终没有结构变化时的兜底超时
    #[serde(default = "default_mutation_timeout_ms")]
    pub mutation_timeout_ms: u64,
    /// 找不到信息流容器时的固定等待
    #[serde(default = "default_scroll_wait_ms")]
    pub scroll_wait_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 连续无新记录的轮数达到该值即视为到底
    #[serde(default = "default_max_empty_scrolls")]
    pub max_empty_scrolls: u32,
    /// 页面加载完成后给嵌入端初始化的时间
    #[serde(default = "default_ready_settle_ms")]
    pub ready_settle_ms: u64,
    /// 单次命令往返超时
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            handle: None,
            settle_delay_ms: default_settle_delay_ms(),
            mutation_timeout_ms: default_mutation_timeout_ms(),
            scroll_wait_ms: default_scroll_wait_ms(),
            batch_size: default_batch_size(),
            max_empty_scrolls: default_max_empty_scrolls(),
            ready_settle_ms: default_ready_settle_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_mutation_timeout_ms() -> u64 {
    3000
}

fn default_scroll_wait_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    20
}

fn default_max_empty_scrolls() -> u32 {
    3
}

fn default_ready_settle_ms() -> u64 {
    500
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

impl SyncSection {
    pub fn ready_settle(&self) -> Duration {
        Duration::from_millis(self.ready_settle_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// [browser] 段：Headless Chrome 相关（需启用 feature "browser"）
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// 自定义页内提取脚本（返回 JSON 数组），未设置时使用内置脚本
    #[serde(default)]
    pub extraction_script: Option<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            extraction_script: None,
        }
    }
}

fn default_headless() -> bool {
    true
}

/// 从 config 目录加载配置，环境变量 GLEANER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 GLEANER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("GLEANER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
