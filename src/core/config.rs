//! 内核配置
//!
//! 配置分两层：
//!
//! - [`ConfigStore`]：分层合并的原始配置文档（YAML/JSON 文件 + `--set` 覆盖），
//!   按点分键读取，同时作为内置配置模块对外提供的 [`ConfigSource`]
//! - [`CoreConfig`]：从文档中反序列化出的内核自身配置

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::services::ConfigSource;
use crate::utils::{CoreError, Result};

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 模块配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 模块目录列表，相对路径基于应用根目录
    #[serde(default = "default_module_dirs")]
    pub module_dirs: Vec<PathBuf>,

    /// 模块名称前缀
    #[serde(default)]
    pub name_prefix: Option<String>,

    /// 是否加载内置的配置与日志模块
    #[serde(default = "default_true")]
    pub builtins: bool,
}

fn default_module_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("modules")]
}

fn default_true() -> bool {
    true
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            module_dirs: default_module_dirs(),
            name_prefix: None,
            builtins: true,
        }
    }
}

/// 内核配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 应用根目录
    #[serde(default)]
    pub root_dir: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl CoreConfig {
    /// 创建配置构建器
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从文件加载配置（YAML 或 JSON，按扩展名区分）
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let store = ConfigStore::load(path).await?;
        Self::from_store(&store)
    }

    /// 从配置文档中读取
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        let mut config: CoreConfig =
            serde_json::from_value(store.root().clone()).map_err(|e| {
                CoreError::ConfigLoadFailed(format!("内核配置格式无效: {}", e))
            })?;
        config.config_path = store.path().map(Path::to_path_buf);
        Ok(config)
    }

    /// 解析模块目录：相对路径基于 `root_dir`
    pub fn resolve_module_dirs(&self, root_dir: &Path) -> Vec<PathBuf> {
        self.modules
            .module_dirs
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    root_dir.join(dir)
                }
            })
            .collect()
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置应用根目录
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.root_dir = Some(dir.into());
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 替换模块目录
    pub fn module_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.config.modules.module_dirs = dirs;
        self
    }

    /// 设置模块名称前缀
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.modules.name_prefix = Some(prefix.into());
        self
    }

    /// 不加载内置模块
    pub fn without_builtins(mut self) -> Self {
        self.config.modules.builtins = false;
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> CoreConfig {
        self.config
    }
}

// ============================================================================
// 配置文档
// ============================================================================

/// 分层配置文档
///
/// 后写入的层覆盖先写入的层，对象按键递归合并，其他值整体替换。
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: Value,
    path: Option<PathBuf>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// 创建空文档
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            path: None,
        }
    }

    /// 以已有的值创建文档，非对象值会被包装为空文档
    pub fn from_value(value: Value) -> Self {
        let mut store = Self::new();
        store.merge(value);
        store
    }

    /// 从 YAML 或 JSON 文本解析
    pub fn parse(content: &str, json: bool) -> Result<Self> {
        let value: Value = if json {
            serde_json::from_str(content)?
        } else if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(content)?
        };
        Ok(Self::from_value(value))
    }

    /// 从文件加载，文件不存在时得到空文档
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "配置文件不存在，使用空配置");
            return Ok(Self::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_file_content(path, &content)
    }

    /// 同步加载，用于进程启动时
    pub fn load_sync(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_file_content(path, &content)
    }

    fn from_file_content(path: &Path, content: &str) -> Result<Self> {
        let json = path.extension().map(|e| e == "json").unwrap_or(false);
        let mut store = Self::parse(content, json).map_err(|e| {
            CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
        })?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// 配置文件路径
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 整个文档
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// 合并一层配置
    pub fn merge(&mut self, layer: Value) {
        merge_value(&mut self.root, layer);
    }

    /// 按点分键写入，中间层不存在时创建
    pub fn set(&mut self, key: &str, value: Value) {
        let mut current = &mut self.root;
        let mut parts = key.split('.').peekable();
        while let Some(part) = parts.next() {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let Value::Object(map) = current else {
                return;
            };
            if parts.peek().is_none() {
                map.insert(part.to_string(), value);
                return;
            }
            current = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }

    /// 应用 `key=value` 形式的覆盖
    ///
    /// 值按 JSON 解析，解析失败时作为字符串。
    pub fn apply_override(&mut self, assignment: &str) -> Result<()> {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| CoreError::InvalidConfigValue {
                key: assignment.to_string(),
                reason: "覆盖项应为 key=value 形式".to_string(),
            })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: assignment.to_string(),
                reason: "键不能为空".to_string(),
            });
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        self.set(key, value);
        Ok(())
    }

    /// 按点分键读取
    ///
    /// 键本身可以包含点号，例如模块名 `ui.theme` 下的 `color` 写作 `ui.theme.color`，
    /// 查找时优先匹配更长的键。
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.root, key)
    }

    /// 读取并反序列化，值不存在时返回 `Ok(None)`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| CoreError::InvalidConfigValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

impl ConfigSource for ConfigStore {
    fn get(&self, key: &str) -> Option<Value> {
        ConfigStore::get(self, key).cloned()
    }
}

fn merge_value(target: &mut Value, layer: Value) {
    match (target, layer) {
        (Value::Object(target), Value::Object(layer)) => {
            for (key, value) in layer {
                let nested = value.is_object() && target.get(&key).map_or(false, Value::is_object);
                match target.get_mut(&key) {
                    Some(existing) if nested => merge_value(existing, value),
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        // 文档根必须是对象
        (Value::Object(_), _) => {}
        (target, layer) => *target = layer,
    }
}

fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let map = value.as_object()?;
    if let Some(found) = map.get(key) {
        return Some(found);
    }
    // 从最长的前缀开始尝试
    for (index, _) in key.rmatch_indices('.') {
        let (head, rest) = (&key[..index], &key[index + 1..]);
        if let Some(child) = map.get(head) {
            if let Some(found) = lookup(child, rest) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert!(!config.dev_mode);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.modules.module_dirs, vec![PathBuf::from("modules")]);
        assert!(config.modules.builtins);
    }

    #[test]
    fn test_config_builder() {
        let config = CoreConfig::builder()
            .log_level("debug")
            .name_prefix("chips-")
            .module_dirs(vec![PathBuf::from("/abs"), PathBuf::from("rel")])
            .without_builtins()
            .dev_mode()
            .build();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.modules.name_prefix.as_deref(), Some("chips-"));
        assert!(!config.modules.builtins);
        assert_eq!(
            config.resolve_module_dirs(Path::new("/app")),
            vec![PathBuf::from("/abs"), PathBuf::from("/app/rel")]
        );
    }

    #[test]
    fn test_layered_merge_and_dotted_get() {
        let mut store = ConfigStore::from_value(json!({
            "logger": { "level": "info", "mute": ["db"] },
            "app": { "port": 80 }
        }));
        store.merge(json!({ "logger": { "level": "debug" } }));

        assert_eq!(store.get("logger.level"), Some(&json!("debug")));
        assert_eq!(store.get("logger.mute"), Some(&json!(["db"])));
        assert_eq!(store.get("app.port"), Some(&json!(80)));
        assert!(store.get("app.host").is_none());
    }

    #[test]
    fn test_dotted_module_names() {
        let store = ConfigStore::from_value(json!({
            "ui.theme": { "color": "red" }
        }));
        assert_eq!(store.get("ui.theme.color"), Some(&json!("red")));
    }

    #[test]
    fn test_overrides() {
        let mut store = ConfigStore::new();
        store.apply_override("logger.level=verbose").unwrap();
        store.apply_override("app.port=8080").unwrap();
        store.apply_override("app.flags=[1,2]").unwrap();

        assert_eq!(store.get("logger.level"), Some(&json!("verbose")));
        assert_eq!(store.get_as::<u16>("app.port").unwrap(), Some(8080));
        assert_eq!(store.get("app.flags"), Some(&json!([1, 2])));
        assert!(store.apply_override("novalue").is_err());
        assert!(store.get_as::<u16>("logger.level").is_err());
    }

    #[test]
    fn test_core_config_from_store() {
        let store = ConfigStore::parse(
            "logging:\n  level: warn\nmodules:\n  name_prefix: chips-\ndev_mode: true\n",
            false,
        )
        .unwrap();
        let config = CoreConfig::from_store(&store).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.modules.name_prefix.as_deref(), Some("chips-"));
        assert_eq!(config.modules.module_dirs, vec![PathBuf::from("modules")]);
        assert!(config.dev_mode);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"logger":{"level":"error"}}"#).unwrap();

        let store = ConfigStore::load(&path).await.unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.get("logger.level"), Some(&json!("error")));

        let missing = ConfigStore::load(dir.path().join("nope.yaml")).await.unwrap();
        assert!(missing.get("logger").is_none());

        std::fs::write(dir.path().join("bad.yaml"), "a: [").unwrap();
        assert!(ConfigStore::load_sync(dir.path().join("bad.yaml")).is_err());
    }
}
