//! 模块描述读取
//!
//! 一个模块目录可以同时带有包描述 `package.json` 与模块描述 `module.yaml`。
//! 读取时两者合并为一个 [`ModuleManifest`]，字段冲突时以模块描述为准。
//!
//! 只有带 `module.yaml` 的目录才会被当作模块；`module: false` 可以显式排除。

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::module::manifest::{default_version, ModuleManifest};
use crate::utils::id::fallback_module_name;
use crate::utils::{CoreError, Result};

/// 包描述文件名
pub const PACKAGE_FILE_NAME: &str = "package.json";

/// 模块描述文件名
pub const MODULE_FILE_NAME: &str = "module.yaml";

/// 模块描述来源
///
/// 发现阶段会依次询问每个来源，再统一做重名检查。
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// 来源说明，用于日志
    fn describe(&self) -> String;

    /// 列出来源中的全部模块描述
    async fn manifests(&self) -> Result<Vec<ModuleManifest>>;
}

// ============================================================================
// 文件系统来源
// ============================================================================

/// 扫描模块目录的文件系统来源
///
/// 每个模块目录下的直接子目录都是候选模块，按目录名排序后读取。
#[derive(Debug, Clone, Default)]
pub struct FsManifestSource {
    module_dirs: Vec<PathBuf>,
}

impl FsManifestSource {
    /// 创建来源
    pub fn new(module_dirs: Vec<PathBuf>) -> Self {
        Self { module_dirs }
    }

    /// 模块目录列表
    pub fn module_dirs(&self) -> &[PathBuf] {
        &self.module_dirs
    }
}

#[async_trait]
impl ManifestSource for FsManifestSource {
    fn describe(&self) -> String {
        format!("fs:{:?}", self.module_dirs)
    }

    async fn manifests(&self) -> Result<Vec<ModuleManifest>> {
        let mut found = Vec::new();

        for dir in &self.module_dirs {
            if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
                debug!(dir = %dir.display(), "模块目录不存在，跳过");
                continue;
            }

            let mut entries = tokio::fs::read_dir(dir).await?;
            let mut candidates = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // 跟随符号链接
                if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
                    candidates.push(path);
                }
            }
            candidates.sort();

            for path in candidates {
                if !tokio::fs::try_exists(path.join(MODULE_FILE_NAME)).await.unwrap_or(false) {
                    trace!(dir = %path.display(), "未找到 {}，跳过", MODULE_FILE_NAME);
                    continue;
                }
                match ManifestReader::read(&path).await? {
                    Some(manifest) => found.push(manifest),
                    None => debug!(dir = %path.display(), "模块描述声明 module: false，跳过"),
                }
            }
        }

        Ok(found)
    }
}

// ============================================================================
// 内存来源
// ============================================================================

/// 内存中的描述列表，用于内置模块与测试
#[derive(Debug, Clone, Default)]
pub struct StaticManifests {
    manifests: Vec<ModuleManifest>,
}

impl StaticManifests {
    /// 创建来源
    pub fn new(manifests: Vec<ModuleManifest>) -> Self {
        Self { manifests }
    }

    /// 追加描述
    pub fn push(&mut self, manifest: ModuleManifest) {
        self.manifests.push(manifest);
    }
}

#[async_trait]
impl ManifestSource for StaticManifests {
    fn describe(&self) -> String {
        format!("static:{}", self.manifests.len())
    }

    async fn manifests(&self) -> Result<Vec<ModuleManifest>> {
        Ok(self.manifests.clone())
    }
}

// ============================================================================
// 描述读取与合并
// ============================================================================

/// 依赖声明：包描述中是 `名称 -> 版本` 的映射，模块描述中也允许写成列表
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependencyList {
    Map(BTreeMap<String, Value>),
    List(Vec<String>),
}

impl DependencyList {
    fn into_names(self) -> BTreeSet<String> {
        match self {
            DependencyList::Map(map) => map.into_keys().collect(),
            DependencyList::List(list) => list.into_iter().collect(),
        }
    }
}

/// 合并后的原始描述
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    homepage: Option<String>,
    dependencies: Option<DependencyList>,
    peer_dependencies: Option<DependencyList>,
    essential_type: Option<String>,
    module: Option<bool>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// 校验模块名称
fn is_valid_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9@][A-Za-z0-9._\-/@]*$").ok())
        .as_ref()
        .map_or(true, |re| re.is_match(name))
}

/// 模块描述读取器
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestReader;

impl ManifestReader {
    /// 读取模块目录
    ///
    /// 返回 `None` 表示描述中声明了 `module: false`。
    pub async fn read(dir: &Path) -> Result<Option<ModuleManifest>> {
        let package = read_optional(&dir.join(PACKAGE_FILE_NAME)).await?;
        let module = read_optional(&dir.join(MODULE_FILE_NAME)).await?;
        Self::from_sources(dir, package.as_deref(), module.as_deref())
    }

    /// 同步读取应用根目录的描述
    ///
    /// 根目录没有任何描述文件时返回 `Ok(None)`。
    pub fn read_root_sync(dir: &Path) -> Result<Option<ModuleManifest>> {
        let package = read_optional_sync(&dir.join(PACKAGE_FILE_NAME))?;
        let module = read_optional_sync(&dir.join(MODULE_FILE_NAME))?;
        if package.is_none() && module.is_none() {
            return Ok(None);
        }
        Self::from_sources(dir, package.as_deref(), module.as_deref())
    }

    /// 由包描述与模块描述的文本内容构造模块描述
    pub fn from_sources(
        dir: &Path,
        package_json: Option<&str>,
        module_yaml: Option<&str>,
    ) -> Result<Option<ModuleManifest>> {
        let invalid = |file: &str, reason: String| CoreError::InvalidManifest {
            path: dir.join(file),
            reason,
        };

        let mut merged = match package_json {
            Some(text) => as_object(
                serde_json::from_str(text).map_err(|e| invalid(PACKAGE_FILE_NAME, e.to_string()))?,
            )
            .ok_or_else(|| invalid(PACKAGE_FILE_NAME, "顶层必须是对象".to_string()))?,
            None => Map::new(),
        };

        if let Some(text) = module_yaml.filter(|t| !t.trim().is_empty()) {
            let value: Value =
                serde_yaml::from_str(text).map_err(|e| invalid(MODULE_FILE_NAME, e.to_string()))?;
            // 空文件解析为 null，视为没有字段
            if !value.is_null() {
                let fields = as_object(value)
                    .ok_or_else(|| invalid(MODULE_FILE_NAME, "顶层必须是映射".to_string()))?;
                merged.extend(fields);
            }
        }

        let mut raw: RawDescriptor = serde_json::from_value(Value::Object(merged))
            .map_err(|e| invalid(MODULE_FILE_NAME, e.to_string()))?;

        if raw.module == Some(false) {
            return Ok(None);
        }
        raw.extra.remove("rootDir");

        let name = raw.name.unwrap_or_else(fallback_module_name);
        if !is_valid_name(&name) {
            return Err(invalid(MODULE_FILE_NAME, format!("模块名称不合法: '{}'", name)));
        }

        Ok(Some(ModuleManifest {
            name,
            root_dir: dir.to_path_buf(),
            version: raw.version.unwrap_or_else(default_version),
            description: raw.description,
            homepage: raw.homepage,
            dependencies: raw.dependencies.map(DependencyList::into_names).unwrap_or_default(),
            peer_dependencies: raw
                .peer_dependencies
                .map(DependencyList::into_names)
                .unwrap_or_default(),
            essential_type: raw.essential_type,
            extra: raw.extra,
        }))
    }
}

fn as_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

fn read_optional_sync(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}
