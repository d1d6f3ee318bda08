//! 模块描述
//!
//! [`ModuleManifest`] 是发现阶段产出的模块静态描述，加载开始后只读。

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 模块描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    /// 模块名称，在一次加载中唯一
    pub name: String,

    /// 模块根目录
    pub root_dir: PathBuf,

    /// 版本号，原样透传
    #[serde(default = "default_version")]
    pub version: String,

    /// 描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 主页
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    /// 依赖的模块名称（发现阶段会剔除不是模块的依赖）
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    /// 同级依赖，仅用于诊断
    #[serde(default)]
    pub peer_dependencies: BTreeSet<String>,

    /// 模块提供的能力标签
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential_type: Option<String>,

    /// 描述文件中的其他字段
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

pub(crate) fn default_version() -> String {
    "0.0.0".to_string()
}

impl ModuleManifest {
    /// 以名称和根目录创建描述，其余字段取默认值
    pub fn new(name: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_dir: root_dir.into(),
            version: default_version(),
            description: None,
            homepage: None,
            dependencies: BTreeSet::new(),
            peer_dependencies: BTreeSet::new(),
            essential_type: None,
            extra: BTreeMap::new(),
        }
    }

    /// 添加依赖
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    /// 添加同级依赖
    pub fn with_peer_dependency(mut self, name: impl Into<String>) -> Self {
        self.peer_dependencies.insert(name.into());
        self
    }

    /// 设置能力标签
    pub fn with_essential_type(mut self, tag: impl Into<String>) -> Self {
        self.essential_type = Some(tag.into());
        self
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 只保留出现在 `known` 中的依赖
    pub fn retain_known_dependencies<F>(&mut self, known: F)
    where
        F: Fn(&str) -> bool,
    {
        let own = self.name.clone();
        self.dependencies.retain(|dep| *dep != own && known(dep));
    }

    /// 去掉名称前缀后的简短名称
    pub fn short_name(&self, prefix: Option<&str>) -> &str {
        match prefix {
            Some(p) if !p.is_empty() => self.name.strip_prefix(p).unwrap_or(&self.name),
            _ => &self.name,
        }
    }
}
