//! 能力表
//!
//! 模块可以在描述中声明一个能力标签（`essentialType`）。全部模块加载完成后，
//! 每个出现过的标签都必须至少有一个已就绪的提供者，否则引导失败。

use std::collections::{BTreeMap, BTreeSet};

use crate::module::manifest::ModuleManifest;

/// 能力标签 -> 提供者
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    providers: BTreeMap<String, BTreeSet<String>>,
}

impl CapabilityTable {
    /// 由模块描述构建
    pub fn from_manifests<'a, I>(manifests: I) -> Self
    where
        I: IntoIterator<Item = &'a ModuleManifest>,
    {
        let mut table = Self::default();
        for manifest in manifests {
            if let Some(tag) = &manifest.essential_type {
                table
                    .providers
                    .entry(tag.clone())
                    .or_default()
                    .insert(manifest.name.clone());
            }
        }
        table
    }

    /// 全部能力标签
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// 提供某项能力的模块
    pub fn providers(&self, tag: &str) -> Vec<String> {
        self.providers
            .get(tag)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 没有任何就绪提供者的能力标签
    pub fn missing<F>(&self, is_ready: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        self.providers
            .iter()
            .filter(|(_, providers)| !providers.iter().any(|p| is_ready(p)))
            .map(|(tag, _)| tag.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_capabilities() {
        let manifests = vec![
            ModuleManifest::new("file-logger", "/l1").with_essential_type("logger"),
            ModuleManifest::new("net-logger", "/l2").with_essential_type("logger"),
            ModuleManifest::new("yaml-config", "/c").with_essential_type("config"),
            ModuleManifest::new("misc", "/m"),
        ];
        let table = CapabilityTable::from_manifests(&manifests);

        assert_eq!(table.tags().collect::<Vec<_>>(), vec!["config", "logger"]);
        assert_eq!(table.providers("logger"), vec!["file-logger", "net-logger"]);

        // 一个提供者就绪即可
        let missing = table.missing(|name| name == "net-logger");
        assert_eq!(missing, vec!["config"]);
        assert!(table.missing(|_| true).is_empty());
    }
}
