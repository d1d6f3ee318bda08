//! 模块依赖图
//!
//! 本模块提供模块依赖关系的图结构与加载顺序计算。
//!
//! 加载顺序使用 Kahn 算法，多个模块同时可加载时按名称字典序选取，
//! 因此同一组描述总是得到同一个顺序。
//!
//! # 示例
//!
//! ```rust
//! use chips_boot::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_dependency("module_a", "module_b");
//! graph.add_module("module_c");
//!
//! assert_eq!(
//!     graph.topological_sort().unwrap(),
//!     vec!["module_b", "module_c", "module_a"]
//! );
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::module::manifest::ModuleManifest;
use crate::utils::{CoreError, Result};

/// 模块依赖关系图
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：模块 -> 该模块依赖的模块
    edges: BTreeMap<String, BTreeSet<String>>,
    /// 反向边：模块 -> 依赖该模块的模块
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 由模块描述构建依赖图
    ///
    /// 只保留指向集合内模块的依赖边。
    pub fn from_manifests<'a, I>(manifests: I) -> Self
    where
        I: IntoIterator<Item = &'a ModuleManifest>,
    {
        let manifests: Vec<&ModuleManifest> = manifests.into_iter().collect();
        let names: BTreeSet<&str> = manifests.iter().map(|m| m.name.as_str()).collect();

        let mut graph = Self::new();
        for manifest in &manifests {
            graph.add_module(&manifest.name);
            for dep in &manifest.dependencies {
                if names.contains(dep.as_str()) {
                    graph.add_dependency(&manifest.name, dep);
                }
            }
        }
        graph
    }

    /// 添加模块节点，已存在时不做任何事
    pub fn add_module(&mut self, module: &str) {
        self.edges.entry(module.to_string()).or_default();
        self.reverse_edges.entry(module.to_string()).or_default();
    }

    /// 添加依赖关系：`module` 依赖 `dependency`
    ///
    /// 不存在的节点会被自动添加。
    pub fn add_dependency(&mut self, module: &str, dependency: &str) {
        self.add_module(module);
        self.add_module(dependency);
        self.edges
            .entry(module.to_string())
            .or_default()
            .insert(dependency.to_string());
        self.reverse_edges
            .entry(dependency.to_string())
            .or_default()
            .insert(module.to_string());
    }

    /// 是否包含模块
    pub fn contains_module(&self, module: &str) -> bool {
        self.edges.contains_key(module)
    }

    /// 直接依赖
    pub fn get_dependencies(&self, module: &str) -> Vec<String> {
        self.edges
            .get(module)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 直接依赖者
    pub fn get_dependents(&self, module: &str) -> Vec<String> {
        self.reverse_edges
            .get(module)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 所有直接与间接依赖者，按名称排序
    pub fn get_all_dependents(&self, module: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![module.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(dependents) = self.reverse_edges.get(&current) {
                for dependent in dependents {
                    if dependent != module && seen.insert(dependent.clone()) {
                        stack.push(dependent.clone());
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    /// 查找循环依赖路径
    ///
    /// 存在循环时返回闭合路径，例如 `["a", "b", "a"]`。
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut on_stack = BTreeSet::new();
        let mut path = Vec::new();

        for node in self.edges.keys() {
            if let Some(cycle) = self.find_cycle_from(node, &mut visited, &mut on_stack, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_from(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        on_stack: &mut BTreeSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if on_stack.contains(node) {
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if !visited.insert(node.to_string()) {
            return None;
        }

        on_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if let Some(cycle) = self.find_cycle_from(dep, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_stack.remove(node);
        None
    }

    /// 拓扑排序（Kahn 算法，字典序决胜）
    ///
    /// 依赖总是排在依赖方之前。存在循环时返回
    /// [`CoreError::CircularDependency`]，错误信息中给出循环路径。
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        // 入度 = 尚未输出的依赖数
        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| (node.as_str(), deps.len()))
            .collect();

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&node, _)| node)
            .collect();

        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(node) = ready.pop_first() {
            remaining.remove(node);
            order.push(node.to_string());

            if let Some(dependents) = self.reverse_edges.get(node) {
                for dependent in dependents {
                    if let Some(degree) = remaining.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        if !remaining.is_empty() {
            let path = self
                .find_cycle()
                .unwrap_or_else(|| remaining.keys().map(|s| s.to_string()).collect());
            return Err(CoreError::CircularDependency(path.join(" -> ")));
        }

        Ok(order)
    }

    /// 检查图是否为空
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 模块数量
    pub fn module_count(&self) -> usize {
        self.edges.len()
    }
}
