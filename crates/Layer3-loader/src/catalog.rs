//! Plugin Catalog - 항목 이름 → 플러그인 정의

use std::collections::HashMap;
use weave_core::PluginDef;
use weave_foundation::{Error, Result};

/// 설정 트리에서 참조할 수 있는 플러그인 목록
#[derive(Clone, Default)]
pub struct PluginCatalog {
    plugins: HashMap<String, PluginDef>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 정의 등록 (같은 이름이면 교체)
    pub fn register(&mut self, name: impl Into<String>, def: impl Into<PluginDef>) {
        self.plugins.insert(name.into(), def.into());
    }

    pub fn with(mut self, name: impl Into<String>, def: impl Into<PluginDef>) -> Self {
        self.register(name, def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PluginDef> {
        self.plugins.get(name)
    }

    /// 정의 조회 - 없으면 `UnknownPlugin`
    pub fn resolve(&self, name: &str) -> Result<PluginDef> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownPlugin(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// 등록된 이름 (정렬)
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("plugins", &self.names())
            .finish()
    }
}
