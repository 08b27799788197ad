//! Plugin Registry - 플러그인 식별자 → 살아있는 Runtime 목록

use super::descriptor::{PluginDef, PluginId};
use crate::engine::Shared;
use crate::handle::Runtime;
use crate::scope::ScopeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 식별자별 Runtime 테이블
///
/// reusable 플러그인은 식별자당 Runtime이 최대 하나이고,
/// 그렇지 않은 플러그인은 설치마다 Runtime이 하나씩 추가됩니다.
#[derive(Default)]
pub(crate) struct RegistryTable {
    runtimes: HashMap<PluginId, Vec<ScopeId>>,
}

impl RegistryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: PluginId, runtime: ScopeId) {
        debug!(plugin = %id, runtime = %runtime, "Registering runtime");
        self.runtimes.entry(id).or_default().push(runtime);
    }

    pub fn unregister(&mut self, id: &PluginId, runtime: ScopeId) -> bool {
        let Some(list) = self.runtimes.get_mut(id) else {
            return false;
        };

        let before = list.len();
        list.retain(|rt| *rt != runtime);
        let removed = list.len() != before;

        if list.is_empty() {
            self.runtimes.remove(id);
        }
        removed
    }

    pub fn runtimes(&self, id: &PluginId) -> Vec<ScopeId> {
        self.runtimes.get(id).cloned().unwrap_or_default()
    }

    /// reusable 플러그인의 공유 Runtime
    pub fn shared_runtime(&self, id: &PluginId) -> Option<ScopeId> {
        self.runtimes.get(id).and_then(|list| list.first().copied())
    }

    pub fn contains(&self, id: &PluginId) -> bool {
        self.runtimes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.runtimes.values().map(Vec::len).sum()
    }
}

// ============================================================================
// Registry - 공개 조회 뷰
// ============================================================================

/// 설치된 플러그인 조회
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// 해당 정의가 설치되어 있는지
    pub fn has(&self, def: &PluginDef) -> bool {
        PluginId::of(def)
            .map(|id| self.shared.state.lock().registry.contains(&id))
            .unwrap_or(false)
    }

    /// 해당 정의의 Runtime 목록
    pub fn runtimes(&self, def: &PluginDef) -> Vec<Runtime> {
        let Some(id) = PluginId::of(def) else {
            return Vec::new();
        };

        let ids = self.shared.state.lock().registry.runtimes(&id);
        ids.into_iter()
            .map(|rt| Runtime::new(Arc::clone(&self.shared), rt))
            .collect()
    }

    /// 살아있는 Runtime 수
    pub fn len(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ScopeKind, ScopeTable};

    #[test]
    fn test_register_unregister() {
        let mut scopes = ScopeTable::new();
        let first = scopes.insert(None, ScopeKind::Root);
        let second = scopes.insert(None, ScopeKind::Root);

        let mut table = RegistryTable::new();
        let id = PluginId::Named("echo".into());

        table.register(id.clone(), first);
        table.register(id.clone(), second);
        assert_eq!(table.len(), 2);
        assert_eq!(table.shared_runtime(&id), Some(first));

        assert!(table.unregister(&id, first));
        assert!(!table.unregister(&id, first));
        assert_eq!(table.runtimes(&id), vec![second]);

        assert!(table.unregister(&id, second));
        assert!(!table.contains(&id));
    }
}
