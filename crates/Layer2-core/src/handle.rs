//! Handles - Scope / Fork / Runtime 조회 핸들
//!
//! 핸들은 scope ID와 공유 상태만 들고 있으므로 자유롭게 복제할 수 있습니다.
//! 정리된 scope의 핸들은 계속 사용할 수 있으며, 상태는 DISPOSED로 보입니다.

use crate::engine::Shared;
use crate::plugin::{PluginDescriptor, PluginId};
use crate::scope::{ScopeId, ScopeKind, ScopeStatus};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;
use weave_foundation::Error;

/// scope 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRole {
    Root,
    Runtime,
    Fork,
}

// ============================================================================
// ScopeRef
// ============================================================================

#[derive(Clone)]
pub struct ScopeRef {
    shared: Arc<Shared>,
    id: ScopeId,
}

impl ScopeRef {
    pub(crate) fn new(shared: Arc<Shared>, id: ScopeId) -> Self {
        Self { shared, id }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn status(&self) -> ScopeStatus {
        self.shared.status(self.id)
    }

    pub fn is_disposed(&self) -> bool {
        self.status() == ScopeStatus::Disposed
    }

    /// 마지막 실패 원인 (FAILED일 때)
    pub fn error(&self) -> Option<Arc<Error>> {
        self.shared
            .state
            .lock()
            .scopes
            .get(self.id)
            .and_then(|node| node.error.clone())
    }

    /// 정리된 scope면 None
    pub fn role(&self) -> Option<ScopeRole> {
        let state = self.shared.state.lock();
        let node = state.scopes.get(self.id)?;
        Some(match node.kind {
            ScopeKind::Root => ScopeRole::Root,
            ScopeKind::Runtime(_) => ScopeRole::Runtime,
            ScopeKind::Fork(_) => ScopeRole::Fork,
        })
    }

    /// 부모 scope (Fork: 설치한 scope / Runtime, Root: 없음)
    pub fn parent(&self) -> Option<ScopeRef> {
        let parent = self.shared.state.lock().scopes.get(self.id)?.parent?;
        Some(ScopeRef::new(Arc::clone(&self.shared), parent))
    }

    pub fn as_fork(&self) -> Option<Fork> {
        match self.role()? {
            ScopeRole::Fork => Some(Fork(self.clone())),
            _ => None,
        }
    }

    pub fn as_runtime(&self) -> Option<Runtime> {
        match self.role()? {
            ScopeRole::Runtime => Some(Runtime(self.clone())),
            _ => None,
        }
    }

    /// 표시 이름 (root / 플러그인 이름)
    pub fn name(&self) -> String {
        self.shared.label(self.id)
    }

    /// 정리 - 처음이면 true, 이미 정리되었으면 false
    pub fn dispose(&self) -> bool {
        self.shared.dispose_scope(self.id)
    }
}

impl PartialEq for ScopeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for ScopeRef {}

impl std::fmt::Debug for ScopeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScopeRef({}, {})", self.id, self.status())
    }
}

// ============================================================================
// Fork
// ============================================================================

/// 플러그인의 설치 단위 (호출 지점 하나, 설정 하나)
#[derive(Clone, PartialEq, Eq)]
pub struct Fork(ScopeRef);

impl Fork {
    pub(crate) fn new(shared: Arc<Shared>, id: ScopeId) -> Self {
        Self(ScopeRef::new(shared, id))
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.0
    }

    /// 이 Fork가 인스턴스화하는 Runtime (정리 후 None)
    pub fn runtime(&self) -> Option<Runtime> {
        let runtime = self
            .shared
            .state
            .lock()
            .scopes
            .get(self.id)?
            .as_fork()?
            .runtime;
        Some(Runtime(ScopeRef::new(Arc::clone(&self.shared), runtime)))
    }

    /// 검증을 통과한 설정
    pub fn options(&self) -> Option<Value> {
        self.with_node(|node| node.config.clone()).flatten()
    }

    /// 마지막으로 전달된 원본 설정
    pub fn raw_options(&self) -> Option<Value> {
        self.with_node(|node| node.raw.clone())
    }

    /// `false` 설정으로 비활성화되었는지
    pub fn is_disabled(&self) -> bool {
        self.with_node(|node| node.disabled).unwrap_or(false)
    }

    /// 외부 설정 트리 노드 링크
    pub fn entry(&self) -> Option<String> {
        self.with_node(|node| node.entry.clone()).flatten()
    }

    pub fn set_entry(&self, entry: Option<String>) {
        let mut state = self.shared.state.lock();
        if let Some(node) = state.scopes.get_mut(self.id).and_then(|node| node.as_fork_mut()) {
            node.entry = entry;
        }
    }

    /// 설정 변경 - 재검증 후 재적용 (정리된 Fork면 false)
    pub fn update(&self, config: Value) -> bool {
        self.shared.update_fork(self.id, config)
    }

    fn with_node<T>(&self, f: impl FnOnce(&crate::scope::ForkNode) -> T) -> Option<T> {
        let state = self.shared.state.lock();
        state.scopes.get(self.id).and_then(|node| node.as_fork()).map(f)
    }
}

impl Deref for Fork {
    type Target = ScopeRef;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Fork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fork({}, {}, {})", self.id, self.name(), self.status())
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// 플러그인 정의의 공유 식별 단위
#[derive(Clone, PartialEq, Eq)]
pub struct Runtime(ScopeRef);

impl Runtime {
    pub(crate) fn new(shared: Arc<Shared>, id: ScopeId) -> Self {
        Self(ScopeRef::new(shared, id))
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.0
    }

    /// 이 Runtime을 인스턴스화하는 Fork (생성 순서)
    pub fn forks(&self) -> Vec<Fork> {
        let forks = self
            .shared
            .state
            .lock()
            .scopes
            .get(self.id)
            .and_then(|node| node.as_runtime())
            .map(|rt| rt.forks.clone())
            .unwrap_or_default();

        forks
            .into_iter()
            .map(|fork| Fork::new(Arc::clone(&self.shared), fork))
            .collect()
    }

    pub fn descriptor(&self) -> Option<Arc<PluginDescriptor>> {
        self.shared.descriptor_of(self.id)
    }

    pub fn plugin_id(&self) -> Option<PluginId> {
        self.descriptor().map(|descriptor| descriptor.id().clone())
    }

    pub fn is_reusable(&self) -> bool {
        self.descriptor()
            .map(|descriptor| descriptor.is_reusable())
            .unwrap_or(false)
    }

    /// 스키마의 `simplify` 적용 (스키마가 없으면 그대로)
    pub fn simplify(&self, config: &Value) -> Value {
        match self.descriptor() {
            Some(descriptor) => descriptor.simplify(config),
            None => config.clone(),
        }
    }
}

impl Deref for Runtime {
    type Target = ScopeRef;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Runtime({}, {}, {})", self.id, self.name(), self.status())
    }
}
