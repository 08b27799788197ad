//! Scope Table - 모든 Scope 노드의 중앙 저장소
//!
//! 소유 관계는 위에서 아래로만 흐릅니다 (부모 → `children`).
//! `parent`는 소유하지 않는 ID 역참조로, 위쪽 탐색에만 사용됩니다.

use super::status::ScopeStatus;
use crate::plugin::PluginDescriptor;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use weave_foundation::{Error, Result};

// ============================================================================
// ID 타입
// ============================================================================

/// Scope 고유 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Effect 고유 ID (scope 내에서 개별 해제용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EffectId(u64);

/// 정리 콜백
pub(crate) type Effect = Box<dyn FnOnce() -> Result<()> + Send>;

// ============================================================================
// Scope 노드
// ============================================================================

/// Runtime 전용 데이터
pub(crate) struct RuntimeNode {
    pub descriptor: Arc<PluginDescriptor>,
    /// 이 Runtime을 인스턴스화하는 Fork 목록 (생성 순서)
    pub forks: Vec<ScopeId>,
}

/// Fork 전용 데이터
pub(crate) struct ForkNode {
    pub runtime: ScopeId,
    /// 사용자가 전달한 원본 설정
    pub raw: Value,
    /// 검증을 통과한 설정 (실패/비활성화 시 None)
    pub config: Option<Value>,
    /// `false` 설정으로 비활성화됨
    pub disabled: bool,
    /// 외부 설정 트리 노드 링크
    pub entry: Option<String>,
}

pub(crate) enum ScopeKind {
    Root,
    Runtime(RuntimeNode),
    Fork(ForkNode),
}

pub(crate) struct ScopeNode {
    pub kind: ScopeKind,
    pub status: ScopeStatus,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub effects: Vec<(EffectId, Effect)>,
    /// reset / dispose 마다 증가 - 오래된 Context의 효과 등록을 거부하는 기준
    pub epoch: u64,
    pub disposing: bool,
    pub error: Option<Arc<Error>>,
}

impl ScopeNode {
    fn new(kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Self {
            kind,
            status: ScopeStatus::Pending,
            parent,
            children: Vec::new(),
            effects: Vec::new(),
            epoch: 0,
            disposing: false,
            error: None,
        }
    }

    /// 정리 중이거나 정리된 상태가 아닌지
    pub fn is_alive(&self) -> bool {
        !self.disposing && self.status != ScopeStatus::Disposed
    }

    pub fn as_fork(&self) -> Option<&ForkNode> {
        match &self.kind {
            ScopeKind::Fork(fork) => Some(fork),
            _ => None,
        }
    }

    pub fn as_fork_mut(&mut self) -> Option<&mut ForkNode> {
        match &mut self.kind {
            ScopeKind::Fork(fork) => Some(fork),
            _ => None,
        }
    }

    pub fn as_runtime(&self) -> Option<&RuntimeNode> {
        match &self.kind {
            ScopeKind::Runtime(runtime) => Some(runtime),
            _ => None,
        }
    }

    pub fn as_runtime_mut(&mut self) -> Option<&mut RuntimeNode> {
        match &mut self.kind {
            ScopeKind::Runtime(runtime) => Some(runtime),
            _ => None,
        }
    }
}

// ============================================================================
// ScopeTable
// ============================================================================

pub(crate) struct ScopeTable {
    nodes: HashMap<ScopeId, ScopeNode>,
    next_scope: u64,
    next_effect: u64,
}

impl ScopeTable {
    /// root scope를 포함한 새 테이블
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut root = ScopeNode::new(ScopeKind::Root, None);
        root.status = ScopeStatus::Active;
        nodes.insert(ScopeId::ROOT, root);

        Self {
            nodes,
            next_scope: 1,
            next_effect: 0,
        }
    }

    pub fn get(&self, id: ScopeId) -> Option<&ScopeNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut ScopeNode> {
        self.nodes.get_mut(&id)
    }

    /// 노드 추가 - parent가 있으면 parent의 children에 등록
    pub fn insert(&mut self, parent: Option<ScopeId>, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope += 1;

        self.nodes.insert(id, ScopeNode::new(kind, parent));
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.push(id);
        }

        id
    }

    /// 주어진 epoch의 Context가 아직 유효한지
    pub fn is_live(&self, id: ScopeId, epoch: u64) -> bool {
        self.nodes
            .get(&id)
            .map(|node| node.is_alive() && node.epoch == epoch)
            .unwrap_or(false)
    }

    pub fn status(&self, id: ScopeId) -> ScopeStatus {
        self.nodes
            .get(&id)
            .map(|node| node.status)
            .unwrap_or(ScopeStatus::Disposed)
    }

    /// 상태 변경 - 정리 중/정리된 scope는 무시
    pub fn set_status(&mut self, id: ScopeId, status: ScopeStatus) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        if node.disposing || !node.status.can_transition_to(status) {
            return false;
        }
        if node.status != status {
            debug!(scope = %id, from = %node.status, to = %status, "Scope status changed");
            node.status = status;
        }
        true
    }

    /// 효과 등록 - 유효하지 않은 scope면 effect를 그대로 돌려줌
    pub fn collect(
        &mut self,
        id: ScopeId,
        epoch: u64,
        effect: Effect,
    ) -> std::result::Result<EffectId, Effect> {
        if !self.is_live(id, epoch) {
            return Err(effect);
        }

        let effect_id = EffectId(self.next_effect);
        self.next_effect += 1;

        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.effects.push((effect_id, effect));
                Ok(effect_id)
            }
            None => Err(effect),
        }
    }

    /// 개별 효과 제거 (명시적 disposer 호출)
    pub fn remove_effect(&mut self, id: ScopeId, effect_id: EffectId) -> Option<Effect> {
        let node = self.nodes.get_mut(&id)?;
        let index = node.effects.iter().position(|(eid, _)| *eid == effect_id)?;
        Some(node.effects.remove(index).1)
    }

    /// 모든 효과를 LIFO 순서로 꺼냄
    pub fn take_effects(&mut self, id: ScopeId) -> Vec<Effect> {
        match self.nodes.get_mut(&id) {
            Some(node) => std::mem::take(&mut node.effects)
                .into_iter()
                .rev()
                .map(|(_, effect)| effect)
                .collect(),
            None => Vec::new(),
        }
    }

    /// 자식 scope 목록을 꺼냄 (정리 순서: 생성 역순)
    pub fn take_children(&mut self, id: ScopeId) -> Vec<ScopeId> {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                let mut children = std::mem::take(&mut node.children);
                children.reverse();
                children
            }
            None => Vec::new(),
        }
    }

    pub fn bump_epoch(&mut self, id: ScopeId) -> u64 {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.epoch += 1;
                node.epoch
            }
            None => 0,
        }
    }

    pub fn detach_child(&mut self, parent: ScopeId, child: ScopeId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|id| *id != child);
        }
    }

    /// 정리 완료된 노드 제거 (이후 조회는 DISPOSED)
    pub fn remove(&mut self, id: ScopeId) -> Option<ScopeNode> {
        let node = self.nodes.remove(&id)?;
        if let Some(parent) = node.parent {
            self.detach_child(parent, id);
        }
        Some(node)
    }

    pub fn set_error(&mut self, id: ScopeId, error: Option<Arc<Error>>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.error = error;
        }
    }

    /// 살아있는 Fork ID 목록 (ID 순)
    pub fn fork_ids(&self) -> Vec<ScopeId> {
        let mut ids: Vec<_> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.is_alive() && node.as_fork().is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// 가장 가까운 Runtime (Runtime → 자신, Fork → 소속 Runtime)
    pub fn runtime_of(&self, id: ScopeId) -> Option<ScopeId> {
        match &self.nodes.get(&id)?.kind {
            ScopeKind::Root => None,
            ScopeKind::Runtime(_) => Some(id),
            ScopeKind::Fork(fork) => Some(fork.runtime),
        }
    }

    pub fn descriptor_of(&self, id: ScopeId) -> Option<Arc<PluginDescriptor>> {
        let runtime = self.runtime_of(id)?;
        self.nodes
            .get(&runtime)?
            .as_runtime()
            .map(|rt| Arc::clone(&rt.descriptor))
    }

    /// 표시용 이름 (root / 플러그인 이름)
    pub fn label(&self, id: ScopeId) -> String {
        match self.descriptor_of(id) {
            Some(descriptor) => descriptor.name().to_string(),
            None => "root".to_string(),
        }
    }

    /// 살아있는 노드 수 (root 포함)
    pub fn live_count(&self) -> usize {
        self.nodes.values().filter(|node| node.is_alive()).count()
    }
}
