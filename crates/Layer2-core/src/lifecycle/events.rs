//! Lifecycle Events - 공개 이벤트 이름과 내부 채널
//!
//! 공개 이벤트는 문자열 이름으로 자유롭게 확장할 수 있고,
//! 내부 채널은 닫힌 enum으로 런타임만 사용합니다.

use crate::handle::Fork;
use crate::scope::ScopeId;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use weave_foundation::Error;

/// 예약된 공개 이벤트 이름
pub mod names {
    /// scope 본문이 성공적으로 적용된 직후 (해당 scope의 리스너에게만)
    pub const READY: &str = "ready";

    /// scope가 정리될 때 (해당 scope의 리스너에게만)
    pub const DISPOSE: &str = "dispose";
}

// ============================================================================
// InternalChannel
// ============================================================================

/// 런타임 내부 채널
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InternalChannel {
    /// Fork 생성 / 정리
    Fork,
    /// Fork 설정 변경 적용 (검증 통과 후)
    Update,
    /// Fork 설정 변경 시작 (검증 전)
    BeforeUpdate,
    /// 검증 / 적용 / 정리 / 리스너 에러
    Error,
}

impl InternalChannel {
    pub const ALL: [InternalChannel; 4] = [
        InternalChannel::Fork,
        InternalChannel::Update,
        InternalChannel::BeforeUpdate,
        InternalChannel::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fork => "internal/fork",
            Self::Update => "internal/update",
            Self::BeforeUpdate => "internal/before-update",
            Self::Error => "internal/error",
        }
    }

    /// 이름으로 채널 찾기
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.as_str() == name)
    }
}

impl std::fmt::Display for InternalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// InternalEvent
// ============================================================================

/// 리포트된 에러
#[derive(Debug, Clone)]
pub struct ReportedError {
    pub error: Arc<Error>,
    /// 에러가 귀속된 scope (없으면 lifecycle 자체)
    pub scope: Option<ScopeId>,
    pub at: DateTime<Utc>,
}

impl ReportedError {
    pub fn new(error: Arc<Error>, scope: Option<ScopeId>) -> Self {
        Self {
            error,
            scope,
            at: Utc::now(),
        }
    }
}

/// `internal/fork` 발생 원인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkCause {
    /// 새로 설치됨
    Created,
    /// Fork 또는 조상 scope가 정리됨
    Disposed,
    /// `dispose_plugin`으로 플러그인이 삭제되면서 정리됨
    PluginDeleted,
}

/// 내부 채널 이벤트
#[derive(Debug, Clone)]
pub enum InternalEvent {
    /// Fork 생성 또는 정리
    Fork { fork: Fork, cause: ForkCause },
    /// 새 설정이 검증을 통과해 재적용되기 직전
    Update { fork: Fork, config: Value },
    /// `update()` 호출 직후, 원본 설정과 함께
    BeforeUpdate { fork: Fork, config: Value },
    /// 에러 리포트
    Error(ReportedError),
}

impl InternalEvent {
    pub fn channel(&self) -> InternalChannel {
        match self {
            Self::Fork { .. } => InternalChannel::Fork,
            Self::Update { .. } => InternalChannel::Update,
            Self::BeforeUpdate { .. } => InternalChannel::BeforeUpdate,
            Self::Error(_) => InternalChannel::Error,
        }
    }
}

// ============================================================================
// HookKey
// ============================================================================

/// 리스너 테이블 키 - 공개 이름과 내부 채널은 서로 충돌하지 않음
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HookKey {
    Public(String),
    Internal(InternalChannel),
}

impl HookKey {
    pub fn label(&self) -> &str {
        match self {
            Self::Public(name) => name,
            Self::Internal(channel) => channel.as_str(),
        }
    }
}
