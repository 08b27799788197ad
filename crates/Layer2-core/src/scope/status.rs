//! Scope Status - 상태 머신

use serde::{Deserialize, Serialize};

/// Scope(Fork / Runtime) 상태
///
/// ```text
/// PENDING ──▶ LOADING ──▶ ACTIVE
///    ▲           │          │
///    │           ▼          │
///    └──────── FAILED ◀─────┘
///
/// (모든 상태) ──dispose──▶ DISPOSED (종료)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
    /// 생성됨, 아직 적용 안됨 (의존성 대기, 비활성화 등)
    Pending,

    /// 검증/적용 진행 중
    Loading,

    /// 본문이 에러 없이 적용됨
    Active,

    /// 검증 또는 본문 실행 실패 (실패한 시도의 효과는 롤백됨)
    Failed,

    /// 정리됨 (종료 상태)
    Disposed,
}

impl ScopeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        }
    }

    /// 종료 상태인지 확인
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// 진행 중인 작업이 없는 상태인지 확인
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Active | Self::Failed | Self::Disposed)
    }

    /// 전이 가능 여부 - DISPOSED에서는 어떤 전이도 허용하지 않음
    pub fn can_transition_to(&self, _next: ScopeStatus) -> bool {
        !self.is_terminal()
    }
}

impl Default for ScopeStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for ScopeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
