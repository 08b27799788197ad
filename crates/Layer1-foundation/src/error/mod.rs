//! Error types for Weave
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// 에러 분류 - 격리 정책을 결정하는 기준
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Config 검증 실패 (항상 하나의 Fork에 국한)
    Configuration,
    /// 플러그인 본문 실행 실패
    Application,
    /// 정리(dispose) 콜백 실패
    Disposer,
    /// 이벤트 리스너 실패
    Listener,
    /// 잘못된 사용 (호출 시점에 즉시 실패)
    Structural,
    /// 그 외
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Application => "application",
            Self::Disposer => "disposer",
            Self::Listener => "listener",
            Self::Structural => "structural",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weave 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid config for plugin {plugin}: {message}")]
    InvalidConfig { plugin: String, message: String },

    // ========================================================================
    // 플러그인 실행 관련
    // ========================================================================
    #[error("Plugin error: {plugin} - {message}")]
    Apply { plugin: String, message: String },

    #[error("Plugin panicked: {plugin} - {message}")]
    Panicked { plugin: String, message: String },

    // ========================================================================
    // 정리 / 이벤트 관련
    // ========================================================================
    #[error("Disposer error: {0}")]
    Disposer(String),

    #[error("Listener error: {event} - {message}")]
    Listener { event: String, message: String },

    // ========================================================================
    // 구조적 오류 (fail fast)
    // ========================================================================
    #[error("Invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("Scope disposed: {0}")]
    ScopeDisposed(String),

    // ========================================================================
    // 서비스 관련
    // ========================================================================
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service already provided: {0}")]
    ServiceConflict(String),

    // ========================================================================
    // Loader 관련
    // ========================================================================
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 에러 분류
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::InvalidConfig { .. } => ErrorKind::Configuration,
            Error::Apply { .. } | Error::Panicked { .. } => ErrorKind::Application,
            Error::Disposer(_) => ErrorKind::Disposer,
            Error::Listener { .. } => ErrorKind::Listener,
            Error::InvalidPlugin(_) | Error::ScopeDisposed(_) | Error::ServiceConflict(_) => {
                ErrorKind::Structural
            }
            _ => ErrorKind::Other,
        }
    }

    /// 호출자에게 즉시 반환되어야 하는 에러인지 확인
    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }

    /// Config 에러 생성 헬퍼
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// 플러그인 실행 에러 생성 헬퍼
    pub fn apply(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Apply {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// 리스너 에러 생성 헬퍼
    pub fn listener(event: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Listener {
            event: event.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::config("bad").kind(), ErrorKind::Configuration);
        assert_eq!(Error::apply("foo", "boom").kind(), ErrorKind::Application);
        assert_eq!(Error::Disposer("x".into()).kind(), ErrorKind::Disposer);
        assert!(Error::InvalidPlugin("missing apply".into()).is_structural());
        assert!(!Error::from("oops").is_structural());
    }

    #[test]
    fn test_error_display() {
        let err = Error::apply("foo", "boom");
        assert_eq!(err.to_string(), "Plugin error: foo - boom");

        let err = Error::InvalidConfig {
            plugin: "bar".into(),
            message: "missing field".into(),
        };
        assert_eq!(err.to_string(), "Invalid config for plugin bar: missing field");
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: Error = anyhow::anyhow!("wrapped").into();
        assert_eq!(err.to_string(), "wrapped");
        assert_eq!(err.kind(), ErrorKind::Other);
    }
}
