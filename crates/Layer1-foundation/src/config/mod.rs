//! Config - 런타임 설정
//!
//! TOML 파일 또는 문자열에서 로드되는 Weave 런타임 설정

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 설정 파일명
pub const WEAVE_CONFIG_FILE: &str = "weave.toml";

// ============================================================================
// RuntimeConfig (통합)
// ============================================================================

/// Weave 통합 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Lifecycle (이벤트 버스 / 스케줄러)
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// 로깅
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// TOML 문자열에서 로드
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 파일에서 로드
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 파일이 없으면 기본값
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// TOML 문자열로 직렬화
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ============================================================================
// LifecycleConfig
// ============================================================================

/// Lifecycle 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// 디버그 모드 (모든 이벤트 전달을 trace 로깅)
    #[serde(default)]
    pub debug_events: bool,

    /// 최근 에러 히스토리 보관 개수
    #[serde(default = "default_error_history")]
    pub error_history: usize,
}

fn default_error_history() -> usize {
    64
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            debug_events: false,
            error_history: default_error_history(),
        }
    }
}

// ============================================================================
// LoggingConfig
// ============================================================================

/// 로깅 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 기본 필터 (RUST_LOG가 없을 때 사용)
    #[serde(default = "default_level")]
    pub level: String,

    /// 로그에 target 표시 여부
    #[serde(default)]
    pub with_target: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            with_target: false,
        }
    }
}
