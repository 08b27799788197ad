//! # weave-foundation
//!
//! Foundation layer for Weave:
//! - Error: 중앙 에러 타입과 분류 (configuration / application / disposer ...)
//! - Config: 런타임 설정 (TOML)
//! - Logging: tracing subscriber 초기화
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  weave-loader   (Layer3: 설정 트리 collaborator)          │
//! │        │                                                │
//! │        ▼                                                │
//! │  weave-core     (Layer2: Scope / Fork / Runtime /       │
//! │                  Lifecycle / Context)                   │
//! │        │                                                │
//! │        ▼                                                │
//! │  weave-foundation (Layer1: Error / Config / Logging)    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod logging;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, ErrorKind, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{LifecycleConfig, LoggingConfig, RuntimeConfig, WEAVE_CONFIG_FILE};

// ============================================================================
// Logging
// ============================================================================
pub use logging::init_logging;
