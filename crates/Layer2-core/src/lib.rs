//! weave-core: Core Runtime for Weave
//!
//! Layer2 - Scope / Fork / Runtime / Lifecycle 레이어
//!
//! # 주요 모듈
//!
//! - `scope`: 효과 소유 단위와 상태 머신 (PENDING / LOADING / ACTIVE / FAILED / DISPOSED)
//! - `lifecycle`: scope에 귀속되는 이벤트 버스, 내부 채널, 적용 스케줄러
//! - `plugin`: 플러그인 정의 / 식별자 / 레지스트리
//! - `context`: 플러그인 본문에 전달되는 트리 핸들과 root `App`
//! - `handle`: Scope / Fork / Runtime 조회 핸들
//!
//! # 사용 예시
//!
//! ```ignore
//! use weave_core::{App, PluginObject, ScopeStatus};
//!
//! let app = App::new();
//!
//! let echo = PluginObject::new()
//!     .with_name("echo")
//!     .with_reusable(true)
//!     .with_apply(|ctx, config| {
//!         let prefix = config["prefix"].as_str().unwrap_or("").to_string();
//!         ctx.on("message", move |payload| {
//!             println!("{prefix}{payload}");
//!             Ok(())
//!         });
//!         Ok(())
//!     });
//!
//! let fork = app.plugin(echo, json!({ "prefix": "> " }))?;
//! app.start().await;
//! assert_eq!(fork.status(), ScopeStatus::Active);
//!
//! fork.update(json!({ "prefix": ">> " }));
//! app.flush().await;
//!
//! fork.dispose();
//! ```

pub mod context;
mod engine;
pub mod handle;
pub mod lifecycle;
pub mod plugin;
pub mod scope;
mod service;

// Re-exports: Context
pub use context::{App, Context, Disposer};

// Re-exports: Handles
pub use handle::{Fork, Runtime, ScopeRef, ScopeRole};

// Re-exports: Lifecycle
pub use lifecycle::{
    names, ForkCause, HookId, InternalChannel, InternalEvent, InternalListener, Lifecycle,
    Listener, ReportedError,
};

// Re-exports: Plugin
pub use plugin::{
    plugin_fn, ApplyFn, ConfigSchema, Inject, Plugin, PluginDef, PluginDescriptor, PluginId,
    PluginObject, Registry, ANONYMOUS,
};

// Re-exports: Scope
pub use scope::{ScopeId, ScopeStatus};

// Re-exports: Service
pub use service::ServiceValue;

// Re-exports: Foundation
pub use weave_foundation::{Error, ErrorKind, Result, RuntimeConfig};
