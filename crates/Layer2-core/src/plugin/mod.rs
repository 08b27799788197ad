//! # Plugin System
//!
//! 플러그인 정의와 식별, 레지스트리
//!
//! ## 정의 모양
//!
//! ```text
//! PluginDef ──resolve──▶ PluginDescriptor ──▶ Runtime (식별자 단위)
//!   ├─ Callable (클로저)                         └─ Fork (설치 단위)
//!   ├─ Object   (이름 / reusable / 스키마 / inject)
//!   └─ Trait    (async 본문)
//! ```
//!
//! ## 예시
//!
//! ```ignore
//! let counter = PluginObject::new()
//!     .with_name("counter")
//!     .with_reusable(true)
//!     .with_apply(|ctx, config| {
//!         ctx.on("tick", |_| Ok(()));
//!         Ok(())
//!     });
//!
//! let fork = app.plugin(counter.into(), json!({ "step": 1 }))?;
//! app.flush().await;
//! ```

mod descriptor;
mod registry;
mod traits;

pub use descriptor::{plugin_fn, PluginDef, PluginDescriptor, PluginId, PluginObject, ANONYMOUS};
pub use registry::Registry;
pub use traits::{ApplyFn, ConfigSchema, Inject, Plugin};

pub(crate) use registry::RegistryTable;
