//! # weave-loader
//!
//! 설정 트리 loader - TOML 문서의 항목을 플러그인 Fork로 설치하고,
//! Fork 쪽의 변경(업데이트, 자기 정리)을 다시 문서에 기록합니다.
//!
//! core와는 내부 채널(`internal/fork`, `internal/update`,
//! `internal/before-update`)과 `plugin` / `update` / `dispose` 호출로만
//! 연결되며, core는 이 크레이트에 의존하지 않습니다.
//!
//! ## 사용 예시
//! ```ignore
//! let app = App::new();
//! let catalog = PluginCatalog::new().with("server", server_plugin());
//! let loader = Loader::new(&app, catalog, FileSink::in_dir("."))?;
//!
//! loader.start()?;
//! app.flush().await;
//!
//! let id = loader.add_entry(EntryOptions::new("server").with_config(json!({ "port": 80 })))?;
//! loader.disable_entry(&id)?;
//! ```

pub mod catalog;
pub mod entry;
pub mod loader;
pub mod sink;

pub use catalog::PluginCatalog;
pub use entry::{EntryOptions, LoaderDocument};
pub use loader::{Loader, ENTRY_FORK_EVENT, LOADER_SERVICE};
pub use sink::{ConfigSink, FileSink, MemorySink, LOADER_FILE};
