//! Loader - 설정 트리 항목을 Fork로 설치하고 변경을 문서에 되돌려 씀
//!
//! ## 내부 채널 구독
//!
//! - `internal/fork`: 설치 중인 항목을 새 Fork에 연결하고, 항목의 Fork가
//!   loader 밖에서 정리되면 항목을 비활성화해서 기록 (플러그인 삭제로 인한
//!   정리는 항목을 그대로 둠)
//! - `internal/before-update`: loader 밖에서 시작된 업데이트의 설정을
//!   `simplify`해서 항목에 기록
//! - `internal/update`: `loader/entry-fork` (`type = "reload"`) 발행
//!
//! 리스너는 core의 lock 밖에서 호출되지만, loader 자신의 `state` lock을
//! 잡은 채로 core 작업(`plugin`, `update`, `dispose`)을 호출하면 안 됩니다.

use crate::catalog::PluginCatalog;
use crate::entry::{EntryOptions, LoaderDocument};
use crate::sink::ConfigSink;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use weave_core::{Context, Fork, ForkCause, InternalChannel, InternalEvent, ScopeRef, ScopeRole};
use weave_foundation::{Error, Result};

/// 항목 Fork의 적용 / 재적용 / 해제 알림
pub const ENTRY_FORK_EVENT: &str = "loader/entry-fork";

/// Loader를 제공하는 서비스 이름
pub const LOADER_SERVICE: &str = "loader";

// ============================================================================
// 내부 상태
// ============================================================================

struct EntryRecord {
    options: EntryOptions,
    fork: Option<Fork>,
    /// loader가 시작한 업데이트 - before-update에서 다시 기록하지 않음
    suspend: bool,
    /// loader가 시작한 정리 - 자기 정리로 취급하지 않음
    unloading: bool,
}

#[derive(Default)]
struct LoaderState {
    entries: Vec<EntryRecord>,
    /// 설치 중인 항목 ID - `internal/fork`에서 Fork에 연결
    pending: Option<String>,
}

impl EntryRecord {
    /// 정리되지 않은 Fork
    fn live_fork(&self) -> Option<Fork> {
        self.fork.clone().filter(|fork| !fork.is_disposed())
    }
}

impl LoaderState {
    fn find(&self, id: &str) -> Option<&EntryRecord> {
        self.entries.iter().find(|record| record.options.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut EntryRecord> {
        self.entries
            .iter_mut()
            .find(|record| record.options.id == id)
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))
    }

    fn document(&self) -> LoaderDocument {
        LoaderDocument::new(
            self.entries
                .iter()
                .map(|record| record.options.clone())
                .collect(),
        )
    }
}

struct LoaderInner {
    ctx: Context,
    catalog: PluginCatalog,
    sink: Box<dyn ConfigSink>,
    state: Mutex<LoaderState>,
}

// ============================================================================
// Loader
// ============================================================================

/// 설정 트리 loader
#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoaderInner>,
}

impl Loader {
    /// Loader 생성 - 내부 채널을 구독하고 `loader` 서비스로 자신을 제공
    pub fn new(ctx: &Context, catalog: PluginCatalog, sink: impl ConfigSink + 'static) -> Result<Self> {
        let inner = Arc::new(LoaderInner {
            ctx: ctx.clone(),
            catalog,
            sink: Box::new(sink),
            state: Mutex::new(LoaderState::default()),
        });

        let weak = Arc::downgrade(&inner);
        ctx.on_internal(InternalChannel::Fork, move |event| {
            match (weak.upgrade(), event) {
                (Some(inner), InternalEvent::Fork { fork, cause }) => inner.on_fork(fork, *cause),
                _ => Ok(()),
            }
        });

        let weak = Arc::downgrade(&inner);
        ctx.on_internal(InternalChannel::BeforeUpdate, move |event| {
            match (weak.upgrade(), event) {
                (Some(inner), InternalEvent::BeforeUpdate { fork, config }) => {
                    inner.on_before_update(fork, config)
                }
                _ => Ok(()),
            }
        });

        let weak = Arc::downgrade(&inner);
        ctx.on_internal(InternalChannel::Update, move |event| {
            match (weak.upgrade(), event) {
                (Some(inner), InternalEvent::Update { fork, .. }) => inner.on_update(fork),
                _ => Ok(()),
            }
        });

        let loader = Self { inner };
        ctx.provide(LOADER_SERVICE, loader.clone())?;
        Ok(loader)
    }

    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.inner.catalog
    }

    // ========================================================================
    // 시작 / 기록
    // ========================================================================

    /// sink의 문서를 읽어 활성 항목을 설치 (생성된 ID는 다시 기록)
    pub fn start(&self) -> Result<()> {
        let document = self.inner.sink.read()?.unwrap_or_default();
        info!(entries = document.plugins.len(), "Starting loader");

        for options in document.plugins {
            self.inner.insert(options)?;
        }
        self.write()
    }

    /// 현재 항목을 sink에 기록
    pub fn write(&self) -> Result<()> {
        self.inner.write()
    }

    /// 현재 항목으로 만든 문서
    pub fn document(&self) -> LoaderDocument {
        self.inner.state.lock().document()
    }

    // ========================================================================
    // 항목 조작
    // ========================================================================

    /// 항목 추가 - 비활성화 상태가 아니면 바로 설치, 항목 ID 반환
    pub fn add_entry(&self, options: EntryOptions) -> Result<String> {
        let id = self.inner.insert(options)?;
        info!(entry = %id, "Entry added");
        self.write()?;
        Ok(id)
    }

    /// 설정 변경 - Fork가 있으면 업데이트, 없고 활성이면 설치
    pub fn update_entry(&self, id: &str, config: Value) -> Result<()> {
        let (fork, disabled) = {
            let mut state = self.inner.state.lock();
            let record = state.find_mut(id)?;
            record.options.config = config.clone();
            record.suspend = record.fork.is_some();
            (record.fork.clone(), record.options.disabled)
        };

        // 그 사이 정리된 Fork면 항목의 Fork를 비우고 다시 설치
        let applied = match fork {
            Some(fork) => {
                let updated = fork.update(config);
                if let Ok(record) = self.inner.state.lock().find_mut(id) {
                    record.suspend = false;
                    if !updated {
                        record.fork = None;
                    }
                }
                updated
            }
            None => false,
        };

        if !applied && !disabled {
            self.inner.install(id)?;
        }

        debug!(entry = %id, "Entry config updated");
        self.write()
    }

    pub fn enable_entry(&self, id: &str) -> Result<()> {
        let installed = {
            let mut state = self.inner.state.lock();
            let record = state.find_mut(id)?;
            record.options.disabled = false;
            record.live_fork().is_some()
        };

        if !installed {
            self.inner.install(id)?;
        }
        self.write()
    }

    pub fn disable_entry(&self, id: &str) -> Result<()> {
        self.inner.state.lock().find_mut(id)?.options.disabled = true;
        self.inner.unload(id);
        self.write()
    }

    /// 항목 제거 - Fork를 정리하고 제거된 항목 반환
    pub fn remove_entry(&self, id: &str) -> Result<EntryOptions> {
        self.inner.state.lock().find_mut(id)?;
        self.inner.unload(id);

        let removed = {
            let mut state = self.inner.state.lock();
            let index = state
                .entries
                .iter()
                .position(|record| record.options.id == id)
                .ok_or_else(|| Error::EntryNotFound(id.to_string()))?;
            state.entries.remove(index).options
        };

        info!(entry = %id, "Entry removed");
        self.write()?;
        Ok(removed)
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn entries(&self) -> Vec<EntryOptions> {
        self.document().plugins
    }

    pub fn entry(&self, id: &str) -> Option<EntryOptions> {
        self.inner
            .state
            .lock()
            .find(id)
            .map(|record| record.options.clone())
    }

    /// 항목의 현재 Fork
    pub fn fork(&self, id: &str) -> Option<Fork> {
        self.inner
            .state
            .lock()
            .find(id)
            .and_then(EntryRecord::live_fork)
    }

    /// Context를 소유한 항목 ID
    ///
    /// Fork scope는 자신의 항목 또는 부모 scope의 항목을, Runtime scope는
    /// 그 Runtime의 모든 Fork가 가리키는 항목을 돌려줍니다.
    pub fn locate(&self, ctx: &Context) -> Vec<String> {
        locate_scope(&ctx.scope())
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("context", &self.inner.ctx)
            .field("entries", &self.inner.state.lock().entries.len())
            .finish()
    }
}

fn locate_scope(scope: &ScopeRef) -> Vec<String> {
    match scope.role() {
        None | Some(ScopeRole::Root) => Vec::new(),
        Some(ScopeRole::Runtime) => scope
            .as_runtime()
            .map(|runtime| {
                runtime
                    .forks()
                    .iter()
                    .flat_map(|fork| locate_scope(fork.scope()))
                    .collect()
            })
            .unwrap_or_default(),
        Some(ScopeRole::Fork) => {
            if let Some(entry) = scope.as_fork().and_then(|fork| fork.entry()) {
                return vec![entry];
            }
            scope
                .parent()
                .map(|parent| locate_scope(&parent))
                .unwrap_or_default()
        }
    }
}

// ============================================================================
// 설치 / 정리 / 리스너
// ============================================================================

impl LoaderInner {
    /// 항목 등록 (ID 생성 포함) - 활성이면 설치
    fn insert(&self, mut options: EntryOptions) -> Result<String> {
        self.catalog.resolve(&options.name)?;

        if options.id.is_empty() {
            options.id = generate_id();
        }
        let id = options.id.clone();
        let disabled = options.disabled;

        {
            let mut state = self.state.lock();
            if state.find(&id).is_some() {
                return Err(Error::Config(format!("duplicate entry id: {}", id)));
            }
            state.entries.push(EntryRecord {
                options,
                fork: None,
                suspend: false,
                unloading: false,
            });
        }

        if !disabled {
            self.install(&id)?;
        }
        Ok(id)
    }

    fn install(&self, id: &str) -> Result<Fork> {
        let (name, config) = {
            let mut state = self.state.lock();
            let record = state.find_mut(id)?;
            (record.options.name.clone(), record.options.config.clone())
        };
        let def = self.catalog.resolve(&name)?;

        self.state.lock().pending = Some(id.to_string());
        let result = self.ctx.plugin(def, config);
        self.state.lock().pending = None;

        let fork = result?;
        debug!(entry = %id, plugin = %name, fork = %fork.id(), "Entry applied");
        self.emit_entry_fork(id, "apply");
        Ok(fork)
    }

    /// loader가 시작한 정리 - 항목은 그대로 둠
    fn unload(&self, id: &str) {
        let fork = match self.state.lock().find_mut(id) {
            Ok(record) => {
                record.unloading = true;
                record.fork.clone()
            }
            Err(_) => return,
        };

        if let Some(fork) = fork {
            if fork.dispose() {
                self.emit_entry_fork(id, "unload");
            }
        }

        if let Ok(record) = self.state.lock().find_mut(id) {
            record.unloading = false;
            record.fork = None;
        }
    }

    fn write(&self) -> Result<()> {
        let document = self.state.lock().document();
        self.sink.write(&document)
    }

    fn emit_entry_fork(&self, id: &str, kind: &str) {
        self.ctx
            .emit(ENTRY_FORK_EVENT, &json!({ "id": id, "type": kind }));
    }

    fn on_fork(&self, fork: &Fork, cause: ForkCause) -> Result<()> {
        match cause {
            ForkCause::Created => {
                let pending = self.state.lock().pending.take();
                if let Some(id) = pending {
                    fork.set_entry(Some(id.clone()));
                    if let Ok(record) = self.state.lock().find_mut(&id) {
                        record.fork = Some(fork.clone());
                    }
                }
                return Ok(());
            }
            // 플러그인 삭제 - 항목은 활성 상태로 남고 다음 설치 때 다시 연결됨
            ForkCause::PluginDeleted => {
                debug!(fork = %fork.id(), "Fork disposed by plugin deletion, keeping entry");
                return Ok(());
            }
            ForkCause::Disposed => {}
        }

        // loader 자신이 정리 중이면 항목을 건드리지 않음
        if !self.ctx.is_live() {
            return Ok(());
        }

        let id = {
            let mut state = self.state.lock();
            let Some(record) = state
                .entries
                .iter_mut()
                .find(|record| record.fork.as_ref() == Some(fork))
            else {
                return Ok(());
            };

            record.fork = None;
            if record.unloading {
                return Ok(());
            }
            record.options.disabled = true;
            record.options.id.clone()
        };

        info!(entry = %id, "Entry fork disposed outside the loader, disabling entry");
        self.emit_entry_fork(&id, "unload");
        self.write()
    }

    fn on_before_update(&self, fork: &Fork, config: &Value) -> Result<()> {
        let Some(id) = fork.entry() else {
            return Ok(());
        };

        let simplified = match fork.runtime() {
            Some(runtime) => runtime.simplify(config),
            None => config.clone(),
        };

        {
            let mut state = self.state.lock();
            let Ok(record) = state.find_mut(&id) else {
                return Ok(());
            };
            if record.suspend {
                record.suspend = false;
                return Ok(());
            }
            record.options.config = simplified;
        }

        debug!(entry = %id, "Persisting config from fork update");
        self.write()
    }

    fn on_update(&self, fork: &Fork) -> Result<()> {
        if let Some(id) = fork.entry() {
            self.emit_entry_fork(&id, "reload");
        }
        Ok(())
    }
}

/// 짧은 항목 ID
fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
