//! Context - 플러그인 본문에 전달되는 트리 핸들
//!
//! 모든 부수 효과(리스너, 하위 플러그인, 서비스)는 `Context`의 메서드로만
//! 등록되며, 그 `Context`가 가리키는 scope에 귀속됩니다.
//!
//! ## 사용 예시
//! ```ignore
//! let app = App::new();
//!
//! let fork = app.plugin(plugin_fn(|ctx, _config| {
//!     ctx.on("tick", |payload| {
//!         println!("tick: {payload}");
//!         Ok(())
//!     });
//!     Ok(())
//! }), json!({}))?;
//!
//! app.flush().await;
//! app.emit("tick", &json!(1));
//! fork.dispose();
//! ```

use crate::engine::Shared;
use crate::handle::{Fork, Runtime, ScopeRef};
use crate::lifecycle::{names, InternalChannel, InternalEvent, Lifecycle};
use crate::plugin::{PluginDef, PluginDescriptor, Registry};
use crate::scope::{EffectId, ScopeId, ScopeKind};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use weave_foundation::{Result, RuntimeConfig};

// ============================================================================
// Disposer
// ============================================================================

/// 개별 효과 해제 핸들
///
/// 소유 scope가 먼저 정리되면 아무 일도 하지 않습니다.
#[derive(Clone)]
pub struct Disposer {
    inner: Option<(Weak<Shared>, ScopeId, EffectId)>,
}

impl Disposer {
    fn new(shared: &Arc<Shared>, scope: ScopeId, effect: Option<EffectId>) -> Self {
        Self {
            inner: effect.map(|effect| (Arc::downgrade(shared), scope, effect)),
        }
    }

    /// 효과 실행 및 제거 - 처음이면 true
    pub fn dispose(&self) -> bool {
        let Some((shared, scope, effect)) = &self.inner else {
            return false;
        };
        match shared.upgrade() {
            Some(shared) => shared.release_effect(*scope, *effect),
            None => false,
        }
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some((_, scope, _)) => write!(f, "Disposer({})", scope),
            None => f.write_str("Disposer(inert)"),
        }
    }
}

// ============================================================================
// Context
// ============================================================================

#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
    scope: ScopeId,
    /// 생성 시점의 scope epoch - 리셋 이후에는 효과 등록이 거부됨
    epoch: u64,
}

impl Context {
    pub(crate) fn from_parts(shared: Arc<Shared>, scope: ScopeId, epoch: u64) -> Self {
        Self {
            shared,
            scope,
            epoch,
        }
    }

    // ========================================================================
    // 플러그인
    // ========================================================================

    /// 플러그인 설치
    ///
    /// 설정 검증은 즉시, 본문 적용은 lifecycle 큐에서 실행됩니다.
    /// 검증 / 적용 실패는 `Err`가 아니라 상태와 `internal/error`로 드러나며,
    /// `Err`는 잘못된 정의나 정리된 Context 같은 구조적 오류에만 반환됩니다.
    pub fn plugin(&self, def: impl Into<PluginDef>, config: Value) -> Result<Fork> {
        let descriptor = PluginDescriptor::resolve(&def.into())?;
        let fork = self.shared.install(self.scope, self.epoch, descriptor, config)?;
        Ok(Fork::new(Arc::clone(&self.shared), fork))
    }

    /// 해당 정의의 모든 Runtime 정리 - 하나라도 정리했으면 true
    pub fn dispose_plugin(&self, def: &PluginDef) -> bool {
        self.shared.dispose_plugin(def)
    }

    pub fn registry(&self) -> Registry {
        Registry::new(Arc::clone(&self.shared))
    }

    // ========================================================================
    // 이벤트
    // ========================================================================

    /// 리스너 등록 - 이 Context의 scope가 정리되면 자동 해제
    pub fn on<F>(&self, name: &str, listener: F) -> Disposer
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        let hook = self
            .shared
            .lifecycle
            .register_public(name, self.scope, Arc::new(listener));
        self.track_hook(hook)
    }

    /// 한 번만 호출되는 리스너
    pub fn once<F>(&self, name: &str, listener: F) -> Disposer
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        let slot: Arc<Mutex<Option<Disposer>>> = Arc::new(Mutex::new(None));
        let fired = AtomicBool::new(false);

        let own = Arc::clone(&slot);
        let disposer = self.on(name, move |payload| {
            if fired.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let result = listener(payload);
            let disposer = own.lock().take();
            if let Some(disposer) = disposer {
                disposer.dispose();
            }
            result
        });

        *slot.lock() = Some(disposer.clone());
        disposer
    }

    /// 내부 채널 리스너 등록
    pub fn on_internal<F>(&self, channel: InternalChannel, listener: F) -> Disposer
    where
        F: Fn(&InternalEvent) -> Result<()> + Send + Sync + 'static,
    {
        let hook = self
            .shared
            .lifecycle
            .register_internal(channel, self.scope, Arc::new(listener));
        self.track_hook(hook)
    }

    fn track_hook(&self, hook: crate::lifecycle::HookId) -> Disposer {
        let lifecycle = Arc::clone(&self.shared.lifecycle);
        let effect = self.shared.collect(
            self.scope,
            self.epoch,
            Box::new(move || {
                lifecycle.unregister(hook);
                Ok(())
            }),
        );
        Disposer::new(&self.shared, self.scope, effect)
    }

    /// 공개 이벤트 발행 - 호출된 리스너 수
    pub fn emit(&self, name: &str, payload: &Value) -> usize {
        self.shared.lifecycle.emit_public(name, payload, None)
    }

    // ========================================================================
    // 효과 / 서비스
    // ========================================================================

    /// 정리 콜백 등록 - scope가 이미 정리/리셋되었으면 즉시 실행됨
    pub fn collect<F>(&self, effect: F) -> Disposer
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let effect = self.shared.collect(self.scope, self.epoch, Box::new(effect));
        Disposer::new(&self.shared, self.scope, effect)
    }

    /// 서비스 제공 - 이 Context의 scope가 정리되면 제거됨
    pub fn provide<T>(&self, name: &str, value: T) -> Result<Disposer>
    where
        T: Any + Send + Sync,
    {
        let effect = self.shared.provide(
            self.scope,
            self.epoch,
            name,
            Arc::new(value),
            std::any::type_name::<T>(),
        )?;
        Ok(Disposer::new(&self.shared, self.scope, effect))
    }

    /// 서비스 조회
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.shared.service(name)?.downcast::<T>().ok()
    }

    /// 등록된 서비스 (이름, 타입 이름)
    pub fn services(&self) -> Vec<(String, &'static str)> {
        self.shared.state.lock().services.describe()
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn scope(&self) -> ScopeRef {
        ScopeRef::new(Arc::clone(&self.shared), self.scope)
    }

    /// 가장 가까운 Runtime
    pub fn runtime(&self) -> Option<Runtime> {
        let runtime = self.shared.state.lock().scopes.runtime_of(self.scope)?;
        Some(Runtime::new(Arc::clone(&self.shared), runtime))
    }

    /// 이 Context를 만든 Fork (Runtime scope라면 그 Runtime의 첫 Fork)
    pub fn fork(&self) -> Option<Fork> {
        let fork = {
            let state = self.shared.state.lock();
            match &state.scopes.get(self.scope)?.kind {
                ScopeKind::Fork(_) => self.scope,
                ScopeKind::Runtime(rt) => *rt.forks.first()?,
                ScopeKind::Root => return None,
            }
        };
        Some(Fork::new(Arc::clone(&self.shared), fork))
    }

    /// 효과를 등록할 수 있는 상태인지
    pub fn is_live(&self) -> bool {
        self.shared.is_live(self.scope, self.epoch)
    }

    pub fn name(&self) -> String {
        self.shared.label(self.scope)
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.shared.lifecycle
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Context <{}>", self.name())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// App - root Context
// ============================================================================

/// root scope를 가진 애플리케이션
pub struct App {
    ctx: Context,
}

impl App {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let shared = Shared::new(config);
        Self {
            ctx: Context::from_parts(shared, ScopeId::ROOT, 0),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// 대기 중인 적용 작업을 모두 실행
    pub async fn flush(&self) -> usize {
        self.ctx.shared.lifecycle.flush().await
    }

    /// 대기 작업을 비운 뒤 root의 `ready` 리스너 호출
    pub async fn start(&self) {
        self.flush().await;
        self.ctx
            .shared
            .lifecycle
            .emit_public(names::READY, &Value::Null, Some(ScopeId::ROOT));
        self.flush().await;
    }

    /// root scope 정리 - 이후 설치는 구조적 오류
    pub fn dispose(&self) -> bool {
        self.ctx.shared.dispose_scope(ScopeId::ROOT)
    }

    /// 살아있는 scope 수 (root 포함)
    pub fn scope_count(&self) -> usize {
        self.ctx.shared.state.lock().scopes.live_count()
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for App {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{plugin_fn, PluginObject};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_display() {
        let app = App::new();
        assert_eq!(app.to_string(), "Context <root>");
    }

    #[tokio::test]
    async fn test_named_context_display() {
        let app = App::new();
        let seen = Arc::new(Mutex::new(String::new()));

        let out = Arc::clone(&seen);
        let def = PluginObject::new()
            .with_name("greeter")
            .with_apply(move |ctx, _| {
                *out.lock() = ctx.to_string();
                Ok(())
            });
        app.plugin(def, Value::Null).unwrap();
        app.flush().await;

        assert_eq!(*seen.lock(), "Context <greeter>");
    }

    #[tokio::test]
    async fn test_once_fires_once() {
        let app = App::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        app.once("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(app.emit("tick", &Value::Null), 1);
        assert_eq!(app.emit("tick", &Value::Null), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disposer_is_idempotent() {
        let app = App::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let disposer = app.collect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(disposer.dispose());
        assert!(!disposer.dispose());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_services() {
        let app = App::new();
        let disposer = app.provide("answer", 42u32).unwrap();

        assert_eq!(app.get::<u32>("answer").as_deref(), Some(&42));
        assert!(app.get::<String>("answer").is_none());
        assert!(app.provide("answer", 7u32).is_err());

        assert!(disposer.dispose());
        assert!(app.get::<u32>("answer").is_none());
    }

    #[tokio::test]
    async fn test_fork_and_runtime_from_body() {
        let app = App::new();
        let seen = Arc::new(Mutex::new(None));

        let out = Arc::clone(&seen);
        let fork = app
            .plugin(
                plugin_fn(move |ctx, _| {
                    *out.lock() = Some((ctx.fork(), ctx.runtime()));
                    Ok(())
                }),
                json!({}),
            )
            .unwrap();
        app.flush().await;

        let (body_fork, body_runtime) = seen.lock().take().unwrap();
        assert_eq!(body_fork, Some(fork.clone()));
        assert_eq!(body_runtime, fork.runtime());
    }
}
