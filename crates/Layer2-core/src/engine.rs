//! Engine - scope 트리 / 레지스트리 / 서비스를 묶은 공유 상태와
//! 설치 · 적용 · 리셋 · 정리 알고리즘
//!
//! ## 적용 대상
//!
//! - reusable이 아닌 플러그인: 본문은 Runtime scope에서 한 번 실행됩니다.
//!   본문 실패는 Runtime을 FAILED로 만들고 Fork는 ACTIVE로 남습니다.
//! - reusable 플러그인: 본문은 Fork마다 Fork scope에서 실행됩니다.
//!   본문 실패는 해당 Fork만 FAILED로 만들고, Runtime 상태는 Fork들의 집계입니다.
//!
//! ## 정리 순서
//!
//! ```text
//! 1. 자식 scope (생성 역순, 재귀)
//! 2. Fork라면: 마지막 Fork일 때 Runtime
//! 3. 해당 scope의 `dispose` 리스너
//! 4. 효과 (LIFO)
//! 5. DISPOSED + 부모에서 분리
//! 6. Fork라면: `internal/fork` 재발행 (`ForkCause::Disposed` / `PluginDeleted`)
//! ```
//!
//! 사용자 코드(본문, 리스너, 정리 콜백)를 호출하는 동안에는 `state` lock을
//! 잡지 않습니다.

use crate::context::Context;
use crate::handle::Fork;
use crate::lifecycle::{names, panic_message, ForkCause, InternalEvent, Lifecycle};
use crate::plugin::{PluginDef, PluginDescriptor, PluginId, RegistryTable};
use crate::scope::{Effect, EffectId, ForkNode, RuntimeNode, ScopeId, ScopeKind, ScopeStatus, ScopeTable};
use crate::service::{ServiceTable, ServiceValue};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use weave_foundation::{Error, ErrorKind, Result, RuntimeConfig};

// ============================================================================
// 공유 상태
// ============================================================================

/// 하나의 lock으로 보호되는 트리 상태
pub(crate) struct State {
    pub scopes: ScopeTable,
    pub registry: RegistryTable,
    pub services: ServiceTable,
}

pub(crate) struct Shared {
    pub state: Mutex<State>,
    pub lifecycle: Arc<Lifecycle>,
    pub config: RuntimeConfig,
}

/// Fork 적용에 필요한 정보
struct ForkInfo {
    runtime: ScopeId,
    /// 본문이 실행되는 scope (reusable: Fork, 그 외: Runtime)
    target: ScopeId,
    reusable: bool,
    descriptor: Arc<PluginDescriptor>,
}

enum Role {
    Root,
    Runtime { forks: Vec<ScopeId> },
    Fork { runtime: ScopeId },
}

/// 원본 설정 정규화 - `false`는 비활성화 (None)
pub(crate) fn normalize(raw: Value) -> Option<Value> {
    match raw {
        Value::Bool(false) => None,
        Value::Null | Value::Bool(true) => Some(Value::Object(Map::new())),
        other => Some(other),
    }
}

/// reusable Runtime의 상태 집계
pub(crate) fn aggregate(statuses: &[ScopeStatus]) -> ScopeStatus {
    if statuses.contains(&ScopeStatus::Active) {
        ScopeStatus::Active
    } else if statuses.contains(&ScopeStatus::Loading) {
        ScopeStatus::Loading
    } else if !statuses.is_empty() && statuses.iter().all(|s| *s == ScopeStatus::Failed) {
        ScopeStatus::Failed
    } else {
        ScopeStatus::Pending
    }
}

impl Shared {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                scopes: ScopeTable::new(),
                registry: RegistryTable::new(),
                services: ServiceTable::new(),
            }),
            lifecycle: Arc::new(Lifecycle::with_config(config.lifecycle.clone())),
            config,
        })
    }

    // ========================================================================
    // 효과
    // ========================================================================

    /// 효과 등록 - 거부되면 즉시 실행하고 None
    pub fn collect(&self, scope: ScopeId, epoch: u64, effect: Effect) -> Option<EffectId> {
        let result = self.state.lock().scopes.collect(scope, epoch, effect);
        match result {
            Ok(effect_id) => Some(effect_id),
            Err(effect) => {
                debug!(scope = %scope, "Scope is no longer live, running effect immediately");
                self.run_effect(effect, scope);
                None
            }
        }
    }

    /// 개별 효과 해제 - 이미 해제되었으면 false
    pub fn release_effect(&self, scope: ScopeId, effect_id: EffectId) -> bool {
        let effect = self.state.lock().scopes.remove_effect(scope, effect_id);
        match effect {
            Some(effect) => {
                self.run_effect(effect, scope);
                true
            }
            None => false,
        }
    }

    fn run_effect(&self, effect: Effect, scope: ScopeId) {
        let result = catch_unwind(AssertUnwindSafe(effect))
            .map_err(|payload| format!("panicked: {}", panic_message(payload.as_ref())));

        let error = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) if e.kind() == ErrorKind::Disposer => e,
            Ok(Err(e)) => Error::Disposer(e.to_string()),
            Err(message) => Error::Disposer(message),
        };
        self.lifecycle.report(error, Some(scope));
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn is_live(&self, scope: ScopeId, epoch: u64) -> bool {
        self.state.lock().scopes.is_live(scope, epoch)
    }

    pub fn status(&self, scope: ScopeId) -> ScopeStatus {
        self.state.lock().scopes.status(scope)
    }

    pub fn label(&self, scope: ScopeId) -> String {
        self.state.lock().scopes.label(scope)
    }

    pub fn descriptor_of(&self, scope: ScopeId) -> Option<Arc<PluginDescriptor>> {
        self.state.lock().scopes.descriptor_of(scope)
    }

    fn fork_info(&self, fork: ScopeId) -> Option<ForkInfo> {
        let state = self.state.lock();
        let runtime = state.scopes.get(fork)?.as_fork()?.runtime;
        let descriptor = Arc::clone(&state.scopes.get(runtime)?.as_runtime()?.descriptor);
        let reusable = descriptor.is_reusable();

        Some(ForkInfo {
            runtime,
            target: if reusable { fork } else { runtime },
            reusable,
            descriptor,
        })
    }

    fn refresh_runtime(&self, runtime: ScopeId) {
        let mut state = self.state.lock();
        let forks = match state.scopes.get(runtime).and_then(|node| node.as_runtime()) {
            Some(rt) if rt.descriptor.is_reusable() => rt.forks.clone(),
            _ => return,
        };

        let statuses: Vec<_> = forks.iter().map(|fork| state.scopes.status(*fork)).collect();
        state.scopes.set_status(runtime, aggregate(&statuses));
    }

    // ========================================================================
    // 설치
    // ========================================================================

    /// Fork 생성 (필요하면 Runtime도) 후 설정 검증
    pub fn install(
        self: &Arc<Self>,
        parent: ScopeId,
        epoch: u64,
        descriptor: PluginDescriptor,
        raw: Value,
    ) -> Result<ScopeId> {
        let (fork, runtime, name) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if !state.scopes.is_live(parent, epoch) {
                return Err(Error::ScopeDisposed(format!(
                    "cannot install {} into {}",
                    descriptor.name(),
                    state.scopes.label(parent)
                )));
            }

            let existing = if descriptor.is_reusable() {
                state.registry.shared_runtime(descriptor.id())
            } else {
                None
            };

            let runtime = match existing {
                Some(runtime) => runtime,
                None => {
                    let id = descriptor.id().clone();
                    let runtime = state.scopes.insert(
                        None,
                        ScopeKind::Runtime(RuntimeNode {
                            descriptor: Arc::new(descriptor),
                            forks: Vec::new(),
                        }),
                    );
                    state.registry.register(id, runtime);
                    runtime
                }
            };

            let fork = state.scopes.insert(
                Some(parent),
                ScopeKind::Fork(ForkNode {
                    runtime,
                    raw: raw.clone(),
                    config: None,
                    disabled: false,
                    entry: None,
                }),
            );

            if let Some(rt) = state.scopes.get_mut(runtime).and_then(|node| node.as_runtime_mut()) {
                rt.forks.push(fork);
            }

            (fork, runtime, state.scopes.label(runtime))
        };

        info!(plugin = %name, fork = %fork, runtime = %runtime, "Plugin installed");
        self.lifecycle.emit_internal(&InternalEvent::Fork {
            fork: Fork::new(Arc::clone(self), fork),
            cause: ForkCause::Created,
        });
        self.configure(fork, raw);

        Ok(fork)
    }

    /// 설정 정규화 + 검증 (동기)
    fn configure(self: &Arc<Self>, fork: ScopeId, raw: Value) {
        let Some(info) = self.fork_info(fork) else {
            return;
        };

        match normalize(raw) {
            None => self.disable_fork(fork),
            Some(value) => match info.descriptor.validate(value) {
                Ok(config) => {
                    self.set_fork_config(fork, Some(config));
                    self.activate_fork(fork);
                }
                Err(e) => self.fail_fork_config(fork, e),
            },
        }
    }

    fn set_fork_config(&self, fork: ScopeId, config: Option<Value>) {
        let mut state = self.state.lock();
        if let Some(node) = state.scopes.get_mut(fork).and_then(|node| node.as_fork_mut()) {
            node.disabled = config.is_none();
            node.config = config;
        }
    }

    fn disable_fork(self: &Arc<Self>, fork: ScopeId) {
        let Some(info) = self.fork_info(fork) else {
            return;
        };

        self.reset_scope(info.target);
        self.set_fork_config(fork, None);
        {
            let mut state = self.state.lock();
            state.scopes.set_status(fork, ScopeStatus::Pending);
            state.scopes.set_error(fork, None);
            if !info.reusable {
                state.scopes.set_status(info.runtime, ScopeStatus::Pending);
                state.scopes.set_error(info.runtime, None);
            }
        }
        self.refresh_runtime(info.runtime);
        debug!(fork = %fork, "Fork disabled");
    }

    fn fail_fork_config(self: &Arc<Self>, fork: ScopeId, error: Error) {
        let Some(info) = self.fork_info(fork) else {
            return;
        };

        self.reset_scope(info.target);
        let error = Arc::new(error);
        {
            let mut state = self.state.lock();
            if let Some(node) = state.scopes.get_mut(fork).and_then(|node| node.as_fork_mut()) {
                node.config = None;
                node.disabled = false;
            }
            state.scopes.set_status(fork, ScopeStatus::Failed);
            state.scopes.set_error(fork, Some(Arc::clone(&error)));
            if !info.reusable {
                state.scopes.set_status(info.runtime, ScopeStatus::Failed);
                state.scopes.set_error(info.runtime, Some(Arc::clone(&error)));
            }
        }
        self.refresh_runtime(info.runtime);
        self.lifecycle.report_shared(error, Some(fork));
    }

    // ========================================================================
    // 적용
    // ========================================================================

    /// 필수 서비스가 모두 있으면 LOADING으로 바꾸고 적용 작업 예약
    fn activate_fork(self: &Arc<Self>, fork: ScopeId) {
        let Some(info) = self.fork_info(fork) else {
            return;
        };

        let scheduled = {
            let mut state = self.state.lock();
            let ready = state
                .scopes
                .get(fork)
                .filter(|node| node.is_alive())
                .and_then(|node| node.as_fork())
                .map(|node| node.config.is_some() && !node.disabled)
                .unwrap_or(false);
            if !ready {
                return;
            }

            let missing: Vec<String> = info
                .descriptor
                .requires()
                .filter(|name| !state.services.contains(name))
                .map(str::to_string)
                .collect();

            if missing.is_empty() {
                state.scopes.set_status(fork, ScopeStatus::Loading);
                if !info.reusable {
                    state.scopes.set_status(info.runtime, ScopeStatus::Loading);
                }
                state.scopes.get(info.target).map(|node| node.epoch)
            } else {
                debug!(fork = %fork, missing = ?missing, "Waiting for services");
                state.scopes.set_status(fork, ScopeStatus::Pending);
                if !info.reusable {
                    state.scopes.set_status(info.runtime, ScopeStatus::Pending);
                }
                None
            }
        };

        self.refresh_runtime(info.runtime);
        if let Some(epoch) = scheduled {
            self.schedule_apply(fork, info.target, epoch);
        }
    }

    fn schedule_apply(self: &Arc<Self>, fork: ScopeId, target: ScopeId, epoch: u64) {
        debug!(fork = %fork, target = %target, epoch, "Scheduling apply");
        let weak: Weak<Self> = Arc::downgrade(self);
        self.lifecycle.schedule(Box::pin(async move {
            if let Some(shared) = weak.upgrade() {
                shared.run_apply(fork, target, epoch).await;
            }
        }));
    }

    async fn run_apply(self: &Arc<Self>, fork: ScopeId, target: ScopeId, epoch: u64) {
        let Some(info) = self.fork_info(fork) else {
            return;
        };

        let config = {
            let mut state = self.state.lock();
            if !state.scopes.is_live(target, epoch) {
                debug!(fork = %fork, "Dropping stale apply");
                return;
            }
            let config = state
                .scopes
                .get(fork)
                .filter(|node| node.is_alive())
                .and_then(|node| node.as_fork())
                .and_then(|node| node.config.clone());
            let Some(config) = config else {
                return;
            };

            // 설정은 유효함 - 본문 결과는 Runtime이 가짐
            if !info.reusable {
                state.scopes.set_status(fork, ScopeStatus::Active);
                state.scopes.set_error(fork, None);
            }
            config
        };

        let ctx = Context::from_parts(Arc::clone(self), target, epoch);
        let result = info.descriptor.invoke(&ctx, &config).await;
        drop(ctx);

        if !self.is_live(target, epoch) {
            debug!(fork = %fork, "Scope was reset during apply, discarding result");
            return;
        }

        match result {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    state.scopes.set_status(target, ScopeStatus::Active);
                    state.scopes.set_error(target, None);
                }
                self.refresh_runtime(info.runtime);
                info!(plugin = info.descriptor.name(), scope = %target, "Plugin applied");
                self.lifecycle
                    .emit_public(names::READY, &Value::Null, Some(target));
            }
            Err(e) => {
                self.reset_scope(target);
                let error = Arc::new(e);
                {
                    let mut state = self.state.lock();
                    state.scopes.set_status(target, ScopeStatus::Failed);
                    state.scopes.set_error(target, Some(Arc::clone(&error)));
                }
                self.refresh_runtime(info.runtime);
                self.lifecycle.report_shared(error, Some(target));
            }
        }
    }

    // ========================================================================
    // 업데이트
    // ========================================================================

    /// Fork 설정 변경 - 정리된 Fork면 false
    pub fn update_fork(self: &Arc<Self>, fork: ScopeId, raw: Value) -> bool {
        if !self.is_alive(fork) {
            return false;
        }

        let handle = Fork::new(Arc::clone(self), fork);
        self.lifecycle.emit_internal(&InternalEvent::BeforeUpdate {
            fork: handle.clone(),
            config: raw.clone(),
        });

        {
            let mut state = self.state.lock();
            match state
                .scopes
                .get_mut(fork)
                .filter(|node| node.is_alive())
                .and_then(|node| node.as_fork_mut())
            {
                Some(node) => node.raw = raw.clone(),
                None => return false,
            }
        }

        let Some(info) = self.fork_info(fork) else {
            return false;
        };

        match normalize(raw) {
            None => self.disable_fork(fork),
            Some(value) => match info.descriptor.validate(value) {
                Ok(config) => {
                    self.lifecycle.emit_internal(&InternalEvent::Update {
                        fork: handle,
                        config: config.clone(),
                    });
                    self.reset_scope(info.target);
                    self.set_fork_config(fork, Some(config));
                    self.state.lock().scopes.set_error(fork, None);
                    self.activate_fork(fork);
                }
                Err(e) => self.fail_fork_config(fork, e),
            },
        }

        true
    }

    fn is_alive(&self, scope: ScopeId) -> bool {
        self.state
            .lock()
            .scopes
            .get(scope)
            .map(|node| node.is_alive())
            .unwrap_or(false)
    }

    // ========================================================================
    // 리셋 / 정리
    // ========================================================================

    /// 본문 효과 롤백 - epoch 증가, 자식 정리, `dispose` 리스너, 효과 (LIFO)
    pub fn reset_scope(self: &Arc<Self>, scope: ScopeId) {
        let children = {
            let mut state = self.state.lock();
            if !state.scopes.get(scope).map(|node| node.is_alive()).unwrap_or(false) {
                return;
            }
            state.scopes.bump_epoch(scope);
            state.scopes.take_children(scope)
        };

        for child in children {
            self.dispose_scope(child);
        }

        self.lifecycle
            .emit_public(names::DISPOSE, &Value::Null, Some(scope));

        let effects = self.state.lock().scopes.take_effects(scope);
        for effect in effects {
            self.run_effect(effect, scope);
        }
    }

    /// scope 정리 - 처음이면 true
    pub fn dispose_scope(self: &Arc<Self>, scope: ScopeId) -> bool {
        self.dispose_with(scope, ForkCause::Disposed)
    }

    /// `cause`는 Runtime 정리로 함께 정리되는 Fork에 전달됨
    fn dispose_with(self: &Arc<Self>, scope: ScopeId, cause: ForkCause) -> bool {
        let role = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let Some(node) = state.scopes.get_mut(scope) else {
                return false;
            };
            if !node.is_alive() {
                return false;
            }
            node.disposing = true;
            node.epoch += 1;

            match &node.kind {
                ScopeKind::Root => Role::Root,
                ScopeKind::Runtime(rt) => {
                    let forks = rt.forks.clone();
                    let id = rt.descriptor.id().clone();
                    state.registry.unregister(&id, scope);
                    Role::Runtime { forks }
                }
                ScopeKind::Fork(fork) => Role::Fork {
                    runtime: fork.runtime,
                },
            }
        };

        debug!(scope = %scope, "Disposing scope");

        // 1. 자식
        let children = self.state.lock().scopes.take_children(scope);
        for child in children {
            self.dispose_scope(child);
        }

        // 2. Runtime의 Fork / Fork의 Runtime
        match &role {
            Role::Root => {}
            Role::Runtime { forks } => {
                for fork in forks.iter().rev() {
                    self.dispose_with(*fork, cause);
                }
            }
            Role::Fork { runtime } => {
                let last = {
                    let mut state = self.state.lock();
                    match state.scopes.get_mut(*runtime).and_then(|node| node.as_runtime_mut()) {
                        Some(rt) => {
                            rt.forks.retain(|fork| *fork != scope);
                            rt.forks.is_empty()
                        }
                        None => false,
                    }
                };
                if last {
                    self.dispose_scope(*runtime);
                } else {
                    self.refresh_runtime(*runtime);
                }
            }
        }

        // 3. dispose 리스너
        self.lifecycle
            .emit_public(names::DISPOSE, &Value::Null, Some(scope));

        // 4. 효과
        let effects = self.state.lock().scopes.take_effects(scope);
        for effect in effects {
            self.run_effect(effect, scope);
        }

        // 5. DISPOSED
        self.state.lock().scopes.remove(scope);
        info!(scope = %scope, "Scope disposed");

        // 6. Fork 정리 알림
        if let Role::Fork { .. } = role {
            self.lifecycle.emit_internal(&InternalEvent::Fork {
                fork: Fork::new(Arc::clone(self), scope),
                cause,
            });
        }

        true
    }

    /// 해당 정의의 모든 Runtime 정리
    pub fn dispose_plugin(self: &Arc<Self>, def: &PluginDef) -> bool {
        let Some(id) = PluginId::of(def) else {
            return false;
        };

        let runtimes = self.state.lock().registry.runtimes(&id);
        runtimes
            .into_iter()
            .fold(false, |disposed, runtime| {
                self.dispose_with(runtime, ForkCause::PluginDeleted) || disposed
            })
    }

    // ========================================================================
    // 서비스
    // ========================================================================

    /// 서비스 등록 - scope가 정리되면 함께 제거됨
    pub fn provide(
        self: &Arc<Self>,
        scope: ScopeId,
        epoch: u64,
        name: &str,
        value: ServiceValue,
        type_name: &'static str,
    ) -> Result<Option<EffectId>> {
        {
            let mut state = self.state.lock();
            if !state.scopes.is_live(scope, epoch) {
                return Err(Error::ScopeDisposed(format!(
                    "cannot provide {} from {}",
                    name,
                    state.scopes.label(scope)
                )));
            }
            state.services.insert(name, value, scope, type_name)?;
        }

        let weak = Arc::downgrade(self);
        let key = name.to_string();
        let effect: Effect = Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.withdraw_service(&key, scope);
            }
            Ok(())
        });

        let effect_id = self.collect(scope, epoch, effect);
        self.on_service_change(name);
        Ok(effect_id)
    }

    fn withdraw_service(self: &Arc<Self>, name: &str, owner: ScopeId) {
        let removed = self.state.lock().services.remove_if_owner(name, owner);
        if removed {
            self.on_service_change(name);
        }
    }

    pub fn service(&self, name: &str) -> Option<ServiceValue> {
        self.state.lock().services.get(name)
    }

    /// 서비스가 생기면 대기 중인 Fork 적용, 사라지면 의존 Fork를 PENDING으로
    fn on_service_change(self: &Arc<Self>, name: &str) {
        let (present, dependents) = {
            let state = self.state.lock();
            let present = state.services.contains(name);
            let dependents: Vec<(ScopeId, ScopeStatus)> = state
                .scopes
                .fork_ids()
                .into_iter()
                .filter(|fork| {
                    state
                        .scopes
                        .descriptor_of(*fork)
                        .map(|descriptor| descriptor.requires().any(|required| required == name))
                        .unwrap_or(false)
                })
                .map(|fork| (fork, state.scopes.status(fork)))
                .collect();
            (present, dependents)
        };

        for (fork, status) in dependents {
            if present && status == ScopeStatus::Pending {
                self.activate_fork(fork);
            } else if !present && status != ScopeStatus::Pending {
                self.suspend_fork(fork);
            }
        }
    }

    /// 의존 서비스가 사라진 Fork - 본문 효과를 롤백하고 PENDING으로
    fn suspend_fork(self: &Arc<Self>, fork: ScopeId) {
        let Some(info) = self.fork_info(fork) else {
            return;
        };

        let configured = self
            .state
            .lock()
            .scopes
            .get(fork)
            .and_then(|node| node.as_fork())
            .map(|node| node.config.is_some())
            .unwrap_or(false);
        if !configured {
            return;
        }

        debug!(fork = %fork, "Required service removed, suspending fork");
        self.reset_scope(info.target);
        {
            let mut state = self.state.lock();
            state.scopes.set_status(fork, ScopeStatus::Pending);
            if !info.reusable {
                state.scopes.set_status(info.runtime, ScopeStatus::Pending);
            }
        }
        self.refresh_runtime(info.runtime);
    }
}
