//! Lifecycle - scope 단위로 귀속되는 이벤트 버스
//!
//! 리스너는 등록한 scope와 함께 기록되며, scope가 정리되면 함께 제거됩니다.
//! 리스너 호출 중에는 어떤 lock도 잡고 있지 않으므로 리스너 안에서
//! 등록 / 해제 / emit을 다시 호출해도 안전합니다.

use super::events::{HookKey, InternalChannel, InternalEvent, ReportedError};
use super::scheduler::{Job, Scheduler};
use crate::scope::ScopeId;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use weave_foundation::{Error, LifecycleConfig, Result};

/// 공개 이벤트 리스너
pub type Listener = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// 내부 채널 리스너
pub type InternalListener = Arc<dyn Fn(&InternalEvent) -> Result<()> + Send + Sync>;

/// 리스너 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

impl std::fmt::Display for HookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hook-{}", self.0)
    }
}

#[derive(Clone)]
enum Callback {
    Public(Listener),
    Internal(InternalListener),
}

#[derive(Clone)]
struct HookRecord {
    id: HookId,
    scope: ScopeId,
    callback: Callback,
}

/// panic payload를 문자열로
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// 이벤트 버스 + 적용 작업 스케줄러
pub struct Lifecycle {
    config: LifecycleConfig,
    hooks: Mutex<HashMap<HookKey, Vec<HookRecord>>>,
    hook_counter: AtomicU64,
    errors: Mutex<VecDeque<ReportedError>>,
    error_count: AtomicU64,
    scheduler: Scheduler,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::with_config(LifecycleConfig::default())
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        Self {
            config,
            hooks: Mutex::new(HashMap::new()),
            hook_counter: AtomicU64::new(0),
            errors: Mutex::new(VecDeque::new()),
            error_count: AtomicU64::new(0),
            scheduler: Scheduler::new(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // ========================================================================
    // 등록 / 해제
    // ========================================================================

    fn register(&self, key: HookKey, scope: ScopeId, callback: Callback) -> HookId {
        let id = HookId(self.hook_counter.fetch_add(1, Ordering::SeqCst));
        debug!(hook_id = %id, event = key.label(), scope = %scope, "Registering listener");

        self.hooks.lock().entry(key).or_default().push(HookRecord {
            id,
            scope,
            callback,
        });
        id
    }

    pub(crate) fn register_public(&self, name: &str, scope: ScopeId, listener: Listener) -> HookId {
        self.register(
            HookKey::Public(name.to_string()),
            scope,
            Callback::Public(listener),
        )
    }

    pub(crate) fn register_internal(
        &self,
        channel: InternalChannel,
        scope: ScopeId,
        listener: InternalListener,
    ) -> HookId {
        self.register(
            HookKey::Internal(channel),
            scope,
            Callback::Internal(listener),
        )
    }

    /// 리스너 해제 - 이미 없으면 false
    pub(crate) fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock();
        let mut removed = false;

        hooks.retain(|_, records| {
            if let Some(index) = records.iter().position(|record| record.id == id) {
                records.remove(index);
                removed = true;
            }
            !records.is_empty()
        });

        if removed {
            debug!(hook_id = %id, "Unregistered listener");
        }
        removed
    }

    // ========================================================================
    // Emit
    // ========================================================================

    fn snapshot(&self, key: &HookKey, only_scope: Option<ScopeId>) -> Vec<HookRecord> {
        self.hooks
            .lock()
            .get(key)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| only_scope.map_or(true, |scope| record.scope == scope))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 공개 이벤트 발행 - 등록 순서대로 호출, 리스너 에러는 격리되어 리포트됨
    ///
    /// `only_scope`가 주어지면 해당 scope가 등록한 리스너에게만 전달합니다.
    /// 호출된 리스너 수를 반환합니다.
    pub fn emit_public(&self, name: &str, payload: &Value, only_scope: Option<ScopeId>) -> usize {
        let records = self.snapshot(&HookKey::Public(name.to_string()), only_scope);

        for record in &records {
            let Callback::Public(listener) = &record.callback else {
                continue;
            };

            if self.config.debug_events {
                trace!(hook_id = %record.id, event = name, scope = %record.scope, "Delivering event");
            }

            let message = match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
            };

            if let Some(message) = message {
                self.report(Error::listener(name, message), Some(record.scope));
            }
        }

        records.len()
    }

    /// 내부 채널 발행
    ///
    /// `internal/error` 리스너의 에러는 재귀를 막기 위해 로그로만 남깁니다.
    pub fn emit_internal(&self, event: &InternalEvent) -> usize {
        let channel = event.channel();
        let records = self.snapshot(&HookKey::Internal(channel), None);

        for record in &records {
            let Callback::Internal(listener) = &record.callback else {
                continue;
            };

            if self.config.debug_events {
                trace!(hook_id = %record.id, event = channel.as_str(), scope = %record.scope, "Delivering internal event");
            }

            let message = match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
            };

            if let Some(message) = message {
                if channel == InternalChannel::Error {
                    warn!(hook_id = %record.id, error = %message, "Error listener failed");
                } else {
                    self.report(Error::listener(channel.as_str(), message), Some(record.scope));
                }
            }
        }

        records.len()
    }

    /// 에러 리포트 - 히스토리에 남기고 `internal/error`로 한 번 발행
    pub fn report(&self, error: Error, scope: Option<ScopeId>) -> Arc<Error> {
        let error = Arc::new(error);
        self.report_shared(Arc::clone(&error), scope);
        error
    }

    pub(crate) fn report_shared(&self, error: Arc<Error>, scope: Option<ScopeId>) {
        warn!(
            kind = %error.kind(),
            scope = scope.map(|s| s.to_string()).unwrap_or_default(),
            "{}", error
        );

        let reported = ReportedError::new(error, scope);
        self.error_count.fetch_add(1, Ordering::SeqCst);
        {
            let mut errors = self.errors.lock();
            errors.push_back(reported.clone());
            while errors.len() > self.config.error_history {
                errors.pop_front();
            }
        }

        self.emit_internal(&InternalEvent::Error(reported));
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 채널별 리스너 수 (빈 채널 제외)
    pub fn hook_snapshot(&self) -> BTreeMap<String, usize> {
        self.hooks
            .lock()
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(key, records)| (key.label().to_string(), records.len()))
            .collect()
    }

    /// 특정 이벤트의 리스너 수
    pub fn listener_count(&self, name: &str) -> usize {
        let key = match InternalChannel::from_name(name) {
            Some(channel) => HookKey::Internal(channel),
            None => HookKey::Public(name.to_string()),
        };
        self.hooks.lock().get(&key).map_or(0, Vec::len)
    }

    /// 최근 에러 (오래된 순)
    pub fn recent_errors(&self) -> Vec<ReportedError> {
        self.errors.lock().iter().cloned().collect()
    }

    /// 총 리포트된 에러 수
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }

    // ========================================================================
    // 스케줄링
    // ========================================================================

    pub(crate) fn schedule(&self, job: Job) {
        self.scheduler.schedule(job);
    }

    /// 대기 중인 적용 작업 수
    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// 대기 중인 작업을 모두 실행 (실행 중 추가된 작업 포함)
    pub async fn flush(&self) -> usize {
        self.scheduler.flush().await
    }

    /// 작업이 들어올 때마다 flush하는 드라이버 (반환하지 않음)
    pub async fn run(&self) {
        loop {
            self.scheduler.flush().await;
            self.scheduler.wait().await;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("hooks", &self.hook_snapshot())
            .field("pending", &self.pending())
            .field("errors", &self.error_count())
            .finish()
    }
}

/// async 본문 실행 중 panic을 잡아 에러 메시지로
pub(crate) async fn catch_panic<F, T>(future: F) -> std::result::Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(payload.as_ref()))
}
