//! 상태 머신 통합 테스트 - 설정 에러 / 본문 에러의 귀속
//!
//! `cargo test -p weave-core --test status`

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use weave_core::{
    plugin_fn, App, Context, Error, ErrorKind, InternalChannel, InternalEvent, Plugin, PluginDef,
    PluginObject, Result, RuntimeConfig, ScopeStatus,
};

const EVENT: &str = "custom-event";

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// `internal/error` 발생 횟수 관찰
fn watch_errors(app: &App) -> Arc<AtomicUsize> {
    let errors = counter();
    let seen = Arc::clone(&errors);
    app.on_internal(InternalChannel::Error, move |event| {
        if let InternalEvent::Error(_) = event {
            seen.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    });
    errors
}

/// 호출 횟수를 세고 EVENT 리스너를 등록하는 본문
fn listening_object(applied: &Arc<AtomicUsize>, callback: &Arc<AtomicUsize>) -> PluginObject {
    let applied = Arc::clone(applied);
    let callback = Arc::clone(callback);
    PluginObject::new().with_apply(move |ctx, _| {
        applied.fetch_add(1, Ordering::SeqCst);
        let callback = Arc::clone(&callback);
        ctx.on(EVENT, move |_| {
            callback.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok(())
    })
}

fn foo_schema(config: Value) -> Result<Value> {
    if config["foo"] == true {
        Ok(config)
    } else {
        Err(Error::config("invalid config"))
    }
}

#[tokio::test]
async fn test_invalid_config_main() {
    let app = App::new();
    let errors = watch_errors(&app);
    let applied = counter();
    let callback = counter();

    let def = listening_object(&applied, &callback).with_config(foo_schema);
    let fork = app.plugin(def, Value::Null).unwrap();

    // 검증은 동기적으로 실패
    assert_eq!(fork.status(), ScopeStatus::Failed);
    assert_eq!(fork.runtime().unwrap().status(), ScopeStatus::Failed);
    assert_eq!(fork.error().unwrap().kind(), ErrorKind::Configuration);
    assert_eq!(count(&applied), 0);
    assert_eq!(count(&errors), 1);

    assert!(fork.update(json!({ "foo": true })));
    app.flush().await;

    assert_eq!(fork.status(), ScopeStatus::Active);
    assert_eq!(fork.runtime().unwrap().status(), ScopeStatus::Active);
    assert!(fork.error().is_none());
    assert_eq!(count(&applied), 1);
    assert_eq!(count(&errors), 1);

    app.emit(EVENT, &Value::Null);
    assert_eq!(count(&callback), 1);
}

#[tokio::test]
async fn test_invalid_config_fork() {
    let app = App::new();
    let errors = watch_errors(&app);
    let applied = counter();
    let callback = counter();

    let def = listening_object(&applied, &callback)
        .with_reusable(true)
        .with_config(foo_schema);

    let fork1 = app.plugin(def.clone(), Value::Null).unwrap();
    let fork2 = app.plugin(def, json!({ "foo": true })).unwrap();
    app.flush().await;

    assert_eq!(fork1.status(), ScopeStatus::Failed);
    assert_eq!(fork2.status(), ScopeStatus::Active);
    assert_eq!(fork1.runtime(), fork2.runtime());
    assert_eq!(fork2.runtime().unwrap().status(), ScopeStatus::Active);
    assert_eq!(count(&applied), 1);
    assert_eq!(count(&errors), 1);

    app.emit(EVENT, &Value::Null);
    assert_eq!(count(&callback), 1);
}

#[tokio::test]
async fn test_plugin_error_main() {
    let app = App::new();
    let errors = watch_errors(&app);
    let applied = counter();
    let callback = counter();

    let (seen_applied, seen_callback) = (Arc::clone(&applied), Arc::clone(&callback));
    let fork = app
        .plugin(
            plugin_fn(move |ctx, _| {
                seen_applied.fetch_add(1, Ordering::SeqCst);
                let callback = Arc::clone(&seen_callback);
                ctx.on(EVENT, move |_| {
                    callback.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Err(Error::from("plugin error"))
            }),
            Value::Null,
        )
        .unwrap();
    app.flush().await;

    let runtime = fork.runtime().unwrap();
    assert_eq!(runtime.status(), ScopeStatus::Failed);
    assert_eq!(runtime.error().unwrap().kind(), ErrorKind::Application);
    assert_eq!(fork.status(), ScopeStatus::Active);
    assert_eq!(count(&applied), 1);
    assert_eq!(count(&errors), 1);

    // 실패한 시도의 리스너는 롤백됨
    app.emit(EVENT, &Value::Null);
    assert_eq!(count(&callback), 0);
    assert_eq!(app.lifecycle().listener_count(EVENT), 0);
}

#[tokio::test]
async fn test_plugin_error_fork() {
    let app = App::new();
    let errors = watch_errors(&app);
    let applied = counter();
    let callback = counter();

    let (seen_applied, seen_callback) = (Arc::clone(&applied), Arc::clone(&callback));
    let def = PluginObject::new()
        .with_reusable(true)
        .with_apply(move |ctx, config| {
            seen_applied.fetch_add(1, Ordering::SeqCst);
            let callback = Arc::clone(&seen_callback);
            ctx.on(EVENT, move |_| {
                callback.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            if config["foo"] == true {
                Ok(())
            } else {
                Err(Error::from("plugin error"))
            }
        });

    let fork1 = app.plugin(def.clone(), Value::Null).unwrap();
    let fork2 = app.plugin(def.clone(), json!({ "foo": true })).unwrap();
    app.flush().await;

    assert_eq!(fork1.status(), ScopeStatus::Failed);
    assert_eq!(fork2.status(), ScopeStatus::Active);
    assert_eq!(fork2.runtime().unwrap().status(), ScopeStatus::Active);
    assert_eq!(count(&applied), 2);
    assert_eq!(count(&errors), 1);

    app.emit(EVENT, &Value::Null);
    assert_eq!(count(&callback), 1);

    // 고친 설정으로 복구
    assert!(fork1.update(json!({ "foo": true })));
    app.flush().await;
    assert_eq!(fork1.status(), ScopeStatus::Active);
    assert_eq!(count(&applied), 3);

    app.emit(EVENT, &Value::Null);
    assert_eq!(count(&callback), 3);
}

#[tokio::test]
async fn test_reusable_runtime_fails_when_every_fork_fails() {
    let app = App::new();
    let def = PluginObject::new()
        .with_name("always-fails")
        .with_reusable(true)
        .with_apply(|_, _| Err(Error::from("nope")));

    let fork1 = app.plugin(def.clone(), json!({})).unwrap();
    let fork2 = app.plugin(def, json!({})).unwrap();
    app.flush().await;

    assert_eq!(fork1.status(), ScopeStatus::Failed);
    assert_eq!(fork2.status(), ScopeStatus::Failed);
    assert_eq!(fork1.runtime().unwrap().status(), ScopeStatus::Failed);
    assert_eq!(fork1.runtime().unwrap().forks().len(), 2);
}

#[tokio::test]
async fn test_status_before_flush_is_loading() {
    let app = App::new();
    let fork = app.plugin(plugin_fn(|_, _| Ok(())), json!({})).unwrap();

    assert_eq!(fork.status(), ScopeStatus::Loading);
    assert_eq!(app.lifecycle().pending(), 1);

    assert_eq!(app.flush().await, 1);
    assert_eq!(fork.status(), ScopeStatus::Active);
}

#[tokio::test]
async fn test_false_config_disables() {
    let app = App::new();
    let applied = counter();
    let callback = counter();

    let fork = app
        .plugin(listening_object(&applied, &callback), Value::Bool(false))
        .unwrap();
    app.flush().await;

    assert!(fork.is_disabled());
    assert_eq!(fork.status(), ScopeStatus::Pending);
    assert_eq!(count(&applied), 0);

    assert!(fork.update(Value::Bool(true)));
    app.flush().await;
    assert!(!fork.is_disabled());
    assert_eq!(fork.status(), ScopeStatus::Active);
    assert_eq!(fork.options(), Some(json!({})));
    assert_eq!(count(&applied), 1);

    // 다시 비활성화하면 본문 효과가 롤백됨
    assert!(fork.update(Value::Bool(false)));
    assert_eq!(fork.status(), ScopeStatus::Pending);
    app.emit(EVENT, &Value::Null);
    assert_eq!(count(&callback), 0);
}

#[tokio::test]
async fn test_panic_in_body_is_contained() {
    let app = App::new();
    let errors = watch_errors(&app);

    let fork = app
        .plugin(plugin_fn(|_, _| panic!("body exploded")), json!({}))
        .unwrap();
    app.flush().await;

    let runtime = fork.runtime().unwrap();
    assert_eq!(runtime.status(), ScopeStatus::Failed);
    assert!(matches!(
        runtime.error().as_deref(),
        Some(Error::Panicked { message, .. }) if message.contains("body exploded")
    ));
    assert_eq!(count(&errors), 1);
    assert_eq!(app.lifecycle().recent_errors().len(), 1);
}

#[tokio::test]
async fn test_error_history_from_config() {
    let config = RuntimeConfig::from_toml_str("[lifecycle]\nerror_history = 1\n").unwrap();
    let app = App::with_config(config);

    for _ in 0..3 {
        app.plugin(
            plugin_fn(|_, _| Err(Error::apply("failing", "boom"))),
            json!({}),
        )
        .unwrap();
    }
    app.flush().await;

    assert_eq!(app.lifecycle().error_count(), 3);
    assert_eq!(app.lifecycle().recent_errors().len(), 1);
}

// ============================================================================
// 실패한 업데이트 / 비동기 본문
// ============================================================================

#[tokio::test]
async fn test_failed_update_rolls_back_listeners() {
    let app = App::new();
    let errors = watch_errors(&app);
    let before = app.lifecycle().hook_snapshot();

    let applied = counter();
    let callback = counter();
    let def = listening_object(&applied, &callback).with_config(foo_schema);

    let fork = app.plugin(def, json!({ "foo": true })).unwrap();
    app.flush().await;
    assert_eq!(fork.runtime().unwrap().status(), ScopeStatus::Active);
    assert_eq!(app.emit(EVENT, &Value::Null), 1);
    assert_eq!(count(&callback), 1);

    // 검증 실패 - 이전 설정의 리스너가 남지 않음
    assert!(fork.update(json!({ "foo": false })));
    app.flush().await;

    assert_eq!(fork.status(), ScopeStatus::Failed);
    assert_eq!(fork.error().unwrap().kind(), ErrorKind::Configuration);
    assert_eq!(app.emit(EVENT, &Value::Null), 0);
    assert_eq!(count(&callback), 1);
    assert_eq!(count(&errors), 1);
    assert_eq!(app.lifecycle().hook_snapshot(), before);

    // 유효한 설정으로 복구
    assert!(fork.update(json!({ "foo": true })));
    app.flush().await;

    assert_eq!(fork.status(), ScopeStatus::Active);
    assert!(fork.error().is_none());
    assert_eq!(fork.runtime().unwrap().status(), ScopeStatus::Active);
    assert_eq!(count(&applied), 2);
    assert_eq!(app.emit(EVENT, &Value::Null), 1);
    assert_eq!(count(&callback), 2);
    assert_eq!(count(&errors), 1);
}

/// 다른 플러그인의 신호를 기다리는 본문
struct Waiter {
    signal: Arc<Notify>,
}

#[async_trait]
impl Plugin for Waiter {
    fn name(&self) -> &str {
        "waiter"
    }

    async fn apply(&self, _ctx: &Context, _config: &Value) -> Result<()> {
        self.signal.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_suspended_body_does_not_block_later_applies() {
    let app = App::new();
    let signal = Arc::new(Notify::new());

    let waiter = app
        .plugin(
            PluginDef::from_plugin(Waiter {
                signal: Arc::clone(&signal),
            }),
            json!({}),
        )
        .unwrap();

    let notify = Arc::clone(&signal);
    let signaller = app
        .plugin(
            plugin_fn(move |_, _| {
                notify.notify_one();
                Ok(())
            }),
            json!({}),
        )
        .unwrap();

    let executed = tokio::time::timeout(Duration::from_secs(2), app.flush())
        .await
        .expect("flush should not wait on a suspended body");
    assert_eq!(executed, 2);

    assert_eq!(signaller.runtime().unwrap().status(), ScopeStatus::Active);
    assert_eq!(waiter.runtime().unwrap().status(), ScopeStatus::Active);
}
