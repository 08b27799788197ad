//! 서비스 통합 테스트 - inject 대기, 제공자 정리 시 중단, 선택 의존성
//!
//! `cargo test -p weave-core --test services`

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weave_core::{plugin_fn, App, Error, ErrorKind, Inject, PluginDef, PluginObject, ScopeStatus};

/// `db` 서비스를 요구하고, 본 값을 기록하는 플러그인
fn consumer(applied: &Arc<AtomicUsize>, seen: &Arc<Mutex<Vec<String>>>) -> PluginObject {
    let applied = Arc::clone(applied);
    let seen = Arc::clone(seen);
    PluginObject::new()
        .with_name("consumer")
        .with_inject(Inject::required("db"))
        .with_apply(move |ctx, _| {
            applied.fetch_add(1, Ordering::SeqCst);
            let db = ctx
                .get::<String>("db")
                .ok_or_else(|| Error::ServiceNotFound("db".into()))?;
            seen.lock().push(db.to_string());
            ctx.on("query", |_| Ok(()));
            Ok(())
        })
}

fn provider(url: &'static str) -> PluginDef {
    plugin_fn(move |ctx, _| {
        ctx.provide("db", url.to_string())?;
        Ok(())
    })
}

#[tokio::test]
async fn test_inject_waits_for_service() {
    let app = App::new();
    let applied = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let fork = app.plugin(consumer(&applied, &seen), json!({})).unwrap();
    app.flush().await;

    assert_eq!(fork.status(), ScopeStatus::Pending);
    assert_eq!(fork.runtime().unwrap().status(), ScopeStatus::Pending);
    assert_eq!(applied.load(Ordering::SeqCst), 0);

    app.plugin(provider("postgres://primary"), Value::Null).unwrap();
    app.flush().await;

    assert_eq!(fork.status(), ScopeStatus::Active);
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), vec!["postgres://primary".to_string()]);
    assert_eq!(
        app.services(),
        vec![("db".to_string(), std::any::type_name::<String>())]
    );
}

#[tokio::test]
async fn test_provider_disposal_suspends_dependents() {
    let app = App::new();
    let applied = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let source = app.plugin(provider("postgres://primary"), Value::Null).unwrap();
    let fork = app.plugin(consumer(&applied, &seen), json!({})).unwrap();
    app.flush().await;

    assert_eq!(fork.status(), ScopeStatus::Active);
    assert_eq!(app.lifecycle().listener_count("query"), 1);

    // 제공자가 사라지면 의존 Fork는 롤백 후 대기
    assert!(source.dispose());
    assert!(app.get::<String>("db").is_none());
    assert_eq!(fork.status(), ScopeStatus::Pending);
    assert_eq!(app.lifecycle().listener_count("query"), 0);

    // 다른 scope가 다시 제공하면 재적용
    let disposer = app.provide("db", "postgres://replica".to_string()).unwrap();
    app.flush().await;

    assert_eq!(fork.status(), ScopeStatus::Active);
    assert_eq!(applied.load(Ordering::SeqCst), 2);
    assert_eq!(
        *seen.lock(),
        vec!["postgres://primary".to_string(), "postgres://replica".to_string()]
    );

    assert!(disposer.dispose());
    assert_eq!(fork.status(), ScopeStatus::Pending);
}

#[tokio::test]
async fn test_optional_inject_does_not_block() {
    let app = App::new();
    let found = Arc::new(Mutex::new(None));

    let out = Arc::clone(&found);
    let def = PluginObject::new()
        .with_name("cache-user")
        .with_inject(Inject::optional("cache"))
        .with_apply(move |ctx, _| {
            *out.lock() = Some(ctx.get::<u32>("cache").is_some());
            Ok(())
        });

    let fork = app.plugin(def, json!({})).unwrap();
    app.flush().await;

    assert_eq!(fork.status(), ScopeStatus::Active);
    assert_eq!(*found.lock(), Some(false));

    // 선택 의존성은 제거되어도 영향 없음
    let disposer = app.provide("cache", 1u32).unwrap();
    assert!(disposer.dispose());
    assert_eq!(fork.status(), ScopeStatus::Active);
}

#[tokio::test]
async fn test_service_conflict() {
    let app = App::new();
    app.provide("db", "first".to_string()).unwrap();

    let fork = app.plugin(provider("second"), Value::Null).unwrap();
    app.flush().await;

    // 본문이 충돌을 전파하면 application 에러로 기록됨
    let runtime = fork.runtime().unwrap();
    assert_eq!(runtime.status(), ScopeStatus::Failed);
    assert_eq!(runtime.error().unwrap().kind(), ErrorKind::Application);
    assert_eq!(app.get::<String>("db").as_deref().map(String::as_str), Some("first"));

    let err = app.provide("db", "third".to_string()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
}

#[tokio::test]
async fn test_registry_lookup() {
    let app = App::new();
    let applied = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let def: PluginDef = consumer(&applied, &seen).into();
    assert!(!app.registry().has(&def));

    let fork = app.plugin(def.clone(), json!({})).unwrap();
    let runtimes = app.registry().runtimes(&def);
    assert_eq!(runtimes.len(), 1);
    assert_eq!(Some(runtimes[0].clone()), fork.runtime());
    assert_eq!(
        runtimes[0].plugin_id().map(|id| id.to_string()),
        Some("consumer".to_string())
    );

    assert!(app.dispose_plugin(&def));
    assert!(!app.registry().has(&def));
    assert!(app.registry().is_empty());
}
