//! Plugin Descriptor - 설치 시점에 정규화된 플러그인 정의
//!
//! 사용자가 넘기는 정의는 세 가지 모양 중 하나입니다:
//! - `Callable`: `apply(ctx, config)` 클로저
//! - `Object`: 이름 / reusable / 스키마 / inject를 가진 빌더 객체
//! - `Trait`: async 본문을 가진 [`Plugin`] 구현체
//!
//! 설치할 때 한 번 [`PluginDescriptor`]로 변환되며, 구조적으로 잘못된 정의는
//! 이 단계에서 즉시 실패합니다.

use super::traits::{ApplyFn, ConfigSchema, Inject, Plugin};
use crate::context::Context;
use crate::lifecycle::{catch_panic, panic_message};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use weave_foundation::{Error, ErrorKind, Result};

/// 이름이 없는 플러그인의 표시 이름
pub const ANONYMOUS: &str = "anonymous";

// ============================================================================
// PluginObject - 빌더 형태의 정의
// ============================================================================

/// 객체 형태의 플러그인 정의
#[derive(Clone, Default)]
pub struct PluginObject {
    name: Option<String>,
    reusable: bool,
    schema: Option<Arc<dyn ConfigSchema>>,
    inject: Vec<Inject>,
    apply: Option<ApplyFn>,
}

impl PluginObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }

    pub fn with_config<S>(mut self, schema: S) -> Self
    where
        S: ConfigSchema + 'static,
    {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn with_inject(mut self, inject: Inject) -> Self {
        self.inject.push(inject);
        self
    }

    pub fn with_apply<F>(mut self, apply: F) -> Self
    where
        F: Fn(&Context, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.apply = Some(Arc::new(apply));
        self
    }
}

impl std::fmt::Debug for PluginObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginObject")
            .field("name", &self.name)
            .field("reusable", &self.reusable)
            .field("inject", &self.inject)
            .field("has_apply", &self.apply.is_some())
            .finish()
    }
}

// ============================================================================
// PluginDef
// ============================================================================

/// 플러그인 정의
#[derive(Clone)]
pub enum PluginDef {
    Callable(ApplyFn),
    Object(PluginObject),
    Trait(Arc<dyn Plugin>),
}

/// 클로저로 플러그인 정의 생성
///
/// 같은 정의를 여러 번 설치하려면 반환값을 `clone()`해서 사용합니다
/// (복제본은 같은 식별자를 가집니다).
pub fn plugin_fn<F>(apply: F) -> PluginDef
where
    F: Fn(&Context, &Value) -> Result<()> + Send + Sync + 'static,
{
    PluginDef::Callable(Arc::new(apply))
}

impl PluginDef {
    pub fn from_plugin<P: Plugin>(plugin: P) -> Self {
        PluginDef::Trait(Arc::new(plugin))
    }
}

impl From<PluginObject> for PluginDef {
    fn from(object: PluginObject) -> Self {
        PluginDef::Object(object)
    }
}

impl From<Arc<dyn Plugin>> for PluginDef {
    fn from(plugin: Arc<dyn Plugin>) -> Self {
        PluginDef::Trait(plugin)
    }
}

impl std::fmt::Debug for PluginDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callable(_) => f.write_str("PluginDef::Callable"),
            Self::Object(object) => f.debug_tuple("PluginDef::Object").field(object).finish(),
            Self::Trait(plugin) => write!(f, "PluginDef::Trait({})", plugin.name()),
        }
    }
}

// ============================================================================
// PluginId
// ============================================================================

/// 중복 제거에 쓰이는 플러그인 식별자
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PluginId {
    /// 명시적 이름
    Named(String),
    /// 정의 참조 (본문 포인터)
    Ref(usize),
}

fn ptr_of<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

impl PluginId {
    /// 정의의 식별자 (구조적으로 잘못된 정의면 None)
    pub fn of(def: &PluginDef) -> Option<PluginId> {
        match def {
            PluginDef::Callable(apply) => Some(PluginId::Ref(ptr_of(apply))),
            PluginDef::Object(object) => match (&object.name, &object.apply) {
                (Some(name), _) if !name.is_empty() => Some(PluginId::Named(name.clone())),
                (None, Some(apply)) => Some(PluginId::Ref(ptr_of(apply))),
                _ => None,
            },
            PluginDef::Trait(plugin) if !plugin.name().is_empty() => {
                Some(PluginId::Named(plugin.name().to_string()))
            }
            PluginDef::Trait(_) => None,
        }
    }
}

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Ref(ptr) => write!(f, "{}@{:x}", ANONYMOUS, ptr),
        }
    }
}

// ============================================================================
// PluginDescriptor
// ============================================================================

#[derive(Clone)]
pub(crate) enum PluginBody {
    Sync(ApplyFn),
    Async(Arc<dyn Plugin>),
}

/// 정규화된 플러그인 정의
#[derive(Clone)]
pub struct PluginDescriptor {
    id: PluginId,
    name: String,
    reusable: bool,
    schema: Option<Arc<dyn ConfigSchema>>,
    inject: Vec<Inject>,
    body: PluginBody,
}

impl PluginDescriptor {
    /// 정의를 정규화 - 구조적 오류는 즉시 실패
    pub fn resolve(def: &PluginDef) -> Result<Self> {
        match def {
            PluginDef::Callable(apply) => Ok(Self {
                id: PluginId::Ref(ptr_of(apply)),
                name: ANONYMOUS.to_string(),
                reusable: false,
                schema: None,
                inject: Vec::new(),
                body: PluginBody::Sync(Arc::clone(apply)),
            }),
            PluginDef::Object(object) => {
                let apply = object.apply.as_ref().ok_or_else(|| {
                    Error::InvalidPlugin(format!(
                        "{} has no apply",
                        object.name.as_deref().unwrap_or(ANONYMOUS)
                    ))
                })?;

                let (id, name) = match &object.name {
                    Some(name) if name.is_empty() => {
                        return Err(Error::InvalidPlugin("plugin name is empty".into()))
                    }
                    Some(name) => (PluginId::Named(name.clone()), name.clone()),
                    None => (PluginId::Ref(ptr_of(apply)), ANONYMOUS.to_string()),
                };

                Ok(Self {
                    id,
                    name,
                    reusable: object.reusable,
                    schema: object.schema.clone(),
                    inject: object.inject.clone(),
                    body: PluginBody::Sync(Arc::clone(apply)),
                })
            }
            PluginDef::Trait(plugin) => {
                let name = plugin.name();
                if name.is_empty() {
                    return Err(Error::InvalidPlugin("plugin name is empty".into()));
                }

                Ok(Self {
                    id: PluginId::Named(name.to_string()),
                    name: name.to_string(),
                    reusable: plugin.reusable(),
                    schema: plugin.schema(),
                    inject: plugin.inject(),
                    body: PluginBody::Async(Arc::clone(plugin)),
                })
            }
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn schema(&self) -> Option<&Arc<dyn ConfigSchema>> {
        self.schema.as_ref()
    }

    pub fn inject(&self) -> &[Inject] {
        &self.inject
    }

    /// 필수 의존 서비스 이름
    pub fn requires(&self) -> impl Iterator<Item = &str> {
        self.inject
            .iter()
            .filter(|inject| inject.required)
            .map(|inject| inject.name.as_str())
    }

    /// 의존 서비스인지 (필수 / 선택 모두)
    pub fn depends_on(&self, service: &str) -> bool {
        self.inject.iter().any(|inject| inject.name == service)
    }

    /// 설정 검증 - 실패는 항상 configuration 에러
    pub(crate) fn validate(&self, config: Value) -> Result<Value> {
        let Some(schema) = &self.schema else {
            return Ok(config);
        };

        let result = catch_unwind(AssertUnwindSafe(|| schema.validate(config)))
            .map_err(|payload| format!("panicked: {}", panic_message(payload.as_ref())));

        match result {
            Ok(Ok(config)) => Ok(config),
            Ok(Err(e)) if e.kind() == ErrorKind::Configuration => Err(e),
            Ok(Err(e)) => Err(self.invalid_config(e.to_string())),
            Err(message) => Err(self.invalid_config(message)),
        }
    }

    fn invalid_config(&self, message: String) -> Error {
        Error::InvalidConfig {
            plugin: self.name.clone(),
            message,
        }
    }

    /// 저장용 정규화
    pub fn simplify(&self, config: &Value) -> Value {
        match &self.schema {
            Some(schema) => schema.simplify(config),
            None => config.clone(),
        }
    }

    /// 본문 실행 - 에러와 panic은 application 에러로
    pub(crate) async fn invoke(&self, ctx: &Context, config: &Value) -> Result<()> {
        let result = match &self.body {
            PluginBody::Sync(apply) => catch_unwind(AssertUnwindSafe(|| apply(ctx, config)))
                .map_err(|payload| panic_message(payload.as_ref())),
            PluginBody::Async(plugin) => catch_panic(plugin.apply(ctx, config)).await,
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.kind() == ErrorKind::Application => Err(e),
            Ok(Err(e)) => Err(Error::apply(&self.name, e.to_string())),
            Err(message) => Err(Error::Panicked {
                plugin: self.name.clone(),
                message,
            }),
        }
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("reusable", &self.reusable)
            .field("inject", &self.inject)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callable_identity_follows_clone() {
        let def = plugin_fn(|_, _| Ok(()));
        let other = plugin_fn(|_, _| Ok(()));

        assert_eq!(PluginId::of(&def), PluginId::of(&def.clone()));
        assert_ne!(PluginId::of(&def), PluginId::of(&other));

        let descriptor = PluginDescriptor::resolve(&def).unwrap();
        assert_eq!(descriptor.name(), ANONYMOUS);
        assert!(!descriptor.is_reusable());
    }

    #[test]
    fn test_object_without_apply_is_structural() {
        let def: PluginDef = PluginObject::new().with_name("broken").into();
        let err = PluginDescriptor::resolve(&def).unwrap_err();
        assert!(err.is_structural());
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_empty_name_is_structural() {
        let def: PluginDef = PluginObject::new()
            .with_name("")
            .with_apply(|_, _| Ok(()))
            .into();
        assert!(PluginDescriptor::resolve(&def).unwrap_err().is_structural());
        assert_eq!(PluginId::of(&def), None);
    }

    #[test]
    fn test_named_object() {
        let def: PluginDef = PluginObject::new()
            .with_name("logger")
            .with_reusable(true)
            .with_inject(Inject::required("sink"))
            .with_inject(Inject::optional("clock"))
            .with_apply(|_, _| Ok(()))
            .into();

        let descriptor = PluginDescriptor::resolve(&def).unwrap();
        assert_eq!(descriptor.id(), &PluginId::Named("logger".into()));
        assert_eq!(descriptor.id().to_string(), "logger");
        assert!(descriptor.is_reusable());
        assert_eq!(descriptor.requires().collect::<Vec<_>>(), vec!["sink"]);
        assert!(descriptor.depends_on("clock"));
    }

    #[test]
    fn test_validate_wraps_errors() {
        let def: PluginDef = PluginObject::new()
            .with_name("strict")
            .with_config(|config: Value| -> Result<Value> {
                if config.get("port").is_some() {
                    Ok(config)
                } else {
                    Err(Error::from("port missing"))
                }
            })
            .with_apply(|_, _| Ok(()))
            .into();

        let descriptor = PluginDescriptor::resolve(&def).unwrap();
        assert!(descriptor.validate(serde_json::json!({"port": 1})).is_ok());

        let err = descriptor.validate(serde_json::json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(err, Error::InvalidConfig { ref plugin, .. } if plugin == "strict"));
    }

    #[test]
    fn test_validate_catches_panics() {
        let def: PluginDef = PluginObject::new()
            .with_config(|_: Value| -> Result<Value> { panic!("bad schema") })
            .with_apply(|_, _| Ok(()))
            .into();

        let descriptor = PluginDescriptor::resolve(&def).unwrap();
        let err = descriptor.validate(Value::Null).unwrap_err();
        assert!(err.to_string().contains("bad schema"));
    }
}
