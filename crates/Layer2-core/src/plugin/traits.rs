//! Plugin traits - 핵심 플러그인 인터페이스

use crate::context::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use weave_foundation::Result;

// ============================================================================
// ConfigSchema - 설정 검증 / 정규화
// ============================================================================

/// 설정 스키마
///
/// `validate`는 원본 설정을 받아 변환된 설정을 돌려주거나 에러를 반환합니다.
/// `simplify`는 설정을 저장하기 전에 정규화할 때 사용합니다 (기본: 그대로).
///
/// `Fn(Value) -> Result<Value>` 클로저는 그대로 스키마로 사용할 수 있습니다.
pub trait ConfigSchema: Send + Sync {
    fn validate(&self, config: Value) -> Result<Value>;

    fn simplify(&self, config: &Value) -> Value {
        config.clone()
    }
}

impl<F> ConfigSchema for F
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn validate(&self, config: Value) -> Result<Value> {
        self(config)
    }
}

// ============================================================================
// Inject - 서비스 의존성 선언
// ============================================================================

/// 의존 서비스 선언
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Inject {
    pub name: String,
    /// 필수 의존성이 없으면 Fork는 PENDING으로 대기
    pub required: bool,
}

impl Inject {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

// ============================================================================
// Plugin Trait - async 본문을 가진 플러그인
// ============================================================================

/// 동기 본문 (`apply(ctx, config)`)
pub type ApplyFn = Arc<dyn Fn(&Context, &Value) -> Result<()> + Send + Sync>;

/// 플러그인 트레이트
///
/// 본문이 비동기 작업을 포함하는 플러그인이 구현합니다.
/// 본문에서 `ctx`를 통해 등록한 모든 효과는 해당 scope에 귀속됩니다.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// 플러그인 이름 (재사용 플러그인의 식별자)
    fn name(&self) -> &str;

    /// 같은 식별자의 설치가 하나의 Runtime을 공유하는지
    fn reusable(&self) -> bool {
        false
    }

    /// 의존 서비스
    fn inject(&self) -> Vec<Inject> {
        vec![]
    }

    /// 설정 스키마
    fn schema(&self) -> Option<Arc<dyn ConfigSchema>> {
        None
    }

    /// 본문
    async fn apply(&self, ctx: &Context, config: &Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_foundation::Error;

    struct RangeSchema;

    impl ConfigSchema for RangeSchema {
        fn validate(&self, config: Value) -> Result<Value> {
            match config.get("port").and_then(Value::as_u64) {
                Some(port) if port > 0 => Ok(config),
                _ => Err(Error::config("port is required")),
            }
        }

        fn simplify(&self, config: &Value) -> Value {
            serde_json::json!({ "port": config["port"] })
        }
    }

    #[test]
    fn test_closure_schema() {
        let schema = |config: Value| -> Result<Value> {
            if config.is_object() {
                Ok(config)
            } else {
                Err(Error::config("expected object"))
            }
        };

        assert!(schema.validate(serde_json::json!({})).is_ok());
        assert!(schema.validate(serde_json::json!(1)).is_err());
        assert_eq!(schema.simplify(&serde_json::json!({"a": 1})), serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_struct_schema() {
        let schema: Arc<dyn ConfigSchema> = Arc::new(RangeSchema);
        assert!(schema.validate(serde_json::json!({"port": 0})).is_err());

        let simplified = schema.simplify(&serde_json::json!({"port": 80, "extra": true}));
        assert_eq!(simplified, serde_json::json!({"port": 80}));
    }

    #[test]
    fn test_inject() {
        assert!(Inject::required("db").required);
        assert!(!Inject::optional("cache").required);
    }
}
