//! Entry - 설정 트리의 플러그인 항목
//!
//! `weave.plugins.toml` 같은 문서에 저장되는 구조입니다.
//!
//! ```toml
//! [[plugins]]
//! id = "a1b2c3d4"
//! name = "server"
//! disabled = false
//!
//! [plugins.config]
//! port = 8080
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weave_foundation::Result;

// ============================================================================
// EntryOptions - 항목 하나
// ============================================================================

/// 설정 트리 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryOptions {
    /// 항목 ID (비어 있으면 추가할 때 생성)
    #[serde(default)]
    pub id: String,

    /// 카탈로그의 플러그인 이름
    pub name: String,

    /// 비활성화 여부
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,

    /// 플러그인 설정 (없으면 빈 설정)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl EntryOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            disabled: false,
            config: Value::Null,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

// ============================================================================
// LoaderDocument - 문서 전체
// ============================================================================

/// 설정 문서
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderDocument {
    #[serde(default)]
    pub plugins: Vec<EntryOptions>,
}

impl LoaderDocument {
    pub fn new(plugins: Vec<EntryOptions>) -> Self {
        Self { plugins }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_document() {
        let document = LoaderDocument::from_toml_str(
            r#"
            [[plugins]]
            id = "web"
            name = "server"

            [plugins.config]
            port = 8080

            [[plugins]]
            name = "metrics"
            disabled = true
            "#,
        )
        .unwrap();

        assert_eq!(document.plugins.len(), 2);
        assert_eq!(document.plugins[0].id, "web");
        assert_eq!(document.plugins[0].config, json!({ "port": 8080 }));
        assert!(!document.plugins[0].disabled);

        // 생략된 필드는 기본값
        assert_eq!(document.plugins[1].id, "");
        assert!(document.plugins[1].disabled);
        assert_eq!(document.plugins[1].config, Value::Null);
    }

    #[test]
    fn test_write_skips_defaults() {
        let document = LoaderDocument::new(vec![EntryOptions::new("server").with_id("web")]);
        let text = document.to_toml_string().unwrap();

        assert!(text.contains("name = \"server\""));
        assert!(!text.contains("disabled"));
        assert!(!text.contains("config"));
        assert_eq!(LoaderDocument::from_toml_str(&text).unwrap(), document);
    }

    #[test]
    fn test_invalid_document() {
        let err = LoaderDocument::from_toml_str("[[plugins]]\nid = 1\n").unwrap_err();
        assert!(matches!(err, weave_foundation::Error::TomlDe(_)));
    }
}
