//! Config Sink - 설정 문서 저장소
//!
//! Loader는 항목이 바뀔 때마다 문서 전체를 sink에 씁니다.
//! 리스너 안에서 호출되므로 동기 인터페이스입니다.

use crate::entry::LoaderDocument;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use weave_foundation::Result;

/// 설정 문서 파일명
pub const LOADER_FILE: &str = "weave.plugins.toml";

/// 설정 문서 저장소
pub trait ConfigSink: Send + Sync {
    /// 저장된 문서 (없으면 None)
    fn read(&self) -> Result<Option<LoaderDocument>>;

    fn write(&self, document: &LoaderDocument) -> Result<()>;
}

impl<S: ConfigSink + ?Sized> ConfigSink for Arc<S> {
    fn read(&self) -> Result<Option<LoaderDocument>> {
        (**self).read()
    }

    fn write(&self, document: &LoaderDocument) -> Result<()> {
        (**self).write(document)
    }
}

// ============================================================================
// MemorySink
// ============================================================================

/// 메모리에 TOML 텍스트로 보관하는 sink
#[derive(Default)]
pub struct MemorySink {
    content: Mutex<Option<String>>,
    writes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 초기 문서를 가진 sink
    pub fn with_document(document: &LoaderDocument) -> Result<Self> {
        let sink = Self::new();
        *sink.content.lock() = Some(document.to_toml_string()?);
        Ok(sink)
    }

    /// 마지막으로 쓰인 TOML 텍스트
    pub fn contents(&self) -> Option<String> {
        self.content.lock().clone()
    }

    /// `write` 호출 횟수
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ConfigSink for MemorySink {
    fn read(&self) -> Result<Option<LoaderDocument>> {
        match self.content.lock().as_deref() {
            Some(text) => Ok(Some(LoaderDocument::from_toml_str(text)?)),
            None => Ok(None),
        }
    }

    fn write(&self, document: &LoaderDocument) -> Result<()> {
        let text = document.to_toml_string()?;
        *self.content.lock() = Some(text);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// FileSink
// ============================================================================

/// TOML 파일 sink
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 디렉토리 안의 기본 파일명 사용
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(LOADER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSink for FileSink {
    fn read(&self) -> Result<Option<LoaderDocument>> {
        if !self.path.exists() {
            debug!("Loader file not found at {:?}, using empty", self.path);
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(LoaderDocument::from_toml_str(&content)?))
    }

    fn write(&self, document: &LoaderDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(&self.path, document.to_toml_string()?)?;
        debug!("Saved loader file with {} entries", document.plugins.len());
        Ok(())
    }
}
