//! Logging - tracing subscriber 초기화

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 전역 tracing subscriber 설치
///
/// `RUST_LOG`가 설정되어 있으면 우선 적용하고, 없으면 `config.level`을 사용합니다.
/// 이미 설치된 경우 false를 반환합니다.
pub fn init_logging(config: &LoggingConfig) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(config.with_target))
        .try_init()
        .is_ok()
}
