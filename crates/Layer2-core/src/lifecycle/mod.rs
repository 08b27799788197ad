//! Lifecycle - 이벤트 버스, 내부 채널, 적용 스케줄러

mod bus;
pub mod events;
mod scheduler;

pub use bus::{HookId, InternalListener, Lifecycle, Listener};
pub use events::{names, ForkCause, InternalChannel, InternalEvent, ReportedError};

pub(crate) use bus::{catch_panic, panic_message};
