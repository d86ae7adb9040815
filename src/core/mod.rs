//! 核心层：错误类型、服务生命周期、优雅关闭

pub mod error;
pub mod service;
pub mod shutdown;

pub use error::{ErrorObject, ProtocolError, RegistryError};
pub use service::{RelayService, ServiceError, SERVICE_SHUTDOWN};
pub use shutdown::{
    run_with_graceful_shutdown, RelayCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
