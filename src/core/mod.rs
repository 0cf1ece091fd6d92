//! 核心：订单模型、注册表、生命周期状态机、错误类型与优雅关闭

pub mod error;
pub mod lifecycle;
pub mod order;
pub mod registry;
pub mod shutdown;

pub use error::{AuditError, NotifyError, OrderError, TransitionKind};
pub use lifecycle::{Ack, Action, ActionToken, Decision, Intent, LifecycleEngine, Outcome};
pub use order::{Order, OrderId, OrderStatus, SubmitterProfile, UserId, ViewHandle};
pub use registry::OrderRegistry;
pub use shutdown::{ShutdownManager, ShutdownReason};
