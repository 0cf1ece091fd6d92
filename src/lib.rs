//! Courier - Telegram 接单机器人
//!
//! 任何用户发来的文本即一个订单，转发给唯一的管理员并附带操作按钮；
//! 管理员「接单」「完成」后，状态变化通知回下单用户。
//!
//! 模块划分：
//! - **audit**: 订单审计文件（每个新订单追加一行）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 订单模型、注册表、生命周期状态机、错误、优雅关闭
//! - **desk**: 入站事件处理入口
//! - **integrations**: Telegram 长轮询 / Webhook
//! - **notify**: 出站通知边界与意图执行
//! - **observability**: 日志初始化
//! - **render**: 固定文案、管理员视图与按钮

pub mod audit;
pub mod config;
pub mod core;
pub mod desk;
pub mod integrations;
pub mod notify;
pub mod observability;
pub mod render;

pub use crate::core::{LifecycleEngine, Order, OrderRegistry, OrderStatus};
pub use desk::OrderDesk;
