//! 静态配置
//!
//! 优先级：ENV > config.toml > 默认值。配置在启动时加载一次，
//! 之后以引用形式传给需要它的组件，不存在全局单例。

mod structs;

pub use structs::*;
