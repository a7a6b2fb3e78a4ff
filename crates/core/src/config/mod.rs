//! 配置管理
//!
//! 配置按组件分段，每段都有 `Default` 和 `validate()`。加载顺序为：
//! 内置默认值 → TOML配置文件 → `CRONFLOW_` 前缀的环境变量。
//!
//! ```rust,no_run
//! use cronflow_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/cronflow.toml")).unwrap();
//! println!("调度间隔: {}ms", config.scheduler.tick_interval_ms);
//! ```

pub mod models;

pub use models::*;
