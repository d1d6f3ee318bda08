//! 公共 API
//!
//! 宿主程序通过 [`Application`] 启动引导并查询模块。

pub mod app;

pub use app::{AppOptions, Application, ROOT_MODULE_NAME};
