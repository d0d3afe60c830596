//! 基础设施层：持有稀缺资源（Page），只暴露能力

pub mod chromium_driver;
pub mod driver;
pub mod js_executor;

pub use chromium_driver::ChromiumDriver;
pub use driver::BrowserDriver;
pub use js_executor::JsExecutor;
