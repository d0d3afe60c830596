//! 浏览器获取：连接已有浏览器或自行启动

pub mod connection;
pub mod headless;

pub use connection::{connect_to_browser, open_session_page};
pub use headless::launch_browser;
