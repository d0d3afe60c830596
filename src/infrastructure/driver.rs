//! 浏览器驱动接口
//!
//! 探索流程只通过 [`BrowserDriver`] 操作页面，测试中可以替换为脚本化实现。

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{SelectorPattern, Snapshot};

/// 浏览器驱动
///
/// 一个驱动独占一个页面（浏览器上下文），只允许一个会话使用。
#[async_trait]
pub trait BrowserDriver: Send {
    /// 导航并等待加载完成
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// 采集当前页面
    async fn snapshot(&mut self) -> Result<Snapshot>;

    /// 点击第一个可见、未禁用、匹配模式的元素；找不到时返回 `Ok(false)`
    async fn click(&mut self, pattern: &SelectorPattern) -> Result<bool>;

    /// 撤销一次点击：复选/单选再点一次，下拉框恢复第一项，否则重新加载
    async fn revert(&mut self, pattern: &SelectorPattern) -> Result<()>;

    /// 关闭浮层、Cookie 提示等遮挡元素，返回移除数量
    async fn dismiss_overlays(&mut self) -> Result<usize> {
        Ok(0)
    }

    /// 关闭页面
    async fn close(&mut self) -> Result<()>;
}
