//! 页面结构签名
//!
//! 签名只由元素结构决定（标签、类名签名、角色、是否带价格），
//! 不包含选项文字和价格数值，同一布局换一个型号也得到相同签名。

use phf::phf_set;
use sha2::{Digest, Sha256};

use crate::models::Snapshot;

/// 类名签名保留的 token 数量
pub const CLASS_SIGNATURE_TOKENS: usize = 3;

/// 状态类：随交互变化，不属于结构
static STATE_CLASSES: phf::Set<&'static str> = phf_set! {
    "active", "selected", "disabled", "checked", "hover", "focus", "focused",
    "open", "opened", "closed", "expanded", "collapsed", "hidden", "visible",
    "show", "shown", "current", "loading", "loaded", "invalid", "valid", "error",
};

/// 排版工具类前缀（Tailwind / Bootstrap 风格）
const UTILITY_PREFIXES: &[&str] = &[
    "p-", "px-", "py-", "pt-", "pb-", "pl-", "pr-", "m-", "mx-", "my-", "mt-", "mb-", "ml-",
    "mr-", "w-", "h-", "min-", "max-", "text-", "bg-", "border", "rounded", "shadow", "gap-",
    "col-", "row-", "items-", "justify-", "self-", "order-", "z-", "top-", "left-", "right-",
    "bottom-", "font-", "leading-", "tracking-", "opacity-", "transition", "duration-", "ease-",
    "d-", "float-", "overflow-", "align-", "space-", "cursor-",
];

const UTILITY_EXACT: &[&str] = &[
    "flex", "grid", "block", "inline", "inline-block", "inline-flex", "relative", "absolute",
    "fixed", "sticky", "container", "clearfix", "row", "col", "w-full", "h-full", "sr-only",
];

/// 是否为工具类、状态类或构建工具生成的哈希类
pub fn is_utility_class(token: &str) -> bool {
    if token.is_empty() || token.contains(':') {
        return true;
    }
    if STATE_CLASSES.contains(token) || token.starts_with("is-") || token.starts_with("has-") {
        return true;
    }
    // css-1x2y3z、Button_root__a1B2c 之类的生成类名
    if token.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    UTILITY_EXACT.contains(&token) || UTILITY_PREFIXES.iter().any(|p| token.starts_with(p))
}

/// 从原始 className 提取前 N 个结构类名
pub fn class_signature(raw_class_name: &str, max_tokens: usize) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in raw_class_name.split_whitespace() {
        let token = token.to_lowercase();
        if is_utility_class(&token) || tokens.contains(&token) {
            continue;
        }
        tokens.push(token);
        if tokens.len() >= max_tokens {
            break;
        }
    }
    tokens
}

/// 计算页面签名（SHA-256 十六进制）
///
/// 元组排序后再哈希，对元素插入顺序的轻微变化不敏感；
/// 保留重复元组，增删一个控件会改变签名。
pub fn compute_signature(snapshot: &Snapshot) -> String {
    let mut tuples: Vec<String> = snapshot
        .elements
        .iter()
        .filter(|e| e.visible)
        .map(|e| {
            format!(
                "{}|{}|{}|{}",
                e.tag.to_lowercase(),
                e.class_signature.join("."),
                e.role
                    .as_deref()
                    .or(e.input_type.as_deref())
                    .unwrap_or_default(),
                u8::from(e.has_price())
            )
        })
        .collect();
    tuples.sort_unstable();

    let mut hasher = Sha256::new();
    for tuple in &tuples {
        hasher.update(tuple.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
