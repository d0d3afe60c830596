//! 文本关键字词表

use phf::phf_set;

/// 推进流程的按钮文本
pub static CONTINUE_KEYWORDS: phf::Set<&'static str> = phf_set! {
    "continue",
    "next",
    "proceed",
    "next step",
    "save and continue",
    "review",
    "done",
};

/// 导航/无关元素，不作为选项
pub static IGNORE_KEYWORDS: phf::Set<&'static str> = phf_set! {
    "add to cart",
    "checkout",
    "buy now",
    "previous",
    "back",
    "login",
    "log in",
    "sign in",
    "sign up",
    "register",
    "account",
    "search",
    "menu",
    "close",
    "cancel",
    "privacy",
    "cookie",
    "cookies",
    "terms",
    "contact",
    "help",
    "share",
    "facebook",
    "twitter",
    "instagram",
    "youtube",
    "linkedin",
    "pinterest",
    "newsletter",
    "subscribe",
};

/// 页面文本中的噪声行（加载动画等）
pub static NOISE_KEYWORDS: phf::Set<&'static str> = phf_set! {
    "loading",
    "spinner",
    "animation",
    "please wait",
};

/// 页脚等与配置无关的文本
pub static FOOTER_KEYWORDS: phf::Set<&'static str> = phf_set! {
    "copyright",
    "all rights reserved",
    "reserved",
    "policy",
    "cookie",
    "terms",
};

/// 说明页面出现了可选项的文本
pub static OPTION_KEYWORDS: phf::Set<&'static str> = phf_set! {
    "price",
    "option",
    "options",
    "select",
    "choose",
    "upgrade",
    "included",
    "add-on",
};

/// 配置器选项容器常见的类名片段
pub static OPTION_CLASS_HINTS: phf::Set<&'static str> = phf_set! {
    "option",
    "choice",
    "card",
    "swatch",
    "variant",
    "model",
    "tile",
    "selector",
};

fn contains_keyword(text: &str, set: &phf::Set<&'static str>) -> bool {
    set.iter().any(|kw| contains_word(text, kw))
}

/// 按词边界查找（"next" 不匹配 "nextgen"）
fn contains_word(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// 文本（已规范化）是否像"继续/下一步"按钮
pub fn is_continue_text(normalized: &str) -> bool {
    !normalized.is_empty() && normalized.len() <= 40 && contains_keyword(normalized, &CONTINUE_KEYWORDS)
}

pub fn is_ignored_text(normalized: &str) -> bool {
    contains_keyword(normalized, &IGNORE_KEYWORDS)
}

pub fn is_noise_line(normalized: &str) -> bool {
    contains_keyword(normalized, &NOISE_KEYWORDS)
}

pub fn is_footer_line(normalized: &str) -> bool {
    contains_keyword(normalized, &FOOTER_KEYWORDS)
}

pub fn mentions_option(normalized: &str) -> bool {
    contains_keyword(normalized, &OPTION_KEYWORDS)
}

/// "继续"按钮的文本前缀提示：截取到关键字结尾
///
/// `"continue to interior"` → `"continue"`，`"go next"` → `"go next"`
pub fn continue_hint(normalized: &str) -> Option<String> {
    CONTINUE_KEYWORDS
        .iter()
        .filter_map(|kw| {
            normalized
                .match_indices(kw)
                .find(|(idx, _)| {
                    let after = normalized[idx + kw.len()..].chars().next();
                    !after.is_some_and(char::is_alphanumeric)
                })
                .map(|(idx, _)| idx + kw.len())
        })
        .min()
        .map(|end| normalized[..end].to_string())
}
