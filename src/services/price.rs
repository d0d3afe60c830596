//! 价格片段识别

use once_cell::sync::Lazy;
use regex::Regex;

/// `$1,299`、`€ 49.90`、`$39k+`、`+$250`
static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[+-]?\s?[$€£¥]\s?\d[\d,]*(?:\.\d{1,2})?(?:\s?[kK])?\+?")
        .expect("price regex")
});

/// 返回文本中第一个价格片段
pub fn extract_price_token(text: &str) -> Option<String> {
    PRICE_RE.find(text).map(|m| m.as_str().trim().to_string())
}

pub fn has_price_token(text: &str) -> bool {
    PRICE_RE.is_match(text)
}

/// 价格片段转数值，`k` 表示千
pub fn price_value(token: &str) -> Option<f64> {
    let negative = token.trim_start().starts_with('-');
    let digits: String = token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut value: f64 = digits.parse().ok()?;
    if token.to_lowercase().contains('k') {
        value *= 1000.0;
    }
    Some(if negative { -value } else { value })
}

/// 两段文本中第一个价格的差值（after - before）
pub fn price_delta(before: &str, after: &str) -> Option<f64> {
    let before = price_value(&extract_price_token(before)?)?;
    let after = price_value(&extract_price_token(after)?)?;
    let delta = after - before;
    (delta.abs() > f64::EPSILON).then_some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_price_token() {
        assert_eq!(extract_price_token("Cedar interior $1,299.00").as_deref(), Some("$1,299.00"));
        assert_eq!(extract_price_token("Starting at $39k+").as_deref(), Some("$39k+"));
        assert_eq!(extract_price_token("Included"), None);
    }

    #[test]
    fn test_price_value_and_delta() {
        assert_eq!(price_value("$1,299"), Some(1299.0));
        assert_eq!(price_value("$39k"), Some(39000.0));
        assert_eq!(price_value("-$50"), Some(-50.0));
        assert_eq!(price_delta("Total $10,000", "Total $10,450"), Some(450.0));
        assert_eq!(price_delta("Total $10", "Total $10"), None);
    }
}
