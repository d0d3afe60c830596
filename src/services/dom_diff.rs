//! DOM 差分探索
//!
//! 不依赖决策服务的通用模式：找出页面上的控件，逐个点击，
//! 对比点击前后的可见文本，从新增内容中切分选项卡片，然后撤销。

use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::DomDiffLimits;
use crate::error::Result;
use crate::infrastructure::BrowserDriver;
use crate::models::keywords::{
    is_continue_text, is_footer_line, is_ignored_text, is_noise_line, mentions_option,
    OPTION_CLASS_HINTS,
};
use crate::models::page::normalize_text;
use crate::models::{ControlKind, ElementDescriptor, ExtractedOption, SelectorPattern, Snapshot};
use crate::services::learner::concrete_pattern;
use crate::services::price::{extract_price_token, has_price_token, price_delta};

/// 新增行少于这个长度视为噪声
const MIN_LINE_CHARS: usize = 3;
/// 新增行达到这个数量即视为显著变化
const SIGNIFICANT_LINE_COUNT: usize = 3;
/// 控件去重用的标签前缀长度
const LABEL_KEY_CHARS: usize = 50;
/// 单次变化最多切分的卡片数
const MAX_CARDS: usize = 20;

/// `$39k`、`$120k+` 这类卡片标题价格
static HEADLINE_PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\$\s?\d{2,}k").expect("headline price regex"));

/// `6.5 x 10ft`、`8 x 12 ft`
static DIMENSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\d+(?:\.\d+)?\s*[x×]\s*\d+(?:\.\d+)?\s*(?:ft|feet|'|m\b|cm\b)"#)
        .expect("dimension regex")
});

/// `The Solo`、`The Hemlock Sauna`
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:the)\s+[A-Za-z]\w*").expect("title regex"));

// ========== 文本差分 ==========

/// 新增的可见行（按出现顺序，去重，过滤短行和加载动画）
pub fn dom_diff(before: &str, after: &str) -> Vec<String> {
    let existing: HashSet<&str> = before.lines().map(str::trim).collect();
    let mut seen = HashSet::new();
    after
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() >= MIN_LINE_CHARS)
        .filter(|line| !existing.contains(line))
        .filter(|line| !is_noise_line(&normalize_text(line)))
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

/// 新增内容是否值得记录：出现价格、至少 3 行，或提到选项类关键字
pub fn is_significant_change(added: &[String]) -> bool {
    if added.is_empty() {
        return false;
    }
    if added.len() >= SIGNIFICANT_LINE_COUNT {
        return true;
    }
    added
        .iter()
        .any(|line| has_price_token(line) || mentions_option(&normalize_text(line)))
}

// ========== 卡片切分 ==========

/// 从新增内容中切分出的一张选项卡片
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionCard {
    pub title: String,
    pub lines: Vec<String>,
    pub price: Option<String>,
}

fn is_title_line(line: &str) -> bool {
    if line.chars().count() > 40 || has_price_token(line) {
        return false;
    }
    if TITLE_RE.is_match(line) {
        return true;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 2 && letters.iter().all(|c| c.is_uppercase())
}

#[derive(Default)]
struct CardBuilder {
    lines: Vec<String>,
    title: Option<String>,
    price: Option<String>,
    has_dimension: bool,
}

impl CardBuilder {
    /// 当前卡片已有同类字段时，标题行/标题价格/尺寸行开始一张新卡片
    fn starts_new_card(&self, line: &str) -> bool {
        if self.lines.is_empty() {
            return false;
        }
        (is_title_line(line) && self.title.is_some())
            || (HEADLINE_PRICE_RE.is_match(line) && self.price.is_some())
            || (DIMENSION_RE.is_match(line) && self.has_dimension)
    }

    fn push(&mut self, line: &str) {
        if self.title.is_none() && is_title_line(line) {
            self.title = Some(line.to_string());
        }
        if self.price.is_none() {
            self.price = extract_price_token(line);
        }
        self.has_dimension |= DIMENSION_RE.is_match(line);
        self.lines.push(line.to_string());
    }

    fn is_valid(&self) -> bool {
        (self.price.is_some() || self.title.is_some()) && self.lines.len() >= 2
    }

    fn is_complete(&self) -> bool {
        self.lines.len() >= 4 && self.price.is_some() && self.title.is_some()
    }

    fn finish(self) -> Option<OptionCard> {
        if !self.is_valid() {
            return None;
        }
        let title = self
            .title
            .or_else(|| self.lines.first().cloned())
            .unwrap_or_default();
        Some(OptionCard {
            title,
            lines: self.lines,
            price: self.price,
        })
    }
}

/// 按卡片标题（标题价格、尺寸、标题行）把新增内容切成卡片
pub fn segment_option_cards(added: &[String]) -> Vec<OptionCard> {
    let mut cards = Vec::new();
    let mut current = CardBuilder::default();

    for line in added.iter().map(|l| l.trim()) {
        if line.chars().count() < MIN_LINE_CHARS || is_footer_line(&normalize_text(line)) {
            continue;
        }
        if current.starts_new_card(line) {
            cards.extend(std::mem::take(&mut current).finish());
        }
        current.push(line);
        if current.is_complete() {
            cards.extend(std::mem::take(&mut current).finish());
        }
    }
    cards.extend(current.finish());
    cards.truncate(MAX_CARDS);
    cards
}

// ========== 控件发现 ==========

/// 可以点击探索的控件
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredControl {
    pub label: String,
    pub kind: ControlKind,
    /// 越小越先探索
    pub priority: u8,
    pub pattern: SelectorPattern,
}

impl DiscoveredControl {
    fn key(&self) -> String {
        label_key(&self.label)
    }
}

fn label_key(label: &str) -> String {
    normalize_text(label).chars().take(LABEL_KEY_CHARS).collect()
}

fn control_priority(el: &ElementDescriptor) -> u8 {
    let looks_like_card = el
        .class_signature
        .iter()
        .any(|class| OPTION_CLASS_HINTS.iter().any(|hint| class.contains(hint)));
    if looks_like_card {
        return 10;
    }
    match el.control_kind() {
        ControlKind::Radio | ControlKind::Checkbox | ControlKind::Select => 30,
        _ => 50,
    }
}

/// 找出可探索的控件：配置卡片 > 标准表单控件 > 其他可点击元素
///
/// 跳过链接、"继续"按钮和购物车/账号/法律/社交等导航元素，按标签前缀去重。
pub fn discover_controls(snapshot: &Snapshot) -> Vec<DiscoveredControl> {
    let mut seen = HashSet::new();
    let mut controls: Vec<DiscoveredControl> = snapshot
        .actionable()
        .filter(|el| el.control_kind() != ControlKind::Link)
        .filter_map(|el| {
            let text = el.normalized_text();
            if text.is_empty() || is_continue_text(&text) || is_ignored_text(&text) {
                return None;
            }
            Some(DiscoveredControl {
                label: el.text.trim().to_string(),
                kind: el.control_kind(),
                priority: control_priority(el),
                pattern: concrete_pattern(el),
            })
        })
        .filter(|control| seen.insert(control.key()))
        .collect();
    controls.sort_by_key(|c| c.priority);
    controls
}

// ========== 探索 ==========

/// 一次点击产生的界面状态
#[derive(Debug, Clone, Serialize)]
pub struct UiState {
    pub control_label: String,
    pub added_lines: Vec<String>,
    pub cards: Vec<OptionCard>,
    pub price_delta: Option<f64>,
    pub depth: usize,
}

/// DOM 差分探索结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct DomDiffReport {
    pub states: Vec<UiState>,
    pub clicks: usize,
    /// 点击次数或时间预算耗尽
    pub budget_exhausted: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl DomDiffReport {
    /// 转换为选项记录（按类别 + 名称去重）
    pub fn options(&self, model_context: &str) -> Vec<ExtractedOption> {
        let mut seen = HashSet::new();
        self.states
            .iter()
            .flat_map(|state| {
                state.cards.iter().map(move |card| ExtractedOption {
                    category: state.control_label.clone(),
                    component: card.title.clone(),
                    price: card.price.clone(),
                    model_context: model_context.to_string(),
                    image_ref: None,
                })
            })
            .filter(|option| seen.insert(option.dedupe_key()))
            .collect()
    }
}

struct DiffRun {
    report: DomDiffReport,
    visited: HashSet<String>,
    started: Instant,
}

/// DOM 差分探索器
pub struct DomDiffExplorer {
    limits: DomDiffLimits,
}

impl DomDiffExplorer {
    pub fn new(limits: DomDiffLimits) -> Self {
        Self { limits }
    }

    /// 在当前页面上探索，返回发现的界面状态
    ///
    /// 只有初始采集失败会返回错误，单个控件的失败记录日志后跳过。
    pub async fn explore(&self, driver: &mut dyn BrowserDriver) -> Result<DomDiffReport> {
        let initial = driver.snapshot().await?;
        let controls = discover_controls(&initial);
        info!(
            "🔍 DOM 差分探索: {} 个控件 (最多点击 {} 次, 深度 {})",
            controls.len(),
            self.limits.max_clicks_per_page,
            self.limits.max_recursion_depth
        );

        let mut run = DiffRun {
            report: DomDiffReport::default(),
            visited: HashSet::new(),
            started: Instant::now(),
        };
        self.explore_level(driver, &mut run, initial, controls, 0).await;

        run.report.elapsed = run.started.elapsed();
        info!(
            "✅ DOM 差分探索完成: {} 个状态, {} 次点击, 耗时 {:.1}s",
            run.report.states.len(),
            run.report.clicks,
            run.report.elapsed.as_secs_f64()
        );
        Ok(run.report)
    }

    fn budget_exhausted(&self, run: &DiffRun) -> bool {
        run.report.clicks >= self.limits.max_clicks_per_page
            || run.started.elapsed() >= self.limits.time_budget
    }

    fn explore_level<'a>(
        &'a self,
        driver: &'a mut dyn BrowserDriver,
        run: &'a mut DiffRun,
        base: Snapshot,
        controls: Vec<DiscoveredControl>,
        depth: usize,
    ) -> BoxFuture<'a, ()> {
        async move {
            for control in controls {
                if self.budget_exhausted(run) {
                    run.report.budget_exhausted = true;
                    debug!("DOM 差分预算耗尽，停止探索");
                    return;
                }
                if !run.visited.insert(control.key()) {
                    continue;
                }
                run.report.clicks += 1;

                match driver.click(&control.pattern).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("控件不可点击: {}", control.label);
                        continue;
                    }
                    Err(e) => {
                        warn!("⚠️ 点击 {} 失败: {}", control.label, e);
                        continue;
                    }
                }
                if !self.limits.settle_delay.is_zero() {
                    sleep(self.limits.settle_delay).await;
                }

                let after = match driver.snapshot().await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!("⚠️ 点击 {} 后采集失败: {}", control.label, e);
                        self.revert(driver, &control).await;
                        continue;
                    }
                };

                let added = dom_diff(&base.visible_text, &after.visible_text);
                if !is_significant_change(&added) {
                    debug!("  → {} 无显著变化", control.label);
                    self.revert(driver, &control).await;
                    continue;
                }

                let cards = segment_option_cards(&added);
                info!(
                    "  ✓ [{}] 新增 {} 行, {} 张卡片",
                    control.label,
                    added.len(),
                    cards.len()
                );
                run.report.states.push(UiState {
                    control_label: control.label.clone(),
                    added_lines: added,
                    cards,
                    price_delta: price_delta(&base.visible_text, &after.visible_text),
                    depth,
                });

                if depth + 1 < self.limits.max_recursion_depth {
                    let known: HashSet<String> =
                        discover_controls(&base).iter().map(|c| c.key()).collect();
                    let nested: Vec<DiscoveredControl> = discover_controls(&after)
                        .into_iter()
                        .filter(|c| !known.contains(&c.key()) && !run.visited.contains(&c.key()))
                        .collect();
                    if !nested.is_empty() {
                        debug!("  → {} 个嵌套控件 (深度 {})", nested.len(), depth + 1);
                        self.explore_level(&mut *driver, &mut *run, after, nested, depth + 1)
                            .await;
                    }
                }

                self.revert(driver, &control).await;
            }
        }
        .boxed()
    }

    async fn revert(&self, driver: &mut dyn BrowserDriver, control: &DiscoveredControl) {
        if let Err(e) = driver.revert(&control.pattern).await {
            warn!("⚠️ 撤销 {} 失败: {}", control.label, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dom_diff_filters_short_and_noise_lines() {
        let before = "Choose your sauna\nStarting at $39k";
        let after = "Choose your sauna\nStarting at $39k\nok\nLoading...\nCedar interior\nCedar interior";
        assert_eq!(dom_diff(before, after), lines(&["Cedar interior"]));
    }

    #[test]
    fn test_four_price_lines_are_significant() {
        let added = lines(&["Cedar $1,200", "Hemlock $900", "Spruce $800", "Thermo $1,500"]);
        assert!(is_significant_change(&added));
    }

    #[test]
    fn test_spinner_only_is_not_significant() {
        let after = "Configure\nloading spinner\nPlease wait";
        let added = dom_diff("Configure", after);
        assert!(added.is_empty());
        assert!(!is_significant_change(&added));
    }

    #[test]
    fn test_single_line_needs_price_or_keyword() {
        assert!(!is_significant_change(&lines(&["Thanks for visiting"])));
        assert!(is_significant_change(&lines(&["Choose a door handle"])));
        assert!(is_significant_change(&lines(&["+$250"])));
    }

    #[test]
    fn test_segment_option_cards() {
        let added = lines(&[
            "The Solo",
            "2 person capacity",
            "Starting at $39k",
            "The Duo",
            "4 person",
            "Starting at $52k",
            "Copyright 2025 all rights reserved",
        ]);
        let cards = segment_option_cards(&added);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].title, "The Solo");
        assert_eq!(cards[0].price.as_deref(), Some("$39k"));
        assert_eq!(cards[1].title, "The Duo");
        assert_eq!(cards[1].lines.len(), 3);
    }

    #[test]
    fn test_single_line_fragment_is_not_a_card() {
        assert!(segment_option_cards(&lines(&["The Solo"])).is_empty());
    }

    #[test]
    fn test_discover_controls_priority_and_filtering() {
        let el = |tag: &str, class: &str, input_type: Option<&str>, text: &str| ElementDescriptor {
            tag: tag.into(),
            class_signature: vec![class.into()],
            input_type: input_type.map(String::from),
            text: text.into(),
            visible: true,
            ..Default::default()
        };
        let snapshot = Snapshot {
            elements: vec![
                el("button", "btn", None, "Add to cart"),
                el("div", "toggle", None, "Show details"),
                el("input", "field", Some("checkbox"), "Porch"),
                el("div", "option-card", None, "Cedar"),
                el("div", "option-card", None, "Cedar"),
                el("button", "btn", None, "Continue"),
                el("a", "nav", None, "Gallery"),
            ],
            ..Default::default()
        };
        let labels: Vec<String> = discover_controls(&snapshot)
            .into_iter()
            .map(|c| c.label)
            .collect();
        assert_eq!(labels, vec!["Cedar", "Porch", "Show details"]);
    }
}
