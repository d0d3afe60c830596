#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use configurator_explorer::config::{DomDiffLimits, ExplorationLimits};
use configurator_explorer::error::{ExploreError, OracleError, Result};
use configurator_explorer::infrastructure::BrowserDriver;
use configurator_explorer::models::{
    ElementDescriptor, OracleGuidance, OracleOption, SelectorPattern, SessionContext, Snapshot,
    StepAction,
};
use configurator_explorer::services::{DecisionOracle, MemoryHandle};
use configurator_explorer::workflow::ExplorationFlow;

pub const TARGET_URL: &str = "https://www.sauna.example/configure";

// ========== 页面构造 ==========

pub fn element(tag: &str, class: &str, text: &str) -> ElementDescriptor {
    ElementDescriptor {
        tag: tag.to_string(),
        class_signature: vec![class.to_string()],
        text: text.to_string(),
        visible: true,
        ..Default::default()
    }
}

pub fn priced(tag: &str, class: &str, text: &str, price: &str) -> ElementDescriptor {
    ElementDescriptor {
        price_text: Some(price.to_string()),
        ..element(tag, class, text)
    }
}

pub fn page(lines: &[&str], elements: Vec<ElementDescriptor>) -> Snapshot {
    Snapshot {
        url: TARGET_URL.to_string(),
        visible_text: lines.join("\n"),
        elements,
        screenshot: None,
    }
}

// ========== 脚本化浏览器 ==========

/// 页面图：页面 ID → 快照，(页面, 元素序号) → 下一个页面
pub struct ScriptedDriver {
    start: String,
    current: String,
    pages: HashMap<String, Snapshot>,
    links: HashMap<(String, usize), String>,
    history: Vec<String>,
    pub clicks: Vec<String>,
    pub navigations: usize,
    pub reverts: usize,
    pub fail_navigation: bool,
    pub closed: bool,
}

impl ScriptedDriver {
    pub fn new(start: &str) -> Self {
        Self {
            start: start.to_string(),
            current: start.to_string(),
            pages: HashMap::new(),
            links: HashMap::new(),
            history: Vec::new(),
            clicks: Vec::new(),
            navigations: 0,
            reverts: 0,
            fail_navigation: false,
            closed: false,
        }
    }

    pub fn with_page(mut self, id: &str, snapshot: Snapshot) -> Self {
        self.pages.insert(id.to_string(), snapshot);
        self
    }

    pub fn with_link(mut self, from: &str, element_index: usize, to: &str) -> Self {
        self.links
            .insert((from.to_string(), element_index), to.to_string());
        self
    }

    pub fn current_page(&self) -> &str {
        &self.current
    }

    fn current_snapshot(&self) -> Result<&Snapshot> {
        self.pages
            .get(&self.current)
            .ok_or_else(|| ExploreError::capture(format!("unknown page {}", self.current)))
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.navigations += 1;
        if self.fail_navigation {
            return Err(ExploreError::navigation_failed(
                url,
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            ));
        }
        self.current = self.start.clone();
        self.history.clear();
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<Snapshot> {
        self.current_snapshot().cloned()
    }

    async fn click(&mut self, pattern: &SelectorPattern) -> Result<bool> {
        let snapshot = self.current_snapshot()?;
        let Some(index) = snapshot
            .elements
            .iter()
            .position(|e| e.is_actionable() && pattern.matches(e))
        else {
            return Ok(false);
        };
        self.clicks.push(snapshot.elements[index].text.clone());
        if let Some(next) = self.links.get(&(self.current.clone(), index)).cloned() {
            let previous = std::mem::replace(&mut self.current, next);
            self.history.push(previous);
        }
        Ok(true)
    }

    async fn revert(&mut self, _pattern: &SelectorPattern) -> Result<()> {
        self.reverts += 1;
        if let Some(previous) = self.history.pop() {
            self.current = previous;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// 三步配置器：型号 → 木材 → 汇总
pub fn sauna_configurator() -> ScriptedDriver {
    ScriptedDriver::new("model")
        .with_page(
            "model",
            page(
                &["Build your sauna", "Step 1: Model", "The Solo", "The Duo", "Continue"],
                vec![
                    priced("div", "model-card", "The Solo", "$39,000"),
                    priced("div", "model-card", "The Duo", "$52,000"),
                    element("button", "btn-next", "Continue"),
                ],
            ),
        )
        .with_page(
            "wood",
            page(
                &["Step 2: Wood", "Cedar", "Thermo-aspen", "Continue"],
                vec![
                    element("div", "option-card", "Cedar"),
                    element("div", "option-card", "Thermo-aspen"),
                    element("button", "btn-next", "Continue"),
                ],
            ),
        )
        .with_page(
            "summary",
            page(
                &["Your sauna", "Total $45,200", "Add to cart"],
                vec![
                    priced("div", "summary-line", "Total $45,200", "$45,200"),
                    element("button", "btn-cart", "Add to cart"),
                ],
            ),
        )
        .with_link("model", 2, "wood")
        .with_link("wood", 2, "summary")
}

const HOME_LINES: [&str; 4] = [
    "Build your sauna",
    "Choose a model",
    "Outdoor saunas",
    "Shipping info",
];

const OUTDOOR_LINES: [&str; 7] = [
    "The Solo",
    "2 person capacity",
    "Starting at $39k",
    "The Duo",
    "4 person",
    "Starting at $52k",
    "Cedar interior",
];

fn home_controls() -> Vec<ElementDescriptor> {
    vec![
        element("div", "model-tile", "Outdoor saunas"),
        element("button", "btn-cart", "Add to cart"),
        element("button", "btn-next", "Continue"),
        element("div", "faq-toggle", "Shipping info"),
    ]
}

fn outdoor_controls() -> Vec<ElementDescriptor> {
    let mut controls = home_controls();
    controls.push(element("div", "wood-swatch", "Cedar interior"));
    controls
}

/// 展开式配置器：点击型号分类展开卡片，卡片里还有木材色块
pub fn expanding_configurator() -> ScriptedDriver {
    let outdoor: Vec<&str> = HOME_LINES.iter().chain(OUTDOOR_LINES.iter()).copied().collect();
    let mut cedar = outdoor.clone();
    cedar.extend(["Cedar interior selected", "Interior upgrade +$1,200"]);
    let mut shipping = HOME_LINES.to_vec();
    shipping.push("Ships in 4 weeks");

    ScriptedDriver::new("home")
        .with_page("home", page(&HOME_LINES, home_controls()))
        .with_page("outdoor", page(&outdoor, outdoor_controls()))
        .with_page("outdoor_cedar", page(&cedar, outdoor_controls()))
        .with_page("shipping", page(&shipping, home_controls()))
        .with_link("home", 0, "outdoor")
        .with_link("home", 3, "shipping")
        .with_link("outdoor", 4, "outdoor_cedar")
}

pub fn diff_limits() -> DomDiffLimits {
    DomDiffLimits {
        settle_delay: std::time::Duration::ZERO,
        ..DomDiffLimits::default()
    }
}

// ========== 脚本化决策服务 ==========

#[derive(Debug, Clone, PartialEq)]
pub struct OracleCall {
    pub model: String,
    pub step_index: u32,
}

/// 按顺序返回预设的决策，用完后返回错误
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<std::result::Result<OracleGuidance, OracleError>>>,
    calls: Mutex<Vec<OracleCall>>,
}

impl ScriptedOracle {
    pub fn new(
        responses: impl IntoIterator<Item = std::result::Result<OracleGuidance, OracleError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<OracleCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn consult(
        &self,
        _snapshot: &Snapshot,
        ctx: &SessionContext,
    ) -> std::result::Result<OracleGuidance, OracleError> {
        self.calls.lock().unwrap().push(OracleCall {
            model: ctx.model_name.clone(),
            step_index: ctx.step_index,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(OracleError::EmptyResponse {
                    model: "scripted".to_string(),
                })
            })
    }
}

// ========== 决策构造 ==========

pub fn continue_button() -> SelectorPattern {
    SelectorPattern::from_element(&element("button", "btn-next", "Continue"))
        .with_text_hint("Continue")
}

pub fn card(class: &str, text: &str) -> SelectorPattern {
    SelectorPattern::from_element(&element("div", class, text)).with_text_hint(text)
}

pub fn options(category: &str, components: &[&str]) -> Vec<OracleOption> {
    components
        .iter()
        .map(|c| OracleOption {
            category: category.to_string(),
            component: c.to_string(),
            price: None,
            image_ref: None,
        })
        .collect()
}

/// 选择一张卡片后点击"继续"
pub fn select_and_continue(
    step_name: &str,
    new_options: Vec<OracleOption>,
    option: SelectorPattern,
) -> OracleGuidance {
    OracleGuidance {
        step_name: Some(step_name.to_string()),
        new_options,
        recommended_action: Some(StepAction::SelectAndAdvance {
            option,
            advance: continue_button(),
        }),
        complete: false,
    }
}

pub fn advance(pattern: SelectorPattern) -> OracleGuidance {
    OracleGuidance {
        recommended_action: Some(StepAction::Advance { advance: pattern }),
        ..Default::default()
    }
}

pub fn complete() -> OracleGuidance {
    OracleGuidance {
        complete: true,
        ..Default::default()
    }
}

/// 型号页 + 木材页 + 完成
pub fn sauna_guidance() -> Vec<std::result::Result<OracleGuidance, OracleError>> {
    vec![
        Ok(select_and_continue(
            "Model",
            options("Model", &["The Solo", "The Duo"]),
            card("model-card", "The Solo"),
        )),
        Ok(select_and_continue(
            "Wood",
            options("Wood", &["Cedar", "Thermo-aspen"]),
            card("option-card", "Cedar"),
        )),
        Ok(complete()),
    ]
}

pub fn test_limits() -> ExplorationLimits {
    ExplorationLimits {
        settle_delay: std::time::Duration::ZERO,
        ..ExplorationLimits::default()
    }
}

pub fn flow_with(oracle: Option<Arc<ScriptedOracle>>, memory: MemoryHandle) -> ExplorationFlow {
    let oracle = oracle.map(|o| o as Arc<dyn DecisionOracle>);
    ExplorationFlow::new(oracle, memory, test_limits())
}
