//! LLM 决策服务
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（Azure、Gemini、Doubao 等）
//! - 有截图时走 Vision 消息

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::OracleError;
use crate::models::{OracleGuidance, SessionContext, Snapshot};
use crate::services::oracle::breaker::CircuitBreaker;
use crate::services::oracle::response::parse_guidance;
use crate::services::oracle::DecisionOracle;
use crate::utils::logging::truncate_text;

/// 退避上限
const MAX_BACKOFF: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "你是一个产品配置器（configurator）页面分析助手。\
你会收到当前页面的可见文本、带编号的可交互元素列表以及可能的截图。\
你的任务：1) 找出本页面新出现的可选配置项（类别、名称、价格）；\
2) 判断下一步应该选择哪个选项、点击哪个继续按钮；3) 判断配置流程是否已经结束（到达汇总/报价/购物车页面）。\
只返回一个 JSON 对象，不要返回任何其他内容。";

/// LLM 决策服务
///
/// 职责：
/// - 把页面快照和会话上下文组织成提示词
/// - 调用 LLM，限流时指数退避，连续失败时熔断
/// - 把元素编号翻译成结构化选择器模式
pub struct LlmOracle {
    client: Client<OpenAIConfig>,
    model_name: String,
    request_timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
    breaker: CircuitBreaker,
}

impl LlmOracle {
    /// 创建新的 LLM 决策服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            request_timeout: Duration::from_secs(config.oracle_timeout_secs),
            max_retries: config.oracle_max_retries,
            base_backoff: Duration::from_secs(1),
            breaker: CircuitBreaker::new(
                config.oracle_failure_threshold,
                Duration::from_secs(config.oracle_cooldown_secs),
            ),
        }
    }

    /// 通用的 LLM 调用
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息
    /// - `imgs`: 图片 URL（可以是 data URL），追加到用户消息中
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: &str,
        imgs: &[String],
    ) -> Result<String, OracleError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符, 图片 {} 张", user_message.len(), imgs.len());

        let request_failed = |e: &dyn std::fmt::Display| OracleError::RequestFailed {
            model: self.model_name.clone(),
            reason: e.to_string(),
        };

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_message)
            .build()
            .map_err(|e| request_failed(&e))?;

        let user_msg = if imgs.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()
                .map_err(|e| request_failed(&e))?
        } else {
            // 使用 Vision API：文本 + 图片
            let mut content_parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: user_message.to_string(),
                },
            )];
            for url in imgs {
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: Some(ImageDetail::Low),
                        },
                    },
                ));
            }
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()
                .map_err(|e| request_failed(&e))?
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.2)
            .max_tokens(2048u32)
            .build()
            .map_err(|e| request_failed(&e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_api_error(&self.model_name, &e.to_string())
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| OracleError::EmptyResponse {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// 从错误文本识别限流
fn classify_api_error(model: &str, message: &str) -> OracleError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        OracleError::RateLimited {
            model: model.to_string(),
        }
    } else {
        OracleError::RequestFailed {
            model: model.to_string(),
            reason: message.to_string(),
        }
    }
}

/// 构建用户消息
pub fn build_user_message(snapshot: &Snapshot, ctx: &SessionContext) -> String {
    let elements: Vec<serde_json::Value> = snapshot
        .elements
        .iter()
        .enumerate()
        .map(|(index, el)| {
            serde_json::json!({
                "index": index,
                "tag": el.tag,
                "role": el.role.as_deref().or(el.input_type.as_deref()),
                "text": truncate_text(&el.text, 80),
                "price": el.price_text,
                "disabled": el.disabled,
                "selected": el.selected,
            })
        })
        .collect();
    let elements_json = serde_json::to_string(&elements).unwrap_or_default();

    let recent: Vec<String> = ctx
        .recent_options
        .iter()
        .map(|o| format!("{} / {}", o.category, o.component))
        .collect();

    format!(
        r#"站点: {site}
当前型号: {model}
步骤序号: {step} (第 {iteration} 轮)
已经记录过的选项（不要重复返回）: {recent}

【页面可见文本】
{text}

【可交互元素】
{elements}

按以下格式返回 JSON：
{{
  "step_name": "当前步骤名称，如 Exterior / Interior",
  "new_options": [{{"category": "类别", "component": "选项名", "price": "价格或 null", "image_ref": "图片或 null"}}],
  "action": {{"type": "select | select_and_advance | advance | none", "option_index": 元素编号或 null, "advance_index": 元素编号或 null}},
  "complete": false
}}

【规则】
1. option_index / advance_index 必须是上面列表中的 index，且元素未禁用
2. 当前型号为 "{model}" 时，第一步优先选择与型号名称一致的选项
3. 页面需要先选择再继续时使用 select_and_advance
4. 到达汇总、报价、结账页面时 complete 为 true，action 为 none"#,
        site = ctx.site_domain,
        model = ctx.model_name,
        step = ctx.step_index,
        iteration = ctx.iteration,
        recent = if recent.is_empty() { "无".to_string() } else { recent.join("; ") },
        text = truncate_text(&snapshot.visible_text, 4000),
        elements = elements_json,
    )
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn consult(
        &self,
        snapshot: &Snapshot,
        ctx: &SessionContext,
    ) -> Result<OracleGuidance, OracleError> {
        self.breaker.check()?;

        let user_message = build_user_message(snapshot, ctx);
        let imgs: Vec<String> = snapshot
            .screenshot
            .iter()
            .map(|data| format!("data:image/png;base64,{}", data))
            .collect();

        let mut attempt = 0u32;
        loop {
            let result = match timeout(
                self.request_timeout,
                self.send_to_llm(&user_message, SYSTEM_PROMPT, &imgs),
            )
            .await
            {
                Ok(Ok(content)) => parse_guidance(&content, snapshot),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(OracleError::Timeout {
                    timeout_secs: self.request_timeout.as_secs(),
                }),
            };

            match result {
                Ok(guidance) => {
                    self.breaker.record_success();
                    info!(
                        "🤖 决策: 新选项 {} 个, 动作: {}, 完成: {}",
                        guidance.new_options.len(),
                        guidance
                            .recommended_action
                            .as_ref()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| "无".to_string()),
                        guidance.complete
                    );
                    return Ok(guidance);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!("❌ 决策服务重试 {} 次后仍失败: {}", self.max_retries, e);
                        self.breaker.record_failure();
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        "⚠️ 决策服务失败 (第 {} 次): {}，{} 毫秒后重试",
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
