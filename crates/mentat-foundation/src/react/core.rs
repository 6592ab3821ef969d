//! ReAct 核心类型和逻辑
//! ReAct core types and logic

use super::parser::{TurnKind, parse_response};
use crate::agent::base::{AgentBase, ExecutionScope};
use crate::agent::prompt::{parse_tool_args, render_task, truncate_chars};
use crate::agent::tools::registry::ToolRegistry;
use crate::agent::tools::toolbox::Toolbox;
use async_trait::async_trait;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::components::tool::Tool;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::Agent;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput, ReasoningStep};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// ReAct 配置
/// ReAct configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReActConfig {
    pub name: String,
    pub description: String,
    /// 最大步数
    /// Maximum reasoning steps per execution
    pub max_steps: usize,
    /// Text placed before the generated system preamble
    pub prompt_prefix: Option<String>,
    /// Text appended after the task
    pub prompt_suffix: Option<String>,
    pub temperature: Option<f32>,
    /// Observations fed back into the prompt are cut to this many characters
    pub max_observation_chars: usize,
}

impl Default for ReActConfig {
    fn default() -> Self {
        Self {
            name: "react".to_string(),
            description: "Reasoning and acting agent with tool use".to_string(),
            max_steps: 10,
            prompt_prefix: None,
            prompt_suffix: None,
            temperature: None,
            max_observation_chars: 2000,
        }
    }
}

impl ReActConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.name.trim().is_empty() {
            return Err(AgentError::ConfigInvalid("react: name must not be empty".into()));
        }
        if self.max_steps == 0 {
            return Err(AgentError::ConfigInvalid("react: max_steps must be at least 1".into()));
        }
        if self.max_observation_chars == 0 {
            return Err(AgentError::ConfigInvalid(
                "react: max_observation_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

const FORMAT_RULES: &str = r#"Respond using exactly this format:

Thought: <your reasoning about what to do next>
Action: <tool name>
Action Input: <JSON object with the tool arguments, or plain text>

After each action you receive:
Observation: <tool result>

When you know the answer:
Thought: <your final reasoning>
Final Answer: <the answer to the task>

Rules:
- Use only the tools listed above
- Give exactly one Action per response
- If a tool returns an error, think about alternatives"#;

/// ReAct Agent 核心实现
/// ReAct Agent core implementation
pub struct ReActAgent {
    base: AgentBase,
    llm: Arc<dyn LLMClient>,
    toolbox: Arc<Toolbox>,
    config: ReActConfig,
}

impl ReActAgent {
    /// 创建构建器
    /// Create builder
    pub fn builder() -> ReActAgentBuilder {
        ReActAgentBuilder::new()
    }

    pub fn config(&self) -> &ReActConfig {
        &self.config
    }

    pub fn toolbox(&self) -> &Arc<Toolbox> {
        &self.toolbox
    }

    pub fn base(&self) -> &AgentBase {
        &self.base
    }

    /// 构建系统提示词
    /// Build the system prompt: preamble, tool catalog and format rules
    fn build_system_prompt(&self) -> String {
        let catalog = self
            .toolbox
            .descriptors()
            .into_iter()
            .map(|t| format!("- {}: {}\n  Arguments: {}", t.name, t.description, t.args_schema))
            .collect::<Vec<_>>();
        let catalog = if catalog.is_empty() {
            "(no tools available)".to_string()
        } else {
            catalog.join("\n")
        };

        let mut prompt = String::new();
        if let Some(prefix) = &self.config.prompt_prefix {
            prompt.push_str(prefix);
            prompt.push_str("\n\n");
        }
        prompt.push_str(
            "You are a ReAct (Reasoning and Acting) agent. You solve tasks by thinking step by step and using the available tools.\n\nAvailable tools:\n",
        );
        prompt.push_str(&catalog);
        prompt.push_str("\n\n");
        prompt.push_str(FORMAT_RULES);
        prompt
    }

    fn build_request(&self, system: &str, task: &str, transcript: &[String]) -> CompletionRequest {
        let mut user = format!("Question: {task}");
        if let Some(suffix) = &self.config.prompt_suffix {
            user.push_str("\n\n");
            user.push_str(suffix);
        }
        if !transcript.is_empty() {
            user.push_str("\n\n");
            user.push_str(&transcript.join("\n"));
        }
        let mut request = CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(user),
        ])
        .stop("\nObservation:");
        if let Some(t) = self.config.temperature {
            request = request.temperature(t);
        }
        request
    }

    async fn run(&self, ctx: &AgentContext, input: AgentInput, fast: bool) -> AgentResult<AgentOutput> {
        let scope = self.base.begin(&input, fast).await?;
        let result = self.execute(ctx, &input, &scope).instrument(scope.span()).await;
        scope.finish(result).await
    }

    async fn execute(
        &self,
        ctx: &AgentContext,
        input: &AgentInput,
        scope: &ExecutionScope,
    ) -> AgentResult<AgentOutput> {
        let max_steps = self.config.max_steps;
        let system = self.build_system_prompt();
        let task = render_task(input);
        let mut transcript: Vec<String> = Vec::new();
        let mut last_thought = String::new();
        let mut iterations = 0;

        while iterations < max_steps && scope.step_count() < max_steps {
            iterations += 1;
            let started = Instant::now();
            let request = self.build_request(&system, &task, &transcript);
            let response = match scope.llm(ctx, self.llm.as_ref(), request).await {
                Ok(r) => r,
                Err(e) => {
                    let partial = (!last_thought.is_empty()).then(|| json!(last_thought));
                    return scope.fail(e, partial);
                }
            };

            let turn = parse_response(&response.content);
            if let Some(thought) = &turn.thought {
                tracing::debug!(iteration = iterations, thought = %thought, "react thought");
                last_thought = thought.clone();
                transcript.push(format!("Thought: {thought}"));
                scope.push_step(
                    ReasoningStep::new("Reasoning", thought.clone(), Value::Null)
                        .with_duration(started.elapsed().as_millis() as u64),
                );
            }

            match turn.kind {
                TurnKind::FinalAnswer(answer) => {
                    if scope.step_count() < max_steps {
                        scope.step("FinalAnswer", answer.clone(), json!(answer));
                    }
                    scope.set_metadata("iterations", json!(iterations));
                    return Ok(scope.succeed(answer, "final answer reached"));
                }
                TurnKind::Action { tool, input: raw_input } => {
                    if scope.step_count() >= max_steps {
                        break;
                    }
                    transcript.push(format!("Action: {tool}\nAction Input: {raw_input}"));
                    let observation = self.act(ctx, scope, &tool, &raw_input).await?;
                    transcript.push(format!(
                        "Observation: {}",
                        truncate_chars(&observation, self.config.max_observation_chars)
                    ));
                }
                TurnKind::Continue => {}
            }
        }

        tracing::info!(max_steps, "react step budget exhausted without a final answer");
        scope.set_metadata("iterations", json!(iterations));
        Ok(scope.partial(
            last_thought,
            format!("no final answer within {max_steps} steps"),
        ))
    }

    /// 执行工具，返回观察结果
    /// Run one action and return the observation text
    async fn act(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        tool: &str,
        raw_input: &str,
    ) -> AgentResult<String> {
        let action = format!("Tool:{tool}");
        if !self.toolbox.has_tool(tool) {
            let observation = format!("unknown tool: {tool}");
            scope.push_step(
                ReasoningStep::new(action, raw_input, json!(observation)).failed(observation.clone()),
            );
            return Ok(observation);
        }

        let args = parse_tool_args(raw_input);
        let result = scope.tool(ctx, &self.toolbox, tool, args).await?;
        let observation = result.observation();
        let step = ReasoningStep::new(
            action,
            raw_input,
            result.data.clone().unwrap_or_else(|| json!(observation)),
        )
        .with_duration(result.duration_ms);
        let step = match &result.error {
            Some(err) if !result.success => step.failed(err.clone()),
            _ => step,
        };
        scope.push_step(step);
        Ok(observation)
    }
}

#[async_trait]
impl Agent for ReActAgent {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn description(&self) -> &str {
        self.base.description()
    }

    fn capabilities(&self) -> Vec<String> {
        self.base.capabilities()
    }

    async fn invoke(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput> {
        self.run(ctx, input, false).await
    }

    async fn invoke_fast(&self, ctx: &AgentContext, input: AgentInput) -> AgentResult<AgentOutput> {
        self.run(ctx, input, true).await
    }

    fn has_observers(&self) -> bool {
        self.base.has_observers()
    }
}

/// ReAct Agent 构建器
/// ReAct Agent builder
#[derive(Default)]
pub struct ReActAgentBuilder {
    llm: Option<Arc<dyn LLMClient>>,
    tools: Vec<Arc<dyn Tool>>,
    toolbox: Option<Arc<Toolbox>>,
    callbacks: Vec<Arc<dyn Callback>>,
    config: ReActConfig,
}

impl ReActAgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置 LLM 客户端
    /// Set the LLM client
    pub fn with_llm(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 添加工具
    /// Add a tool
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Share an existing toolbox; tools added with `with_tool` are
    /// registered into it.
    pub fn with_toolbox(mut self, toolbox: Arc<Toolbox>) -> Self {
        self.toolbox = Some(toolbox);
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    /// 设置最大步数
    /// Set the step budget
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    pub fn with_prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prompt_prefix = Some(prefix.into());
        self
    }

    pub fn with_prompt_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.prompt_suffix = Some(suffix.into());
        self
    }

    /// 设置完整配置
    /// Set full config
    pub fn with_config(mut self, config: ReActConfig) -> Self {
        self.config = config;
        self
    }

    /// 构建 ReAct Agent
    /// Build ReAct Agent
    pub fn build(self) -> AgentResult<ReActAgent> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| AgentError::ConfigInvalid("react: LLM client not set".to_string()))?;

        let toolbox = match self.toolbox {
            Some(toolbox) => toolbox,
            None => Arc::new(Toolbox::new(Arc::new(ToolRegistry::new()))),
        };
        for tool in self.tools {
            toolbox.registry().register(tool)?;
        }

        let mut base = AgentBase::new(&self.config.name)
            .with_description(&self.config.description)
            .with_capabilities(["react", "tool_use"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }

        Ok(ReActAgent {
            base,
            llm,
            toolbox,
            config: self.config,
        })
    }
}
