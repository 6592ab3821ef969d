//! 思维链 Agent
//! Chain-of-thought agent

use super::parser::{DEFAULT_FINAL_ANSWER_FORMAT, ParsedChain, StepParser};
use crate::agent::base::{AgentBase, ExecutionScope};
use crate::agent::prompt::{parse_tool_args, render_task};
use crate::agent::tools::registry::ToolRegistry;
use crate::agent::tools::toolbox::Toolbox;
use async_trait::async_trait;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::components::tool::Tool;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::Agent;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput, value_to_text};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::Instrument;

/// Marker a step uses to request a tool: `USE_TOOL: <name> <input>`.
pub const USE_TOOL_MARKER: &str = "USE_TOOL:";

/// Few-shot 示例
/// Worked example shown before the task in few-shot mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub question: String,
    pub steps: Vec<String>,
    pub answer: String,
}

/// CoT 配置
/// CoT configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoTConfig {
    pub name: String,
    pub description: String,
    /// Append "Let's think step by step"
    pub zero_shot: bool,
    pub few_shot: bool,
    pub few_shot_examples: Vec<FewShotExample>,
    pub show_step_numbers: bool,
    pub require_justification: bool,
    pub final_answer_format: String,
    pub max_steps: usize,
    pub temperature: Option<f32>,
}

impl Default for CoTConfig {
    fn default() -> Self {
        Self {
            name: "cot".to_string(),
            description: "Chain-of-thought reasoning agent".to_string(),
            zero_shot: true,
            few_shot: false,
            few_shot_examples: Vec::new(),
            show_step_numbers: true,
            require_justification: false,
            final_answer_format: DEFAULT_FINAL_ANSWER_FORMAT.to_string(),
            max_steps: 10,
            temperature: None,
        }
    }
}

impl CoTConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.max_steps == 0 {
            return Err(AgentError::ConfigInvalid("cot: max_steps must be at least 1".into()));
        }
        if self.final_answer_format.trim().is_empty() {
            return Err(AgentError::ConfigInvalid(
                "cot: final_answer_format must not be empty".into(),
            ));
        }
        if self.few_shot && self.few_shot_examples.is_empty() {
            return Err(AgentError::ConfigInvalid(
                "cot: few_shot requires at least one example".into(),
            ));
        }
        Ok(())
    }
}

/// 思维链 Agent
/// Chain-of-thought agent
///
/// One model call parsed into ordered steps. When tools are attached and a
/// step asks for one with `USE_TOOL:`, the tool runs and a second call
/// continues the reasoning with the observations.
pub struct CoTAgent {
    base: AgentBase,
    llm: Arc<dyn LLMClient>,
    toolbox: Arc<Toolbox>,
    parser: StepParser,
    config: CoTConfig,
}

impl CoTAgent {
    pub fn builder() -> CoTAgentBuilder {
        CoTAgentBuilder::default()
    }

    pub fn config(&self) -> &CoTConfig {
        &self.config
    }

    pub fn parser(&self) -> &StepParser {
        &self.parser
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are an expert problem solver that uses Chain-of-Thought reasoning.\nBreak down complex problems into clear, logical steps.\nShow your work and reasoning at each step.",
        );
        if self.config.show_step_numbers {
            prompt.push_str("\nNumber each step as \"Step N:\".");
        }
        if self.config.require_justification {
            prompt.push_str("\nProvide justification for each reasoning step.");
        }
        if !self.toolbox.registry().is_empty() {
            prompt.push_str("\n\nWhen a step needs a tool, write a line `USE_TOOL: <tool name> <input>`.\nAvailable tools:");
            for tool in self.toolbox.descriptors() {
                let _ = write!(prompt, "\n- {}: {}", tool.name, tool.description);
            }
        }
        prompt
    }

    fn user_prompt(&self, input: &AgentInput) -> String {
        let cfg = &self.config;
        let mut prompt = String::new();
        if cfg.few_shot {
            prompt.push_str("Here are some examples of step-by-step reasoning:\n\n");
            for example in &cfg.few_shot_examples {
                let _ = writeln!(prompt, "Question: {}", example.question);
                prompt.push_str("Let's think step by step:\n");
                for (i, step) in example.steps.iter().enumerate() {
                    if cfg.show_step_numbers {
                        let _ = writeln!(prompt, "Step {}: {step}", i + 1);
                    } else {
                        let _ = writeln!(prompt, "- {step}");
                    }
                }
                let _ = writeln!(prompt, "{} {}\n", cfg.final_answer_format, example.answer);
            }
            prompt.push_str("Now, let's solve this problem:\n\n");
        }
        let _ = writeln!(prompt, "Question: {}\n", render_task(input));
        if cfg.zero_shot || !cfg.few_shot {
            prompt.push_str("Let's think step by step:\n");
        }
        if cfg.require_justification {
            prompt.push_str("\nFor each step, provide clear justification and show all work.\n");
        }
        let _ = write!(prompt, "\nEnd with: {} [your final answer]", cfg.final_answer_format);
        prompt
    }

    fn request(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        let request = CompletionRequest::new(messages);
        match self.config.temperature {
            Some(t) => request.temperature(t),
            None => request,
        }
    }

    fn record_steps(&self, scope: &ExecutionScope, parsed: &ParsedChain, action: &str) {
        let offset = scope.step_count();
        for (i, step) in parsed.steps.iter().enumerate() {
            if scope.step_count() >= self.config.max_steps {
                tracing::debug!(dropped = parsed.steps.len() - i, "cot step cap reached");
                break;
            }
            scope.step(action, format!("Step {}", offset + i + 1), json!(step));
        }
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
        let mut messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(self.user_prompt(input)),
        ];
        let response = match scope.llm(ctx, self.llm.as_ref(), self.request(messages.clone())).await {
            Ok(r) => r,
            Err(e) => return scope.fail(e, None),
        };

        let parsed = self.parser.parse(&response.content);
        tracing::debug!(steps = parsed.steps.len(), fallback = parsed.fallback, "cot response parsed");
        self.record_steps(scope, &parsed, "Reasoning");
        let mut trace: Vec<String> = parsed.steps.clone();
        let mut final_answer = parsed.final_answer.clone();

        let observations = self.run_tools(ctx, scope, &parsed.steps).await?;
        if !observations.is_empty() {
            let mut block = String::from("Observation:\n");
            for (name, result) in &observations {
                let _ = writeln!(block, "- {name}: {result}");
            }
            block.push_str("\nPlease continue your reasoning with these results.");
            messages.push(ChatMessage::assistant(response.content.clone()));
            messages.push(ChatMessage::user(block));

            match scope.llm(ctx, self.llm.as_ref(), self.request(messages)).await {
                Ok(follow_up) => {
                    let more = self.parser.parse(&follow_up.content);
                    self.record_steps(scope, &more, "Reasoning with Tools");
                    if !more.final_answer.is_empty() {
                        final_answer = more.final_answer;
                    }
                    trace.extend(more.steps);
                }
                Err(e) => return scope.fail(e, Some(json!(final_answer))),
            }
        }

        scope.set_metadata("total_steps", json!(scope.step_count()));
        scope.set_metadata("reasoning_trace", json!(trace));
        scope.set_metadata("parser_fallback", json!(parsed.fallback));
        Ok(scope.succeed(final_answer, "chain of thought complete"))
    }

    /// Run the tools requested by `USE_TOOL:` markers, in step order.
    async fn run_tools(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        steps: &[String],
    ) -> AgentResult<Vec<(String, String)>> {
        let mut observations = Vec::new();
        if self.toolbox.registry().is_empty() {
            return Ok(observations);
        }
        for step in steps {
            let Some((_, request)) = step.split_once(USE_TOOL_MARKER) else {
                continue;
            };
            let request = request.trim();
            let (name, raw) = request.split_once(char::is_whitespace).unwrap_or((request, ""));
            if !self.toolbox.has_tool(name) {
                tracing::debug!(tool = name, "cot step names an unknown tool");
                continue;
            }
            let result = scope.tool(ctx, &self.toolbox, name, parse_tool_args(raw)).await?;
            let text = match &result.data {
                Some(data) if result.success => value_to_text(data),
                _ => result.observation(),
            };
            observations.push((name.to_string(), text));
        }
        Ok(observations)
    }
}

#[async_trait]
impl Agent for CoTAgent {
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

/// CoT Agent 构建器
/// CoT agent builder
#[derive(Default)]
pub struct CoTAgentBuilder {
    llm: Option<Arc<dyn LLMClient>>,
    tools: Vec<Arc<dyn Tool>>,
    toolbox: Option<Arc<Toolbox>>,
    callbacks: Vec<Arc<dyn Callback>>,
    config: CoTConfig,
}

impl CoTAgentBuilder {
    pub fn with_llm(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_toolbox(mut self, toolbox: Arc<Toolbox>) -> Self {
        self.toolbox = Some(toolbox);
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_config(mut self, config: CoTConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    /// Switch to few-shot prompting with the given examples.
    pub fn with_examples(mut self, examples: Vec<FewShotExample>) -> Self {
        self.config.few_shot = true;
        self.config.zero_shot = false;
        self.config.few_shot_examples = examples;
        self
    }

    pub fn build(self) -> AgentResult<CoTAgent> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| AgentError::ConfigInvalid("cot: LLM client not set".to_string()))?;
        let toolbox = self
            .toolbox
            .unwrap_or_else(|| Arc::new(Toolbox::new(Arc::new(ToolRegistry::new()))));
        for tool in self.tools {
            toolbox.registry().register(tool)?;
        }

        let mut base = AgentBase::new(&self.config.name)
            .with_description(&self.config.description)
            .with_capabilities(["chain_of_thought", "step_by_step", "reasoning"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }

        Ok(CoTAgent {
            base,
            llm,
            toolbox,
            parser: StepParser::new(self.config.final_answer_format.clone()),
            config: self.config,
        })
    }
}
