//! 自问自答 (Self-Ask / Meta-CoT)
//! Self-ask engine
//!
//! The task is decomposed when it looks complex, then each question is
//! answered recursively: follow-up questions are generated and answered
//! first (through the `search` tool for factual lookups), and their
//! answers become context for the parent. An optional self-critique pass
//! rewrites the final answer when the critique asks for changes.

use super::heuristics::Heuristics;
use crate::agent::base::{AgentBase, ExecutionScope, is_fatal};
use crate::agent::prompt::render_task;
use crate::agent::tools::registry::ToolRegistry;
use crate::agent::tools::toolbox::Toolbox;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::components::tool::Tool;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::Agent;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput, ReasoningStep, ToolArgs, value_to_text};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::Instrument;

/// Tool consulted for factual lookups.
pub const SEARCH_TOOL: &str = "search";

/// 追问策略
/// Follow-up question style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStrategy {
    #[default]
    Focused,
    Broad,
    Critical,
}

impl QuestionStrategy {
    fn instruction(&self) -> &'static str {
        match self {
            QuestionStrategy::Focused => {
                "Generate focused questions that directly help answer the main question."
            }
            QuestionStrategy::Broad => {
                "Generate broad questions that explore different aspects of the problem."
            }
            QuestionStrategy::Critical => {
                "Generate critical questions that challenge assumptions and verify facts."
            }
        }
    }
}

/// Self-Ask 配置
/// Self-ask configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelfAskConfig {
    pub name: String,
    pub description: String,
    pub max_questions: usize,
    pub max_depth: usize,
    pub auto_decompose: bool,
    pub self_critique: bool,
    pub question_strategy: QuestionStrategy,
    /// Answers below this confidence are reported as uncertain
    pub confidence_threshold: f64,
}

impl Default for SelfAskConfig {
    fn default() -> Self {
        Self {
            name: "self_ask".to_string(),
            description: "Self-ask reasoning agent".to_string(),
            max_questions: 5,
            max_depth: 3,
            auto_decompose: true,
            self_critique: false,
            question_strategy: QuestionStrategy::Focused,
            confidence_threshold: 0.7,
        }
    }
}

impl SelfAskConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.max_questions == 0 {
            return Err(AgentError::ConfigInvalid(
                "self_ask: max_questions must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(AgentError::ConfigInvalid(format!(
                "self_ask: confidence_threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Main,
    FollowUp,
    Decomposed,
}

/// 问题树节点
/// Node of the question tree
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    pub answer: Option<String>,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub sub_questions: Vec<Question>,
}

impl Question {
    fn new(id: impl Into<String>, text: impl Into<String>, kind: QuestionKind) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            kind,
            answer: None,
            confidence: 0.0,
            evidence: Vec::new(),
            sub_questions: Vec::new(),
        }
    }

    /// Questions in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.sub_questions.iter().map(Question::count).sum::<usize>()
    }

    /// Levels below this question.
    pub fn depth(&self) -> usize {
        self.sub_questions
            .iter()
            .map(|q| q.depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Self-Ask Agent
pub struct SelfAskAgent {
    base: AgentBase,
    llm: Arc<dyn LLMClient>,
    toolbox: Arc<Toolbox>,
    heuristics: Heuristics,
    config: SelfAskConfig,
}

impl SelfAskAgent {
    pub fn builder() -> SelfAskAgentBuilder {
        SelfAskAgentBuilder::default()
    }

    pub fn config(&self) -> &SelfAskConfig {
        &self.config
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
        let task = render_task(input);
        let mut main = Question::new("main", task.clone(), QuestionKind::Main);

        if self.config.auto_decompose && self.heuristics.should_decompose(&task) {
            main.sub_questions = self.decompose(ctx, scope, &main).await?;
            if !main.sub_questions.is_empty() {
                let listed: Vec<&str> = main.sub_questions.iter().map(|q| q.text.as_str()).collect();
                scope.step(
                    "Decompose Question",
                    format!("Decomposed into {} sub-questions", listed.len()),
                    json!(listed),
                );
            }
        }

        if let Err(e) = self.process(ctx, scope, &mut main, 0).await {
            return scope.fail(e, None);
        }
        let mut answer = main.answer.clone().unwrap_or_default();

        if self.config.self_critique {
            answer = self.critique(ctx, scope, &task, answer).await?;
        }

        let confident = main.confidence >= self.config.confidence_threshold;
        scope.set_metadata("total_questions", json!(main.count()));
        scope.set_metadata("max_depth", json!(main.depth()));
        scope.set_metadata("self_critique", json!(self.config.self_critique));
        scope.set_metadata("confidence", json!(main.confidence));
        let message = if confident {
            "self-ask complete"
        } else {
            "self-ask complete; answer confidence below threshold"
        };
        Ok(scope.succeed(answer, message))
    }

    /// 递归处理问题
    /// Answer a question, recursing through its follow-ups
    fn process<'a>(
        &'a self,
        ctx: &'a AgentContext,
        scope: &'a ExecutionScope,
        question: &'a mut Question,
        depth: usize,
    ) -> BoxFuture<'a, AgentResult<()>> {
        async move {
            ctx.check()?;
            if depth >= self.config.max_depth {
                return self.answer_directly(ctx, scope, question).await;
            }
            if question.sub_questions.is_empty() {
                question.sub_questions = self.follow_ups(ctx, scope, question).await?;
            }
            if question.sub_questions.is_empty() {
                return self.answer_directly(ctx, scope, question).await;
            }

            for sub in question.sub_questions.iter_mut() {
                if self.heuristics.needs_external_info(&sub.text) && self.toolbox.has_tool(SEARCH_TOOL) {
                    self.search(ctx, scope, sub).await?;
                } else {
                    self.process(ctx, scope, sub, depth + 1).await?;
                }
                let step = ReasoningStep::new(
                    format!("Self-Ask (depth={depth})"),
                    sub.text.clone(),
                    json!(sub.answer.clone().unwrap_or_default()),
                );
                scope.push_step(match sub.answer {
                    Some(_) => step,
                    None => step.failed("unanswered"),
                });
            }
            self.answer_with_context(ctx, scope, question).await
        }
        .boxed()
    }

    fn record_answer(&self, question: &mut Question, answer: String) {
        question.confidence = self.heuristics.estimate_confidence(&answer);
        question.answer = Some(answer);
    }

    async fn ask(&self, ctx: &AgentContext, scope: &ExecutionScope, messages: Vec<ChatMessage>) -> AgentResult<String> {
        let response = scope
            .llm(ctx, self.llm.as_ref(), CompletionRequest::new(messages))
            .await?;
        Ok(response.content.trim().to_string())
    }

    async fn follow_ups(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        question: &Question,
    ) -> AgentResult<Vec<Question>> {
        let prompt = format!(
            "Given this question: \"{}\"\n\n{}\n\nWhat follow-up questions would help answer this? Generate 2-{} questions.\nIf the question can be answered directly without follow-ups, respond with \"DIRECT_ANSWER\".\n\nFormat each question on a new line starting with \"Q: \"",
            question.text,
            self.config.question_strategy.instruction(),
            self.config.max_questions.max(2),
        );
        let messages = vec![
            ChatMessage::system(
                "You are an expert at asking clarifying and follow-up questions to better understand and solve problems.",
            ),
            ChatMessage::user(prompt),
        ];
        match self.ask(ctx, scope, messages).await {
            Ok(response) => Ok(self.to_questions(&response, &question.id, QuestionKind::FollowUp)),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                tracing::warn!(question = %question.id, error = %e, "follow-up generation failed");
                Ok(Vec::new())
            }
        }
    }

    async fn decompose(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        question: &Question,
    ) -> AgentResult<Vec<Question>> {
        let prompt = format!(
            "Decompose this complex question into simpler sub-questions that, when answered together, will provide the complete answer:\n\nQuestion: {}\n\nGenerate 2-{} sub-questions. Format each on a new line starting with \"Q: \"",
            question.text,
            self.config.max_questions.max(2),
        );
        match self.ask(ctx, scope, vec![ChatMessage::user(prompt)]).await {
            Ok(response) => Ok(self.to_questions(&response, &question.id, QuestionKind::Decomposed)),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "decomposition failed, asking follow-ups instead");
                Ok(Vec::new())
            }
        }
    }

    fn to_questions(&self, response: &str, parent: &str, kind: QuestionKind) -> Vec<Question> {
        self.heuristics
            .parse_questions(response, self.config.max_questions)
            .into_iter()
            .enumerate()
            .map(|(i, text)| Question::new(format!("{parent}_fq_{}", i + 1), text, kind))
            .collect()
    }

    async fn answer_directly(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        question: &mut Question,
    ) -> AgentResult<()> {
        let prompt = format!("Answer this question directly and concisely: {}", question.text);
        let answer = self.ask(ctx, scope, vec![ChatMessage::user(prompt)]).await?;
        self.record_answer(question, answer);
        Ok(())
    }

    async fn answer_with_context(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        question: &mut Question,
    ) -> AgentResult<()> {
        let mut prompt = String::from("Based on the following information:\n");
        let mut evidence = Vec::new();
        for sub in &question.sub_questions {
            if let Some(answer) = &sub.answer {
                let _ = writeln!(prompt, "- {}: {answer}", sub.text);
                evidence.push(format!("{}: {answer}", sub.text));
            }
        }
        let _ = write!(prompt, "\nNow answer the original question: {}", question.text);
        let answer = self.ask(ctx, scope, vec![ChatMessage::user(prompt)]).await?;
        self.record_answer(question, answer);
        question.evidence.extend(evidence);
        Ok(())
    }

    /// Look the question up with the search tool, answering directly when
    /// the lookup fails.
    async fn search(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        question: &mut Question,
    ) -> AgentResult<()> {
        let mut args = ToolArgs::new();
        args.insert("query".to_string(), Value::String(question.text.clone()));
        let result = scope.tool(ctx, &self.toolbox, SEARCH_TOOL, args).await?;
        match result.data {
            Some(data) if result.success => {
                self.record_answer(question, value_to_text(&data));
                question.evidence.push("search result".to_string());
                Ok(())
            }
            _ => {
                tracing::debug!(question = %question.id, "search failed, answering directly");
                self.answer_directly(ctx, scope, question).await
            }
        }
    }

    /// 自我批判
    /// Critique the answer and rewrite it when the critique asks for changes
    async fn critique(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        answer: String,
    ) -> AgentResult<String> {
        let prompt = format!(
            "Critically evaluate this answer to the question:\n\nQuestion: {task}\nAnswer: {answer}\n\nConsider:\n1. Is the answer complete and accurate?\n2. Are there any logical flaws or inconsistencies?\n3. What assumptions were made?\n4. What could be improved?\n\nProvide a brief critique."
        );
        let critique = match self.ask(ctx, scope, vec![ChatMessage::user(prompt)]).await {
            Ok(critique) => critique,
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "self-critique failed, keeping answer");
                return Ok(answer);
            }
        };
        scope.step("Self-Critique", "Critically evaluate the answer", json!(critique));

        if !self.heuristics.needs_refinement(&critique) {
            return Ok(answer);
        }
        let prompt = format!(
            "Given this answer and critique, provide an improved answer:\n\nOriginal Answer: {answer}\nCritique: {critique}\n\nImproved Answer:"
        );
        match self.ask(ctx, scope, vec![ChatMessage::user(prompt)]).await {
            Ok(refined) => {
                scope.step("Refine Answer", "Rewrite the answer after critique", json!(refined));
                Ok(refined)
            }
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "refinement failed, keeping answer");
                Ok(answer)
            }
        }
    }
}

#[async_trait]
impl Agent for SelfAskAgent {
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

/// Self-Ask Agent 构建器
/// Self-ask agent builder
#[derive(Default)]
pub struct SelfAskAgentBuilder {
    llm: Option<Arc<dyn LLMClient>>,
    tools: Vec<Arc<dyn Tool>>,
    toolbox: Option<Arc<Toolbox>>,
    callbacks: Vec<Arc<dyn Callback>>,
    heuristics: Option<Heuristics>,
    config: SelfAskConfig,
}

impl SelfAskAgentBuilder {
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

    pub fn with_heuristics(mut self, heuristics: Heuristics) -> Self {
        self.heuristics = Some(heuristics);
        self
    }

    pub fn with_config(mut self, config: SelfAskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn with_max_questions(mut self, max: usize) -> Self {
        self.config.max_questions = max;
        self
    }

    pub fn with_self_critique(mut self, enabled: bool) -> Self {
        self.config.self_critique = enabled;
        self
    }

    pub fn build(self) -> AgentResult<SelfAskAgent> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| AgentError::ConfigInvalid("self_ask: LLM client not set".to_string()))?;
        let toolbox = self
            .toolbox
            .unwrap_or_else(|| Arc::new(Toolbox::new(Arc::new(ToolRegistry::new()))));
        for tool in self.tools {
            toolbox.registry().register(tool)?;
        }
        let mut base = AgentBase::new(&self.config.name)
            .with_description(&self.config.description)
            .with_capabilities(["self_ask", "decomposition", "reasoning"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }
        Ok(SelfAskAgent {
            base,
            llm,
            toolbox,
            heuristics: self.heuristics.unwrap_or_default(),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::adapters::FunctionTool;
    use mentat_kernel::agent::components::tool::ToolOutput;
    use mentat_kernel::llm::types::CompletionResponse;
    use parking_lot::Mutex;

    /// First rule whose key occurs in the prompt decides the reply.
    struct Rules {
        rules: Vec<(&'static str, &'static str)>,
        calls: Mutex<usize>,
    }

    impl Rules {
        fn new(rules: Vec<(&'static str, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                rules,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMClient for Rules {
        fn provider(&self) -> &str {
            "rules"
        }
        async fn complete(
            &self,
            _ctx: &AgentContext,
            request: CompletionRequest,
        ) -> AgentResult<CompletionResponse> {
            *self.calls.lock() += 1;
            let prompt = request.prompt_text();
            let reply = self
                .rules
                .iter()
                .find(|(key, _)| prompt.contains(key))
                .map(|(_, reply)| *reply)
                .unwrap_or("ok");
            Ok(CompletionResponse::new(reply))
        }
    }

    #[tokio::test]
    async fn test_direct_answer_signal() {
        let llm = Rules::new(vec![
            ("follow-up questions", "DIRECT_ANSWER"),
            ("directly and concisely", "4"),
        ]);
        let agent = SelfAskAgent::builder().with_llm(llm.clone()).build().unwrap();
        let out = agent.invoke(&AgentContext::new(), "What is 2+2?".into()).await.unwrap();
        assert_eq!(out.result, json!("4"));
        assert_eq!(out.metadata["total_questions"], json!(1));
        assert_eq!(*llm.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_follow_ups_answered_within_depth() {
        let llm = Rules::new(vec![
            ("follow-up questions", "Q: What is the capital of France?\nQ: How big is it?"),
            ("directly and concisely", "Paris"),
            ("Now answer the original question", "final"),
        ]);
        let agent = SelfAskAgent::builder()
            .with_llm(llm.clone())
            .with_max_depth(1)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), "Tell me about Paris".into()).await.unwrap();
        assert_eq!(out.result, json!("final"));
        assert_eq!(out.reasoning_steps.len(), 2);
        assert_eq!(out.reasoning_steps[0].action, "Self-Ask (depth=0)");
        assert_eq!(out.reasoning_steps[0].result, json!("Paris"));
        assert_eq!(out.metadata["total_questions"], json!(3));
        assert_eq!(out.metadata["max_depth"], json!(1));
        assert_eq!(*llm.calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_lookup_questions_use_search_tool() {
        let search = FunctionTool::new(
            SEARCH_TOOL,
            "Web search",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
            |_input| async move { Ok(ToolOutput::success("2.1 million")) },
        );
        let llm = Rules::new(vec![
            ("follow-up questions", "Q: How many people live in Paris?"),
            ("Now answer the original question", "About 2.1 million"),
        ]);
        let agent = SelfAskAgent::builder()
            .with_llm(llm)
            .with_tool(Arc::new(search))
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), "Population of Paris".into()).await.unwrap();
        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].input["query"], json!("How many people live in Paris?"));
        assert_eq!(out.reasoning_steps[0].result, json!("2.1 million"));
        assert_eq!(out.result, json!("About 2.1 million"));
    }

    #[tokio::test]
    async fn test_decomposition_and_critique() {
        let llm = Rules::new(vec![
            ("Decompose this complex question", "Q: What is the GDP of France?\nQ: What is the GDP of Germany?"),
            ("follow-up questions", "DIRECT_ANSWER"),
            ("Critically evaluate", "The answer is incomplete."),
            ("provide an improved answer", "improved"),
            ("directly and concisely", "a number"),
            ("Now answer the original question", "draft"),
        ]);
        let agent = SelfAskAgent::builder()
            .with_llm(llm)
            .with_self_critique(true)
            .build()
            .unwrap();
        let out = agent
            .invoke(&AgentContext::new(), "Compare the economies of France and Germany in detail".into())
            .await
            .unwrap();

        assert_eq!(out.reasoning_steps[0].action, "Decompose Question");
        let actions: Vec<&str> = out.reasoning_steps.iter().map(|s| s.action.as_str()).collect();
        assert!(actions.contains(&"Self-Critique"));
        assert_eq!(out.result, json!("improved"));
        assert_eq!(out.metadata["self_critique"], json!(true));
        assert_eq!(out.metadata["total_questions"], json!(3));
    }
}
