//! 程序思维 (Program-of-Thought)
//! Program-of-thought engine
//!
//! The LLM writes a program that computes the answer, the program is checked
//! against a deny-list and executed by a [`CodeExecutor`], and its printed
//! output becomes the result. Validation and execution failures are fed back
//! to the LLM for another attempt until `max_iterations` is reached.

use crate::agent::base::{AgentBase, ExecutionScope, is_fatal};
use crate::agent::prompt::{render_task, truncate_chars};
use async_trait::async_trait;
use mentat_kernel::agent::callback::Callback;
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::core::Agent;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, AgentOutput, ReasoningStep};
use mentat_kernel::llm::client::LLMClient;
use mentat_kernel::llm::types::{ChatMessage, CompletionRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::Instrument;

/// 代码语言
/// Language the generated program is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Python,
    JavaScript,
    Go,
}

impl CodeLanguage {
    pub const ALL: [CodeLanguage; 3] = [CodeLanguage::Python, CodeLanguage::JavaScript, CodeLanguage::Go];

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeLanguage::Python => "python",
            CodeLanguage::JavaScript => "javascript",
            CodeLanguage::Go => "go",
        }
    }

    /// Tags accepted on a fenced code block.
    fn fence_tags(&self) -> &'static [&'static str] {
        match self {
            CodeLanguage::Python => &["python", "py", "python3"],
            CodeLanguage::JavaScript => &["javascript", "js", "node"],
            CodeLanguage::Go => &["go", "golang"],
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            CodeLanguage::Python => {
                "You are an expert Python programmer. Write clean, efficient Python code to solve problems. Use only the standard library unless told otherwise. Print the final answer to stdout, as JSON when the answer is structured."
            }
            CodeLanguage::JavaScript => {
                "You are an expert JavaScript programmer. Write clean, efficient Node.js code to solve problems. Print the final answer with console.log, as JSON when the answer is structured."
            }
            CodeLanguage::Go => {
                "You are an expert Go programmer. Write a complete Go program with package main and func main(). Print the final answer to stdout, as JSON when the answer is structured."
            }
        }
    }
}

impl fmt::Display for CodeLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PoT 配置
/// Program-of-thought configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoTConfig {
    pub name: String,
    pub description: String,
    /// Language used when the task gives no hint
    pub language: CodeLanguage,
    pub allowed_languages: Vec<CodeLanguage>,
    /// Pick the language from keywords in the task
    pub auto_select_language: bool,
    /// Longer programs are rejected and regenerated
    pub max_code_length: usize,
    pub execution_timeout_ms: u64,
    pub max_iterations: usize,
    /// Reject programs touching the deny-list
    pub safe_mode: bool,
    /// Modules exempt from the deny-list
    pub allow_imports: Vec<String>,
    pub python_path: String,
    pub node_path: String,
    pub go_path: String,
}

impl Default for PoTConfig {
    fn default() -> Self {
        Self {
            name: "pot".to_string(),
            description: "Program-of-thought reasoning agent".to_string(),
            language: CodeLanguage::Python,
            allowed_languages: CodeLanguage::ALL.to_vec(),
            auto_select_language: true,
            max_code_length: 2000,
            execution_timeout_ms: 10_000,
            max_iterations: 3,
            safe_mode: true,
            allow_imports: Vec::new(),
            python_path: "python3".to_string(),
            node_path: "node".to_string(),
            go_path: "go".to_string(),
        }
    }
}

impl PoTConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.allowed_languages.is_empty() {
            return Err(AgentError::ConfigInvalid(
                "pot: allowed_languages must not be empty".into(),
            ));
        }
        if !self.allowed_languages.contains(&self.language) {
            return Err(AgentError::ConfigInvalid(format!(
                "pot: default language {} is not allowed",
                self.language
            )));
        }
        if self.max_iterations == 0 || self.max_code_length == 0 {
            return Err(AgentError::ConfigInvalid(
                "pot: max_iterations and max_code_length must be positive".into(),
            ));
        }
        if self.execution_timeout_ms == 0 {
            return Err(AgentError::ConfigInvalid(
                "pot: execution_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// 根据任务关键词选择语言
    /// Choose a language from task keywords, restricted to the allowed set
    pub fn select_language(&self, task: &str) -> CodeLanguage {
        if !self.auto_select_language {
            return self.language;
        }
        let lower = task.to_lowercase();
        let hinted = if ["math", "calculate", "statistic", "numpy"].iter().any(|k| lower.contains(k)) {
            Some(CodeLanguage::Python)
        } else if ["web", "json", "api"].iter().any(|k| lower.contains(k)) {
            Some(CodeLanguage::JavaScript)
        } else if ["concurrent", "parallel", "goroutine"].iter().any(|k| lower.contains(k)) {
            Some(CodeLanguage::Go)
        } else {
            None
        };
        hinted
            .filter(|lang| self.allowed_languages.contains(lang))
            .unwrap_or(self.language)
    }
}

/// 程序执行结果
/// Captured output of one program run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// 代码执行器
/// Runs a generated program
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run `code` and capture its output. A non-zero exit is reported in the
    /// output; `Err` means the program could not be run at all.
    async fn execute(
        &self,
        ctx: &AgentContext,
        language: CodeLanguage,
        code: &str,
        timeout: Duration,
    ) -> AgentResult<ExecutionOutput>;
}

/// 子进程执行器
/// Executor spawning the language interpreter in a scratch directory
///
/// The child sees only `PATH` from the parent environment and is killed when
/// the timeout or cancellation drops the run.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    python: String,
    node: String,
    go: String,
}

impl ProcessExecutor {
    pub fn new(python: impl Into<String>, node: impl Into<String>, go: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            node: node.into(),
            go: go.into(),
        }
    }

    pub fn from_config(config: &PoTConfig) -> Self {
        Self::new(&config.python_path, &config.node_path, &config.go_path)
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::from_config(&PoTConfig::default())
    }
}

#[async_trait]
impl CodeExecutor for ProcessExecutor {
    async fn execute(
        &self,
        ctx: &AgentContext,
        language: CodeLanguage,
        code: &str,
        timeout: Duration,
    ) -> AgentResult<ExecutionOutput> {
        let workdir = tempfile::tempdir()?;
        let (program, file, args): (&str, &str, &[&str]) = match language {
            CodeLanguage::Python => (self.python.as_str(), "main.py", &["main.py"][..]),
            CodeLanguage::JavaScript => (self.node.as_str(), "main.js", &["main.js"][..]),
            CodeLanguage::Go => (self.go.as_str(), "main.go", &["run", "main.go"][..]),
        };
        tokio::fs::write(workdir.path().join(file), code).await?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(workdir.path())
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        if language == CodeLanguage::Go {
            command
                .env("HOME", workdir.path())
                .env("GOCACHE", workdir.path().join(".gocache"));
        }

        let started = Instant::now();
        let run_ctx = ctx.child().with_timeout(timeout);
        let output = run_ctx
            .guard(async {
                command.output().await.map_err(|e| {
                    AgentError::tool_execution(language.as_str(), format!("failed to run {program}: {e}"))
                })
            })
            .await?;

        Ok(ExecutionOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// A fenced block with an optional language tag on the opening line
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:([A-Za-z0-9_+\-]+)[ \t]*\r?\n)?(.*?)```").expect("fence pattern is valid")
});

/// 从回复中提取代码
/// Pull the program out of an LLM reply: a fence tagged with the language
/// wins, then the first fence of any kind, then the whole reply.
pub fn extract_code(response: &str, language: CodeLanguage) -> String {
    let blocks: Vec<(String, &str)> = CODE_FENCE
        .captures_iter(response)
        .map(|caps| {
            let tag = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            let body = caps.get(2).map_or("", |m| m.as_str().trim());
            (tag, body)
        })
        .collect();

    blocks
        .iter()
        .find(|(tag, _)| language.fence_tags().contains(&tag.as_str()))
        .or_else(|| blocks.first())
        .map(|(_, body)| body.to_string())
        .unwrap_or_else(|| response.trim().to_string())
}

const PYTHON_DENIED_MODULES: &[&str] = &["os", "subprocess", "shutil", "socket"];
const PYTHON_DENIED_CALLS: &[&str] = &["eval(", "exec(", "__import__("];
const JS_DENIED: &[&str] = &["eval(", "Function(", "child_process"];
const GO_DENIED_IMPORTS: &[&str] = &["\"os/exec\"", "\"syscall\"", "\"unsafe\""];

/// 代码校验
/// Static checks run before a program is executed
///
/// Safe mode is a coarse deny-list, not a sandbox.
pub fn validate_code(code: &str, language: CodeLanguage, config: &PoTConfig) -> AgentResult<()> {
    if code.trim().is_empty() {
        return Err(AgentError::ParserFailed("no code found in the response".into()));
    }
    let length = code.chars().count();
    if length > config.max_code_length {
        return Err(AgentError::ParserFailed(format!(
            "code is {length} characters, the limit is {}",
            config.max_code_length
        )));
    }

    match language {
        CodeLanguage::Python => {
            if config.safe_mode {
                for module in python_imports(code) {
                    let root = module.split('.').next().unwrap_or(module);
                    if PYTHON_DENIED_MODULES.contains(&root) && !is_allowed(config, root) {
                        return Err(AgentError::ExecutionUnsafe(format!("import of '{root}' is not allowed")));
                    }
                }
                if let Some(call) = PYTHON_DENIED_CALLS
                    .iter()
                    .find(|call| code.contains(*call) && !is_allowed(config, call.trim_end_matches('(')))
                {
                    return Err(AgentError::ExecutionUnsafe(format!("call to '{call}' is not allowed")));
                }
            }
            if !parentheses_balanced(code) {
                return Err(AgentError::ParserFailed("unbalanced parentheses".into()));
            }
        }
        CodeLanguage::JavaScript => {
            if config.safe_mode
                && let Some(pattern) = JS_DENIED
                    .iter()
                    .find(|p| code.contains(*p) && !is_allowed(config, p.trim_end_matches('(')))
            {
                return Err(AgentError::ExecutionUnsafe(format!("'{pattern}' is not allowed")));
            }
        }
        CodeLanguage::Go => {
            if !code.contains("package main") || !code.contains("func main()") {
                return Err(AgentError::ParserFailed(
                    "a Go program needs package main and func main()".into(),
                ));
            }
            if config.safe_mode
                && let Some(import) = GO_DENIED_IMPORTS
                    .iter()
                    .find(|i| code.contains(*i) && !is_allowed(config, i.trim_matches('"')))
            {
                return Err(AgentError::ExecutionUnsafe(format!("import of {import} is not allowed")));
            }
        }
    }
    Ok(())
}

fn is_allowed(config: &PoTConfig, name: &str) -> bool {
    config.allow_imports.iter().any(|allowed| allowed == name)
}

/// Module names from `import a, b` and `from a import b` lines.
fn python_imports(code: &str) -> impl Iterator<Item = &str> {
    code.lines().flat_map(|line| {
        let line = line.trim();
        let modules: Vec<&str> = if let Some(rest) = line.strip_prefix("import ") {
            rest.split(',')
                .filter_map(|m| m.split_whitespace().next())
                .collect()
        } else if let Some(rest) = line.strip_prefix("from ") {
            rest.split_whitespace().next().into_iter().collect()
        } else {
            Vec::new()
        };
        modules
    })
}

fn parentheses_balanced(code: &str) -> bool {
    let mut depth: i64 = 0;
    for c in code.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Printed output as JSON when it parses, else as trimmed text.
fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn format_failure(output: &ExecutionOutput) -> String {
    let code = output
        .exit_code
        .map_or_else(|| "killed".to_string(), |c| c.to_string());
    let stderr = truncate_chars(output.stderr.trim(), 1000);
    format!("exit status {code}\nstderr:\n{stderr}")
}

/// 程序思维 Agent
/// Program-of-thought agent
pub struct PoTAgent {
    base: AgentBase,
    llm: Arc<dyn LLMClient>,
    executor: Arc<dyn CodeExecutor>,
    config: PoTConfig,
}

impl PoTAgent {
    pub fn builder() -> PoTAgentBuilder {
        PoTAgentBuilder::default()
    }

    pub fn config(&self) -> &PoTConfig {
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
        let language = self.config.select_language(&task);
        let timeout = Duration::from_millis(self.config.execution_timeout_ms);
        let mut feedback: Option<(String, String)> = None;

        for iteration in 1..=self.config.max_iterations {
            if let Err(e) = ctx.check() {
                return scope.fail(e, None);
            }
            let last = iteration == self.config.max_iterations;

            let code = match self.generate(ctx, scope, &task, language, feedback.as_ref()).await {
                Ok(code) => code,
                Err(e) => return scope.fail(e, None),
            };
            scope.step(
                format!("Generate {language} Code"),
                format!("Iteration {iteration}"),
                json!(code),
            );

            if let Err(e) = validate_code(&code, language, &self.config) {
                tracing::debug!(iteration, error = %e, "generated code rejected");
                scope.push_step(
                    ReasoningStep::new("Validate Code", format!("Iteration {iteration}"), Value::Null)
                        .failed(e.to_string()),
                );
                if last {
                    return scope.fail(e, None);
                }
                feedback = Some((code, format!("Code validation failed: {e}")));
                continue;
            }

            let started = Instant::now();
            let run = self
                .executor
                .execute(ctx, language, &code, timeout)
                .instrument(tracing::debug_span!("pot.execute", %language, iteration))
                .await;
            let elapsed = started.elapsed().as_millis() as u64;

            let output = match run {
                Ok(output) if output.success() => output,
                Ok(output) => {
                    let failure = format_failure(&output);
                    scope.push_step(
                        ReasoningStep::new("Execute Code", format!("Iteration {iteration}"), json!(output.stdout.trim()))
                            .with_duration(elapsed)
                            .failed(failure.clone()),
                    );
                    if last {
                        return scope.fail(
                            AgentError::tool_execution(language.as_str(), failure),
                            None,
                        );
                    }
                    feedback = Some((code, format!("Execution failed with {failure}")));
                    continue;
                }
                Err(e) => {
                    scope.push_step(
                        ReasoningStep::new("Execute Code", format!("Iteration {iteration}"), Value::Null)
                            .with_duration(elapsed)
                            .failed(e.to_string()),
                    );
                    if last || is_fatal(&e) {
                        return scope.fail(e, None);
                    }
                    feedback = Some((code, format!("Execution error: {e}")));
                    continue;
                }
            };

            let result = parse_output(&output.stdout);
            scope.push_step(
                ReasoningStep::new("Execute Code", format!("Iteration {iteration}"), result.clone())
                    .with_duration(elapsed),
            );
            if result.as_str().is_some_and(str::is_empty) && !last {
                feedback = Some((code, "The program ran but printed nothing. Print the final answer.".into()));
                continue;
            }

            scope.set_metadata("language", json!(language));
            scope.set_metadata("iterations", json!(iteration));
            scope.set_metadata("final_code", json!(code));
            return Ok(scope.succeed(result, "program of thought complete"));
        }

        // max_iterations >= 1, every iteration returns or continues with feedback
        Err(AgentError::Internal("pot: iteration loop exhausted".into()))
    }

    async fn generate(
        &self,
        ctx: &AgentContext,
        scope: &ExecutionScope,
        task: &str,
        language: CodeLanguage,
        feedback: Option<&(String, String)>,
    ) -> AgentResult<String> {
        let prompt = match feedback {
            None => format!(
                "Write {language} code to solve this problem:\n\n{task}\n\nThe program must print the final answer to stdout.\nGenerate only the code, enclosed in triple backticks."
            ),
            Some((code, problem)) => format!(
                "The previous code attempt had this result:\n\n```{language}\n{code}\n```\n\n{problem}\n\nPlease refine the {language} code to solve the original problem:\n{task}\n\nGenerate only the corrected code, enclosed in triple backticks."
            ),
        };
        let request = CompletionRequest::new(vec![
            ChatMessage::system(language.system_prompt()),
            ChatMessage::user(prompt),
        ]);
        let response = scope.llm(ctx, self.llm.as_ref(), request).await?;
        Ok(extract_code(&response.content, language))
    }
}

#[async_trait]
impl Agent for PoTAgent {
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

/// PoT Agent 构建器
/// Program-of-thought agent builder
#[derive(Default)]
pub struct PoTAgentBuilder {
    llm: Option<Arc<dyn LLMClient>>,
    executor: Option<Arc<dyn CodeExecutor>>,
    callbacks: Vec<Arc<dyn Callback>>,
    config: PoTConfig,
}

impl PoTAgentBuilder {
    pub fn with_llm(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Replace the subprocess executor.
    pub fn with_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_config(mut self, config: PoTConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_language(mut self, language: CodeLanguage) -> Self {
        self.config.language = language;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn with_safe_mode(mut self, enabled: bool) -> Self {
        self.config.safe_mode = enabled;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.execution_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn build(self) -> AgentResult<PoTAgent> {
        self.config.validate()?;
        let llm = self
            .llm
            .ok_or_else(|| AgentError::ConfigInvalid("pot: LLM client not set".to_string()))?;
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ProcessExecutor::from_config(&self.config)));
        let mut base = AgentBase::new(&self.config.name)
            .with_description(&self.config.description)
            .with_capabilities(["program_of_thought", "code_execution", "reasoning"]);
        for cb in self.callbacks {
            base.add_callback(cb);
        }
        Ok(PoTAgent {
            base,
            llm,
            executor,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentat_kernel::agent::error::ErrorCode;
    use mentat_kernel::agent::types::AgentStatus;
    use mentat_kernel::llm::types::CompletionResponse;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct Scripted {
        replies: Mutex<VecDeque<&'static str>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMClient for Scripted {
        fn provider(&self) -> &str {
            "scripted"
        }
        async fn complete(
            &self,
            _ctx: &AgentContext,
            request: CompletionRequest,
        ) -> AgentResult<CompletionResponse> {
            self.prompts.lock().push(request.prompt_text());
            let reply = self.replies.lock().pop_front().unwrap_or("```python\nprint(1)\n```");
            Ok(CompletionResponse::new(reply))
        }
    }

    /// Replays canned outputs and records the programs it was given.
    struct FakeExecutor {
        outputs: Mutex<VecDeque<AgentResult<ExecutionOutput>>>,
        programs: Mutex<Vec<(CodeLanguage, String)>>,
    }

    impl FakeExecutor {
        fn new(outputs: Vec<AgentResult<ExecutionOutput>>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs.into()),
                programs: Mutex::new(Vec::new()),
            })
        }
    }

    fn printed(stdout: &str) -> AgentResult<ExecutionOutput> {
        Ok(ExecutionOutput {
            stdout: stdout.to_string(),
            exit_code: Some(0),
            ..Default::default()
        })
    }

    fn crashed(stderr: &str) -> AgentResult<ExecutionOutput> {
        Ok(ExecutionOutput {
            stderr: stderr.to_string(),
            exit_code: Some(1),
            ..Default::default()
        })
    }

    #[async_trait]
    impl CodeExecutor for FakeExecutor {
        async fn execute(
            &self,
            _ctx: &AgentContext,
            language: CodeLanguage,
            code: &str,
            _timeout: Duration,
        ) -> AgentResult<ExecutionOutput> {
            self.programs.lock().push((language, code.to_string()));
            self.outputs.lock().pop_front().unwrap_or_else(|| printed(""))
        }
    }

    #[test]
    fn test_extract_code_prefers_language_fence() {
        let reply = "Here:\n```\nnot this\n```\nand\n```python\nprint(42)\n```";
        assert_eq!(extract_code(reply, CodeLanguage::Python), "print(42)");
        assert_eq!(extract_code(reply, CodeLanguage::Go), "not this");
        assert_eq!(extract_code("  print(1)  ", CodeLanguage::Python), "print(1)");
        assert_eq!(extract_code("```js\nconsole.log(1)\n```", CodeLanguage::JavaScript), "console.log(1)");
    }

    #[test]
    fn test_language_selection() {
        let config = PoTConfig::default();
        assert_eq!(config.select_language("calculate the mean"), CodeLanguage::Python);
        assert_eq!(config.select_language("parse this JSON payload"), CodeLanguage::JavaScript);
        assert_eq!(config.select_language("run goroutines"), CodeLanguage::Go);
        assert_eq!(config.select_language("hello"), CodeLanguage::Python);

        let restricted = PoTConfig {
            allowed_languages: vec![CodeLanguage::Python],
            ..PoTConfig::default()
        };
        assert_eq!(restricted.select_language("parse JSON"), CodeLanguage::Python);
    }

    #[test]
    fn test_safe_mode_validation() {
        let config = PoTConfig::default();
        let unsafe_import = validate_code("import os\nprint(os.getcwd())", CodeLanguage::Python, &config);
        assert_eq!(unsafe_import.unwrap_err().code(), ErrorCode::ExecutionUnsafe);
        assert!(validate_code("cost = 3\nprint(cost)", CodeLanguage::Python, &config).is_ok());
        assert!(validate_code("print(eval('1+1'))", CodeLanguage::Python, &config).is_err());
        assert_eq!(
            validate_code("print((1)", CodeLanguage::Python, &config).unwrap_err().code(),
            ErrorCode::ParserFailed
        );
        assert!(validate_code("", CodeLanguage::Python, &config).is_err());
        assert!(validate_code("require('child_process')", CodeLanguage::JavaScript, &config).is_err());
        assert!(validate_code("fmt.Println(1)", CodeLanguage::Go, &config).is_err());
        assert!(
            validate_code("package main\nimport \"fmt\"\nfunc main() { fmt.Println(1) }", CodeLanguage::Go, &config)
                .is_ok()
        );

        let relaxed = PoTConfig {
            allow_imports: vec!["os".into()],
            ..PoTConfig::default()
        };
        assert!(validate_code("import os\nprint(os.sep)", CodeLanguage::Python, &relaxed).is_ok());
        let off = PoTConfig {
            safe_mode: false,
            ..PoTConfig::default()
        };
        assert!(validate_code("import subprocess", CodeLanguage::Python, &off).is_ok());
    }

    #[test]
    fn test_code_length_limit() {
        let config = PoTConfig {
            max_code_length: 10,
            ..PoTConfig::default()
        };
        assert!(validate_code("print(1234567890)", CodeLanguage::Python, &config).is_err());
    }

    #[tokio::test]
    async fn test_json_output_on_first_iteration() {
        let llm = Scripted::new(vec!["```python\nprint('{\"mean\": 2.5}')\n```"]);
        let executor = FakeExecutor::new(vec![printed("{\"mean\": 2.5}\n")]);
        let agent = PoTAgent::builder()
            .with_llm(llm)
            .with_executor(executor.clone())
            .build()
            .unwrap();
        let out = agent
            .invoke(&AgentContext::new(), "Calculate the mean of 1, 2, 3, 4".into())
            .await
            .unwrap();

        assert_eq!(out.status, AgentStatus::Success);
        assert_eq!(out.result, json!({"mean": 2.5}));
        assert_eq!(out.metadata["language"], json!("python"));
        assert_eq!(out.metadata["iterations"], json!(1));
        assert_eq!(out.reasoning_steps.len(), 2);
        assert_eq!(out.reasoning_steps[0].action, "Generate python Code");
        assert_eq!(executor.programs.lock()[0].1, "print('{\"mean\": 2.5}')");
    }

    #[tokio::test]
    async fn test_failed_run_is_fed_back() {
        let llm = Scripted::new(vec!["```python\nprint(x)\n```", "```python\nx = 4\nprint(x)\n```"]);
        let executor = FakeExecutor::new(vec![crashed("NameError: name 'x' is not defined"), printed("4\n")]);
        let agent = PoTAgent::builder()
            .with_llm(llm.clone())
            .with_executor(executor)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), "compute x".into()).await.unwrap();

        assert_eq!(out.result, json!(4));
        assert_eq!(out.metadata["iterations"], json!(2));
        assert_eq!(out.metadata["final_code"], json!("x = 4\nprint(x)"));
        assert!(out.reasoning_steps[1].error.is_some());
        let prompts = llm.prompts.lock();
        assert!(prompts[1].contains("NameError"));
        assert!(prompts[1].contains("Please refine the python code"));
    }

    #[tokio::test]
    async fn test_unsafe_code_never_executes() {
        let llm = Scripted::new(vec![
            "```python\nimport subprocess\nsubprocess.run(['ls'])\n```",
            "```python\nimport subprocess\n```",
        ]);
        let executor = FakeExecutor::new(vec![]);
        let agent = PoTAgent::builder()
            .with_llm(llm)
            .with_executor(executor.clone())
            .with_max_iterations(2)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), "list files".into()).await.unwrap();

        assert_eq!(out.status, AgentStatus::Failed);
        assert_eq!(out.error.as_ref().map(|e| e.code), Some(ErrorCode::ExecutionUnsafe));
        assert!(executor.programs.lock().is_empty());
    }

    #[tokio::test]
    async fn test_raw_text_output_accepted() {
        let llm = Scripted::new(vec!["```python\nprint('forty two')\n```"]);
        let executor = FakeExecutor::new(vec![printed("forty two\n")]);
        let agent = PoTAgent::builder()
            .with_llm(llm)
            .with_executor(executor)
            .build()
            .unwrap();
        let out = agent.invoke(&AgentContext::new(), "say it".into()).await.unwrap();
        assert_eq!(out.result, json!("forty two"));
    }

    #[tokio::test]
    async fn test_process_executor_reports_missing_interpreter() {
        let executor = ProcessExecutor::new("/nonexistent/python3", "node", "go");
        let err = executor
            .execute(
                &AgentContext::new(),
                CodeLanguage::Python,
                "print(1)",
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolExecution);
    }
}
