//! 思维链响应解析
//! Chain-of-thought response parsing
//!
//! Steps are delimited by header lines such as `Step 1:`, `**Step 2.**`,
//! `- Step 3)`, `步骤1：` or `1.`. Everything up to the next header belongs
//! to the current step, so a formula spread over several lines stays in
//! one step. Lines that are only math delimiters, bare numbers, LaTeX
//! layout commands or prompt echoes (`Question:`, `Let's …`) are dropped.
//!
//! When no header is found the response is split into paragraphs instead.

use crate::reasoning::heuristics::{Heuristics, find_ci, strip_numbering};

/// Default final answer prefix.
pub const DEFAULT_FINAL_ANSWER_FORMAT: &str = "Therefore, the final answer is:";

/// 解析结果
/// Parsed chain-of-thought response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedChain {
    pub steps: Vec<String>,
    pub final_answer: String,
    /// Steps came from the paragraph fallback
    pub fallback: bool,
}

/// 思维链解析器
/// Chain-of-thought parser
#[derive(Debug, Clone)]
pub struct StepParser {
    final_answer_format: String,
    heuristics: Heuristics,
}

impl Default for StepParser {
    fn default() -> Self {
        Self::new(DEFAULT_FINAL_ANSWER_FORMAT)
    }
}

const LATEX_DELIMITERS: [&str; 6] = ["\\[", "\\]", "\\(", "\\)", "$$", "$"];
const LATEX_COMMANDS: [&str; 8] = [
    "\\frac", "\\quad", "\\qquad", "\\text", "\\begin", "\\end", "\\left", "\\right",
];
const ECHO_PREFIXES: [&str; 6] = ["question:", "let's", "let us", "here are", "问题：", "让我们"];

impl StepParser {
    pub fn new(final_answer_format: impl Into<String>) -> Self {
        Self {
            final_answer_format: final_answer_format.into(),
            heuristics: Heuristics::default(),
        }
    }

    pub fn final_answer_format(&self) -> &str {
        &self.final_answer_format
    }

    /// 解析响应
    /// Parse a response into steps and a final answer
    pub fn parse(&self, response: &str) -> ParsedChain {
        let lines: Vec<&str> = response.lines().map(str::trim).collect();

        // the configured prefix wins anywhere in the response; loose markers
        // such as "answer:" only count when it never appears
        let hit = self
            .configured_answer_line(&lines)
            .or_else(|| self.marker_answer_line(&lines));
        let answer_at = hit.as_ref().map(|(i, _)| *i);
        let final_answer = match hit {
            // answer on the following line
            Some((i, answer)) if answer.is_empty() => lines[i + 1..]
                .iter()
                .find(|l| !l.is_empty())
                .map(|l| clean_answer(l))
                .unwrap_or_default(),
            Some((_, answer)) => answer,
            None => String::new(),
        };
        let body = &lines[..answer_at.unwrap_or(lines.len())];

        let steps = self.structured_steps(body);
        if !steps.is_empty() {
            let final_answer = if final_answer.is_empty() {
                steps.last().cloned().unwrap_or_default()
            } else {
                final_answer
            };
            return ParsedChain {
                steps,
                final_answer,
                fallback: false,
            };
        }

        let mut final_answer = final_answer;
        let mut paragraphs = paragraphs(body);
        if final_answer.is_empty()
            && let Some(last) = paragraphs.last()
            && is_answer_paragraph(last)
        {
            final_answer = paragraphs.pop().unwrap_or_default();
        }
        if final_answer.is_empty() {
            final_answer = paragraphs
                .last()
                .cloned()
                .unwrap_or_else(|| response.trim().to_string());
        }
        ParsedChain {
            steps: paragraphs,
            final_answer,
            fallback: true,
        }
    }

    fn configured_answer_line(&self, lines: &[&str]) -> Option<(usize, String)> {
        if self.final_answer_format.is_empty() {
            return None;
        }
        lines.iter().enumerate().find_map(|(i, line)| {
            find_ci(line, &self.final_answer_format).map(|(_, end)| (i, clean_answer(&line[end..])))
        })
    }

    /// Last line carrying a generic answer marker
    fn marker_answer_line(&self, lines: &[&str]) -> Option<(usize, String)> {
        lines.iter().enumerate().rev().find_map(|(i, line)| {
            // a header line such as "Step 3: the answer: ..." is not an answer line
            if line.is_empty() || step_header(line).is_some() {
                return None;
            }
            self.heuristics
                .answer_content(line)
                .map(|a| (i, clean_answer(&a)))
        })
    }

    fn structured_steps(&self, body: &[&str]) -> Vec<String> {
        let mut steps = Vec::new();
        let mut current: Option<Vec<String>> = None;

        for line in body {
            if line.is_empty() {
                continue;
            }
            if let Some(content) = step_header(line) {
                if let Some(parts) = current.take() {
                    push_step(&mut steps, parts);
                }
                let mut parts = Vec::new();
                if !content.is_empty() {
                    parts.push(content.to_string());
                }
                current = Some(parts);
                continue;
            }
            if let Some(parts) = current.as_mut()
                && !is_noise_line(line)
            {
                parts.push(line.to_string());
            }
        }
        if let Some(parts) = current {
            push_step(&mut steps, parts);
        }
        steps
    }
}

fn push_step(steps: &mut Vec<String>, parts: Vec<String>) {
    let text = parts.join(" ");
    let text = text.trim();
    if !text.is_empty() {
        steps.push(text.to_string());
    }
}

/// 将步骤渲染为可再次解析的文本
/// Render steps in the canonical form the parser reads back unchanged
pub fn render_chain(steps: &[String], final_answer: &str, final_answer_format: &str) -> String {
    let mut out = String::new();
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("Step {}: {}\n", i + 1, step.replace('\n', " ")));
    }
    out.push_str(&format!("{final_answer_format} {final_answer}"));
    out
}

fn clean_answer(text: &str) -> String {
    text.trim()
        .trim_start_matches([':', '：'])
        .trim()
        .trim_matches('*')
        .trim()
        .to_string()
}

/// Strip emphasis and bullet wrappers around a header.
fn unwrap_markers(line: &str) -> &str {
    let mut s = line.trim();
    loop {
        let before = s;
        for marker in ["- ", "* ", "• ", "#", "**", "__", "*", "_"] {
            if let Some(rest) = s.strip_prefix(marker) {
                s = rest.trim_start();
            }
        }
        if s == before {
            return s;
        }
    }
}

fn strip_separator(s: &str) -> &str {
    let s = s.trim_start();
    let s = s.trim_start_matches(['*', '_']);
    let s = s.trim_start_matches([':', '.', ')', '：', '、', '-', '–']);
    s.trim_start_matches(['*', '_']).trim()
}

/// 步骤标题行的内容
/// Content of a step header line, `None` for ordinary lines
fn step_header(line: &str) -> Option<&str> {
    let s = unwrap_markers(line);

    // "Step N", case-insensitive, N required
    if let Some(head) = s.get(..4)
        && head.eq_ignore_ascii_case("step")
    {
        let rest = s[4..].trim_start();
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            return Some(strip_separator(&rest[digits..]));
        }
        return None;
    }

    // "步骤N" or "第N步"
    if let Some(rest) = s.strip_prefix("步骤") {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            return Some(strip_separator(&rest[digits..]));
        }
    }
    if let Some(rest) = s.strip_prefix('第') {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0
            && let Some(after) = rest[digits..].strip_prefix('步')
        {
            return Some(strip_separator(after));
        }
    }

    // "1." / "1)" numbered list
    strip_numbering(s).map(|rest| rest.trim_matches(['*', '_']).trim())
}

/// Continuation lines that carry no prose.
fn is_noise_line(line: &str) -> bool {
    if LATEX_DELIMITERS.contains(&line) {
        return true;
    }
    if line.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if LATEX_COMMANDS.iter().any(|cmd| line.starts_with(cmd)) {
        return true;
    }
    let lower = line.to_lowercase();
    ECHO_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn paragraphs(body: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let flush = |current: &mut Vec<&str>, out: &mut Vec<String>| {
        if !current.is_empty() {
            let para = current.join("\n");
            if !is_skippable_paragraph(&para) {
                out.push(para);
            }
            current.clear();
        }
    };
    for line in body {
        if line.is_empty() {
            flush(&mut current, &mut out);
        } else {
            current.push(line);
        }
    }
    flush(&mut current, &mut out);
    out
}

fn is_skippable_paragraph(para: &str) -> bool {
    let lower = para.to_lowercase();
    lower.starts_with("question") || lower.starts_with("let's") || para.starts_with("问题") || para.starts_with("让我们")
}

fn is_answer_paragraph(para: &str) -> bool {
    let lower = para.to_lowercase();
    ["answer", "conclusion", "therefore", "thus"]
        .iter()
        .any(|w| lower.contains(w))
        || ["答案", "结论", "因此", "所以", "综上"].iter().any(|w| para.contains(w))
}
