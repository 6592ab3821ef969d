//! ReAct 响应解析
//! ReAct response parsing
//!
//! Recognised sections, each starting at the beginning of a line:
//! `Thought:`, `Action:`, `Action Input:`, `Observation:` and
//! `Final Answer:`. Text before any marker counts as the thought. When a
//! response carries both a final answer and an action, the final answer
//! wins.

/// 解析后的响应
/// Parsed model turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReActTurn {
    pub thought: Option<String>,
    pub kind: TurnKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnKind {
    /// Tool call; `input` is the raw Action Input text
    Action { tool: String, input: String },
    FinalAnswer(String),
    /// Thought only, no decision yet
    Continue,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Thought,
    Action,
    ActionInput,
    Observation,
    FinalAnswer,
}

const MARKERS: [(&str, Section); 5] = [
    ("Final Answer:", Section::FinalAnswer),
    ("Action Input:", Section::ActionInput),
    ("Action:", Section::Action),
    ("Thought:", Section::Thought),
    ("Observation:", Section::Observation),
];

fn marker(line: &str) -> Option<(Section, &str)> {
    let trimmed = line.trim_start();
    MARKERS.iter().find_map(|(prefix, section)| {
        let head = trimmed.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix)
            .then(|| (*section, trimmed[prefix.len()..].trim()))
    })
}

#[derive(Default)]
struct Buffers {
    preamble: Vec<String>,
    thought: Vec<String>,
    action: Vec<String>,
    action_input: Vec<String>,
    final_answer: Vec<String>,
    has_final: bool,
}

impl Buffers {
    fn push(&mut self, section: Section, text: &str) {
        let target = match section {
            Section::Preamble => &mut self.preamble,
            Section::Thought => &mut self.thought,
            Section::Action => &mut self.action,
            Section::ActionInput => &mut self.action_input,
            Section::FinalAnswer => &mut self.final_answer,
            // hallucinated observations are dropped
            Section::Observation => return,
        };
        target.push(text.to_string());
    }
}

fn join(lines: &[String]) -> String {
    lines.join("\n").trim().to_string()
}

/// 解析 LLM 响应
/// Parse one model turn
pub fn parse_response(response: &str) -> ReActTurn {
    let mut buffers = Buffers::default();
    let mut section = Section::Preamble;

    for line in response.lines() {
        match marker(line) {
            Some((next, rest)) => {
                // only the first action block of a turn is honoured
                if matches!(next, Section::Action) && !buffers.action.is_empty() {
                    section = Section::Observation;
                    continue;
                }
                if next == Section::FinalAnswer {
                    buffers.has_final = true;
                }
                section = next;
                if !rest.is_empty() {
                    buffers.push(section, rest);
                }
            }
            None => buffers.push(section, line),
        }
    }

    let thought = {
        let explicit = join(&buffers.thought);
        let text = if explicit.is_empty() {
            join(&buffers.preamble)
        } else {
            explicit
        };
        (!text.is_empty()).then_some(text)
    };

    if buffers.has_final {
        return ReActTurn {
            thought,
            kind: TurnKind::FinalAnswer(join(&buffers.final_answer)),
        };
    }

    let action = join(&buffers.action);
    if !action.is_empty() {
        let (tool, inline_input) = split_bracket_action(&action);
        let input = match inline_input {
            Some(inline) => inline,
            None => join(&buffers.action_input),
        };
        return ReActTurn {
            thought,
            kind: TurnKind::Action { tool, input },
        };
    }

    ReActTurn {
        thought,
        kind: TurnKind::Continue,
    }
}

/// Accepts the compact `tool[input]` form as well as a bare tool name.
fn split_bracket_action(action: &str) -> (String, Option<String>) {
    let first_line = action.lines().next().unwrap_or_default().trim();
    if let (Some(open), Some(close)) = (first_line.find('['), first_line.rfind(']'))
        && close > open
    {
        let tool = first_line[..open].trim().to_string();
        let input = first_line[open + 1..close].trim().to_string();
        return (tool, Some(input));
    }
    (first_line.trim_matches('`').to_string(), None)
}
