//! 推理启发式
//! Keyword heuristics shared by the reasoning engines
//!
//! English and Chinese keyword sets drive question decomposition,
//! confidence estimation, refinement detection, thought relatedness and
//! answer-line detection. Matching is case-insensitive substring search.

use std::collections::HashSet;

/// 语言关键词集合
/// Keyword set for one language
#[derive(Debug, Clone, Default)]
pub struct LanguageKeywords {
    pub answer_markers: Vec<&'static str>,
    pub question_prefixes: Vec<&'static str>,
    pub question_words: Vec<&'static str>,
    pub direct_answer_signals: Vec<&'static str>,
    pub complexity_indicators: Vec<&'static str>,
    pub info_indicators: Vec<&'static str>,
    pub uncertainty_markers: Vec<&'static str>,
    pub confidence_markers: Vec<&'static str>,
    pub refinement_indicators: Vec<&'static str>,
    pub relation_keywords: Vec<&'static str>,
    pub reasoning_words: Vec<&'static str>,
    pub list_markers: Vec<&'static str>,
}

impl LanguageKeywords {
    pub fn english() -> Self {
        Self {
            answer_markers: vec!["the final answer is", "final answer:", "answer:"],
            question_prefixes: vec!["q:", "question:"],
            question_words: vec!["what", "why", "how", "when", "where", "which", "who", "whose", "whom"],
            direct_answer_signals: vec!["DIRECT_ANSWER", "direct answer", "can be answered directly"],
            complexity_indicators: vec![
                " and ", " or ", "multiple", "several", "various", "compare", "contrast",
                "analyze", "evaluate", "both", "either", "neither", " all ", " each ",
            ],
            info_indicators: vec![
                "what is", "who is", "when did", "where is", "how many", "which", "define",
                "explain", "describe", "list", "name",
            ],
            uncertainty_markers: vec![
                "maybe", "possibly", "might", "could be", "not sure", "uncertain", "perhaps",
                "probably", "likely", "it seems", "appears to be", "i think",
            ],
            confidence_markers: vec![
                "definitely", "certainly", "clearly", "obviously", "absolutely", "undoubtedly",
                "surely", "indeed", "without doubt", "for certain",
            ],
            refinement_indicators: vec![
                "incorrect", "wrong", "missing", "incomplete", "should", "needs", "must",
                "improve", "error", "mistake", "flaw", "issue",
            ],
            relation_keywords: vec![
                "therefore", "because", "result", "conclusion", "analysis", "solution",
                "approach", "method", "consequently", "hence", "thus",
            ],
            reasoning_words: vec![
                "because", "therefore", "thus", "since", "if", "then", "consequently", "hence",
                "given", "assuming", "implies", "conclude", "reason", "analyze", "consider",
            ],
            list_markers: vec!["- ", "* ", "• "],
        }
    }

    pub fn chinese() -> Self {
        Self {
            answer_markers: vec!["最终答案是", "最终答案：", "最终答案:", "答案是", "答案：", "答案:"],
            question_prefixes: vec!["问题：", "问题:", "问：", "问:", "子问题：", "子问题:"],
            question_words: vec!["什么", "为什么", "怎么", "如何", "何时", "哪里", "哪个", "谁", "是否"],
            direct_answer_signals: vec!["直接回答", "可以直接回答", "无需分解"],
            complexity_indicators: vec![
                "和", "或者", "以及", "同时", "多个", "比较", "对比", "分析", "评估", "综合",
                "不仅", "而且", "一方面", "另一方面",
            ],
            info_indicators: vec!["什么是", "谁是", "何时", "在哪", "多少", "哪些", "定义", "解释"],
            uncertainty_markers: vec!["可能", "也许", "或许", "大概", "不确定", "似乎", "好像", "估计"],
            confidence_markers: vec!["肯定", "一定", "确定", "明确", "显然", "毫无疑问", "确实"],
            refinement_indicators: vec!["错误", "不正确", "缺失", "不完整", "遗漏", "应该", "需要", "改进"],
            relation_keywords: vec!["因此", "所以", "结果", "结论", "分析", "解决", "方案", "方法", "由于"],
            reasoning_words: vec!["因为", "所以", "因此", "如果", "那么", "分析", "考虑", "推断", "结论"],
            list_markers: vec!["- ", "* ", "· ", "• "],
        }
    }
}

fn contains_ci(haystack_lower: &str, needle: &str) -> bool {
    haystack_lower.contains(&needle.to_lowercase())
}

/// 忽略大小写查找
/// Case-insensitive search returning the byte range of the match in `haystack`
///
/// Offsets always fall on char boundaries of the original text, even when
/// lowercasing changes the byte length of some characters.
pub fn find_ci(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return Some((0, 0));
    }
    'start: for (start, _) in haystack.char_indices() {
        let mut pending = needle.iter().peekable();
        for (offset, c) in haystack[start..].char_indices() {
            for lc in c.to_lowercase() {
                match pending.next() {
                    Some(&want) if want == lc => {}
                    _ => continue 'start,
                }
            }
            if pending.peek().is_none() {
                return Some((start, start + offset + c.len_utf8()));
            }
        }
        break;
    }
    None
}

/// 多语言启发式
/// Multi-language heuristics
#[derive(Debug, Clone)]
pub struct Heuristics {
    languages: Vec<LanguageKeywords>,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            languages: vec![LanguageKeywords::english(), LanguageKeywords::chinese()],
        }
    }
}

impl Heuristics {
    pub fn new(languages: Vec<LanguageKeywords>) -> Self {
        Self { languages }
    }

    fn any<'a>(&'a self, pick: impl Fn(&'a LanguageKeywords) -> &'a Vec<&'static str>, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.languages
            .iter()
            .flat_map(|l| pick(l).iter())
            .any(|w| contains_ci(&lower, w))
    }

    fn count<'a>(&'a self, pick: impl Fn(&'a LanguageKeywords) -> &'a Vec<&'static str>, text: &str) -> usize {
        let lower = format!(" {} ", text.to_lowercase());
        let mut seen = HashSet::new();
        self.languages
            .iter()
            .flat_map(|l| pick(l).iter())
            .filter(|w| contains_ci(&lower, w) && seen.insert(w.to_lowercase()))
            .count()
    }

    /// 是否应分解问题
    /// Complex enough to decompose: two complexity indicators, more than
    /// 20 words or more than 50 characters
    pub fn should_decompose(&self, question: &str) -> bool {
        self.count(|l| &l.complexity_indicators, question) >= 2
            || question.split_whitespace().count() > 20
            || question.chars().count() > 50
    }

    /// 是否需要外部信息
    /// Looks like a factual lookup
    pub fn needs_external_info(&self, question: &str) -> bool {
        self.any(|l| &l.info_indicators, question)
    }

    pub fn contains_question_words(&self, text: &str) -> bool {
        self.any(|l| &l.question_words, text)
    }

    pub fn is_direct_answer(&self, response: &str) -> bool {
        self.languages
            .iter()
            .flat_map(|l| l.direct_answer_signals.iter())
            .any(|s| response.contains(s))
    }

    /// 估算置信度
    /// Confidence in [0, 1]: 0.5 base, +0.2 for a detailed answer, -0.1
    /// per uncertainty marker, +0.1 per confidence marker
    pub fn estimate_confidence(&self, answer: &str) -> f64 {
        let lower = answer.to_lowercase();
        let mut confidence = 0.5;
        if answer.chars().count() > 100 {
            confidence += 0.2;
        }
        for lang in &self.languages {
            for m in &lang.uncertainty_markers {
                if contains_ci(&lower, m) {
                    confidence -= 0.1;
                }
            }
            for m in &lang.confidence_markers {
                if contains_ci(&lower, m) {
                    confidence += 0.1;
                }
            }
        }
        f64::clamp(confidence, 0.0, 1.0)
    }

    pub fn needs_refinement(&self, critique: &str) -> bool {
        self.any(|l| &l.refinement_indicators, critique)
    }

    /// 两个思考是否相关
    /// Two thoughts are related when they share a relation keyword
    pub fn are_related(&self, a: &str, b: &str) -> bool {
        let (la, lb) = (a.to_lowercase(), b.to_lowercase());
        self.languages
            .iter()
            .flat_map(|l| l.relation_keywords.iter())
            .any(|k| contains_ci(&la, k) && contains_ci(&lb, k))
    }

    pub fn count_reasoning_words(&self, text: &str) -> usize {
        self.count(|l| &l.reasoning_words, text)
    }

    /// 答案行的内容 (若为答案行)
    /// Content after an answer marker, when the line carries one
    pub fn answer_content(&self, line: &str) -> Option<String> {
        for marker in self.languages.iter().flat_map(|l| l.answer_markers.iter()) {
            if let Some((_, end)) = find_ci(line, marker) {
                let rest = line[end..].trim_start().trim_start_matches([':', '：']);
                return Some(rest.trim().to_string());
            }
        }
        None
    }

    /// 解析问题列表
    /// Follow-up questions from a response, at most `limit`
    ///
    /// Recognises `Q:`-style prefixes, numbered questions and bare lines
    /// ending with a question mark. A direct-answer signal yields none.
    pub fn parse_questions(&self, response: &str, limit: usize) -> Vec<String> {
        if self.is_direct_answer(response) {
            return Vec::new();
        }
        response
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter_map(|l| self.question_text(l))
            .take(limit)
            .collect()
    }

    fn question_text(&self, line: &str) -> Option<String> {
        let lower = line.to_lowercase();
        for prefix in self.languages.iter().flat_map(|l| l.question_prefixes.iter()) {
            if lower.starts_with(&prefix.to_lowercase()) {
                let rest = line.get(prefix.len()..).unwrap_or_default().trim();
                return (!rest.is_empty()).then(|| rest.to_string());
            }
        }

        let mut text = line;
        if let Some(rest) = strip_numbering(text) {
            text = rest;
        }
        for marker in self.languages.iter().flat_map(|l| l.list_markers.iter()) {
            if let Some(rest) = text.strip_prefix(marker) {
                text = rest.trim();
            }
        }
        let is_question = text.ends_with('?') || text.ends_with('？');
        (is_question && !text.is_empty()).then(|| text.to_string())
    }

    /// 解析生成的思考列表
    /// Candidate thoughts from a generation response, at most `limit`
    ///
    /// Numbered, bulleted and `Step N:` lines are taken as items; other
    /// lines count only when longer than 20 characters and not a preamble.
    pub fn parse_thoughts(&self, response: &str, limit: usize) -> Vec<String> {
        const PREAMBLES: [&str; 6] = ["here are", "here is", "based on", "the following", "以下", "如下"];

        let mut thoughts = Vec::new();
        for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if thoughts.len() >= limit {
                break;
            }
            let (text, itemised) = self.strip_item(line);
            if text.is_empty() {
                continue;
            }
            let lower = text.to_lowercase();
            let preamble = PREAMBLES.iter().any(|p| lower.starts_with(p)) || text.ends_with(':');
            if itemised || (text.chars().count() > 20 && !preamble) {
                thoughts.push(text.to_string());
            }
        }
        thoughts
    }

    fn strip_item<'a>(&self, line: &'a str) -> (&'a str, bool) {
        if let Some(rest) = strip_numbering(line) {
            return (rest, true);
        }
        for marker in self.languages.iter().flat_map(|l| l.list_markers.iter()) {
            if let Some(rest) = line.strip_prefix(marker) {
                return (rest.trim(), true);
            }
        }
        let lower = line.to_lowercase();
        if lower.starts_with("step ")
            && let Some((head, rest)) = line.split_once(':')
            && head.get(5..).is_some_and(|n| n.trim().chars().all(|c| c.is_ascii_digit()))
        {
            return (rest.trim(), true);
        }
        (line, false)
    }
}

/// 解析评分
/// First number in a rating reply, clamped to `[0, 1]`; ratings on a
/// ten-point scale are scaled down.
pub fn parse_score(text: &str) -> Option<f64> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .find_map(|t| t.parse::<f64>().ok())
        .map(|v| if v > 1.0 && v <= 10.0 { v / 10.0 } else { v })
        .map(|v| v.clamp(0.0, 1.0))
}

/// Strips a leading `1.` / `1)` / `1、` list number.
pub fn strip_numbering(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    let rest = &line[digits..];
    [".", ")", "、", ":"]
        .iter()
        .find_map(|sep| rest.strip_prefix(sep))
        .map(str::trim)
}
