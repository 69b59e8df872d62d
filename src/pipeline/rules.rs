//! Line classification rules.
//!
//! Each LaTeX line is matched against an ordered list of rules; the first
//! rule whose pattern occurs anywhere in the line decides the [`Record`]:
//! - math environments (`equation`, `align`, ...) → toggle math mode
//! - preamble and bookkeeping commands → dropped
//! - sectioning commands → Markdown headings
//! - `%` comments → stripped
//!
//! Lines that match nothing pass through with surrounding spaces trimmed.

use regex::Regex;
use tracing::trace;

use crate::pipeline::types::Record;

/// Turns one input line into one record.
///
/// Implementations must be pure and total: the worker pool calls `classify`
/// exactly once per line, from any thread, and has no way to retry or report
/// a failure.
pub trait Classifier: Send + Sync {
    fn classify(&self, order: usize, line: &str) -> Record;
}

impl<F> Classifier for F
where
    F: Fn(usize, &str) -> Record + Send + Sync,
{
    fn classify(&self, order: usize, line: &str) -> Record {
        self(order, line)
    }
}

/// What a matching rule produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Empty record that opens or closes a math block.
    ToggleMath,
    /// Empty record.
    Drop,
    /// Fixed replacement text.
    Replace(String),
    /// `prefix` followed by the command's braced argument.
    Heading { prefix: String },
    /// Text before the first `%`.
    StripComment,
}

/// A single classification rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct ClassifyRule {
    /// Human-readable pattern description.
    pub pattern: String,
    /// Compiled regex for matching.
    pub regex: Regex,
    /// Record produced on match.
    pub action: RuleAction,
}

/// Ordered, first-match-wins rule list.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    rules: Vec<ClassifyRule>,
}

const MATH_ENVIRONMENTS: &[&str] = &["equation", "align", "flalign", "multline", "math", "center"];

const DROPPED_COMMANDS: &[&str] = &[
    r"\documentclass",
    r"\usepackage",
    r"\begin{document",
    r"\end{document",
    r"\maketitle",
    r"\label",
];

const HEADINGS: &[(&str, &str)] = &[
    (r"\title", "# "),
    (r"\author", "By: "),
    (r"\section", "## "),
    (r"\subsection", "### "),
];

impl RulesEngine {
    /// Rules for converting LaTeX documents to GitHub-flavoured Markdown.
    pub fn latex() -> Self {
        let mut engine = Self::empty();

        let environments = MATH_ENVIRONMENTS.join("|");
        engine.push(
            "math environment",
            &format!(r"\\(begin|end)\{{({environments})"),
            RuleAction::ToggleMath,
        );

        for command in DROPPED_COMMANDS {
            engine.push(command, &regex::escape(command), RuleAction::Drop);
        }

        engine.push(
            r"\begin{abstract",
            &regex::escape(r"\begin{abstract"),
            RuleAction::Replace("## Abstract".into()),
        );
        engine.push(
            r"\end{abstract",
            &regex::escape(r"\end{abstract"),
            RuleAction::Drop,
        );

        for (command, prefix) in HEADINGS {
            engine.push(
                command,
                &regex::escape(command),
                RuleAction::Heading {
                    prefix: (*prefix).to_string(),
                },
            );
        }

        engine.push("%", "%", RuleAction::StripComment);
        engine
    }

    /// Create an empty rules engine (every line passes through).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule; it is consulted after all existing rules.
    pub fn add_rule(&mut self, pattern: &str, action: RuleAction) -> Result<(), regex::Error> {
        self.rules.push(ClassifyRule {
            pattern: pattern.into(),
            regex: Regex::new(pattern)?,
            action,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    // Built-in patterns are constants; a failure here is a bug in this file.
    fn push(&mut self, description: &str, pattern: &str, action: RuleAction) {
        let regex = Regex::new(pattern)
            .unwrap_or_else(|e| panic!("built-in rule {description:?} is invalid: {e}"));
        self.rules.push(ClassifyRule {
            pattern: description.into(),
            regex,
            action,
        });
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::latex()
    }
}

impl Classifier for RulesEngine {
    fn classify(&self, order: usize, line: &str) -> Record {
        for rule in &self.rules {
            let Some(found) = rule.regex.find(line) else {
                continue;
            };
            trace!(order, rule = %rule.pattern, "Line matched rule");

            return match &rule.action {
                RuleAction::ToggleMath => Record::math_toggle(order),
                RuleAction::Drop => Record::empty(order),
                RuleAction::Replace(text) => Record::new(order, text.clone(), false),
                RuleAction::Heading { prefix } => {
                    let argument = braced_argument(&line[found.end()..]).trim_matches(' ');
                    Record::new(order, trim_spaces(&format!("{prefix}{argument}")), false)
                }
                RuleAction::StripComment => Record::new(order, trim_spaces(&line[..found.start()]), false),
            };
        }

        Record::new(order, trim_spaces(line), false)
    }
}

/// Text between the first `{` and the last `}` of `rest`.
///
/// Without braces the whole remainder is the argument; an unclosed brace
/// runs to the end of the line.
fn braced_argument(rest: &str) -> &str {
    let Some(open) = rest.find('{') else {
        return rest;
    };
    let inner = &rest[open + 1..];
    match inner.rfind('}') {
        Some(close) => &inner[..close],
        None => inner,
    }
}

fn trim_spaces(s: &str) -> String {
    s.trim_matches(' ').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> Record {
        RulesEngine::latex().classify(0, line)
    }

    #[test]
    fn title_becomes_h1() {
        assert_eq!(classify(r"\title{Hi}"), Record::new(0, "# Hi", false));
    }

    #[test]
    fn section_and_subsection_levels() {
        assert_eq!(classify(r"\section{Intro}").data, "## Intro");
        assert_eq!(classify(r"\subsection{Details}").data, "### Details");
    }

    #[test]
    fn author_line() {
        assert_eq!(classify(r"\author{Ada Lovelace}").data, "By: Ada Lovelace");
    }

    #[test]
    fn heading_keeps_nested_braces() {
        assert_eq!(classify(r"\section{The \emph{real} deal}").data, r"## The \emph{real} deal");
    }

    #[test]
    fn heading_without_braces_uses_rest_of_line() {
        assert_eq!(classify(r"\section Intro").data, "## Intro");
    }

    #[test]
    fn math_environments_toggle() {
        for line in [
            r"\begin{equation}",
            r"\end{equation*}",
            r"\begin{align}",
            r"\end{flalign}",
            r"  \begin{multline}",
            r"\begin{math}",
            r"\end{center}",
        ] {
            assert_eq!(classify(line), Record::math_toggle(0), "line {line:?}");
        }
    }

    #[test]
    fn preamble_is_dropped() {
        for line in [
            r"\documentclass{article}",
            r"\usepackage{amsmath}",
            r"\begin{document}",
            r"\end{document}",
            r"\maketitle",
            r"\label{eq:1}",
            r"\end{abstract}",
        ] {
            assert_eq!(classify(line), Record::empty(0), "line {line:?}");
        }
    }

    #[test]
    fn label_wins_over_section_on_same_line() {
        assert_eq!(classify(r"\section{Intro}\label{sec:intro}"), Record::empty(0));
    }

    #[test]
    fn abstract_heading() {
        assert_eq!(classify(r"\begin{abstract}").data, "## Abstract");
    }

    #[test]
    fn comment_is_stripped() {
        assert_eq!(classify("  some text % a remark").data, "some text");
        assert_eq!(classify("% whole line").data, "");
    }

    #[test]
    fn plain_text_is_trimmed() {
        assert_eq!(classify("   body text  ").data, "body text");
        assert_eq!(classify("").data, "");
        assert_eq!(classify("\ttabbed").data, "\ttabbed");
    }

    #[test]
    fn order_is_preserved() {
        assert_eq!(RulesEngine::latex().classify(41, "x").order, 41);
    }

    #[test]
    fn empty_engine_passes_everything() {
        let engine = RulesEngine::empty();
        assert!(engine.is_empty());
        assert_eq!(engine.classify(3, r"\maketitle").data, r"\maketitle");
    }

    #[test]
    fn custom_rule_runs_after_builtins() {
        let mut engine = RulesEngine::latex();
        let before = engine.len();
        engine
            .add_rule(r"\\newpage", RuleAction::Replace("---".into()))
            .unwrap();
        assert_eq!(engine.len(), before + 1);
        assert_eq!(engine.classify(0, r"\newpage").data, "---");
    }

    #[test]
    fn invalid_custom_rule_is_rejected() {
        assert!(RulesEngine::empty().add_rule("(", RuleAction::Drop).is_err());
    }

    #[test]
    fn closures_are_classifiers() {
        let upper = |order: usize, line: &str| Record::new(order, line.to_uppercase(), false);
        assert_eq!(upper.classify(1, "abc").data, "ABC");
    }
}
