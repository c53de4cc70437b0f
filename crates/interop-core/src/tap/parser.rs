//! Line-oriented TAP state machine.
//!
//! ```text
//!  Header ──version──▶ Plan ──assertion──▶ Assertion ◀──"..."── Diagnostic
//!    │                  ▲                     │  ▲                  ▲
//!    └──plan────────────┘                     │  └──assertion───────┘
//!    └──assertion─────────────────────────────┘──"---" (indented)───┘
//! ```
//!
//! Unrecognised lines never change state; they are attached as log context to
//! the nearest preceding assertion.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Anomaly, Assertion, AssertionOutcome, Directive, ParsedResult, Plan};
use crate::domain::error::ParseError;

/// Where the parser is in the TAP document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserState {
    /// Nothing structural seen yet.
    Header,
    /// Version and/or plan seen, no assertion yet.
    Plan,
    /// At least one assertion seen.
    Assertion,
    /// Inside a fenced YAML block of the current assertion.
    Diagnostic,
}

struct Patterns {
    version: Regex,
    plan: Regex,
    assertion: Regex,
    directive: Regex,
    bail_out: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        version: Regex::new(r"(?i)^TAP version (\d+)\s*$").expect("static pattern"),
        plan: Regex::new(r"^(\d+)\.\.(\d+)\s*(?:#\s*(.*))?$").expect("static pattern"),
        assertion: Regex::new(r"^(not ok|ok)\b(.*)$").expect("static pattern"),
        directive: Regex::new(r"(?i)^(skip|todo)\S*(?:\s+(.*))?$").expect("static pattern"),
        bail_out: Regex::new(r"(?i)^Bail out!\s*(.*)$").expect("static pattern"),
    })
}

/// Incremental TAP parser.
///
/// Feed whole lines with [`TapParser::feed_line`] or arbitrary chunks with
/// [`TapParser::feed`], then call [`TapParser::finish`].
#[derive(Debug)]
pub struct TapParser {
    state: ParserState,
    result: ParsedResult,
    current: Option<Assertion>,
    next_number: u32,
    line_no: usize,
    pending: String,
    just_asserted: bool,
    seen_structure: bool,
}

impl Default for TapParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TapParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Header,
            result: ParsedResult::default(),
            current: None,
            next_number: 1,
            line_no: 0,
            pending: String::new(),
            just_asserted: false,
            seen_structure: false,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed a chunk of output; complete lines are parsed immediately.
    pub fn feed(&mut self, chunk: &str) {
        self.pending.push_str(chunk);
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            self.feed_line(&line);
        }
    }

    /// Parse one line (a trailing newline is ignored).
    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\n', '\r']);
        self.line_no += 1;

        if self.state == ParserState::Diagnostic {
            if self.diagnostic_line(line) {
                return;
            }
            // A non-indented line closes an unterminated block; parse it normally.
        }

        let was_just_asserted = self.just_asserted;
        self.just_asserted = false;

        let p = patterns();

        if let Some(caps) = p.version.captures(line) {
            self.version_line(line, caps[1].parse().unwrap_or(0));
        } else if let Some(caps) = p.plan.captures(line) {
            let start = caps[1].parse().unwrap_or(0);
            let end = caps[2].parse().unwrap_or(0);
            let skip_reason = caps
                .get(3)
                .and_then(|c| p.directive.captures(c.as_str().trim()))
                .filter(|d| d[1].eq_ignore_ascii_case("skip"))
                .map(|d| d.get(2).map_or(String::new(), |m| m.as_str().trim().to_string()));
            self.plan_line(Plan {
                start,
                end,
                skip_reason,
            });
        } else if let Some(caps) = p.assertion.captures(line) {
            let ok = &caps[1] == "ok";
            let rest = caps[2].to_string();
            self.assertion_line(ok, &rest);
        } else if let Some(caps) = p.bail_out.captures(line) {
            let reason = caps[1].trim().to_string();
            self.result.anomalies.push(Anomaly::BailOut {
                reason: reason.clone(),
            });
            self.result.bail_out = Some(reason);
            self.seen_structure = true;
        } else if was_just_asserted && line.trim() == "---" && line.starts_with(char::is_whitespace) {
            self.state = ParserState::Diagnostic;
        } else {
            self.log_line(line);
        }
    }

    /// Returns `false` when the line ends the block without belonging to it.
    fn diagnostic_line(&mut self, line: &str) -> bool {
        let number = self.current.as_ref().map_or(0, |a| a.number);
        if line.trim() == "..." {
            self.state = ParserState::Assertion;
            return true;
        }
        if line.is_empty() || line.starts_with(char::is_whitespace) {
            if let Some(current) = self.current.as_mut() {
                current.diagnostics.push(line.trim_start().to_string());
            }
            return true;
        }
        self.result
            .anomalies
            .push(Anomaly::UnterminatedDiagnostic { assertion: number });
        self.state = ParserState::Assertion;
        false
    }

    fn version_line(&mut self, line: &str, version: u32) {
        if self.result.version.is_none() && !self.seen_structure {
            if version != 13 && version != 14 {
                self.result
                    .anomalies
                    .push(Anomaly::UnsupportedVersion { version });
            }
            self.result.version = Some(version);
            self.state = ParserState::Plan;
            self.seen_structure = true;
        } else {
            self.result
                .anomalies
                .push(Anomaly::MisplacedVersion { line: self.line_no });
            self.log_line(line);
        }
    }

    fn plan_line(&mut self, plan: Plan) {
        self.seen_structure = true;
        if self.result.plan.is_some() {
            self.result
                .anomalies
                .push(Anomaly::DuplicatePlan { line: self.line_no });
            return;
        }
        self.result.plan = Some(plan);
        if self.state == ParserState::Header {
            self.state = ParserState::Plan;
        }
    }

    fn assertion_line(&mut self, ok: bool, rest: &str) {
        self.seen_structure = true;
        if let Some(done) = self.current.take() {
            self.result.assertions.push(done);
        }

        let rest = rest.trim_start();
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        let explicit: Option<u32> = digits.parse().ok();
        let rest = rest[digits.len()..].trim_start();
        let rest = rest.strip_prefix('-').unwrap_or(rest).trim_start();

        let number = match explicit {
            Some(found) => {
                if found != self.next_number {
                    self.result.anomalies.push(Anomaly::OutOfSequence {
                        expected: self.next_number,
                        found,
                    });
                }
                found
            }
            None => self.next_number,
        };
        self.next_number = number.saturating_add(1);

        let (description, directive, directive_reason) = split_directive(rest);
        let outcome = match (ok, directive) {
            (_, Some(Directive::Todo)) => AssertionOutcome::Todo,
            (_, Some(Directive::Skip)) => AssertionOutcome::Skip,
            (true, None) => AssertionOutcome::Pass,
            (false, None) => AssertionOutcome::Fail,
        };

        self.current = Some(Assertion {
            number,
            ok,
            description,
            outcome,
            directive,
            directive_reason,
            diagnostics: Vec::new(),
            log: Vec::new(),
        });
        self.state = ParserState::Assertion;
        self.just_asserted = true;
    }

    fn log_line(&mut self, line: &str) {
        match self.current.as_mut() {
            Some(current) => current.log.push(line.to_string()),
            None => self.result.preamble.push(line.to_string()),
        }
    }

    /// Close the document and check its structure.
    ///
    /// `exit_code` is the client's exit code (`None` when it never exited on
    /// its own). Output with no version line and no assertions is an error
    /// only when the client did not exit 0.
    pub fn finish(mut self, exit_code: Option<i32>) -> Result<ParsedResult, ParseError> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.feed_line(&rest);
        }

        if self.state == ParserState::Diagnostic {
            let number = self.current.as_ref().map_or(0, |a| a.number);
            self.result
                .anomalies
                .push(Anomaly::UnterminatedDiagnostic { assertion: number });
        }
        if let Some(done) = self.current.take() {
            self.result.assertions.push(done);
        }

        let mut result = self.result;

        if result.version.is_none() {
            if result.assertions.is_empty() && exit_code != Some(0) {
                return Err(ParseError::Unparseable { exit_code });
            }
            result.anomalies.insert(0, Anomaly::MissingVersion);
        }

        let observed = result.assertions.len() as u32;
        match &result.plan {
            None => result.anomalies.push(Anomaly::MissingPlan),
            Some(plan) if plan.expected() != observed => {
                result.anomalies.push(Anomaly::PlanMismatch {
                    declared: plan.expected(),
                    observed,
                });
            }
            Some(_) => {}
        }

        Ok(result)
    }
}

/// Split `description # DIRECTIVE reason`, honouring `\#` escapes.
fn split_directive(text: &str) -> (String, Option<Directive>, Option<String>) {
    let bytes = text.as_bytes();
    let hash = (0..bytes.len()).find(|&i| bytes[i] == b'#' && (i == 0 || bytes[i - 1] != b'\\'));

    let Some(hash) = hash else {
        return (unescape(text.trim()), None, None);
    };

    let comment = text[hash + 1..].trim();
    match patterns().directive.captures(comment) {
        Some(caps) => {
            let directive = if caps[1].eq_ignore_ascii_case("skip") {
                Directive::Skip
            } else {
                Directive::Todo
            };
            let reason = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|r| !r.is_empty());
            (unescape(text[..hash].trim()), Some(directive), reason)
        }
        None => (unescape(text.trim()), None, None),
    }
}

fn unescape(text: &str) -> String {
    text.replace("\\#", "#")
}

/// Parse a fully buffered client output.
pub fn parse_tap(output: &str, exit_code: Option<i32>) -> Result<ParsedResult, ParseError> {
    let mut parser = TapParser::new();
    for line in output.lines() {
        parser.feed_line(line);
    }
    parser.finish(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut parser = TapParser::new();
        assert_eq!(parser.state(), ParserState::Header);
        parser.feed_line("TAP version 14");
        assert_eq!(parser.state(), ParserState::Plan);
        parser.feed_line("1..1");
        assert_eq!(parser.state(), ParserState::Plan);
        parser.feed_line("not ok 1 - setup");
        assert_eq!(parser.state(), ParserState::Assertion);
        parser.feed_line("  ---");
        assert_eq!(parser.state(), ParserState::Diagnostic);
        parser.feed_line("  message: timeout");
        parser.feed_line("  ...");
        assert_eq!(parser.state(), ParserState::Assertion);
    }

    #[test]
    fn test_plan_from_header_state() {
        let mut parser = TapParser::new();
        parser.feed_line("1..2");
        assert_eq!(parser.state(), ParserState::Plan);
    }

    #[test]
    fn test_log_lines_do_not_change_state() {
        let mut parser = TapParser::new();
        parser.feed_line("TAP version 14");
        parser.feed_line("connecting to relay");
        assert_eq!(parser.state(), ParserState::Plan);
    }

    #[test]
    fn test_yaml_fence_only_directly_after_assertion() {
        let result = parse_tap(
            "TAP version 14\n1..1\nok 1 - a\ndebug output\n  ---\n",
            Some(0),
        )
        .expect("parse");
        let a = &result.assertions[0];
        assert!(a.diagnostics.is_empty());
        assert_eq!(a.log, vec!["debug output".to_string(), "  ---".to_string()]);
    }

    #[test]
    fn test_split_directive_variants() {
        let (d, dir, reason) = split_directive("needs relay # SKIP no relay available");
        assert_eq!(d, "needs relay");
        assert_eq!(dir, Some(Directive::Skip));
        assert_eq!(reason.as_deref(), Some("no relay available"));

        let (d, dir, _) = split_directive("flaky thing # todo");
        assert_eq!(d, "flaky thing");
        assert_eq!(dir, Some(Directive::Todo));

        let (d, dir, _) = split_directive("issue \\# 12 fixed");
        assert_eq!(d, "issue # 12 fixed");
        assert!(dir.is_none());

        let (d, dir, _) = split_directive("has # a comment");
        assert_eq!(d, "has # a comment");
        assert!(dir.is_none());
    }

    #[test]
    fn test_feed_handles_split_chunks() {
        let mut parser = TapParser::new();
        parser.feed("TAP vers");
        parser.feed("ion 14\n1..2\nok 1 - a\nnot o");
        parser.feed("k 2 - b\n");
        let result = parser.finish(Some(1)).expect("parse");
        assert_eq!(result.assertions.len(), 2);
        assert_eq!(result.failed_count(), 1);
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn test_unterminated_trailing_line_is_flushed() {
        let mut parser = TapParser::new();
        parser.feed("TAP version 14\n1..1\nok 1 - last");
        let result = parser.finish(Some(0)).expect("parse");
        assert_eq!(result.assertions.len(), 1);
        assert_eq!(result.assertions[0].description, "last");
    }
}
