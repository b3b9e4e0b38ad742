//! Batch parser: splits a script into `GO`-delimited batches and applies
//! SQLCMD commands and variable substitution.

use std::collections::HashMap;

use crate::lexer::{is_variable_char, tokenize, variable_len, Token, TokenKind};
use crate::types::{
    Batch, BatchError, BatchResult, ErrorAction, ParsedScript, ParserOptions, Position,
};

/// A token after variable substitution, waiting to become part of a batch.
struct Piece {
    text: String,
    start: Position,
    end: Position,
    blank: bool,
    significant: bool,
}

/// Splits T-SQL scripts into batches.
#[derive(Debug, Clone, Default)]
pub struct BatchParser {
    options: ParserOptions,
}

impl BatchParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Parse a whole script.
    pub fn parse(&self, script: &str) -> BatchResult<ParsedScript> {
        let tokens = tokenize(script);
        let mut state = ParseState {
            variables: self
                .options
                .variables
                .iter()
                .map(|(k, v)| (normalize_name(k), v.clone()))
                .collect(),
            on_error: ErrorAction::Ignore,
            batches: Vec::new(),
            pending: Vec::new(),
        };

        for line in split_lines(&tokens) {
            let Some(head_idx) = line.iter().position(|t| !t.is_blank()) else {
                state.push_tokens(line, false)?;
                continue;
            };
            let head = &line[head_idx];

            if head.kind == TokenKind::Text && head.text.eq_ignore_ascii_case("go") {
                let count = parse_go_tail(&line[head_idx + 1..], head.start.line)?;
                state.flush(count);
                continue;
            }

            if self.options.sqlcmd_mode && head.kind == TokenKind::Text && head.text.starts_with(':')
            {
                state.run_command(line, head.start.line)?;
                continue;
            }

            state.push_tokens(line, self.options.sqlcmd_mode)?;
        }
        state.flush(1);

        tracing::debug!(batches = state.batches.len(), "parsed script");
        Ok(ParsedScript {
            batches: state.batches,
            on_error: state.on_error,
        })
    }
}

/// Parse a script with default (non-SQLCMD) options.
pub fn parse_batches(script: &str) -> BatchResult<ParsedScript> {
    BatchParser::default().parse(script)
}

struct ParseState {
    variables: HashMap<String, String>,
    on_error: ErrorAction,
    batches: Vec<Batch>,
    pending: Vec<Piece>,
}

impl ParseState {
    fn push_tokens(&mut self, tokens: &[Token<'_>], substitute: bool) -> BatchResult<()> {
        for token in tokens {
            let text = if substitute {
                self.render(token)?
            } else {
                token.text.to_string()
            };
            self.pending.push(Piece {
                text,
                start: token.start,
                end: token.end,
                blank: token.is_blank(),
                significant: !token.is_trivia(),
            });
        }
        Ok(())
    }

    fn render(&self, token: &Token<'_>) -> BatchResult<String> {
        match token.kind {
            TokenKind::Variable => {
                let name = token.variable_name().unwrap_or_default();
                self.lookup(name, token.start.line).map(str::to_string)
            }
            TokenKind::StringLiteral
            | TokenKind::QuotedIdentifier
            | TokenKind::BracketIdentifier => self.substitute(token.text, token.start.line),
            _ => Ok(token.text.to_string()),
        }
    }

    fn lookup(&self, name: &str, line: u32) -> BatchResult<&str> {
        self.variables
            .get(&normalize_name(name))
            .map(String::as_str)
            .ok_or_else(|| BatchError::VariableNotDefined {
                line,
                name: name.to_string(),
            })
    }

    /// Replace every `$(name)` inside a quoted token.
    fn substitute(&self, text: &str, line: u32) -> BatchResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(idx) = rest.find("$(") {
            out.push_str(&rest[..idx]);
            let candidate = &rest[idx..];
            match variable_len(candidate) {
                Some(len) => {
                    out.push_str(self.lookup(&candidate[2..len - 1], line)?);
                    rest = &candidate[len..];
                }
                None => {
                    out.push_str("$(");
                    rest = &candidate[2..];
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Close the current batch. Batches with nothing but whitespace and
    /// comments are dropped.
    fn flush(&mut self, repeat_count: u32) {
        let pending = std::mem::take(&mut self.pending);
        let (Some(first), Some(last)) = (
            pending.iter().position(|p| !p.blank),
            pending.iter().rposition(|p| !p.blank),
        ) else {
            return;
        };
        let body = &pending[first..=last];
        if !body.iter().any(|p| p.significant) {
            return;
        }

        let text: String = body.iter().map(|p| p.text.as_str()).collect();
        let start = body[0].start;
        let end = body[body.len() - 1].end;
        self.batches.push(Batch {
            text,
            start_line: start.line,
            start_column: start.column,
            end_line: end.line,
            end_column: end.column,
            repeat_count,
        });
    }

    fn run_command(&mut self, line: &[Token<'_>], line_no: u32) -> BatchResult<()> {
        let raw: String = line
            .iter()
            .filter(|t| t.kind != TokenKind::NewLine)
            .map(|t| t.text)
            .collect();
        let body = raw.trim().trim_start_matches(':');
        let (command, args) = match body.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim()),
            None => (body, ""),
        };

        match command.to_ascii_lowercase().as_str() {
            "setvar" => self.setvar(args, line_no),
            "on" => {
                let mut words = args.split_whitespace();
                let action = match (words.next(), words.next(), words.next()) {
                    (Some(kw), Some(action), None) if kw.eq_ignore_ascii_case("error") => {
                        action.to_ascii_lowercase()
                    }
                    _ => {
                        return Err(BatchError::InvalidCommand {
                            line: line_no,
                            command: "on error".to_string(),
                            message: "expected ':on error exit|ignore'".to_string(),
                        })
                    }
                };
                self.on_error = match action.as_str() {
                    "exit" => ErrorAction::Exit,
                    "ignore" => ErrorAction::Ignore,
                    other => {
                        return Err(BatchError::InvalidCommand {
                            line: line_no,
                            command: "on error".to_string(),
                            message: format!("unknown action '{other}'"),
                        })
                    }
                };
                Ok(())
            }
            _ => Err(BatchError::UnsupportedCommand {
                line: line_no,
                command: command.to_string(),
            }),
        }
    }

    fn setvar(&mut self, args: &str, line: u32) -> BatchResult<()> {
        let invalid = |message: &str| BatchError::InvalidCommand {
            line,
            command: "setvar".to_string(),
            message: message.to_string(),
        };

        if args.is_empty() {
            return Err(invalid("variable name expected"));
        }
        let (name, value) = match args.split_once(char::is_whitespace) {
            Some((name, value)) => (name, value.trim()),
            None => (args, ""),
        };
        if !name.chars().all(is_variable_char) {
            return Err(BatchError::InvalidVariableName {
                line,
                name: name.to_string(),
            });
        }
        let key = normalize_name(name);

        if value.is_empty() {
            self.variables.remove(&key);
            return Ok(());
        }

        let value = if let Some(quoted) = value.strip_prefix('"') {
            let inner = quoted
                .strip_suffix('"')
                .ok_or_else(|| invalid("unterminated quoted value"))?;
            inner.replace("\"\"", "\"")
        } else if value.contains(char::is_whitespace) {
            return Err(invalid("values containing spaces must be quoted"));
        } else {
            value.to_string()
        };

        tracing::trace!(name = %key, "setvar");
        self.variables.insert(key, value);
        Ok(())
    }
}

/// SQLCMD variable names are case-insensitive.
fn normalize_name(name: &str) -> String {
    name.to_uppercase()
}

/// Group tokens into lines; each slice includes its trailing newline token.
fn split_lines<'t, 'a>(tokens: &'t [Token<'a>]) -> Vec<&'t [Token<'a>]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::NewLine {
            lines.push(&tokens[start..=i]);
            start = i + 1;
        }
    }
    if start < tokens.len() {
        lines.push(&tokens[start..]);
    }
    lines
}

/// Validate what follows `GO` on its line and return the repeat count.
fn parse_go_tail(rest: &[Token<'_>], line: u32) -> BatchResult<u32> {
    let mut remaining = rest.iter().filter(|t| !t.is_blank()).peekable();
    let mut count = 1;

    if let Some(token) = remaining.peek() {
        if token.kind == TokenKind::Text && token.text.chars().all(|c| c.is_ascii_digit()) {
            count = match token.text.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(BatchError::InvalidRepeatCount {
                        line,
                        value: token.text.to_string(),
                    })
                }
            };
            remaining.next();
        }
    }

    if remaining.all(|t| t.is_trivia()) {
        Ok(count)
    } else {
        Err(BatchError::InvalidGo { line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(script: &ParsedScript) -> Vec<&str> {
        script.batches.iter().map(|b| b.text.as_str()).collect()
    }

    #[test]
    fn test_single_batch_without_go() {
        let parsed = parse_batches("SELECT 1").unwrap();
        assert_eq!(texts(&parsed), vec!["SELECT 1"]);
        assert_eq!(parsed.batches[0].repeat_count, 1);
    }

    #[test]
    fn test_split_on_go() {
        let parsed = parse_batches("SELECT 1\nGO\nSELECT 2\ngo\n").unwrap();
        assert_eq!(texts(&parsed), vec!["SELECT 1", "SELECT 2"]);
        let second = &parsed.batches[1];
        assert_eq!(second.start(), Position::new(2, 0));
        assert_eq!(second.end(), Position::new(2, 8));
    }

    #[test]
    fn test_go_repeat_count_and_comment() {
        let parsed = parse_batches("INSERT t DEFAULT VALUES\n  GO 3 -- thrice\n").unwrap();
        assert_eq!(parsed.batches.len(), 1);
        assert_eq!(parsed.batches[0].repeat_count, 3);
    }

    #[test]
    fn test_go_zero_count_rejected() {
        let err = parse_batches("SELECT 1\nGO 0").unwrap_err();
        assert!(matches!(err, BatchError::InvalidRepeatCount { line: 1, .. }));
    }

    #[test]
    fn test_go_overflow_count_rejected() {
        let err = parse_batches("SELECT 1\nGO 99999999999").unwrap_err();
        assert!(matches!(err, BatchError::InvalidRepeatCount { .. }));
    }

    #[test]
    fn test_go_trailing_garbage_rejected() {
        let err = parse_batches("SELECT 1\nGO now").unwrap_err();
        assert_eq!(err, BatchError::InvalidGo { line: 1 });
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_go_inside_string_and_comment_is_text() {
        let script = "SELECT 'a\nGO\nb'\n/*\nGO\n*/\nSELECT 2";
        let parsed = parse_batches(script).unwrap();
        assert_eq!(parsed.batches.len(), 1);
        assert_eq!(parsed.batches[0].text, script);
    }

    #[test]
    fn test_go_prefix_words_are_text() {
        let parsed = parse_batches("GOTO lbl\nGO;\n").unwrap();
        assert_eq!(parsed.batches.len(), 1);
    }

    #[test]
    fn test_comment_only_batches_dropped() {
        let parsed = parse_batches("-- header\nGO\n\n  \nGO\nSELECT 1\nGO\n/* tail */").unwrap();
        assert_eq!(texts(&parsed), vec!["SELECT 1"]);
    }

    #[test]
    fn test_leading_comment_kept_with_code() {
        let parsed = parse_batches("-- note\nSELECT 1").unwrap();
        assert_eq!(texts(&parsed), vec!["-- note\nSELECT 1"]);
        assert_eq!(parsed.batches[0].start(), Position::new(0, 0));
    }

    #[test]
    fn test_variables_ignored_outside_sqlcmd_mode() {
        let parsed = parse_batches(":setvar x 1\nSELECT '$(x)'").unwrap();
        assert_eq!(texts(&parsed), vec![":setvar x 1\nSELECT '$(x)'"]);
    }

    #[test]
    fn test_setvar_and_substitution() {
        let parser = BatchParser::new(ParserOptions::sqlcmd());
        let script = ":setvar DbName \"My \"\"Db\"\"\"\n:setvar Tbl t1\nUSE [$(dbname)];\nSELECT * FROM $(TBL)\n";
        let parsed = parser.parse(script).unwrap();
        assert_eq!(
            texts(&parsed),
            vec!["USE [My \"Db\"];\nSELECT * FROM t1"]
        );
    }

    #[test]
    fn test_initial_variables() {
        let parser = BatchParser::new(ParserOptions::sqlcmd().with_variable("env", "prod"));
        let parsed = parser.parse("SELECT '$(ENV)'").unwrap();
        assert_eq!(texts(&parsed), vec!["SELECT 'prod'"]);
    }

    #[test]
    fn test_setvar_without_value_undefines() {
        let parser = BatchParser::new(ParserOptions::sqlcmd().with_variable("x", "1"));
        let err = parser.parse(":setvar x\nSELECT $(x)").unwrap_err();
        assert_eq!(
            err,
            BatchError::VariableNotDefined {
                line: 1,
                name: "x".to_string()
            }
        );
    }

    #[test]
    fn test_variables_not_substituted_in_comments() {
        let parser = BatchParser::new(ParserOptions::sqlcmd());
        let parsed = parser.parse("-- $(missing)\nSELECT 1").unwrap();
        assert_eq!(texts(&parsed), vec!["-- $(missing)\nSELECT 1"]);
    }

    #[test]
    fn test_on_error_exit() {
        let parser = BatchParser::new(ParserOptions::sqlcmd());
        let parsed = parser.parse(":on error EXIT\nSELECT 1").unwrap();
        assert_eq!(parsed.on_error, ErrorAction::Exit);
        assert_eq!(texts(&parsed), vec!["SELECT 1"]);
    }

    #[test]
    fn test_bad_commands() {
        let parser = BatchParser::new(ParserOptions::sqlcmd());
        assert!(matches!(
            parser.parse(":connect server").unwrap_err(),
            BatchError::UnsupportedCommand { .. }
        ));
        assert!(matches!(
            parser.parse(":setvar bad!name 1").unwrap_err(),
            BatchError::InvalidVariableName { .. }
        ));
        assert!(matches!(
            parser.parse(":setvar x a b").unwrap_err(),
            BatchError::InvalidCommand { .. }
        ));
        assert!(matches!(
            parser.parse(":on error maybe").unwrap_err(),
            BatchError::InvalidCommand { .. }
        ));
    }
}
