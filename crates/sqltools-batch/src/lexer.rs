//! Tokenizer for T-SQL scripts.
//!
//! The lexer only distinguishes what the batch parser cares about: line
//! structure, comments, quoted regions (where `GO` is not a separator) and
//! SQLCMD `$(name)` references. Everything else is opaque text.

use crate::types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    NewLine,
    /// `-- ...` up to, not including, the line break.
    LineComment,
    /// `/* ... */`, nestable.
    BlockComment,
    /// `'...'` with `''` escapes.
    StringLiteral,
    /// `"..."` with `""` escapes.
    QuotedIdentifier,
    /// `[...]` with `]]` escapes.
    BracketIdentifier,
    /// `$(name)`
    Variable,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: Position,
    /// Exclusive.
    pub end: Position,
}

impl<'a> Token<'a> {
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace
                | TokenKind::NewLine
                | TokenKind::LineComment
                | TokenKind::BlockComment
        )
    }

    pub fn is_blank(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::NewLine)
    }

    /// Name inside a `$(name)` token.
    pub fn variable_name(&self) -> Option<&'a str> {
        if self.kind != TokenKind::Variable {
            return None;
        }
        self.text.get(2..self.text.len() - 1)
    }
}

/// Byte length of a `$(name)` reference at the start of `rest`, if any.
pub(crate) fn variable_len(rest: &str) -> Option<usize> {
    let body = rest.strip_prefix("$(")?;
    let name_len = body
        .char_indices()
        .take_while(|(_, c)| is_variable_char(*c))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    if body[name_len..].starts_with(')') {
        Some(2 + name_len + 1)
    } else {
        None
    }
}

pub(crate) fn is_variable_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

struct Cursor<'a> {
    input: &'a str,
    offset: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    fn starts_with(&self, pattern: &str) -> bool {
        self.rest().starts_with(pattern)
    }

    fn at_line_break(&self) -> bool {
        self.starts_with("\n") || self.starts_with("\r\n")
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }
}

pub struct Lexer<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            cursor: Cursor {
                input,
                offset: 0,
                line: 0,
                column: 0,
            },
        }
    }

    fn lex_token(&mut self) -> Option<Token<'a>> {
        let c = self.cursor.peek()?;
        let start_offset = self.cursor.offset;
        let start = self.cursor.position();

        let kind = match c {
            '\n' => {
                self.cursor.bump();
                TokenKind::NewLine
            }
            '\r' if self.cursor.peek_second() == Some('\n') => {
                self.cursor.bump_n(2);
                TokenKind::NewLine
            }
            c if c.is_whitespace() => {
                while let Some(c) = self.cursor.peek() {
                    if !c.is_whitespace() || self.cursor.at_line_break() {
                        break;
                    }
                    self.cursor.bump();
                }
                TokenKind::Whitespace
            }
            '-' if self.cursor.peek_second() == Some('-') => {
                while self.cursor.peek().is_some() && !self.cursor.at_line_break() {
                    self.cursor.bump();
                }
                TokenKind::LineComment
            }
            '/' if self.cursor.peek_second() == Some('*') => {
                self.lex_block_comment();
                TokenKind::BlockComment
            }
            '\'' => {
                self.lex_quoted('\'', '\'');
                TokenKind::StringLiteral
            }
            '"' => {
                self.lex_quoted('"', '"');
                TokenKind::QuotedIdentifier
            }
            '[' => {
                self.lex_quoted('[', ']');
                TokenKind::BracketIdentifier
            }
            '$' if variable_len(self.cursor.rest()).is_some() => {
                let len = variable_len(self.cursor.rest()).unwrap_or(1);
                let chars = self.cursor.rest()[..len].chars().count();
                self.cursor.bump_n(chars);
                TokenKind::Variable
            }
            _ => {
                self.cursor.bump();
                while let Some(c) = self.cursor.peek() {
                    if c.is_whitespace() || self.at_special_start(c) {
                        break;
                    }
                    self.cursor.bump();
                }
                TokenKind::Text
            }
        };

        Some(Token {
            kind,
            text: &self.cursor.input[start_offset..self.cursor.offset],
            start,
            end: self.cursor.position(),
        })
    }

    fn at_special_start(&self, c: char) -> bool {
        match c {
            '\'' | '"' | '[' => true,
            '-' => self.cursor.peek_second() == Some('-'),
            '/' => self.cursor.peek_second() == Some('*'),
            '$' => variable_len(self.cursor.rest()).is_some(),
            _ => false,
        }
    }

    fn lex_block_comment(&mut self) {
        self.cursor.bump_n(2);
        let mut depth = 1usize;
        while depth > 0 {
            if self.cursor.starts_with("/*") {
                self.cursor.bump_n(2);
                depth += 1;
            } else if self.cursor.starts_with("*/") {
                self.cursor.bump_n(2);
                depth -= 1;
            } else if self.cursor.bump().is_none() {
                break;
            }
        }
    }

    /// Consume a quoted region; a doubled closing quote is an escape.
    /// Runs to end of input when unterminated.
    fn lex_quoted(&mut self, open: char, close: char) {
        debug_assert_eq!(self.cursor.peek(), Some(open));
        self.cursor.bump();
        while let Some(c) = self.cursor.bump() {
            if c == close {
                if self.cursor.peek() == Some(close) {
                    self.cursor.bump();
                } else {
                    break;
                }
            }
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lex_token()
    }
}

/// Tokenize a whole script.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    Lexer::new(input).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(TokenKind, &str)> {
        tokenize(input).into_iter().map(|t| (t.kind, t.text)).collect()
    }

    #[test]
    fn test_simple_statement() {
        assert_eq!(
            kinds("SELECT 1\nGO"),
            vec![
                (TokenKind::Text, "SELECT"),
                (TokenKind::Whitespace, " "),
                (TokenKind::Text, "1"),
                (TokenKind::NewLine, "\n"),
                (TokenKind::Text, "GO"),
            ]
        );
    }

    #[test]
    fn test_crlf_is_one_newline() {
        let tokens = tokenize("a\r\nb");
        assert_eq!(tokens[1].kind, TokenKind::NewLine);
        assert_eq!(tokens[1].text, "\r\n");
        assert_eq!(tokens[2].start, Position::new(1, 0));
    }

    #[test]
    fn test_string_with_escaped_quote_and_go() {
        let tokens = tokenize("'it''s\nGO'");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].end, Position::new(1, 3));
    }

    #[test]
    fn test_nested_block_comment() {
        let tokens = tokenize("/* a /* b */ c */x");
        assert_eq!(tokens[0].kind, TokenKind::BlockComment);
        assert_eq!(tokens[0].text, "/* a /* b */ c */");
        assert_eq!(tokens[1].text, "x");
    }

    #[test]
    fn test_unterminated_comment_runs_to_end() {
        let tokens = tokenize("/* open\nGO");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::BlockComment);
    }

    #[test]
    fn test_line_comment_stops_before_newline() {
        assert_eq!(
            kinds("GO -- done\r\nx"),
            vec![
                (TokenKind::Text, "GO"),
                (TokenKind::Whitespace, " "),
                (TokenKind::LineComment, "-- done"),
                (TokenKind::NewLine, "\r\n"),
                (TokenKind::Text, "x"),
            ]
        );
    }

    #[test]
    fn test_text_stops_at_comment_start() {
        assert_eq!(
            kinds("GO--x"),
            vec![(TokenKind::Text, "GO"), (TokenKind::LineComment, "--x")]
        );
    }

    #[test]
    fn test_bracket_identifier_escape() {
        let tokens = tokenize("[a]]b] c");
        assert_eq!(tokens[0].kind, TokenKind::BracketIdentifier);
        assert_eq!(tokens[0].text, "[a]]b]");
    }

    #[test]
    fn test_variable_reference() {
        let tokens = tokenize("USE $(db_name);");
        assert_eq!(tokens[2].kind, TokenKind::Variable);
        assert_eq!(tokens[2].variable_name(), Some("db_name"));
        assert_eq!(tokens[3].text, ";");
    }

    #[test]
    fn test_dollar_without_reference_is_text() {
        assert_eq!(kinds("$(x"), vec![(TokenKind::Text, "$(x")]);
        assert_eq!(variable_len("$()"), None);
    }
}
