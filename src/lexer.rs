use std::{iter::Peekable, str::CharIndices};

use thiserror::Error;

use crate::language::{LanguageTable, Msg, format_message};
use crate::token::{Span, Token, TokenKind};

/// Fatal lexical error. The message is already localized through the
/// language table; `line` is kept separately for callers that want it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    lang: &'a LanguageTable,
    indent_stack: Vec<usize>,
    pending_tokens: Vec<Token>,
    at_line_start: bool,
    eof_reached: bool,
    line: usize,
    column: usize,
    // Bracket/paren/brace nesting. While non-zero, indentation and newlines
    // are not significant.
    depth: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, lang: &'a LanguageTable) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            lang,
            indent_stack: vec![0],
            pending_tokens: Vec::new(),
            at_line_start: true,
            eof_reached: false,
            line: 1,
            column: 0,
            depth: 0,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token> {
        loop {
            if let Some(token) = self.pending_tokens.pop() {
                return Ok(token);
            }

            if self.eof_reached {
                return Ok(self.structural(TokenKind::Eof));
            }

            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                let indent_level = self.count_indentation()?;
                let current_indent = *self.indent_stack.last().unwrap_or(&0);

                if indent_level > current_indent {
                    self.indent_stack.push(indent_level);
                    return Ok(self.structural(TokenKind::Indent));
                }
                if indent_level < current_indent {
                    while let Some(&top) = self.indent_stack.last() {
                        if top > indent_level {
                            self.indent_stack.pop();
                            let token = self.structural(TokenKind::Dedent);
                            self.pending_tokens.push(token);
                        } else {
                            break;
                        }
                    }
                    if *self.indent_stack.last().unwrap_or(&0) != indent_level {
                        return Err(self.error(Msg::InvalidDedent, &[&self.line.to_string()]));
                    }
                    continue;
                }
            }

            self.skip_spaces();

            let (start_idx, ch) = match self.chars.peek() {
                Some(&(idx, c)) => (idx, c),
                None => {
                    self.eof_reached = true;
                    while self.indent_stack.len() > 1 {
                        self.indent_stack.pop();
                        let token = self.structural(TokenKind::Dedent);
                        self.pending_tokens.push(token);
                    }
                    continue;
                }
            };

            let start_line = self.line;
            let start_column = self.column;

            match ch {
                '#' => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance_char();
                    }
                    continue;
                }
                '\n' => {
                    self.advance_char();
                    if self.depth == 0 {
                        self.at_line_start = true;
                        return Ok(self.token(
                            TokenKind::Newline,
                            start_idx,
                            start_idx + 1,
                            start_line,
                            start_column,
                        ));
                    }
                    continue;
                }
                '"' | '\'' => return self.read_string(ch, start_idx, start_line, start_column),
                c if c.is_alphabetic() || c == '_' => {
                    return Ok(self.read_identifier(start_idx, start_line, start_column));
                }
                c if c.is_ascii_digit() => {
                    return self.read_number(start_idx, start_line, start_column);
                }
                _ => return self.read_operator(ch, start_idx, start_line, start_column),
            }
        }
    }

    fn read_operator(
        &mut self,
        ch: char,
        start_idx: usize,
        line: usize,
        column: usize,
    ) -> LexResult<Token> {
        self.advance_char();
        // Two-character operators are matched before their single-character
        // prefixes.
        let kind = match ch {
            '>' if self.eat('=') => TokenKind::GreaterEqual,
            '<' if self.eat('=') => TokenKind::LessEqual,
            '=' if self.eat('=') => TokenKind::EqualEqual,
            '!' if self.eat('=') => TokenKind::NotEqual,
            '>' => TokenKind::Greater,
            '<' => TokenKind::Less,
            '=' => TokenKind::Equal,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '(' => {
                self.depth += 1;
                TokenKind::LParen
            }
            ')' => {
                self.depth = self.depth.saturating_sub(1);
                TokenKind::RParen
            }
            '[' => {
                self.depth += 1;
                TokenKind::LBracket
            }
            ']' => {
                self.depth = self.depth.saturating_sub(1);
                TokenKind::RBracket
            }
            '{' => {
                self.depth += 1;
                TokenKind::LBrace
            }
            '}' => {
                self.depth = self.depth.saturating_sub(1);
                TokenKind::RBrace
            }
            other => {
                return Err(self.error_at(
                    line,
                    Msg::UnexpectedCharacter,
                    &[&other.to_string(), &line.to_string()],
                ));
            }
        };
        let end_idx = self.current_index();
        Ok(self.token(kind, start_idx, end_idx, line, column))
    }

    fn count_indentation(&mut self) -> LexResult<usize> {
        // Lookahead without consuming: blank and comment-only lines must not
        // disturb the indentation stack.
        let mut lookahead = self.chars.clone();
        loop {
            match lookahead.peek() {
                Some(&(_, ' ')) => {
                    lookahead.next();
                }
                Some(&(_, '\t')) => {
                    return Err(self.error(Msg::TabIndentation, &[&self.line.to_string()]));
                }
                Some(&(_, '\n')) | Some(&(_, '\r')) | Some(&(_, '#')) | None => {
                    return Ok(*self.indent_stack.last().unwrap_or(&0));
                }
                Some(_) => break,
            }
        }

        let mut count = 0;
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ' ' {
                self.advance_char();
                count += 1;
            } else {
                break;
            }
        }
        Ok(count)
    }

    fn skip_spaces(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ' ' || c == '\r' || c == '\t' {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) -> Token {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];
        let kind = self
            .lang
            .keyword(ident)
            .unwrap_or_else(|| TokenKind::Identifier(ident.to_string()));
        self.token(kind, start, end_idx, line, column)
    }

    fn read_number(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token> {
        self.advance_char();
        let mut seen_dot = false;
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else if c == '.' {
                if seen_dot {
                    return Err(self.error_at(
                        line,
                        Msg::SecondDecimalPoint,
                        &[&line.to_string()],
                    ));
                }
                seen_dot = true;
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let literal = &self.input[start..end_idx];
        let kind = if seen_dot {
            let value = literal.parse::<f64>().map_err(|_| {
                self.error_at(line, Msg::SecondDecimalPoint, &[&line.to_string()])
            })?;
            TokenKind::Float(value)
        } else {
            let value = literal.parse::<i64>().map_err(|_| {
                self.error_at(line, Msg::IntegerOverflow, &[literal, &line.to_string()])
            })?;
            TokenKind::Integer(value)
        };
        Ok(self.token(kind, start, end_idx, line, column))
    }

    fn read_string(
        &mut self,
        quote: char,
        start: usize,
        line: usize,
        column: usize,
    ) -> LexResult<Token> {
        self.advance_char();
        if self.peek_char() == Some(quote) && self.peek_second() == Some(quote) {
            self.advance_char();
            self.advance_char();
            return self.read_raw_string(quote, start, line, column);
        }

        let mut content = String::new();
        loop {
            let Some(&(_, c)) = self.chars.peek() else {
                return Err(self.error_at(line, Msg::UnterminatedString, &[&line.to_string()]));
            };
            if c == quote {
                self.advance_char();
                let end_idx = self.current_index();
                return Ok(self.token(TokenKind::Str(content), start, end_idx, line, column));
            }
            if c == '\n' {
                return Err(self.error_at(line, Msg::UnterminatedString, &[&line.to_string()]));
            }
            if c == '\\' {
                self.advance_char();
                match self.peek_char() {
                    Some('n') => {
                        content.push('\n');
                        self.advance_char();
                    }
                    Some('t') => {
                        content.push('\t');
                        self.advance_char();
                    }
                    Some('r') => {
                        content.push('\r');
                        self.advance_char();
                    }
                    Some('\\') => {
                        content.push('\\');
                        self.advance_char();
                    }
                    Some('"') => {
                        content.push('"');
                        self.advance_char();
                    }
                    Some('\'') => {
                        content.push('\'');
                        self.advance_char();
                    }
                    // Unknown escapes keep the backslash literally.
                    Some(other) => {
                        content.push('\\');
                        content.push(other);
                        self.advance_char();
                    }
                    None => {
                        return Err(self.error_at(
                            line,
                            Msg::UnterminatedString,
                            &[&line.to_string()],
                        ));
                    }
                }
                continue;
            }
            content.push(c);
            self.advance_char();
        }
    }

    // Triple-quoted raw string: no escape processing, terminated only by
    // three matching closing quotes.
    fn read_raw_string(
        &mut self,
        quote: char,
        start: usize,
        line: usize,
        column: usize,
    ) -> LexResult<Token> {
        let mut content = String::new();
        let mut closing_run = 0;
        loop {
            let Some(&(_, c)) = self.chars.peek() else {
                return Err(self.error_at(line, Msg::UnterminatedString, &[&line.to_string()]));
            };
            self.advance_char();
            if c == quote {
                closing_run += 1;
                if closing_run == 3 {
                    let end_idx = self.current_index();
                    return Ok(self.token(
                        TokenKind::RawStr(content),
                        start,
                        end_idx,
                        line,
                        column,
                    ));
                }
            } else {
                for _ in 0..closing_run {
                    content.push(quote);
                }
                closing_run = 0;
                content.push(c);
            }
        }
    }

    fn token(
        &self,
        kind: TokenKind,
        start: usize,
        end: usize,
        line: usize,
        column: usize,
    ) -> Token {
        Token::new(
            kind,
            Span {
                start,
                end,
                line,
                column,
            },
        )
    }

    fn structural(&mut self, kind: TokenKind) -> Token {
        let index = self.current_index();
        self.token(kind, index, index, self.line, self.column)
    }

    fn error(&self, key: Msg, args: &[&str]) -> LexError {
        self.error_at(self.line, key, args)
    }

    fn error_at(&self, line: usize, key: Msg, args: &[&str]) -> LexError {
        LexError {
            line,
            message: format_message(self.lang.msg(key), args),
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance_char();
            true
        } else {
            false
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn peek_second(&mut self) -> Option<char> {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        lookahead.next().map(|(_, c)| c)
    }

    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }
}

pub fn tokenize(input: &str, lang: &LanguageTable) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(input, lang);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let lang = LanguageTable::portuguese();
        tokenize(input, &lang)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    fn lex_error(input: &str) -> LexError {
        let lang = LanguageTable::portuguese();
        tokenize(input, &lang).expect_err("expected lexing failure")
    }

    #[test]
    fn tokenizes_nested_blocks() {
        let input = indoc! {"
            funcao dobro(n):
                retornar n * 2
            saida(dobro(4))
        "};
        let expected = vec![
            TokenKind::Function,
            TokenKind::Identifier("dobro".to_string()),
            TokenKind::LParen,
            TokenKind::Identifier("n".to_string()),
            TokenKind::RParen,
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Return,
            TokenKind::Identifier("n".to_string()),
            TokenKind::Star,
            TokenKind::Integer(2),
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Identifier("saida".to_string()),
            TokenKind::LParen,
            TokenKind::Identifier("dobro".to_string()),
            TokenKind::LParen,
            TokenKind::Integer(4),
            TokenKind::RParen,
            TokenKind::RParen,
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn indents_and_dedents_balance_for_nested_source() {
        let input = indoc! {"
            se a > 0:
                se b > 0:
                    saida(1)
                saida(2)
            saida(3)
        "};
        let tokens = kinds(input);
        let indents = tokens
            .iter()
            .filter(|kind| matches!(kind, TokenKind::Indent))
            .count();
        let dedents = tokens
            .iter()
            .filter(|kind| matches!(kind, TokenKind::Dedent))
            .count();
        assert_eq!(indents, 2);
        assert_eq!(indents, dedents);
    }

    #[test]
    fn drains_open_indentation_at_eof() {
        let tokens = kinds("se a:\n    se b:\n        saida(1)");
        let dedents = tokens
            .iter()
            .filter(|kind| matches!(kind, TokenKind::Dedent))
            .count();
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn brackets_suppress_indentation_and_newlines() {
        let input = indoc! {"
            valores = [1,
                2,
                    3]
            saida(valores)
        "};
        let tokens = kinds(input);
        assert!(!tokens.iter().any(|kind| matches!(kind, TokenKind::Indent)));
        // Only the two logical line breaks outside brackets survive.
        let newlines = tokens
            .iter()
            .filter(|kind| matches!(kind, TokenKind::Newline))
            .count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn blank_and_comment_lines_keep_indentation() {
        let input = indoc! {"
            se a:
                saida(1)

                # comentario em outro nivel
                saida(2)
        "};
        let tokens = kinds(input);
        let indents = tokens
            .iter()
            .filter(|kind| matches!(kind, TokenKind::Indent))
            .count();
        assert_eq!(indents, 1);
    }

    #[test]
    fn matches_two_character_operators_greedily() {
        assert_eq!(
            kinds("a >= b <= c == d != e\n"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::GreaterEqual,
                TokenKind::Identifier("b".to_string()),
                TokenKind::LessEqual,
                TokenKind::Identifier("c".to_string()),
                TokenKind::EqualEqual,
                TokenKind::Identifier("d".to_string()),
                TokenKind::NotEqual,
                TokenKind::Identifier("e".to_string()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reads_float_literals() {
        assert_eq!(
            kinds("x = 2.5\n"),
            vec![
                TokenKind::Identifier("x".to_string()),
                TokenKind::Equal,
                TokenKind::Float(2.5),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn processes_escapes_and_preserves_unknown_ones() {
        let tokens = kinds(r#"saida("a\nb\q")"#);
        assert!(tokens.contains(&TokenKind::Str("a\nb\\q".to_string())));
    }

    #[test]
    fn raw_strings_skip_escape_processing() {
        let tokens = kinds("x = \"\"\"linha \\n {bruta}\"\"\"\n");
        assert!(tokens.contains(&TokenKind::RawStr("linha \\n {bruta}".to_string())));
    }

    #[test]
    fn raw_strings_keep_embedded_quotes() {
        let tokens = kinds("x = '''um ' dois '' tres'''\n");
        assert!(tokens.contains(&TokenKind::RawStr("um ' dois '' tres".to_string())));
    }

    #[test]
    fn errors_on_invalid_dedent() {
        let err = lex_error("se a:\n        saida(1)\n    saida(2)\n");
        assert!(err.message.contains("indentacao invalida"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn errors_on_second_decimal_point() {
        let err = lex_error("x = 1.2.3\n");
        assert!(err.message.contains("ponto decimal"));
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = lex_error("x = \"aberto\n");
        assert!(err.message.contains("texto nao terminado"));
    }

    #[test]
    fn errors_on_unterminated_raw_string() {
        let err = lex_error("x = \"\"\"aberto\"\"");
        assert!(err.message.contains("texto nao terminado"));
    }

    #[test]
    fn errors_on_unknown_character() {
        let err = lex_error("x = 1 @ 2\n");
        assert!(err.message.contains('@'));
    }

    #[test]
    fn errors_on_integer_overflow() {
        let err = lex_error("n = 99999999999999999999999999\n");
        assert!(err.message.contains("fora do intervalo"));
    }

    #[test]
    fn english_table_swaps_keywords() {
        let lang = LanguageTable::english();
        let tokens = tokenize("if x:\n    return x\n", &lang).expect("tokenize");
        assert!(matches!(tokens[0].kind, TokenKind::If));
        assert!(tokens
            .iter()
            .any(|token| matches!(token.kind, TokenKind::Return)));
    }
}
