use thiserror::Error;

use crate::frontend::token::Token;

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

/// A token together with its source text and position.
#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub lexeme: String,
    pub span: Span,
}

#[derive(Debug, Error)]
#[error("{line}:{col}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, message: impl Into<String>, span: &Span) -> LexerError {
        LexerError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_comment(&mut self) -> Token {
        // consume "//"
        self.advance();
        self.advance();
        let mut comment = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            comment.push(ch);
            self.advance();
        }
        Token::Comment(comment.trim().to_string())
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => string.push('\n'),
                        Some('t') => string.push('\t'),
                        Some('r') => string.push('\r'),
                        Some('\\') => string.push('\\'),
                        Some('"') => string.push('"'),
                        Some('0') => string.push('\0'),
                        Some(ch) => {
                            return Err(self.error(
                                format!("unknown escape sequence: \\{}", ch),
                                &self.span(),
                            ));
                        }
                        None => {
                            return Err(
                                self.error("unexpected EOF in escape sequence", &self.span())
                            );
                        }
                    }
                    self.advance();
                }
                Some('\n') => {
                    return Err(self.error(
                        "unterminated string (newline before closing quote)",
                        &start,
                    ));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error("unterminated string literal", &start));
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start = self.span();

        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot {
                // Only treat '.' as a decimal point if followed by a digit
                if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    has_dot = true;
                    digits.push('.');
                    self.advance();
                } else {
                    break;
                }
            } else {
                break;
            }
        }

        if has_dot {
            let value: f64 = digits
                .parse()
                .map_err(|_| self.error(format!("invalid float: {}", digits), &start))?;
            Ok(Token::Float(value))
        } else {
            let value: i64 = digits
                .parse()
                .map_err(|_| self.error(format!("invalid integer: {}", digits), &start))?;
            Ok(Token::Integer(value))
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.as_str() {
            "true" => Token::Bool(true),
            "false" => Token::Bool(false),
            "nil" => Token::Nil,
            "and" => Token::And,
            "or" => Token::Or,
            "var" => Token::Var,
            "print" => Token::Print,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            _ => Token::Ident(ident),
        }
    }

    fn read_operator(&mut self) -> Option<Token> {
        let ch = self.current()?;
        let next = self.peek();

        let (token, width) = match (ch, next) {
            ('!', Some('=')) => (Token::BangEq, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('!', _) => (Token::Bang, 1),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (';', _) => (Token::Semicolon, 1),
            (',', _) => (Token::Comma, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(token)
    }

    /// Tokenize the whole source, keeping comments.
    ///
    /// The returned stream always ends with `Token::Eof`.
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let span = self.span();
            let start = self.pos;

            let token = match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        lexeme: String::new(),
                        span,
                    });
                    break;
                }
                Some('/') if self.peek() == Some('/') => self.read_comment(),
                Some('"') => self.read_string()?,
                Some(ch) if ch.is_ascii_digit() => self.read_number()?,
                Some(ch) if ch.is_alphabetic() || ch == '_' => self.read_identifier(),
                Some(ch) => match self.read_operator() {
                    Some(token) => token,
                    None => {
                        return Err(self.error(format!("unexpected character '{}'", ch), &span));
                    }
                },
            };

            let lexeme: String = self.source[start..self.pos].iter().collect();
            tokens.push(Spanned {
                token,
                lexeme,
                span,
            });
        }

        Ok(tokens)
    }

    /// Tokenize and drop comments.
    pub fn tokenize_clean(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let tokens = self.tokenize()?;
        Ok(tokens
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Comment(_)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize_clean()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    fn lex_err(source: &str) -> LexerError {
        match Lexer::new(source).tokenize() {
            Ok(tokens) => panic!("expected lexer error, got {:?}", tokens),
            Err(e) => e,
        }
    }

    #[test]
    fn test_var_declaration() {
        assert_eq!(
            tokens("var x = 5;"),
            vec![
                Token::Var,
                Token::Ident("x".to_string()),
                Token::Assign,
                Token::Integer(5),
                Token::Semicolon,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            tokens("1 + 2.5 * 3 / 4 - 5"),
            vec![
                Token::Integer(1),
                Token::Plus,
                Token::Float(2.5),
                Token::Star,
                Token::Integer(3),
                Token::Slash,
                Token::Integer(4),
                Token::Minus,
                Token::Integer(5),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            tokens("== != < <= > >= ! ="),
            vec![
                Token::EqEq,
                Token::BangEq,
                Token::Lt,
                Token::LtEq,
                Token::Gt,
                Token::GtEq,
                Token::Bang,
                Token::Assign,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_logic_words_and_symbols() {
        assert_eq!(
            tokens("a and b && c or d || e"),
            vec![
                Token::Ident("a".to_string()),
                Token::And,
                Token::Ident("b".to_string()),
                Token::And,
                Token::Ident("c".to_string()),
                Token::Or,
                Token::Ident("d".to_string()),
                Token::Or,
                Token::Ident("e".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_literals() {
        assert_eq!(
            tokens("if else while print true false nil"),
            vec![
                Token::If,
                Token::Else,
                Token::While,
                Token::Print,
                Token::Bool(true),
                Token::Bool(false),
                Token::Nil,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(
            tokens("variable printer"),
            vec![
                Token::Ident("variable".to_string()),
                Token::Ident("printer".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_dot_without_digit_is_not_float() {
        let err = lex_err("5.");
        assert!(err.message.contains("unexpected character '.'"));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\tb\n\"c\"""#),
            vec![Token::String("a\tb\n\"c\"".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_comments_kept_by_tokenize() {
        let raw: Vec<Token> = Lexer::new("print 1 // say one\nprint 2")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect();
        assert!(raw.contains(&Token::Comment("say one".to_string())));
        assert!(!tokens("print 1 // say one\nprint 2").contains(&Token::Comment("say one".to_string())));
    }

    #[test]
    fn test_lexeme_and_span() {
        let spanned = Lexer::new("var total\n  = 12.5").tokenize().unwrap();
        assert_eq!(spanned[1].lexeme, "total");
        assert_eq!(spanned[1].span, Span { line: 1, col: 5 });
        assert_eq!(spanned[3].lexeme, "12.5");
        assert_eq!(spanned[3].span, Span { line: 2, col: 5 });
    }

    #[test]
    fn test_unterminated_string_newline_error() {
        let err = lex_err("print \"abc\nprint 1");
        assert!(err.message.contains("unterminated"));
        assert_eq!((err.line, err.col), (1, 7));
    }

    #[test]
    fn test_unknown_escape_error() {
        let err = lex_err(r#""\q""#);
        assert!(err.message.contains("unknown escape"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = lex_err("var x = 1 @ 2");
        assert!(err.message.contains("'@'"));
        assert_eq!(err.to_string(), "1:11: unexpected character '@'");
    }
}
