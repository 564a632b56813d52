use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;

/// Prints a token stream one token per line, for `--tokens`.
pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the source lexeme instead of the Debug form
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Spanned]) -> String {
        tokens.iter().map(|s| self.render_one(s)).collect()
    }

    fn render_one(&self, s: &Spanned) -> String {
        let line = s.span.line;
        let col = s.span.col;

        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_debug_repr {
            return format!(
                "[{:02}:{:02}] {}{:<8} {:?}{}\n",
                line, col, colr, kind, s.token, reset
            );
        }

        match &s.token {
            Token::Comment(c) => format!(
                "[{:02}:{:02}] {}{:<8} COMMENT: {}{}\n",
                line, col, colr, kind, c, reset
            ),
            Token::Eof => format!("[{:02}:{:02}] {}{:<8} EOF{}\n", line, col, colr, kind, reset),
            _ => format!(
                "[{:02}:{:02}] {}{:<8} {}{}\n",
                line, col, colr, kind, s.lexeme, reset
            ),
        }
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Comment(_) => "COMMENT",
            Eof => "EOF",

            Integer(_) => "INT",
            Float(_) => "FLOAT",
            String(_) => "STRING",
            Bool(_) => "BOOL",
            Nil => "NIL",

            Ident(_) => "IDENT",

            LParen | RParen => "PAREN",
            LBrace | RBrace => "BRACE",
            Semicolon | Comma => "PUNCT",

            Plus | Minus | Star | Slash | Bang | Assign => "OP",
            EqEq | BangEq | Lt | LtEq | Gt | GtEq => "CMP",

            t if t.is_keyword() => "KEYWORD",
            _ => "OTHER",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Comment(_) | Eof => Self::DIM,
            String(_) => Self::GRN,
            Integer(_) | Float(_) | Bool(_) | Nil => Self::CYN,
            Ident(_) => Self::YEL,
            Plus | Minus | Star | Slash | Bang | Assign => Self::MAG,
            EqEq | BangEq | Lt | LtEq | Gt | GtEq => Self::MAG,
            t if t.is_keyword() => Self::BLU,
            _ => Self::RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    #[test]
    fn test_pretty_render_uses_lexemes() {
        let tokens = Lexer::new("var x = 1.5 // note").tokenize().unwrap();
        let out = TokenDumper::new().no_color().pretty().render(&tokens);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "[01:01] KEYWORD  var");
        assert_eq!(lines[1], "[01:05] IDENT    x");
        assert_eq!(lines[3], "[01:09] FLOAT    1.5");
        assert_eq!(lines[4], "[01:13] COMMENT  COMMENT: note");
        assert!(lines[5].ends_with("EOF"));
    }

    #[test]
    fn test_debug_render_has_color_codes() {
        let tokens = Lexer::new("\"hi\"").tokenize().unwrap();
        let out = TokenDumper::new().render(&tokens);
        assert!(out.contains("\x1b[32m"));
        assert!(out.contains("String(\"hi\")"));
    }
}
