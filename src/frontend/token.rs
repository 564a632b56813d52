#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Float(f64),
    String(std::string::String),
    Bool(bool),
    Nil,

    // Delimiters
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    Semicolon, // ;
    Comma,     // ,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,

    // Comparison
    Bang,
    BangEq,
    Assign, // =
    EqEq,
    Gt,
    GtEq,
    Lt,
    LtEq,

    // Logic
    And, // `and` or `&&`
    Or,  // `or` or `||`

    // Keywords
    Var,
    Print,
    If,
    Else,
    While,

    // Identifier (variable name)
    Ident(std::string::String),

    // Special
    Comment(std::string::String),
    Eof,
}

impl Token {
    /// Returns true if this token is a reserved word
    #[allow(dead_code)]
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Token::Var
                | Token::Print
                | Token::If
                | Token::Else
                | Token::While
                | Token::And
                | Token::Or
                | Token::Bool(_)
                | Token::Nil
        )
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Bool(b) => write!(f, "{}", b),
            Token::Nil => write!(f, "nil"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Semicolon => write!(f, ";"),
            Token::Comma => write!(f, ","),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Bang => write!(f, "!"),
            Token::BangEq => write!(f, "!="),
            Token::Assign => write!(f, "="),
            Token::EqEq => write!(f, "=="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Var => write!(f, "var"),
            Token::Print => write!(f, "print"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Comment(s) => write!(f, "// {}", s),
            Token::Eof => write!(f, "EOF"),
        }
    }
}
