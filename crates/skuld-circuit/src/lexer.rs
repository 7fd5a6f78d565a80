//! Lexer for the circuit text format.
//!
//! Newlines terminate instructions, so unlike most formats they are tokens
//! rather than skipped whitespace. `#` comments run to end of line.

use logos::Logos;

/// Tokens of the circuit text format.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[token("\n")]
    Newline,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(",")]
    Comma,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("!")]
    Bang,

    #[token("*")]
    Star,

    #[token("-")]
    Minus,

    // Literals
    #[regex(r"[0-9]+\.[0-9]*([eE][-+]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][-+]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][-+]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u64>().ok())]
    Int(u64),

    // Instruction names, target prefixes (`rec`, `sweep`), Pauli targets.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Newline => write!(f, "end of line"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Bang => write!(f, "!"),
            Token::Star => write!(f, "*"),
            Token::Minus => write!(f, "-"),
            Token::Float(v) => write!(f, "{v}"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Identifier(s) => write!(f, "{s}"),
        }
    }
}

/// A token plus the 1-based source line it starts on.
#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub line: usize,
}

/// Tokenizes a source string, or reports the offending snippet and line.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, (String, usize)> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut line = 1;

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => {
                let is_newline = token == Token::Newline;
                tokens.push(SpannedToken { token, line });
                if is_newline {
                    line += 1;
                }
            }
            Err(()) => {
                return Err((source[lexer.span()].to_string(), line));
            }
        }
    }
    Ok(tokens)
}
