//! The lexer.

use derive_more::Display;
use regex::Regex;

use crate::common::Line;

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// The source line the token started on.
    pub line: Line,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("int")]
    Int,
    #[display("float")]
    Float,
    #[display("str")]
    Str,
    #[display("print")]
    Print,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display("for")]
    For,
    #[display("func")]
    Func,
    #[display("return")]
    Return,
    #[display("try")]
    Try,
    #[display("catch")]
    Catch,
    #[display("throw")]
    Throw,
    #[display(":=")]
    Assign,
    #[display("==")]
    Eq,
    #[display("!=")]
    Neq,
    #[display("<=")]
    Lte,
    #[display(">=")]
    Gte,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("!")]
    Not,
    #[display("++")]
    Inc,
    #[display("--")]
    Dec,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(",")]
    Comma,
    #[display(";")]
    Semi,
}

pub struct LexError(pub usize, pub Line, pub char);

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lexer error: unexpected character {:?} at line {} (offset {})",
            self.2, self.1, self.0
        )
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: Line,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        let keyword = |word: &str| Regex::new(&format!(r"\A{word}\b")).unwrap();
        let matchers = vec![
            (keyword("print"), TokenKind::Print),
            (keyword("if"), TokenKind::If),
            (keyword("else"), TokenKind::Else),
            (keyword("while"), TokenKind::While),
            (keyword("for"), TokenKind::For),
            (keyword("func"), TokenKind::Func),
            (keyword("return"), TokenKind::Return),
            (keyword("try"), TokenKind::Try),
            (keyword("catch"), TokenKind::Catch),
            (keyword("throw"), TokenKind::Throw),
            (
                Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(),
                TokenKind::Id,
            ),
            (
                Regex::new(r"\A[0-9]+\.[0-9]+").unwrap(),
                TokenKind::Float,
            ),
            (Regex::new(r"\A[0-9]+").unwrap(), TokenKind::Int),
            (
                Regex::new(r#"\A"(?:[^"\\]|\\.)*""#).unwrap(),
                TokenKind::Str,
            ),
            (Regex::new(r"\A:=").unwrap(), TokenKind::Assign),
            (Regex::new(r"\A==").unwrap(), TokenKind::Eq),
            (Regex::new(r"\A!=").unwrap(), TokenKind::Neq),
            (Regex::new(r"\A<=").unwrap(), TokenKind::Lte),
            (Regex::new(r"\A>=").unwrap(), TokenKind::Gte),
            (Regex::new(r"\A\+\+").unwrap(), TokenKind::Inc),
            (Regex::new(r"\A--").unwrap(), TokenKind::Dec),
            (Regex::new(r"\A<").unwrap(), TokenKind::Lt),
            (Regex::new(r"\A>").unwrap(), TokenKind::Gt),
            (Regex::new(r"\A\+").unwrap(), TokenKind::Plus),
            (Regex::new(r"\A-").unwrap(), TokenKind::Minus),
            (Regex::new(r"\A\*").unwrap(), TokenKind::Mul),
            (Regex::new(r"\A/").unwrap(), TokenKind::Div),
            (Regex::new(r"\A%").unwrap(), TokenKind::Mod),
            (Regex::new(r"\A!").unwrap(), TokenKind::Not),
            (Regex::new(r"\A\{").unwrap(), TokenKind::LBrace),
            (Regex::new(r"\A\}").unwrap(), TokenKind::RBrace),
            (Regex::new(r"\A\(").unwrap(), TokenKind::LParen),
            (Regex::new(r"\A\)").unwrap(), TokenKind::RParen),
            (Regex::new(r"\A\[").unwrap(), TokenKind::LBracket),
            (Regex::new(r"\A\]").unwrap(), TokenKind::RBracket),
            (Regex::new(r"\A,").unwrap(), TokenKind::Comma),
            (Regex::new(r"\A;").unwrap(), TokenKind::Semi),
        ];
        Lexer {
            input,
            pos: 0,
            line: 1,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\v]|\n|(?://[^\n]*))*").unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace, tracking newlines for line numbers.
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            let skipped = &self.input[self.pos..self.pos + m.end()];
            self.line += skipped.matches('\n').count() as Line;
            self.pos += m.end();
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = m.as_str();
                let line = self.line;
                self.pos += text.len();
                return Ok(Some(Token {
                    kind: *kind,
                    text,
                    line,
                }));
            }
        }
        let c = rest.chars().next().unwrap();
        Err(LexError(self.pos, self.line, c))
    }
}
