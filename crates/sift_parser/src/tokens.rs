use std::fmt;

use sift_error::Location;

use crate::escape::unescape;
use crate::keywords::{Keyword, keyword_from_str};

/// Byte range of a token along with the line/column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    /// 1-based line.
    pub line: usize,
    /// 1-based column (in chars).
    pub col: usize,
}

impl Span {
    pub const EMPTY: Span = Span {
        start: 0,
        end: 0,
        line: 1,
        col: 1,
    };

    pub fn location(&self) -> Location {
        Location::new(self.start, self.line, self.col)
    }

    /// Create a span covering both `self` and `other`.
    ///
    /// Line and column are taken from whichever span starts first.
    pub fn merge(&self, other: &Span) -> Span {
        let (first, _) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        Span {
            start: first.start,
            end: self.end.max(other.end),
            line: first.line,
            col: first.col,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub value: String,
    pub keyword: Option<Keyword>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    UnrecognizedCharacter,
    UnterminatedString,
    UnterminatedBracket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidToken {
    pub text: String,
    pub reason: InvalidReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identifier or keyword.
    Word(Word),
    /// Bracket quoted column name, e.g. `[Column Name]`.
    BracketIdent(String),
    /// Unparsed number with an optional unit suffix, e.g. `12.5d`.
    Number { value: String, unit: Option<String> },
    /// String literal with escapes already decoded.
    StringLiteral(String),
    Hash,
    Comma,
    Period,
    SemiColon,
    LeftParen,
    RightParen,
    Mul,
    Plus,
    Minus,
    Div,
    Mod,
    Eq,
    DoubleEq,
    /// `<>` or `!=`
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// Something the lexer couldn't make sense of. The parser reports these.
    Invalid(InvalidToken),
}

impl Token {
    pub fn keyword(&self) -> Option<Keyword> {
        match self {
            Token::Word(w) => w.keyword,
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.keyword() == Some(keyword)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{}", w.value),
            Token::BracketIdent(s) => write!(f, "[{s}]"),
            Token::Number { value, unit } => match unit {
                Some(unit) => write!(f, "{value}{unit}"),
                None => write!(f, "{value}"),
            },
            Token::StringLiteral(s) => write!(f, "'{}'", crate::escape::escape(s)),
            Token::Hash => write!(f, "#"),
            Token::Comma => write!(f, ","),
            Token::Period => write!(f, "."),
            Token::SemiColon => write!(f, ";"),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::Mul => write!(f, "*"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Div => write!(f, "/"),
            Token::Mod => write!(f, "%"),
            Token::Eq => write!(f, "="),
            Token::DoubleEq => write!(f, "=="),
            Token::Neq => write!(f, "<>"),
            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::Invalid(tok) => write!(f, "{}", tok.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWithLocation {
    pub token: Token,
    pub span: Span,
}

impl TokenWithLocation {
    pub fn keyword(&self) -> Option<Keyword> {
        self.token.keyword()
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.token.is_keyword(keyword)
    }
}

/// Converts query text into tokens.
///
/// Tokenizing never fails. Anything that can't be lexed turns into a
/// `Token::Invalid` for the parser to report.
#[derive(Debug)]
pub struct Tokenizer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    /// Index into `chars`.
    idx: usize,
    line: usize,
    col: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Tokenizer {
            src,
            chars: src.char_indices().collect(),
            idx: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn tokenize(mut self) -> Vec<TokenWithLocation> {
        let mut toks = Vec::new();

        loop {
            self.skip_whitespace_and_comments();
            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };

            let start = self.offset();
            let line = self.line;
            let col = self.col;

            let token = self.next_token(c);
            toks.push(TokenWithLocation {
                token,
                span: Span {
                    start,
                    end: self.offset(),
                    line,
                    col,
                },
            });
        }

        toks
    }

    fn next_token(&mut self, c: char) -> Token {
        match c {
            c if c.is_ascii_alphabetic() || c == '_' => {
                let value = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                let keyword = keyword_from_str(&value);
                Token::Word(Word { value, keyword })
            }
            c if c.is_ascii_digit() => self.lex_number(),
            '\'' | '"' => self.lex_string(c),
            '[' => self.lex_bracket_ident(),
            '#' => self.single(Token::Hash),
            ',' => self.single(Token::Comma),
            '.' => {
                // `.5` is a number, otherwise a period.
                if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
                    self.lex_number()
                } else {
                    self.single(Token::Period)
                }
            }
            ';' => self.single(Token::SemiColon),
            '(' => self.single(Token::LeftParen),
            ')' => self.single(Token::RightParen),
            '*' => self.single(Token::Mul),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '/' => self.single(Token::Div),
            '%' => self.single(Token::Mod),
            '=' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Token::DoubleEq
                } else {
                    Token::Eq
                }
            }
            '<' => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        Token::LtEq
                    }
                    Some('>') => {
                        self.bump();
                        Token::Neq
                    }
                    _ => Token::Lt,
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            '!' if self.peek_nth(1) == Some('=') => {
                self.bump();
                self.bump();
                Token::Neq
            }
            other => {
                self.bump();
                Token::Invalid(InvalidToken {
                    text: other.to_string(),
                    reason: InvalidReason::UnrecognizedCharacter,
                })
            }
        }
    }

    fn single(&mut self, tok: Token) -> Token {
        self.bump();
        tok
    }

    fn lex_number(&mut self) -> Token {
        let mut value = self.take_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            value.push('.');
            value.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }

        let unit = if self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            Some(self.take_while(|c| c.is_ascii_alphanumeric() || c == '_'))
        } else {
            None
        };

        Token::Number { value, unit }
    }

    fn lex_string(&mut self, quote: char) -> Token {
        let start = self.offset();
        self.bump(); // Opening quote.
        let content_start = self.offset();

        loop {
            match self.peek() {
                Some('\\') => {
                    self.bump();
                    if self.peek().is_some() {
                        self.bump();
                    }
                }
                Some(c) if c == quote => {
                    let raw = &self.src[content_start..self.offset()];
                    let value = unescape(raw);
                    self.bump(); // Closing quote.
                    return Token::StringLiteral(value);
                }
                Some(_) => self.bump(),
                None => {
                    return Token::Invalid(InvalidToken {
                        text: self.src[start..].to_string(),
                        reason: InvalidReason::UnterminatedString,
                    });
                }
            }
        }
    }

    fn lex_bracket_ident(&mut self) -> Token {
        let start = self.offset();
        self.bump(); // '['
        let content_start = self.offset();

        loop {
            match self.peek() {
                Some(']') => {
                    let value = self.src[content_start..self.offset()].to_string();
                    self.bump();
                    return Token::BracketIdent(value);
                }
                Some('\n') | None => {
                    return Token::Invalid(InvalidToken {
                        text: self.src[start..self.offset()].to_string(),
                        reason: InvalidReason::UnterminatedBracket,
                    });
                }
                Some(_) => self.bump(),
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.bump(),
                Some('-') if self.peek_nth(1) == Some('-') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            s.push(c);
            self.bump();
        }
        s
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).map(|(_, c)| *c)
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.chars.get(self.idx + n).map(|(_, c)| *c)
    }

    /// Byte offset of the current char.
    fn offset(&self) -> usize {
        match self.chars.get(self.idx) {
            Some((offset, _)) => *offset,
            None => self.src.len(),
        }
    }

    fn bump(&mut self) {
        if let Some((_, c)) = self.chars.get(self.idx) {
            if *c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.idx += 1;
        }
    }
}
