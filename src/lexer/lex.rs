use crate::{
    error::{CompileError, CompileResult},
    lexer::util::parse_integer,
    observe::{Event, Mode, Observer, State},
};
use lazy_static::lazy_static;
use std::{collections::HashMap, collections::VecDeque, fmt, sync::Arc};

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, TokenKind> = HashMap::from([
        ("void", TokenKind::Void),
        ("int", TokenKind::Int),
        ("u8", TokenKind::U8),
        ("s8", TokenKind::S8),
        ("return", TokenKind::Return),
        ("continue", TokenKind::Continue),
        ("break", TokenKind::Break),
        ("if", TokenKind::If),
        ("else", TokenKind::Else),
        ("while", TokenKind::While),
        ("extern", TokenKind::Extern),
    ]);
    static ref DOUBLE_PUNCTUATION: HashMap<(u8, u8), TokenKind> = HashMap::from([
        ((b'=', b'='), TokenKind::DoubleEqual),
        ((b'!', b'='), TokenKind::BangEqual),
        ((b'&', b'&'), TokenKind::DoubleAmpersand),
        ((b'|', b'|'), TokenKind::DoublePipe),
        ((b'<', b'='), TokenKind::LessEqual),
        ((b'>', b'='), TokenKind::GreaterEqual),
    ]);
    static ref PUNCTUATION: HashMap<u8, TokenKind> = HashMap::from([
        (b'(', TokenKind::LParen),
        (b')', TokenKind::RParen),
        (b'{', TokenKind::LBrace),
        (b'}', TokenKind::RBrace),
        (b'+', TokenKind::Plus),
        (b'-', TokenKind::Hyphen),
        (b'*', TokenKind::Star),
        (b'/', TokenKind::Slash),
        (b'!', TokenKind::Bang),
        (b'<', TokenKind::Less),
        (b'>', TokenKind::Greater),
        (b'=', TokenKind::Equal),
        (b',', TokenKind::Comma),
        (b';', TokenKind::Semicolon),
    ]);
}

/// A 1-based position in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(file: &str, line: usize, column: usize) -> Span {
        Span {
            file: Arc::from(file),
            line,
            column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Void,
    Int,
    U8,
    S8,
    Return,
    Continue,
    Break,
    If,
    Else,
    While,
    Extern,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Plus,
    Hyphen,
    Star,
    Slash,
    Bang,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    DoubleEqual,
    BangEqual,
    DoubleAmpersand,
    DoublePipe,
    Equal,
    Comma,
    Semicolon,
    Identifier,
    Number,
    StringLiteral,
    Eof,
    Error,
}

impl TokenKind {
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            TokenKind::Void | TokenKind::Int | TokenKind::U8 | TokenKind::S8
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Void => "'void'",
            TokenKind::Int => "'int'",
            TokenKind::U8 => "'u8'",
            TokenKind::S8 => "'s8'",
            TokenKind::Return => "'return'",
            TokenKind::Continue => "'continue'",
            TokenKind::Break => "'break'",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::Extern => "'extern'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Plus => "'+'",
            TokenKind::Hyphen => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Bang => "'!'",
            TokenKind::Less => "'<'",
            TokenKind::Greater => "'>'",
            TokenKind::LessEqual => "'<='",
            TokenKind::GreaterEqual => "'>='",
            TokenKind::DoubleEqual => "'=='",
            TokenKind::BangEqual => "'!='",
            TokenKind::DoubleAmpersand => "'&&'",
            TokenKind::DoublePipe => "'||'",
            TokenKind::Equal => "'='",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number",
            TokenKind::StringLiteral => "string literal",
            TokenKind::Eof => "end of file",
            TokenKind::Error => "invalid token",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValue {
    None,
    Str(String),
    Int(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub value: TokenValue,
}

impl Token {
    pub fn as_string(&self) -> Option<&str> {
        match &self.value {
            TokenValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self.value {
            TokenValue::Int(n) => Some(n),
            _ => None,
        }
    }
}

/// On-demand scanner over a byte stream.
///
/// Yields tokens up to and including `Eof`. A lexical failure yields one
/// `TokenKind::Error` token carrying the message and ends the sequence; the
/// full error is then available from [`Lexer::take_error`].
pub struct Lexer<'o> {
    file: Arc<str>,
    stream: std::vec::IntoIter<u8>,
    lookahead: VecDeque<u8>,
    current: Option<u8>,
    line: usize,
    column: usize,
    finished: bool,
    error: Option<CompileError>,
    observer: Option<&'o mut dyn Observer>,
}

impl<'o> Lexer<'o> {
    pub fn new(src: &str, file: &str) -> Lexer<'o> {
        let mut stream = src.as_bytes().to_vec().into_iter();
        let current = stream.next();

        Lexer {
            file: Arc::from(file),
            stream,
            lookahead: VecDeque::new(),
            current,
            line: 1,
            column: 1,
            finished: false,
            error: None,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: &'o mut dyn Observer) -> Lexer<'o> {
        self.observer = Some(observer);
        self
    }

    pub fn take_error(&mut self) -> Option<CompileError> {
        self.error.take()
    }

    fn span(&self) -> Span {
        Span {
            file: Arc::clone(&self.file),
            line: self.line,
            column: self.column,
        }
    }

    fn notify(&mut self, event: Event) -> CompileResult<()> {
        match self.observer.as_deref_mut() {
            Some(observer) => observer.notify(&event),
            None => Ok(()),
        }
    }

    fn advance(&mut self) {
        match self.current {
            Some(b'\n') => {
                self.line += 1;
                self.column = 1;
            }
            Some(_) => self.column += 1,
            None => return,
        }
        self.current = self.lookahead.pop_front().or_else(|| self.stream.next());
    }

    /// The byte `n` positions past the current one.
    fn peek_char(&mut self, n: usize) -> Option<u8> {
        while self.lookahead.len() < n {
            match self.stream.next() {
                Some(ch) => self.lookahead.push_back(ch),
                None => return None,
            }
        }
        self.lookahead.get(n - 1).copied()
    }

    fn skip_whitespace_and_comments(&mut self) -> CompileResult<()> {
        loop {
            match (self.current, self.peek_char(1)) {
                (Some(ch), _) if ch.is_ascii_whitespace() => self.advance(),
                (Some(b'/'), Some(b'/')) => {
                    while !matches!(self.current, None | Some(b'\n')) {
                        self.advance();
                    }
                }
                (Some(b'/'), Some(b'*')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_block_comment(&mut self) -> CompileResult<()> {
        let start = self.span();
        self.advance();
        self.advance();

        let mut depth = 1usize;
        while depth > 0 {
            match (self.current, self.peek_char(1)) {
                (None, _) => {
                    return Err(CompileError::lexical(&start, "unterminated block comment"))
                }
                // `//*/` must close the comment rather than open a nested one
                (Some(b'/'), Some(b'/')) => {
                    self.advance();
                    self.advance();
                }
                (Some(b'/'), Some(b'*')) => {
                    depth += 1;
                    self.advance();
                    self.advance();
                }
                (Some(b'*'), Some(b'/')) => {
                    depth -= 1;
                    self.advance();
                    self.advance();
                }
                _ => self.advance(),
            }
        }

        Ok(())
    }

    fn accumulate(&mut self, word: &mut Vec<u8>, ch: u8, span: &Span) -> CompileResult<()> {
        word.push(ch);
        self.advance();
        let text = String::from_utf8_lossy(word).into_owned();
        self.notify(
            Event::new(Mode::Lexer, State::WordAccumulate)
                .at(span)
                .with_text(text),
        )
    }

    fn scan(&mut self) -> CompileResult<Token> {
        self.skip_whitespace_and_comments()?;

        let span = self.span();
        self.notify(Event::new(Mode::Lexer, State::TokenStart).at(&span))?;

        let Some(ch) = self.current else {
            return self.end_token(Token {
                kind: TokenKind::Eof,
                span,
                value: TokenValue::None,
            });
        };

        let mut word = Vec::new();

        let (kind, value) = if ch.is_ascii_digit() {
            let mut leading_zeros = 0;
            while self.current == Some(b'0') {
                leading_zeros += 1;
                self.accumulate(&mut word, b'0', &span)?;
            }
            let mut digits = String::new();
            while let Some(digit) = self.current.filter(u8::is_ascii_digit) {
                digits.push(digit as char);
                self.accumulate(&mut word, digit, &span)?;
            }
            if self
                .current
                .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == b'_')
            {
                return Err(CompileError::lexical(&span, "invalid number format"));
            }
            let value = parse_integer(leading_zeros, &digits)
                .map_err(|e| CompileError::lexical(&span, e.to_string()))?;
            (TokenKind::Number, TokenValue::Int(value))
        } else if ch == b'"' {
            self.advance();
            let mut contents = Vec::new();
            loop {
                match self.current {
                    None => {
                        return Err(CompileError::lexical(&span, "unterminated string literal"))
                    }
                    Some(b'"') => {
                        self.advance();
                        break;
                    }
                    Some(ch) => {
                        contents.push(ch);
                        self.accumulate(&mut word, ch, &span)?;
                    }
                }
            }
            (
                TokenKind::StringLiteral,
                TokenValue::Str(String::from_utf8_lossy(&contents).into_owned()),
            )
        } else if ch.is_ascii_alphabetic() || ch == b'_' {
            while let Some(ch) = self
                .current
                .filter(|ch| ch.is_ascii_alphanumeric() || *ch == b'_')
            {
                self.accumulate(&mut word, ch, &span)?;
            }
            let text = String::from_utf8_lossy(&word).into_owned();
            match KEYWORDS.get(text.as_str()) {
                Some(keyword) => (*keyword, TokenValue::None),
                None => (TokenKind::Identifier, TokenValue::Str(text)),
            }
        } else {
            let double = self
                .peek_char(1)
                .and_then(|next| DOUBLE_PUNCTUATION.get(&(ch, next)).copied());

            match double {
                Some(kind) => {
                    self.advance();
                    self.advance();
                    (kind, TokenValue::None)
                }
                None => match PUNCTUATION.get(&ch) {
                    Some(kind) => {
                        self.advance();
                        (*kind, TokenValue::None)
                    }
                    None => {
                        return Err(CompileError::lexical(
                            &span,
                            format!("invalid character '{}'", ch.escape_ascii()),
                        ))
                    }
                },
            }
        };

        self.end_token(Token { kind, span, value })
    }

    fn end_token(&mut self, token: Token) -> CompileResult<Token> {
        let lexeme = match &token.value {
            TokenValue::Str(s) => s.clone(),
            TokenValue::Int(n) => n.to_string(),
            TokenValue::None => token.kind.to_string(),
        };
        self.notify(
            Event::new(Mode::Lexer, State::TokenEnd)
                .at(&token.span)
                .with_text(lexeme),
        )?;

        Ok(token)
    }
}

impl<'o> Iterator for Lexer<'o> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.scan() {
            Ok(token) => {
                self.finished = token.kind == TokenKind::Eof;
                Some(token)
            }
            Err(e) => {
                self.finished = true;
                let token = Token {
                    kind: TokenKind::Error,
                    span: e.span().cloned().unwrap_or_else(|| self.span()),
                    value: TokenValue::Str(e.to_string()),
                };
                self.error = Some(e);
                Some(token)
            }
        }
    }
}

pub fn tokenize(src: &str, file: &str) -> CompileResult<Vec<Token>> {
    collect(Lexer::new(src, file))
}

pub fn tokenize_with(
    src: &str,
    file: &str,
    observer: &mut dyn Observer,
) -> CompileResult<Vec<Token>> {
    collect(Lexer::new(src, file).with_observer(observer))
}

fn collect(mut lexer: Lexer<'_>) -> CompileResult<Vec<Token>> {
    let mut tokens = Vec::new();

    while let Some(token) = lexer.next() {
        if token.kind == TokenKind::Error {
            return Err(lexer
                .take_error()
                .unwrap_or_else(|| CompileError::lexical(&token.span, "invalid token")));
        }
        tokens.push(token);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Recorder;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src, "t.mc")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn declaration() {
        assert_eq!(
            kinds("u8 a = 5;"),
            vec![
                TokenKind::U8,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn leading_zeros() {
        for (src, expected) in [("007", 7), ("0", 0), ("00", 0), ("100", 100)] {
            let tokens = tokenize(src, "t.mc").unwrap();
            assert_eq!(tokens[0].as_int(), Some(expected), "{}", src);
        }
    }

    #[test]
    fn number_followed_by_letters() {
        let err = tokenize("12ab", "t.mc").unwrap_err();
        assert_eq!(err.to_string(), "t.mc:1:1: lexical error: invalid number format");
    }

    #[test]
    fn integer_overflow() {
        let err = tokenize("x = 99999999999999999999;", "t.mc").unwrap_err();
        assert!(matches!(err, CompileError::Lexical { .. }));
        assert_eq!(err.span().map(|s| s.column), Some(5));
    }

    #[test]
    fn maximal_munch() {
        assert_eq!(
            kinds("<= < = == != && || >="),
            vec![
                TokenKind::LessEqual,
                TokenKind::Less,
                TokenKind::Equal,
                TokenKind::DoubleEqual,
                TokenKind::BangEqual,
                TokenKind::DoubleAmpersand,
                TokenKind::DoublePipe,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lone_ampersand_is_invalid() {
        let err = tokenize("a & b", "t.mc").unwrap_err();
        assert_eq!(err.to_string(), "t.mc:1:3: lexical error: invalid character '&'");
    }

    #[test]
    fn string_keeps_raw_escapes() {
        let tokens = tokenize(r#"printf("a\nb");"#, "t.mc").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[2].as_string(), Some(r"a\nb"));
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize("\"abc", "t.mc").unwrap_err();
        assert!(err.to_string().contains("unterminated string literal"));
    }

    #[test]
    fn comments() {
        assert_eq!(
            kinds("// line\nx /* a /* nested */ still */ y"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn double_slash_before_comment_close() {
        assert_eq!(
            kinds("/* note //*/ x"),
            vec![TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_comment_reports_its_start() {
        let err = tokenize("x\n  /* /* */", "t.mc").unwrap_err();
        assert_eq!(
            err.to_string(),
            "t.mc:2:3: lexical error: unterminated block comment"
        );
    }

    #[test]
    fn spans_are_one_based() {
        let tokens = tokenize("int\n  main", "t.mc").unwrap();
        assert_eq!(tokens[0].span, Span::new("t.mc", 1, 1));
        assert_eq!(tokens[1].span, Span::new("t.mc", 2, 3));
    }

    #[test]
    fn iteration_stops_after_error() {
        let tokens: Vec<_> = Lexer::new("a @ b", "t.mc").collect();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].kind, TokenKind::Error);
        assert!(tokens[1].as_string().is_some());
    }

    #[test]
    fn events_bracket_each_token() {
        let mut recorder = Recorder::default();
        tokenize_with("ab;", "t.mc", &mut recorder).unwrap();
        assert_eq!(
            recorder.states(Mode::Lexer),
            vec![
                State::TokenStart,
                State::WordAccumulate,
                State::WordAccumulate,
                State::TokenEnd,
                State::TokenStart,
                State::TokenEnd,
                State::TokenStart,
                State::TokenEnd,
            ]
        );
        assert_eq!(recorder.events[2].text.as_deref(), Some("ab"));
    }

    #[test]
    fn end_of_file_is_a_complete_token() {
        let mut recorder = Recorder::default();
        tokenize_with("  ", "t.mc", &mut recorder).unwrap();
        assert_eq!(
            recorder.states(Mode::Lexer),
            vec![State::TokenStart, State::TokenEnd]
        );
        let end = recorder.events.last().unwrap();
        assert_eq!(end.text.as_deref(), Some("end of file"));
        assert_eq!(end.span, Some(Span::new("t.mc", 1, 3)));
    }
}
