use crate::span::Span;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semicolon,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    Assign,
    Less,
    Greater,
    NotEqual,
    EqualTo,
    LessEqual,
    GreaterEqual,

    // Literals
    Identifier,
    String,
    Number,

    // Keywords
    Var,
    Function,
    Return,
    Print,
    While,
    If,
    Else,
    True,
    False,
    Null,

    Eof,
    Invalid,
}

impl TokenKind {
    /// Source spelling for fixed tokens, or a class name for the rest.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Semicolon => ";",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Bang => "!",
            TokenKind::Assign => "=",
            TokenKind::Less => "<",
            TokenKind::Greater => ">",
            TokenKind::NotEqual => "!=",
            TokenKind::EqualTo => "==",
            TokenKind::LessEqual => "<=",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Identifier => "identifier",
            TokenKind::String => "string",
            TokenKind::Number => "number",
            TokenKind::Var => "var",
            TokenKind::Function => "function",
            TokenKind::Return => "return",
            TokenKind::Print => "print",
            TokenKind::While => "while",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Eof => "end of input",
            TokenKind::Invalid => "invalid token",
        }
    }
}

fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "var" => TokenKind::Var,
        "function" => TokenKind::Function,
        "return" => TokenKind::Return,
        "print" => TokenKind::Print,
        "while" => TokenKind::While,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => return None,
    };
    Some(kind)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Literal text for identifiers, keywords, numbers, strings (without the
    /// quotes) and invalid input. Fixed punctuation carries none.
    pub lexeme: Option<String>,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: Option<String>, span: Span) -> Self {
        Token { kind, lexeme, span }
    }

    /// The lexeme if present, the fixed spelling otherwise.
    pub fn text(&self) -> &str {
        self.lexeme.as_deref().unwrap_or_else(|| self.kind.describe())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lexeme {
            Some(text) => write!(f, "{:?}({}) @ {}", self.kind, text, self.span),
            None => write!(f, "{:?} @ {}", self.kind, self.span),
        }
    }
}

/// Pull-based tokenizer. Malformed input never fails: it becomes an
/// `Invalid` token for the parser to reject.
pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            bytes: src.as_bytes(),
            index: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.index >= self.bytes.len()
    }

    /// Returns the next token without moving the cursor.
    pub fn peek_token(&mut self) -> Token {
        let saved = (self.index, self.line, self.column);
        let token = self.next_token();
        (self.index, self.line, self.column) = saved;
        token
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let span = Span::new(self.line, self.column);
        if self.is_at_end() {
            return Token::new(TokenKind::Eof, None, span);
        }

        let start = self.index;
        let c = self.advance();

        if c.is_ascii_alphabetic() || c == b'_' {
            while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
                self.advance();
            }
            let text = &self.src[start..self.index];
            let kind = keyword(text).unwrap_or(TokenKind::Identifier);
            return Token::new(kind, Some(text.to_string()), span);
        }

        if c.is_ascii_digit() {
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            let text = &self.src[start..self.index];
            return Token::new(TokenKind::Number, Some(text.to_string()), span);
        }

        let kind = match c {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b';' => TokenKind::Semicolon,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'!' => self.either(TokenKind::NotEqual, TokenKind::Bang),
            b'=' => self.either(TokenKind::EqualTo, TokenKind::Assign),
            b'<' => self.either(TokenKind::LessEqual, TokenKind::Less),
            b'>' => self.either(TokenKind::GreaterEqual, TokenKind::Greater),
            b'"' => return self.string(span),
            _ => {
                // Swallow the rest of a multi-byte character as one token.
                while !self.is_at_end() && (self.peek() & 0xC0) == 0x80 {
                    self.advance();
                }
                let text = &self.src[start..self.index];
                return Token::new(TokenKind::Invalid, Some(text.to_string()), span);
            }
        };
        Token::new(kind, None, span)
    }

    fn string(&mut self, span: Span) -> Token {
        let start = self.index;
        while !self.is_at_end() && self.peek() != b'"' {
            if self.advance() == b'\\' && !self.is_at_end() {
                self.advance();
            }
        }
        if self.is_at_end() {
            let text = format!("\"{}", &self.src[start..self.index]);
            return Token::new(TokenKind::Invalid, Some(text), span);
        }
        let text = self.src[start..self.index].to_string();
        self.advance(); // closing quote
        Token::new(TokenKind::String, Some(text), span)
    }

    fn either(&mut self, with_equal: TokenKind, alone: TokenKind) -> TokenKind {
        if self.peek() == b'=' {
            self.advance();
            with_equal
        } else {
            alone
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' | b'\n' => {
                    self.advance();
                }
                b'/' if self.peek_next() == b'/' => {
                    while !self.is_at_end() && self.peek() != b'\n' {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    /// Columns count characters: UTF-8 continuation bytes do not move them.
    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.index];
        self.index += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if c & 0xC0 != 0x80 {
            self.column += 1;
        }
        c
    }

    fn peek(&self) -> u8 {
        self.bytes.get(self.index).copied().unwrap_or(0)
    }

    fn peek_next(&self) -> u8 {
        self.bytes.get(self.index + 1).copied().unwrap_or(0)
    }
}

/// Lex the whole input. The returned vector always ends with exactly one
/// `Eof` token.
pub fn lex(src: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            break;
        }
    }
    tracing::debug!(tokens = tokens.len(), "lexed source");
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn two_character_operators() {
        assert_eq!(
            kinds("! != = == < <= > >="),
            vec![
                TokenKind::Bang,
                TokenKind::NotEqual,
                TokenKind::Assign,
                TokenKind::EqualTo,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_are_case_sensitive() {
        let tokens = lex("var Var function print nulls null");
        assert_eq!(tokens[0].kind, TokenKind::Var);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].lexeme.as_deref(), Some("Var"));
        assert_eq!(tokens[2].kind, TokenKind::Function);
        assert_eq!(tokens[3].kind, TokenKind::Print);
        assert_eq!(tokens[4].kind, TokenKind::Identifier);
        assert_eq!(tokens[5].kind, TokenKind::Null);
    }

    #[test]
    fn numbers_are_digit_runs() {
        let tokens = lex("123-45 6.7");
        assert_eq!(tokens[0].lexeme.as_deref(), Some("123"));
        assert_eq!(tokens[1].kind, TokenKind::Minus);
        assert_eq!(tokens[2].lexeme.as_deref(), Some("45"));
        assert_eq!(tokens[3].lexeme.as_deref(), Some("6"));
        assert_eq!(tokens[4].kind, TokenKind::Dot);
        assert_eq!(tokens[5].lexeme.as_deref(), Some("7"));
    }

    #[test]
    fn strings_keep_raw_text() {
        let tokens = lex(r#"print "a \"quoted\" word";"#);
        assert_eq!(tokens[1].kind, TokenKind::String);
        assert_eq!(tokens[1].lexeme.as_deref(), Some(r#"a \"quoted\" word"#));
        assert_eq!(tokens[2].kind, TokenKind::Semicolon);
    }

    #[test]
    fn unterminated_string_is_invalid() {
        let tokens = lex("print \"oops;");
        assert_eq!(tokens[1].kind, TokenKind::Invalid);
        assert_eq!(tokens[2].kind, TokenKind::Eof);
    }

    #[test]
    fn unknown_bytes_become_invalid_tokens() {
        let tokens = lex("a # b é");
        assert_eq!(tokens[1].kind, TokenKind::Invalid);
        assert_eq!(tokens[1].lexeme.as_deref(), Some("#"));
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(tokens[3].kind, TokenKind::Invalid);
        assert_eq!(tokens[3].lexeme.as_deref(), Some("é"));
        assert_eq!(tokens[4].kind, TokenKind::Eof);
    }

    #[test]
    fn comments_and_positions() {
        let tokens = lex("// header\nvar x = 1; // trailing\n  print x;");
        assert_eq!(tokens[0].kind, TokenKind::Var);
        assert_eq!(tokens[0].span, Span::new(2, 1));
        assert_eq!(tokens[1].span, Span::new(2, 5));
        let print = tokens.iter().find(|t| t.kind == TokenKind::Print).unwrap();
        assert_eq!(print.span, Span::new(3, 3));

        let mut last = Span::new(0, 0);
        for token in &tokens {
            assert!(token.span.line >= last.line);
            last = token.span;
        }
    }

    #[test]
    fn columns_count_characters() {
        let in_string = lex("\"é\" x");
        assert_eq!(in_string[1].span, Span::new(1, 5));
        let invalid = lex("é x");
        assert_eq!(invalid[1].span, Span::new(1, 3));
        let commented = lex("// é\n é x");
        assert_eq!(commented[1].span, Span::new(2, 4));
    }

    #[test]
    fn peek_does_not_advance() {
        let mut lexer = Lexer::new("foo bar");
        let peeked = lexer.peek_token();
        let next = lexer.next_token();
        assert_eq!(peeked, next);
        assert_eq!(lexer.next_token().lexeme.as_deref(), Some("bar"));
        assert!(lexer.is_at_end());
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn lexemes_reproduce_source_order() {
        let src = "function add(a, b) { return a + b; }";
        let text: Vec<String> = lex(src)
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.text().to_string())
            .collect();
        assert_eq!(
            text,
            vec![
                "function", "add", "(", "a", ",", "b", ")", "{", "return", "a", "+", "b", ";",
                "}"
            ]
        );
    }
}
