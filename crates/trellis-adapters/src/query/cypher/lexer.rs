//! Cypher tokenizer.
//!
//! Produces one token at a time with its byte span and 1-based line and
//! column. Malformed input (an unterminated string, a stray character)
//! becomes an [`TokenKind::Error`] token whose text is the message, so the
//! parser reports it at the right position.

use trellis_common::utils::error::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Clauses
    Match,
    Where,
    With,
    Return,
    Unwind,
    Create,
    Delete,
    Detach,
    Set,
    Order,
    By,
    Skip,
    Limit,
    As,
    Distinct,
    Asc,
    Ascending,
    Desc,
    Descending,
    Optional,
    // Statements
    Node,
    Rel,
    Table,
    Drop,
    From,
    To,
    Primary,
    Key,
    Begin,
    Transaction,
    Commit,
    Rollback,
    Checkpoint,
    Explain,
    // Expressions
    And,
    Or,
    Xor,
    Not,
    In,
    Is,
    Null,
    True,
    False,
    Starts,
    Ends,
    Contains,
    Case,
    When,
    Then,
    Else,
    End,
    // Atoms
    Identifier,
    QuotedIdentifier,
    Integer,
    Float,
    String,
    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    DotDot,
    Colon,
    Semicolon,
    Pipe,
    Dollar,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Arrow,
    LeftArrow,
    Error,
    Eof,
}

impl TokenKind {
    /// How the token is named in error messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Identifier | Self::QuotedIdentifier => "identifier",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::String => "string",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::LBrace => "'{'",
            Self::RBrace => "'}'",
            Self::Comma => "','",
            Self::Dot => "'.'",
            Self::DotDot => "'..'",
            Self::Colon => "':'",
            Self::Semicolon => "';'",
            Self::Pipe => "'|'",
            Self::Dollar => "'$'",
            Self::Plus => "'+'",
            Self::Minus => "'-'",
            Self::Star => "'*'",
            Self::Slash => "'/'",
            Self::Percent => "'%'",
            Self::Caret => "'^'",
            Self::Eq => "'='",
            Self::Ne => "'<>'",
            Self::Lt => "'<'",
            Self::Le => "'<='",
            Self::Gt => "'>'",
            Self::Ge => "'>='",
            Self::Arrow => "'->'",
            Self::LeftArrow => "'<-'",
            Self::Eof => "end of input",
            Self::Error => "invalid token",
            Self::Match => "MATCH",
            Self::Where => "WHERE",
            Self::With => "WITH",
            Self::Return => "RETURN",
            Self::Unwind => "UNWIND",
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
            Self::Detach => "DETACH",
            Self::Set => "SET",
            Self::Order => "ORDER",
            Self::By => "BY",
            Self::Skip => "SKIP",
            Self::Limit => "LIMIT",
            Self::As => "AS",
            Self::Distinct => "DISTINCT",
            Self::Asc => "ASC",
            Self::Ascending => "ASCENDING",
            Self::Desc => "DESC",
            Self::Descending => "DESCENDING",
            Self::Optional => "OPTIONAL",
            Self::Node => "NODE",
            Self::Rel => "REL",
            Self::Table => "TABLE",
            Self::Drop => "DROP",
            Self::From => "FROM",
            Self::To => "TO",
            Self::Primary => "PRIMARY",
            Self::Key => "KEY",
            Self::Begin => "BEGIN",
            Self::Transaction => "TRANSACTION",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Checkpoint => "CHECKPOINT",
            Self::Explain => "EXPLAIN",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Not => "NOT",
            Self::In => "IN",
            Self::Is => "IS",
            Self::Null => "NULL",
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Starts => "STARTS",
            Self::Ends => "ENDS",
            Self::Contains => "CONTAINS",
            Self::Case => "CASE",
            Self::When => "WHEN",
            Self::Then => "THEN",
            Self::Else => "ELSE",
            Self::End => "END",
        }
    }

    fn keyword(word: &str) -> Option<Self> {
        let kind = match word.to_ascii_uppercase().as_str() {
            "MATCH" => Self::Match,
            "WHERE" => Self::Where,
            "WITH" => Self::With,
            "RETURN" => Self::Return,
            "UNWIND" => Self::Unwind,
            "CREATE" => Self::Create,
            "DELETE" => Self::Delete,
            "DETACH" => Self::Detach,
            "SET" => Self::Set,
            "ORDER" => Self::Order,
            "BY" => Self::By,
            "SKIP" => Self::Skip,
            "LIMIT" => Self::Limit,
            "AS" => Self::As,
            "DISTINCT" => Self::Distinct,
            "ASC" => Self::Asc,
            "ASCENDING" => Self::Ascending,
            "DESC" => Self::Desc,
            "DESCENDING" => Self::Descending,
            "OPTIONAL" => Self::Optional,
            "NODE" => Self::Node,
            "REL" => Self::Rel,
            "TABLE" => Self::Table,
            "DROP" => Self::Drop,
            "FROM" => Self::From,
            "TO" => Self::To,
            "PRIMARY" => Self::Primary,
            "KEY" => Self::Key,
            "BEGIN" => Self::Begin,
            "TRANSACTION" => Self::Transaction,
            "COMMIT" => Self::Commit,
            "ROLLBACK" => Self::Rollback,
            "CHECKPOINT" => Self::Checkpoint,
            "EXPLAIN" => Self::Explain,
            "AND" => Self::And,
            "OR" => Self::Or,
            "XOR" => Self::Xor,
            "NOT" => Self::Not,
            "IN" => Self::In,
            "IS" => Self::Is,
            "NULL" => Self::Null,
            "TRUE" => Self::True,
            "FALSE" => Self::False,
            "STARTS" => Self::Starts,
            "ENDS" => Self::Ends,
            "CONTAINS" => Self::Contains,
            "CASE" => Self::Case,
            "WHEN" => Self::When,
            "THEN" => Self::Then,
            "ELSE" => Self::Else,
            "END" => Self::End,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text, except for strings (unescaped contents, no quotes),
    /// quoted identifiers (no backticks) and errors (the message).
    pub text: String,
    pub span: SourceSpan,
}

#[derive(Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Option<Token> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let (start, line, column) = (self.pos, self.line, self.column);
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Some(self.error_token(start, line, column, "Unterminated comment"));
                            }
                        }
                    }
                }
                _ => return None,
            }
        }
    }

    fn error_token(&self, start: usize, line: u32, column: u32, message: &str) -> Token {
        Token {
            kind: TokenKind::Error,
            text: message.to_string(),
            span: SourceSpan::new(start, self.pos, line, column),
        }
    }

    /// Returns the next token; [`TokenKind::Eof`] forever once input ends.
    pub fn next_token(&mut self) -> Token {
        if let Some(error) = self.skip_trivia() {
            return error;
        }
        let (start, line, column) = (self.pos, self.line, self.column);
        let Some(c) = self.bump() else {
            return Token {
                kind: TokenKind::Eof,
                text: String::new(),
                span: SourceSpan::new(start, start, line, column),
            };
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '|' => TokenKind::Pipe,
            '$' => TokenKind::Dollar,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '=' => TokenKind::Eq,
            '.' if self.peek() == Some('.') => {
                self.bump();
                TokenKind::DotDot
            }
            '.' if self.peek().is_some_and(|d| d.is_ascii_digit()) => return self.number(start, line, column),
            '.' => TokenKind::Dot,
            '-' if self.peek() == Some('>') => {
                self.bump();
                TokenKind::Arrow
            }
            '-' => TokenKind::Minus,
            '<' => match self.peek() {
                Some('=') => {
                    self.bump();
                    TokenKind::Le
                }
                Some('>') => {
                    self.bump();
                    TokenKind::Ne
                }
                Some('-') => {
                    self.bump();
                    TokenKind::LeftArrow
                }
                _ => TokenKind::Lt,
            },
            '>' if self.peek() == Some('=') => {
                self.bump();
                TokenKind::Ge
            }
            '>' => TokenKind::Gt,
            '!' if self.peek() == Some('=') => {
                self.bump();
                TokenKind::Ne
            }
            '\'' | '"' => return self.string(c, start, line, column),
            '`' => return self.quoted_identifier(start, line, column),
            d if d.is_ascii_digit() => return self.number(start, line, column),
            a if a.is_alphabetic() || a == '_' => {
                while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                    self.bump();
                }
                TokenKind::keyword(&self.input[start..self.pos]).unwrap_or(TokenKind::Identifier)
            }
            other => {
                return self.error_token(start, line, column, &format!("Unexpected character '{other}'"));
            }
        };

        Token {
            kind,
            text: self.input[start..self.pos].to_string(),
            span: SourceSpan::new(start, self.pos, line, column),
        }
    }

    fn number(&mut self, start: usize, line: u32, column: u32) -> Token {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = self.input[start..].starts_with('.');
        // `1..3` is a range, not a float.
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mut probe = self.clone();
            probe.bump();
            if matches!(probe.peek(), Some('+' | '-')) {
                probe.bump();
            }
            if probe.peek().is_some_and(|c| c.is_ascii_digit()) {
                while probe.peek().is_some_and(|c| c.is_ascii_digit()) {
                    probe.bump();
                }
                *self = probe;
                is_float = true;
            }
        }
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                self.bump();
            }
            return self.error_token(start, line, column, "Invalid number literal");
        }
        Token {
            kind: if is_float { TokenKind::Float } else { TokenKind::Integer },
            text: self.input[start..self.pos].to_string(),
            span: SourceSpan::new(start, self.pos, line, column),
        }
    }

    fn string(&mut self, quote: char, start: usize, line: u32, column: u32) -> Token {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return self.error_token(start, line, column, "Unterminated string literal"),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('u') => {
                        let digits: String = (0..4).filter_map(|_| self.bump()).collect();
                        match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                            Some(c) => value.push(c),
                            None => return self.error_token(start, line, column, "Invalid unicode escape"),
                        }
                    }
                    Some(c @ ('\\' | '\'' | '"')) => value.push(c),
                    Some(other) => {
                        return self.error_token(start, line, column, &format!("Invalid escape sequence '\\{other}'"));
                    }
                    None => return self.error_token(start, line, column, "Unterminated string literal"),
                },
                Some(c) => value.push(c),
            }
        }
        Token {
            kind: TokenKind::String,
            text: value,
            span: SourceSpan::new(start, self.pos, line, column),
        }
    }

    fn quoted_identifier(&mut self, start: usize, line: u32, column: u32) -> Token {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return self.error_token(start, line, column, "Unterminated quoted identifier"),
                // A doubled backtick escapes itself.
                Some('`') if self.peek() == Some('`') => {
                    self.bump();
                    value.push('`');
                }
                Some('`') => break,
                Some(c) => value.push(c),
            }
        }
        if value.is_empty() {
            return self.error_token(start, line, column, "Empty quoted identifier");
        }
        Token {
            kind: TokenKind::QuotedIdentifier,
            text: value,
            span: SourceSpan::new(start, self.pos, line, column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token();
            if token.kind == TokenKind::Eof {
                return out;
            }
            out.push(token.kind);
        }
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(kinds("match Return"), [TokenKind::Match, TokenKind::Return]);
        assert_eq!(kinds("person"), [TokenKind::Identifier]);
    }

    #[test]
    fn test_arrows_and_operators() {
        assert_eq!(
            kinds("(a)-[:K]->(b)<-(c)"),
            [
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Minus,
                TokenKind::LBracket,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::RBracket,
                TokenKind::Arrow,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::LeftArrow,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
            ]
        );
        assert_eq!(kinds("<> != <= >="), [TokenKind::Ne, TokenKind::Ne, TokenKind::Le, TokenKind::Ge]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1 1.5 .5 1e3 2E-2"), [
            TokenKind::Integer,
            TokenKind::Float,
            TokenKind::Float,
            TokenKind::Float,
            TokenKind::Float
        ]);
        assert_eq!(kinds("1..3"), [TokenKind::Integer, TokenKind::DotDot, TokenKind::Integer]);
        assert_eq!(kinds("12abc"), [TokenKind::Error]);
    }

    #[test]
    fn test_strings() {
        let mut lexer = Lexer::new(r#"'it\'s' "a\nb" 'é'"#);
        assert_eq!(lexer.next_token().text, "it's");
        assert_eq!(lexer.next_token().text, "a\nb");
        assert_eq!(lexer.next_token().text, "é");
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("RETURN 'abc");
        lexer.next_token();
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.span.start, 7);
        assert_eq!(token.text, "Unterminated string literal");
    }

    #[test]
    fn test_comments_and_positions() {
        let mut lexer = Lexer::new("// header\nMATCH /* x */ (n)");
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Match);
        assert_eq!((token.span.line, token.span.column), (2, 1));
        let token = lexer.next_token();
        assert_eq!((token.span.line, token.span.column), (2, 15));
    }

    #[test]
    fn test_quoted_identifier() {
        let mut lexer = Lexer::new("`weird name`");
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::QuotedIdentifier);
        assert_eq!(token.text, "weird name");
    }

    #[test]
    fn test_stray_character() {
        assert_eq!(kinds("RETURN #"), [TokenKind::Return, TokenKind::Error]);
    }
}
