//! Tokenizer for the kernel language.
//!
//! Turns source text into a flat token stream with explicit `Newline`,
//! `Indent` and `Dedent` tokens so the parser never has to look at
//! whitespace. Blank and comment-only lines produce nothing; newlines inside
//! brackets are ignored (implicit line joining).

use duet_core::Diagnostic;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),

    // Keywords
    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Pass,
    Raise,
    And,
    Or,
    Not,
    True,
    False,
    None,

    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,

    // Layout
    Newline,
    Indent,
    Dedent,
    EndOfFile,
}

impl TokenKind {
    /// Short human-readable form used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Name(n) => format!("name '{n}'"),
            TokenKind::Int(i) => format!("number {i}"),
            TokenKind::Float(f) => format!("number {f}"),
            TokenKind::Str(_) => "string literal".into(),
            TokenKind::Newline => "end of line".into(),
            TokenKind::Indent => "indent".into(),
            TokenKind::Dedent => "dedent".into(),
            TokenKind::EndOfFile => "end of input".into(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Def => "def",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::In => "in",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Pass => "pass",
            TokenKind::Raise => "raise",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::True => "True",
            TokenKind::False => "False",
            TokenKind::None => "None",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::DoubleSlash => "//",
            TokenKind::Percent => "%",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::Assign => "=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            _ => "?",
        }
    }
}

/// A token plus the position it started at (1-based).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "def" => TokenKind::Def,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "pass" => TokenKind::Pass,
        "raise" => TokenKind::Raise,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "True" => TokenKind::True,
        "False" => TokenKind::False,
        "None" => TokenKind::None,
        _ => return None,
    };
    Some(kind)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    /// Open bracket count; layout tokens are suppressed while > 0
    depth: usize,
}

/// Tokenize kernel source text.
pub fn tokenize(input: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut lexer = Lexer {
        chars: input.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        tokens: Vec::new(),
        indents: vec![0],
        depth: 0,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(self.line, self.column, message)
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn last_is_layout(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Indent) | Some(TokenKind::Dedent)
        )
    }

    fn run(&mut self) -> Result<(), Diagnostic> {
        let mut at_line_start = true;

        loop {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                if !self.read_indentation()? {
                    break;
                }
            }

            let Some(c) = self.peek() else { break };
            let (line, column) = (self.line, self.column);

            match c {
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        if !self.last_is_layout() {
                            self.push(TokenKind::Newline, line, column);
                        }
                        at_line_start = true;
                    }
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                c if c.is_ascii_digit() => self.read_number(line, column)?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                    self.read_number(line, column)?
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut word = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            word.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    let kind = keyword(&word).unwrap_or(TokenKind::Name(word));
                    self.push(kind, line, column);
                }
                '"' | '\'' => self.read_string(c, line, column)?,
                _ => self.read_operator(c, line, column)?,
            }
        }

        if self.depth > 0 {
            return Err(self.error("unexpected end of input: unclosed bracket"));
        }

        let (line, column) = (self.line, self.column);
        if !self.last_is_layout() {
            self.push(TokenKind::Newline, line, column);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, line, column);
        }
        self.push(TokenKind::EndOfFile, line, column);
        Ok(())
    }

    /// Measure the indentation of the next logical line and emit layout
    /// tokens. Skips blank and comment-only lines. Returns `false` at end of
    /// input.
    fn read_indentation(&mut self) -> Result<bool, Diagnostic> {
        loop {
            let mut width = 0;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\r' | '\x0c' => {}
                    _ => break,
                }
                self.bump();
            }

            match self.peek() {
                None => return Ok(false),
                Some('\n') => {
                    self.bump();
                    continue;
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                Some(_) => {}
            }

            let current = self.indents.last().copied().unwrap_or(0);
            let (line, column) = (self.line, self.column);
            if width > current {
                self.indents.push(width);
                self.push(TokenKind::Indent, line, column);
            } else if width < current {
                while self.indents.last().is_some_and(|&w| w > width) {
                    self.indents.pop();
                    self.push(TokenKind::Dedent, line, column);
                }
                if self.indents.last().copied().unwrap_or(0) != width {
                    return Err(Diagnostic::new(
                        line,
                        column,
                        "unindent does not match any outer indentation level",
                    ));
                }
            }
            return Ok(true);
        }
    }

    fn read_number(&mut self, line: usize, column: usize) -> Result<(), Diagnostic> {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
            } else if c == '.' && !is_float {
                is_float = true;
                text.push(c);
            } else {
                break;
            }
            self.bump();
        }
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(self.error(format!("invalid numeric literal '{text}'")));
        }

        let cleaned = text.replace('_', "");
        let kind = if is_float {
            cleaned
                .parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| Diagnostic::new(line, column, format!("invalid number: {text}")))?
        } else {
            cleaned
                .parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| Diagnostic::new(line, column, format!("integer too large: {text}")))?
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn read_string(&mut self, quote: char, line: usize, column: usize) -> Result<(), Diagnostic> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(Diagnostic::new(line, column, "unterminated string literal"));
                }
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('\\') => '\\',
                        Some('\'') => '\'',
                        Some('"') => '"',
                        Some('\n') => continue,
                        Some(other) => {
                            value.push('\\');
                            other
                        }
                        None => {
                            return Err(Diagnostic::new(line, column, "unterminated string literal"));
                        }
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
        self.push(TokenKind::Str(value), line, column);
        Ok(())
    }

    fn read_operator(&mut self, c: char, line: usize, column: usize) -> Result<(), Diagnostic> {
        let next = self.peek_at(1);
        let (kind, width) = match (c, next) {
            ('/', Some('/')) => (TokenKind::DoubleSlash, 2),
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('+', Some('=')) => (TokenKind::PlusAssign, 2),
            ('-', Some('=')) => (TokenKind::MinusAssign, 2),
            ('*', Some('=')) => (TokenKind::StarAssign, 2),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('=', _) => (TokenKind::Assign, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            (other, _) => {
                return Err(self.error(format!("unexpected character '{other}'")));
            }
        };

        match kind {
            TokenKind::LParen | TokenKind::LBracket => self.depth += 1,
            TokenKind::RParen | TokenKind::RBracket => {
                if self.depth == 0 {
                    return Err(self.error(format!("unmatched '{c}'")));
                }
                self.depth -= 1;
            }
            _ => {}
        }

        for _ in 0..width {
            self.bump();
        }
        self.push(kind, line, column);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn indentation_produces_layout_tokens() {
        let toks = kinds("def f():\n    return 1\n");
        assert!(toks.contains(&TokenKind::Indent));
        assert!(toks.contains(&TokenKind::Dedent));
        assert_eq!(toks.last(), Some(&TokenKind::EndOfFile));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let toks = kinds("# header\n\nx = 1  # trailing\n\n   # indented comment\ny = 2");
        let names: Vec<_> = toks
            .iter()
            .filter(|k| matches!(k, TokenKind::Name(_)))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn brackets_join_lines() {
        let toks = kinds("x = [1,\n     2,\n     3]\n");
        let newlines = toks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn string_escapes() {
        let toks = kinds(r#"s = "a\tb\n" + 'it\'s'"#);
        assert!(toks.contains(&TokenKind::Str("a\tb\n".into())));
        assert!(toks.contains(&TokenKind::Str("it's".into())));
    }

    #[test]
    fn two_char_operators() {
        let toks = kinds("a //= b");
        // `//=` is not an operator: `//` followed by `=`
        assert_eq!(toks[1], TokenKind::DoubleSlash);
        assert_eq!(toks[2], TokenKind::Assign);

        let toks = kinds("a <= b != c");
        assert!(toks.contains(&TokenKind::LtEq));
        assert!(toks.contains(&TokenKind::NotEq));
    }

    #[test]
    fn floats_and_ints() {
        assert!(kinds("x = 3.5").contains(&TokenKind::Float(3.5)));
        assert!(kinds("x = 1_000").contains(&TokenKind::Int(1000)));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("x = 'oops\ny = 2").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n        y = 1\n    z = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn unmatched_bracket_is_an_error() {
        assert!(tokenize("x = (1 + 2").is_err());
        assert!(tokenize("x = 1 + 2)").is_err());
    }

    #[test]
    fn unexpected_character() {
        let err = tokenize("x = 1 $ 2").unwrap_err();
        assert!(err.message.contains("'$'"));
        assert_eq!(err.column, 7);
    }

    #[test]
    fn positions_are_tracked() {
        let toks = tokenize("a = 1\nbb = 2").unwrap();
        let bb = toks
            .iter()
            .find(|t| t.kind == TokenKind::Name("bb".into()))
            .unwrap();
        assert_eq!((bb.line, bb.column), (2, 1));
    }
}
