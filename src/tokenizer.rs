/// Hand-written tokenizer for the wiki markup dialect
///
/// The tokenizer works over an owned copy of the source so that included
/// articles can be spliced in while parsing. The cursor is a plain byte
/// offset; callers save and restore it freely to backtrack.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    /// End of input. Returned forever once the source is exhausted.
    Null,
    Whitespace,
    Newline,
    /// A run of characters with no special meaning.
    String,
    /// A quoted attribute value, only produced by `try_read_quoted_string`.
    QuotedString,
    Backslash,
    OpenDoubleBracket,
    CloseDoubleBracket,
    OpenTripleBracket,
    CloseTripleBracket,
    OpenSingleBracket,
    CloseSingleBracket,
    OpenComment,
    CloseComment,
    DoubleAsterisk,
    DoubleSlash,
    DoubleUnderline,
    DoubleDash,
    HrBeginning,
    DoubleSup,
    OpenInlineCode,
    CloseInlineCode,
    DoubleHash,
    DoubleAt,
    OpenHtmlLiteral,
    CloseHtmlLiteral,
    DoublePipe,
    Pipe,
    Plus,
    Blockquote,
    Tilde,
    Slash,
    Equals,
}

/// Punctuation runs, longest first so that matching is greedy.
const PUNCTUATION: &[(&str, TokenKind)] = &[
    ("[!--", TokenKind::OpenComment),
    ("----", TokenKind::HrBeginning),
    ("[[[", TokenKind::OpenTripleBracket),
    ("]]]", TokenKind::CloseTripleBracket),
    ("--]", TokenKind::CloseComment),
    ("[[", TokenKind::OpenDoubleBracket),
    ("]]", TokenKind::CloseDoubleBracket),
    ("**", TokenKind::DoubleAsterisk),
    ("//", TokenKind::DoubleSlash),
    ("__", TokenKind::DoubleUnderline),
    ("--", TokenKind::DoubleDash),
    ("^^", TokenKind::DoubleSup),
    ("{{", TokenKind::OpenInlineCode),
    ("}}", TokenKind::CloseInlineCode),
    ("##", TokenKind::DoubleHash),
    ("@@", TokenKind::DoubleAt),
    ("@<", TokenKind::OpenHtmlLiteral),
    (">@", TokenKind::CloseHtmlLiteral),
    ("||", TokenKind::DoublePipe),
    ("[", TokenKind::OpenSingleBracket),
    ("]", TokenKind::CloseSingleBracket),
    ("|", TokenKind::Pipe),
    ("+", TokenKind::Plus),
    (">", TokenKind::Blockquote),
    ("~", TokenKind::Tilde),
    ("/", TokenKind::Slash),
    ("=", TokenKind::Equals),
    ("\\", TokenKind::Backslash),
];

/// Characters treated as whitespace by the parser's adjacency checks.
pub const WHITESPACE_CHARS: &[char] = &[' ', '\t', '\n', '\r'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub raw: String,
    pub value: Option<String>,
}

impl Token {
    fn new(kind: TokenKind, raw: &str) -> Self {
        Token {
            kind,
            raw: raw.to_string(),
            value: None,
        }
    }

    fn null() -> Self {
        Token::new(TokenKind::Null, "")
    }
}

pub struct Tokenizer {
    source: String,
    position: usize,
    /// Offsets right after an include tag where code was already spliced in.
    injections: Vec<usize>,
}

impl Tokenizer {
    pub fn new(source: &str) -> Self {
        Tokenizer {
            source: source.to_string(),
            position: 0,
            injections: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.source.len());
    }

    /// The character starting at `offset`, if any.
    pub fn char_at(&self, offset: usize) -> Option<char> {
        self.source.get(offset..).and_then(|rest| rest.chars().next())
    }

    /// The character ending right before `offset`, if any.
    pub fn char_before(&self, offset: usize) -> Option<char> {
        self.source
            .get(..offset)
            .and_then(|head| head.chars().next_back())
    }

    pub fn read_token(&mut self) -> Token {
        let (token, next) = self.token_at(self.position);
        self.position = next;
        token
    }

    pub fn peek_token(&self, offset: usize) -> Token {
        let mut position = self.position;
        let mut token = Token::null();
        for _ in 0..=offset {
            let (next_token, next) = self.token_at(position);
            token = next_token;
            position = next;
        }
        token
    }

    /// Consume spaces and tabs. Newlines are left alone.
    pub fn skip_whitespace(&mut self) {
        let rest = &self.source[self.position..];
        let skipped = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        self.position += skipped;
    }

    /// Splice `code` into the source at the cursor.
    ///
    /// Returns false when code was already injected at this point, which
    /// happens when backtracking makes the parser meet the same include again.
    pub fn inject_code(&mut self, code: &str) -> bool {
        let at = self.position;
        if self.injections.contains(&at) {
            return false;
        }
        for injection in self.injections.iter_mut() {
            if *injection > at {
                *injection += code.len();
            }
        }
        self.injections.push(at);
        self.source.insert_str(at, code);
        true
    }

    /// Read a quoted string, or failing that a bare word.
    ///
    /// Quoted strings carry their unquoted content in `value`. A bare word
    /// runs until whitespace or `]]`. When neither is present a `Null` token
    /// is returned and the cursor does not move.
    pub fn try_read_quoted_string(&mut self) -> Token {
        let rest = &self.source[self.position..];
        if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'')
            && let Some(end) = rest[1..].find(quote)
        {
            let raw = &rest[..end + 2];
            let mut token = Token::new(TokenKind::QuotedString, raw);
            token.value = Some(rest[1..end + 1].to_string());
            self.position += raw.len();
            return token;
        }

        let mut len = 0;
        for (index, ch) in rest.char_indices() {
            if WHITESPACE_CHARS.contains(&ch) || rest[index..].starts_with("]]") {
                break;
            }
            len = index + ch.len_utf8();
        }
        if len == 0 {
            return Token::null();
        }
        let mut token = Token::new(TokenKind::String, &rest[..len]);
        token.value = Some(token.raw.clone());
        self.position += len;
        token
    }

    fn token_at(&self, position: usize) -> (Token, usize) {
        let rest = &self.source[position..];
        let Some(first) = rest.chars().next() else {
            return (Token::null(), position);
        };

        if first == '\n' {
            return (Token::new(TokenKind::Newline, "\n"), position + 1);
        }
        if first == ' ' || first == '\t' {
            let len = rest.len() - rest.trim_start_matches([' ', '\t']).len();
            return (
                Token::new(TokenKind::Whitespace, &rest[..len]),
                position + len,
            );
        }
        if let Some((text, kind)) = punctuation_at(rest) {
            return (Token::new(kind, text), position + text.len());
        }

        // Plain run: stops at whitespace or wherever punctuation begins
        let mut len = first.len_utf8();
        for (index, ch) in rest.char_indices().skip(1) {
            if ch == ' ' || ch == '\t' || ch == '\n' || punctuation_at(&rest[index..]).is_some() {
                break;
            }
            len = index + ch.len_utf8();
        }
        let mut token = Token::new(TokenKind::String, &rest[..len]);
        token.value = Some(token.raw.clone());
        (token, position + len)
    }
}

fn punctuation_at(text: &str) -> Option<(&'static str, TokenKind)> {
    PUNCTUATION
        .iter()
        .find(|(punct, _)| text.starts_with(punct))
        .copied()
}
