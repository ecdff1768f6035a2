/// Backtracking recursive-descent parser for wiki markup
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use phf::phf_set;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::articles::ArticleSource;
use crate::ast::{Alignment, Attribute, ImageKind, Node, NodeKind, push_child};
use crate::config::Config;
use crate::paragraphs::fold_paragraphs;
use crate::tokenizer::{TokenKind, Tokenizer, WHITESPACE_CHARS};

static GENERIC_TAGS: phf::Set<&'static str> = phf_set! {
    "a", "span", "div", "table", "row", "hcell", "cell",
};

static HACK_TAGS: phf::Set<&'static str> = phf_set! {
    "module", "include", "iframe", "collapsible", "tabview", "size", "html",
};

/// Modules that have a body and a closing `[[/module]]`.
static CONTENT_MODULES: phf::Set<&'static str> = phf_set! {
    "css", "listpages", "listusers",
};

static INCLUDE_VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\$(?P<name>[a-zA-Z0-9_\-]+)\}").expect("include variable pattern is valid")
});

/// State threaded through one parse call.
#[derive(Debug)]
pub struct ParseContext {
    pub root: Node,
    pub footnotes: Vec<Node>,
    pub code_blocks: Vec<Node>,
    /// Whether `[[tab]]` is currently an allowed tag.
    pub(crate) in_tab_view: bool,
}

impl ParseContext {
    fn new() -> Self {
        ParseContext {
            root: Node::new(NodeKind::Root),
            footnotes: Vec::new(),
            code_blocks: Vec::new(),
            in_tab_view: false,
        }
    }

    fn into_document(self) -> Document {
        Document {
            root: self.root,
            footnotes: self.footnotes,
            code_blocks: self.code_blocks,
        }
    }
}

/// A parsed and paragraph-folded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: Node,
    pub footnotes: Vec<Node>,
    pub code_blocks: Vec<Node>,
}

impl Document {
    /// Dump the tree as JSON, for debugging.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.root)
    }
}

/// Sub-parser for one construct. Called with the opening token already
/// consumed; returns `None` when the input is not that construct.
type SubParser<'a, A> = fn(&mut Parser<'a, A>) -> Option<Node>;

/// Key of a failed construct attempt: start offset, opening token, tab view
/// flag and depth.
type AttemptKey = (usize, TokenKind, bool, usize);

pub struct Parser<'a, A: ArticleSource> {
    tokenizer: Tokenizer,
    articles: &'a A,
    config: &'a Config,
    context: ParseContext,
    depth: usize,
    includes: usize,
    failed: HashSet<AttemptKey>,
    depth_warned: bool,
}

impl<'a, A: ArticleSource> Parser<'a, A> {
    pub fn new(source: &str, articles: &'a A, config: &'a Config) -> Self {
        Parser {
            tokenizer: Tokenizer::new(&source.replace("\r\n", "\n")),
            articles,
            config,
            context: ParseContext::new(),
            depth: 0,
            includes: 0,
            failed: HashSet::new(),
            depth_warned: false,
        }
    }

    /// Parse the whole source and fold paragraphs.
    pub fn parse(mut self) -> Document {
        self.parse_into_root();
        self.context.into_document()
    }

    fn parse_into_root(&mut self) {
        while let Some(node) = self.parse_node() {
            self.context.root.append_child(node);
        }
        fold_paragraphs(&mut self.context.root);
    }

    /// Parse nested markup (blockquote content) as a whole document sharing
    /// this parser's depth and include budget.
    fn parse_subtree(&mut self, source: &str) -> Vec<Node> {
        let mut nested = Parser::new(source, self.articles, self.config);
        nested.depth = self.depth;
        nested.includes = self.includes;
        nested.parse_into_root();
        self.includes = nested.includes;
        nested.context.root.children
    }

    /// Parse one node. Returns `None` only at end of input.
    fn parse_node(&mut self) -> Option<Node> {
        let start = self.tokenizer.position();
        let token = self.tokenizer.read_token();
        match token.kind {
            TokenKind::Null => return None,
            TokenKind::Newline => return Some(Node::newline(false)),
            _ => {}
        }

        if let Some(sub_parser) = Self::sub_parser(token.kind) {
            let key = (start, token.kind, self.context.in_tab_view, self.depth);
            if self.depth >= self.config.max_depth {
                if !self.depth_warned {
                    log::warn!("nesting limit of {} reached at offset {start}", self.config.max_depth);
                    self.depth_warned = true;
                }
            } else if !self.failed.contains(&key) {
                let pos = self.tokenizer.position();
                self.depth += 1;
                let result = sub_parser(self);
                self.depth -= 1;
                match result {
                    Some(node) => {
                        if let NodeKind::Include {
                            name,
                            code: Some(code),
                            ..
                        } = &node.kind
                        {
                            self.inject_include(name, code);
                        }
                        return Some(node);
                    }
                    None => {
                        log::trace!("{:?} at offset {start} is not a construct", token.kind);
                        self.tokenizer.set_position(pos);
                        self.failed.insert(key);
                    }
                }
            }
        }
        Some(Node::text(token.raw))
    }

    fn sub_parser(kind: TokenKind) -> Option<SubParser<'a, A>> {
        let sub_parser: SubParser<'a, A> = match kind {
            TokenKind::Backslash => Self::try_parse_newline_escape,
            TokenKind::OpenDoubleBracket => Self::try_parse_bracket_tag,
            TokenKind::OpenComment => Self::try_parse_comment,
            TokenKind::DoubleHash => Self::try_parse_color,
            TokenKind::DoubleAt => Self::try_parse_literal,
            TokenKind::OpenHtmlLiteral => Self::try_parse_html_literal,
            TokenKind::OpenSingleBracket => Self::try_parse_external_link,
            TokenKind::OpenTripleBracket => Self::try_parse_internal_link,
            TokenKind::DoubleAsterisk => Self::try_parse_strong,
            TokenKind::DoubleSlash => Self::try_parse_em,
            TokenKind::DoubleUnderline => Self::try_parse_underline,
            TokenKind::DoubleDash => Self::try_parse_strike,
            TokenKind::DoubleSup => Self::try_parse_sup,
            TokenKind::OpenInlineCode => Self::try_parse_monospace,
            TokenKind::HrBeginning => Self::try_parse_horizontal_rule,
            TokenKind::Plus => Self::try_parse_heading,
            TokenKind::Blockquote => Self::try_parse_blockquote,
            TokenKind::DoublePipe => Self::try_parse_table,
            _ => return None,
        };
        Some(sub_parser)
    }

    fn inject_include(&mut self, name: &str, code: &str) {
        if self.includes >= self.config.max_includes {
            log::warn!("include limit reached, not including {name:?}");
            return;
        }
        if self.tokenizer.inject_code(code) {
            log::debug!("included {name:?} ({} bytes)", code.len());
            self.includes += 1;
            // Offsets past the splice point moved
            self.failed.clear();
        }
    }

    /// Collect raw token text until one of `stops` (left unread). `None` if
    /// the input ends first, unless `Null` is one of the stops.
    fn read_until(&mut self, stops: &[TokenKind]) -> Option<String> {
        let mut text = String::new();
        loop {
            let pos = self.tokenizer.position();
            let token = self.tokenizer.read_token();
            if stops.contains(&token.kind) {
                self.tokenizer.set_position(pos);
                return Some(text);
            }
            if token.kind == TokenKind::Null {
                return None;
            }
            text.push_str(&token.raw);
        }
    }

    /// Whether the `size`-byte opener just read starts a line.
    fn at_line_start(&self, size: usize) -> bool {
        let Some(start) = self.tokenizer.position().checked_sub(size) else {
            return false;
        };
        start == 0 || self.tokenizer.char_before(start) == Some('\n')
    }

    fn with_tab_view<T>(&mut self, in_tab_view: bool, f: impl FnOnce(&mut Self) -> T) -> T {
        let was_in_tab_view = self.context.in_tab_view;
        self.context.in_tab_view = in_tab_view;
        let result = f(self);
        self.context.in_tab_view = was_in_tab_view;
        result
    }

    fn tag_allowed(&self, name: &str) -> bool {
        GENERIC_TAGS.contains(name)
            || HACK_TAGS.contains(name)
            || ImageKind::from_tag(name).is_some()
            || Alignment::from_tag(name).is_some()
            || (name == "tab" && self.context.in_tab_view)
    }

    fn try_parse_newline_escape(&mut self) -> Option<Node> {
        // \ was already consumed
        if self.tokenizer.read_token().kind != TokenKind::Newline {
            return None;
        }
        Some(Node::new(NodeKind::NewlineEscape))
    }

    fn try_parse_bracket_tag(&mut self) -> Option<Node> {
        // [[ was already consumed
        self.tokenizer.skip_whitespace();
        let mut name = self
            .read_until(&[TokenKind::Whitespace, TokenKind::CloseDoubleBracket])?
            .to_lowercase();
        let trim_paragraphs = name.ends_with('_');
        if trim_paragraphs {
            name.pop();
        }
        if !self.tag_allowed(&name) {
            return None;
        }

        let attributes = self.read_tag_attributes(&name)?;
        // Positional first argument: include target, image source, module
        // name, tab name or font size
        let first = attributes
            .first()
            .map(|attr| attr.name.clone())
            .unwrap_or_default();
        let rest: Vec<Attribute> = attributes.iter().skip(1).cloned().collect();

        // Tags without a body
        if name == "include" {
            return Some(self.resolve_include(first, rest));
        }
        if name == "iframe" {
            return Some(Node::new(NodeKind::Iframe {
                url: first,
                attributes: rest,
            }));
        }
        if let Some(kind) = ImageKind::from_tag(&name) {
            return Some(Node::new(NodeKind::Image {
                kind,
                source: first,
                attributes: rest,
            }));
        }
        let module = first.to_lowercase();
        if name == "module" && !CONTENT_MODULES.contains(module.as_str()) {
            return Some(Node::new(NodeKind::Module {
                name: module,
                attributes: rest,
                content: None,
            }));
        }

        let raw_body = name == "module" || name == "html";
        let tab_view = name == "tabview";
        let mut children = Vec::new();
        let mut body = String::new();
        loop {
            let pos = self.tokenizer.position();
            if self.try_read_close_tag(&name) {
                break;
            }
            self.tokenizer.set_position(pos);
            if raw_body {
                let token = self.tokenizer.read_token();
                if token.kind == TokenKind::Null {
                    return None;
                }
                body.push_str(&token.raw);
            } else {
                let child = self.with_tab_view(tab_view, |parser| parser.parse_node())?;
                push_child(&mut children, child);
            }
        }

        let node = match name.as_str() {
            "module" => Node::new(NodeKind::Module {
                name: module,
                attributes: rest,
                content: Some(body),
            }),
            "html" => Node::new(NodeKind::UnsafeHtml(body)),
            "collapsible" => Node::with_children(NodeKind::Collapsible { attributes }, children),
            "tabview" => Node::with_children(NodeKind::TabView { attributes }, children),
            "tab" => Node::with_children(NodeKind::Tab { name: first }, children),
            "size" => Node::with_children(NodeKind::FontSize(first), children),
            _ => {
                if let Some(alignment) = Alignment::from_tag(&name) {
                    Node::with_children(NodeKind::TextAlign(alignment), children)
                } else {
                    if trim_paragraphs {
                        self.skip_blank();
                    }
                    Node::element(&name, attributes, children, name != "span", trim_paragraphs)
                }
            }
        };
        Some(node)
    }

    /// Read `name[=value]` pairs up to and including the closing `]]`.
    fn read_tag_attributes(&mut self, name: &str) -> Option<Vec<Attribute>> {
        let mut attributes = Vec::new();
        if name == "tab" {
            self.tokenizer.skip_whitespace();
            let tab_name = self.read_until(&[TokenKind::CloseDoubleBracket])?;
            self.tokenizer.read_token();
            attributes.push(Attribute::new(tab_name.trim(), None));
            return Some(attributes);
        }

        loop {
            self.tokenizer.skip_whitespace();
            if name == "include" && self.tokenizer.peek_token(0).kind == TokenKind::Pipe {
                self.tokenizer.read_token();
                continue;
            }
            let attr_name = self
                .read_until(&[
                    TokenKind::CloseDoubleBracket,
                    TokenKind::Whitespace,
                    TokenKind::Equals,
                    TokenKind::Newline,
                ])?
                .trim()
                .to_string();
            self.tokenizer.skip_whitespace();
            let pos = self.tokenizer.position();
            let token = self.tokenizer.read_token();
            match token.kind {
                TokenKind::Null => return None,
                TokenKind::CloseDoubleBracket => {
                    if !attr_name.is_empty() {
                        attributes.push(Attribute::new(attr_name, None));
                    }
                    return Some(attributes);
                }
                TokenKind::Equals => {}
                TokenKind::Newline => {
                    if !attr_name.is_empty() {
                        attributes.push(Attribute::new(attr_name, None));
                    }
                    continue;
                }
                _ => {
                    self.tokenizer.set_position(pos);
                    attributes.push(Attribute::new(attr_name, None));
                    continue;
                }
            }

            if name == "include" {
                // Include values run up to the next pipe
                let value = self.read_until(&[TokenKind::Pipe, TokenKind::CloseDoubleBracket])?;
                attributes.push(Attribute::new(attr_name, Some(value.trim().to_string())));
                let pos = self.tokenizer.position();
                if self.tokenizer.read_token().kind != TokenKind::Pipe {
                    self.tokenizer.set_position(pos);
                }
            } else {
                self.tokenizer.skip_whitespace();
                let value = self.tokenizer.try_read_quoted_string();
                attributes.push(Attribute::new(attr_name, value.value));
            }
        }
    }

    /// Consume `[[/name]]` if it comes next.
    fn try_read_close_tag(&mut self, name: &str) -> bool {
        if self.tokenizer.read_token().kind != TokenKind::OpenDoubleBracket {
            return false;
        }
        self.tokenizer.skip_whitespace();
        if self.tokenizer.read_token().kind != TokenKind::Slash {
            return false;
        }
        self.tokenizer.skip_whitespace();
        let Some(close_name) =
            self.read_until(&[TokenKind::CloseDoubleBracket, TokenKind::Whitespace])
        else {
            return false;
        };
        if close_name.to_lowercase() != name {
            return false;
        }
        self.tokenizer.skip_whitespace();
        self.tokenizer.read_token().kind == TokenKind::CloseDoubleBracket
    }

    /// Eat whitespace and newlines after a `[[name_]]` block.
    fn skip_blank(&mut self) {
        loop {
            let pos = self.tokenizer.position();
            let token = self.tokenizer.read_token();
            if token.kind != TokenKind::Whitespace && token.kind != TokenKind::Newline {
                self.tokenizer.set_position(pos);
                break;
            }
        }
    }

    fn resolve_include(&self, name: String, attributes: Vec<Attribute>) -> Node {
        let code = match self.articles.get_article(&name) {
            Some(article) => {
                let source = self.articles.get_latest_source(&article).unwrap_or_default();
                Some(substitute_variables(&source, &attributes))
            }
            None => {
                log::debug!("include target {name:?} does not exist");
                None
            }
        };
        Node::new(NodeKind::Include {
            name,
            attributes,
            code,
        })
    }

    fn try_parse_comment(&mut self) -> Option<Node> {
        // [!-- was already consumed
        let content = self.read_until(&[TokenKind::CloseComment])?;
        self.tokenizer.read_token();
        Some(Node::new(NodeKind::Comment(content)))
    }

    fn try_parse_color(&mut self) -> Option<Node> {
        // ## was already consumed
        self.tokenizer.skip_whitespace();
        let token = self.tokenizer.read_token();
        if token.kind != TokenKind::String {
            return None;
        }
        let color = token.raw.trim().to_string();
        if self.tokenizer.read_token().kind != TokenKind::Pipe {
            return None;
        }
        let content = self.read_until(&[TokenKind::DoubleHash])?;
        self.tokenizer.read_token();
        Some(Node::new(NodeKind::Color { color, content }))
    }

    fn try_parse_literal(&mut self) -> Option<Node> {
        // @@ was already consumed
        let content = self.read_until(&[TokenKind::DoubleAt])?;
        self.tokenizer.read_token();
        Some(Node::literal(content))
    }

    fn try_parse_html_literal(&mut self) -> Option<Node> {
        // @< was already consumed
        let content = self.read_until(&[TokenKind::CloseHtmlLiteral])?;
        if content.contains(['<', '>']) {
            return None;
        }
        self.tokenizer.read_token();
        Some(Node::new(NodeKind::HtmlLiteral(content)))
    }

    fn try_parse_internal_link(&mut self) -> Option<Node> {
        // [[[ was already consumed
        self.tokenizer.skip_whitespace();
        let article = self.read_until(&[TokenKind::CloseTripleBracket, TokenKind::Pipe])?;
        let (url, exists) = if article.contains('/') {
            (article.clone(), true)
        } else {
            let id = self.articles.normalize_article_name(&article);
            let exists = self.articles.get_article(&id).is_some();
            (format!("/{id}"), exists)
        };

        let text = match self.tokenizer.read_token().kind {
            TokenKind::CloseTripleBracket => article,
            _ => {
                let text = self.read_until(&[TokenKind::CloseTripleBracket])?;
                self.tokenizer.read_token();
                text.trim().to_string()
            }
        };
        Some(Node::new(NodeKind::Link {
            url,
            text,
            blank: false,
            exists,
        }))
    }

    fn try_parse_external_link(&mut self) -> Option<Node> {
        // [ was already consumed
        self.tokenizer.skip_whitespace();
        let mut url = String::new();
        let mut text = String::new();
        let mut in_text = false;
        loop {
            let token = self.tokenizer.read_token();
            match token.kind {
                TokenKind::CloseSingleBracket => break,
                TokenKind::Null => return None,
                TokenKind::Newline if !in_text => return None,
                TokenKind::Whitespace if !in_text => in_text = true,
                _ if in_text => text.push_str(&token.raw),
                _ => url.push_str(&token.raw),
            }
        }
        // Wikidot does not make links out of targets without a slash
        if !url.contains('/') {
            return None;
        }
        let blank = url.starts_with('*');
        if blank {
            url.remove(0);
        }
        Some(Node::new(NodeKind::Link {
            url,
            text: text.trim().to_string(),
            blank,
            exists: true,
        }))
    }

    /// Parse children up to `close` into an inline element.
    fn try_parse_container(&mut self, close: TokenKind, name: &str) -> Option<Node> {
        let mut children = Vec::new();
        loop {
            let pos = self.tokenizer.position();
            let token = self.tokenizer.read_token();
            if token.kind == TokenKind::Null {
                return None;
            }
            if token.kind == close {
                return Some(Node::element(name, Vec::new(), children, false, false));
            }
            self.tokenizer.set_position(pos);
            push_child(&mut children, self.parse_node()?);
        }
    }

    fn try_parse_strong(&mut self) -> Option<Node> {
        self.try_parse_container(TokenKind::DoubleAsterisk, "strong")
    }

    fn try_parse_em(&mut self) -> Option<Node> {
        self.try_parse_container(TokenKind::DoubleSlash, "em")
    }

    fn try_parse_underline(&mut self) -> Option<Node> {
        self.try_parse_container(TokenKind::DoubleUnderline, "u")
    }

    fn try_parse_sup(&mut self) -> Option<Node> {
        self.try_parse_container(TokenKind::DoubleSup, "sup")
    }

    fn try_parse_monospace(&mut self) -> Option<Node> {
        self.try_parse_container(TokenKind::CloseInlineCode, "tt")
    }

    fn try_parse_strike(&mut self) -> Option<Node> {
        // -- was already consumed. Whitespace on the inner side of either
        // marker means this is a dash, not a strikethrough.
        let is_space = |ch: Option<char>| ch.is_some_and(|ch| WHITESPACE_CHARS.contains(&ch));
        if is_space(self.tokenizer.char_at(self.tokenizer.position())) {
            return None;
        }
        let mut children = Vec::new();
        loop {
            let pos = self.tokenizer.position();
            let token = self.tokenizer.read_token();
            match token.kind {
                TokenKind::Null => return None,
                TokenKind::DoubleDash => {
                    if is_space(self.tokenizer.char_before(pos)) {
                        return None;
                    }
                    return Some(Node::element("strike", Vec::new(), children, false, false));
                }
                _ => {
                    self.tokenizer.set_position(pos);
                    push_child(&mut children, self.parse_node()?);
                }
            }
        }
    }

    fn try_parse_horizontal_rule(&mut self) -> Option<Node> {
        // ---- was already consumed
        if !self.at_line_start(4) {
            return None;
        }
        let rest = self.read_until(&[TokenKind::Newline, TokenKind::Null])?;
        if !rest.trim_end().chars().all(|ch| ch == '-') {
            return None;
        }
        Some(Node::new(NodeKind::HorizontalRule))
    }

    fn try_parse_heading(&mut self) -> Option<Node> {
        // first + was already consumed
        if !self.at_line_start(1) {
            return None;
        }
        let mut level = 1;
        loop {
            match self.tokenizer.read_token().kind {
                TokenKind::Plus => level += 1,
                TokenKind::Whitespace => break,
                _ => return None,
            }
        }
        if level > 6 {
            return None;
        }
        let mut children = Vec::new();
        loop {
            let next = self.tokenizer.peek_token(0).kind;
            if next == TokenKind::Newline || next == TokenKind::Null {
                break;
            }
            push_child(&mut children, self.parse_node()?);
        }
        Some(Node::element(&format!("h{level}"), Vec::new(), children, true, false))
    }

    fn try_parse_blockquote(&mut self) -> Option<Node> {
        // > was already consumed
        if !self.at_line_start(1) {
            return None;
        }
        self.skip_quote_space();
        let mut content = String::new();
        loop {
            match self.tokenizer.peek_token(0).kind {
                TokenKind::Null => break,
                TokenKind::Newline => {
                    if self.tokenizer.peek_token(1).kind != TokenKind::Blockquote {
                        break;
                    }
                    // Skip the newline and the next marker
                    self.tokenizer.set_position(self.tokenizer.position() + 2);
                    self.skip_quote_space();
                    content.push('\n');
                }
                _ => {
                    content.push_str(&self.read_until(&[TokenKind::Newline, TokenKind::Null])?);
                }
            }
        }
        let children = self.parse_subtree(&content);
        Some(Node::with_children(NodeKind::Blockquote, children))
    }

    fn skip_quote_space(&mut self) {
        if self.tokenizer.char_at(self.tokenizer.position()) == Some(' ') {
            self.tokenizer.set_position(self.tokenizer.position() + 1);
        }
    }

    fn try_parse_table(&mut self) -> Option<Node> {
        // || was already consumed
        if !self.at_line_start(2) {
            return None;
        }
        let mut rows = Vec::new();
        let mut complete = false;
        while !complete {
            let mut row = Vec::new();
            let mut header = false;
            let mut content: Vec<Node> = Vec::new();
            let mut colspan = 1;
            loop {
                let pos = self.tokenizer.position();
                let token = self.tokenizer.read_token();
                match token.kind {
                    TokenKind::DoublePipe if content.is_empty() => colspan += 1,
                    TokenKind::DoublePipe => {
                        let attributes = if colspan > 1 {
                            vec![Attribute::new("colspan", Some(colspan.to_string()))]
                        } else {
                            Vec::new()
                        };
                        let name = if header { "th" } else { "td" };
                        let cell = std::mem::take(&mut content);
                        row.push(Node::element(name, attributes, cell, true, true));
                        header = false;
                        colspan = 1;
                    }
                    TokenKind::Newline => {
                        if self.tokenizer.peek_token(0).kind == TokenKind::DoublePipe {
                            self.tokenizer.set_position(self.tokenizer.position() + 2);
                        } else {
                            // Leave the newline for the enclosing parse
                            complete = true;
                            self.tokenizer.set_position(pos);
                        }
                        break;
                    }
                    TokenKind::Tilde if content.is_empty() => header = true,
                    _ => {
                        self.tokenizer.set_position(pos);
                        match self.parse_node() {
                            Some(node) => push_child(&mut content, node),
                            None => {
                                complete = true;
                                break;
                            }
                        }
                    }
                }
            }
            rows.push(Node::element("tr", Vec::new(), row, true, true));
        }
        Some(Node::element(
            "table",
            vec![Attribute::new("class", Some("wiki-content-table".to_string()))],
            rows,
            true,
            false,
        ))
    }
}

/// Replace `{$name}` placeholders with include attribute values.
///
/// The first definition of a name wins, unless it is itself a placeholder.
fn substitute_variables(source: &str, attributes: &[Attribute]) -> String {
    let mut values: HashMap<&str, &str> = HashMap::new();
    for attr in attributes {
        let Some(value) = attr.value.as_deref() else {
            continue;
        };
        let keep = values
            .get(attr.name.as_str())
            .is_some_and(|existing| !(existing.starts_with("{$") && existing.ends_with('}')));
        if !keep {
            values.insert(&attr.name, value);
        }
    }
    INCLUDE_VARIABLE
        .replace_all(source, |caps: &Captures| match values.get(&caps["name"]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::articles::{ArticleMap, NoArticles};

    fn parse(source: &str) -> Document {
        let config = Config::default();
        Parser::new(source, &NoArticles, &config).parse()
    }

    fn parse_raw(source: &str) -> Vec<Node> {
        let config = Config::default();
        let mut parser = Parser::new(source, &NoArticles, &config);
        let mut nodes = Vec::new();
        while let Some(node) = parser.parse_node() {
            push_child(&mut nodes, node);
        }
        nodes
    }

    fn element_name(node: &Node) -> &str {
        match &node.kind {
            NodeKind::Element { name, .. } => name,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_tag_is_text() {
        let nodes = parse_raw("[[blink]]x[[/blink]]");
        assert_eq!(nodes, vec![Node::text("[[blink]]x[[/blink]]")]);
    }

    #[test]
    fn test_unclosed_div_is_text() {
        let nodes = parse_raw("[[div]]content");
        assert_eq!(nodes, vec![Node::text("[[div]]content")]);
    }

    #[test]
    fn test_div_attributes() {
        let nodes = parse_raw("[[div class=\"box\" id=main hidden]]x[[/div]]");
        assert_eq!(nodes.len(), 1);
        let NodeKind::Element { attributes, .. } = &nodes[0].kind else {
            panic!("expected element");
        };
        assert_eq!(
            attributes,
            &vec![
                Attribute::new("class", Some("box".into())),
                Attribute::new("id", Some("main".into())),
                Attribute::new("hidden", None),
            ]
        );
        assert_eq!(nodes[0].children, vec![Node::text("x")]);
    }

    #[test]
    fn test_trim_suffix_matches_plain_close() {
        let nodes = parse_raw("[[div_]]\n\npara\n\n[[/div]]\n\nafter");
        assert!(nodes[0].trim_paragraphs());
        assert_eq!(element_name(&nodes[0]), "div");
        // Blank lines after the close tag are eaten
        assert_eq!(nodes[1], Node::text("after"));
    }

    #[test]
    fn test_tab_only_inside_tabview() {
        assert_eq!(parse_raw("[[tab A]]x[[/tab]]"), vec![Node::text("[[tab A]]x[[/tab]]")]);

        let nodes = parse_raw("[[tabview]][[tab First One]]x[[/tab]][[/tabview]]");
        assert!(matches!(nodes[0].kind, NodeKind::TabView { .. }));
        assert_eq!(
            nodes[0].children[0].kind,
            NodeKind::Tab {
                name: "First One".into()
            }
        );
    }

    #[test]
    fn test_module_body_is_raw() {
        let nodes = parse_raw("[[module CSS]]\n.a { color: red; } [[b]] **x**\n[[/module]]");
        assert_eq!(
            nodes[0].kind,
            NodeKind::Module {
                name: "css".into(),
                attributes: vec![],
                content: Some("\n.a { color: red; } [[b]] **x**\n".into()),
            }
        );
        let nodes = parse_raw("[[module Rate]]");
        assert!(matches!(&nodes[0].kind, NodeKind::Module { name, content: None, .. } if name == "rate"));
    }

    #[test]
    fn test_iframe_has_no_body() {
        let nodes = parse_raw("[[iframe https://example.com/x width=\"10\"]]after");
        assert_eq!(
            nodes[0].kind,
            NodeKind::Iframe {
                url: "https://example.com/x".into(),
                attributes: vec![Attribute::new("width", Some("10".into()))],
            }
        );
        assert_eq!(nodes[1], Node::text("after"));
    }

    #[test]
    fn test_literal_merges_with_neighbouring_text() {
        assert_eq!(parse_raw("x@@y@@"), vec![Node::text("xy")]);
        assert_eq!(parse_raw("@@b@@ c"), vec![Node::literal("b c")]);
    }

    #[test]
    fn test_unterminated_module_is_text() {
        let nodes = parse_raw("[[module css]] a");
        assert_eq!(nodes, vec![Node::text("[[module css]] a")]);
    }

    #[test]
    fn test_image_self_closes() {
        let nodes = parse_raw("[[f<image pic.png style=\"width: 10px\"]]");
        assert_eq!(
            nodes[0].kind,
            NodeKind::Image {
                kind: ImageKind::FloatLeft,
                source: "pic.png".into(),
                attributes: vec![Attribute::new("style", Some("width: 10px".into()))],
            }
        );
    }

    #[test]
    fn test_heading_levels() {
        let nodes = parse_raw("+++ Title\n");
        assert_eq!(element_name(&nodes[0]), "h3");
        assert_eq!(nodes[0].children, vec![Node::text("Title")]);
        assert_eq!(parse_raw("+++++++ x"), vec![Node::text("+++++++ x")]);
        assert_eq!(parse_raw("a + b"), vec![Node::text("a + b")]);
    }

    #[test]
    fn test_heading_needs_line_start() {
        let nodes = parse_raw("x\n+ Title");
        assert_eq!(nodes[0], Node::text("x"));
        assert!(nodes[1].is_newline());
        assert_eq!(element_name(&nodes[2]), "h1");
    }

    #[test]
    fn test_strike_rejects_inner_spaces() {
        assert_eq!(parse_raw("word -- dash"), vec![Node::text("word -- dash")]);
        let nodes = parse_raw("word--strike--word");
        assert_eq!(nodes[0], Node::text("word"));
        assert_eq!(element_name(&nodes[1]), "strike");
        assert_eq!(nodes[2], Node::text("word"));
        assert_eq!(parse_raw("a --b --c"), vec![Node::text("a --b --c")]);
    }

    #[test]
    fn test_external_link() {
        let nodes = parse_raw("[*http://example.com/ Example site]");
        assert_eq!(
            nodes[0].kind,
            NodeKind::Link {
                url: "http://example.com/".into(),
                text: "Example site".into(),
                blank: true,
                exists: true,
            }
        );
        assert_eq!(parse_raw("[noslash text]"), vec![Node::text("[noslash text]")]);
    }

    #[test]
    fn test_internal_link_lookup() {
        let config = Config::default();
        let articles = ArticleMap::new().with("existing-article", "");
        let mut parser = Parser::new(
            "[[[Existing Article|Text]]][[[missing]]][[[/abs/path]]]",
            &articles,
            &config,
        );
        let link = parser.parse_node().unwrap();
        assert_eq!(
            link.kind,
            NodeKind::Link {
                url: "/existing-article".into(),
                text: "Text".into(),
                blank: false,
                exists: true
            }
        );
        let link = parser.parse_node().unwrap();
        assert!(matches!(link.kind, NodeKind::Link { exists: false, ref text, .. } if text == "missing"));
        let link = parser.parse_node().unwrap();
        assert!(matches!(link.kind, NodeKind::Link { exists: true, ref url, .. } if url == "/abs/path"));
    }

    #[test]
    fn test_literal_and_html_literal() {
        assert_eq!(parse_raw("@@**x**@@"), vec![Node::literal("**x**")]);
        assert_eq!(
            parse_raw("@<&nbsp;>@"),
            vec![Node::new(NodeKind::HtmlLiteral("&nbsp;".into()))]
        );
        assert_eq!(parse_raw("@<<b>>@"), vec![Node::text("@<<b>>@")]);
    }

    #[test]
    fn test_color() {
        let nodes = parse_raw("##red|warm words##");
        assert_eq!(
            nodes[0].kind,
            NodeKind::Color {
                color: "red".into(),
                content: "warm words".into()
            }
        );
    }

    #[test]
    fn test_table_colspan_and_header() {
        let nodes = parse_raw("||~ H||a||||b||\n||c||\nafter");
        let table = &nodes[0];
        assert_eq!(element_name(table), "table");
        assert_eq!(table.children.len(), 2);
        let first_row = &table.children[0];
        assert_eq!(first_row.children.len(), 3);
        assert_eq!(element_name(&first_row.children[0]), "th");
        assert_eq!(first_row.children[0].children, vec![Node::text(" H")]);
        let NodeKind::Element { attributes, .. } = &first_row.children[1].kind else {
            panic!("expected cell");
        };
        assert!(attributes.is_empty());
        assert_eq!(table.children[1].children.len(), 1);
        assert!(nodes[1].is_newline());
        assert_eq!(nodes[2], Node::text("after"));
    }

    #[test]
    fn test_table_empty_cells_widen_next() {
        let nodes = parse_raw("||a||||b||");
        let row = &nodes[0].children[0];
        assert_eq!(row.children.len(), 2);
        let NodeKind::Element { attributes, .. } = &row.children[1].kind else {
            panic!("expected cell");
        };
        assert_eq!(attributes, &vec![Attribute::new("colspan", Some("2".into()))]);
    }

    #[test]
    fn test_table_needs_line_start() {
        assert_eq!(parse_raw("x ||a||"), vec![Node::text("x ||a||")]);
    }

    #[test]
    fn test_blockquote_nests() {
        let nodes = parse_raw("> outer\n> > inner\nafter");
        assert!(matches!(nodes[0].kind, NodeKind::Blockquote));
        let inner = nodes[0]
            .children
            .iter()
            .find(|child| matches!(child.kind, NodeKind::Blockquote))
            .expect("nested blockquote");
        assert_eq!(inner.children.len(), 1);
        assert!(matches!(inner.children[0].kind, NodeKind::Paragraph { .. }));
    }

    #[test]
    fn test_include_injects_source() {
        let config = Config::default();
        let articles = ArticleMap::new().with("component:box", "**{$word}**");
        let doc = Parser::new("[[include component:box word=bold]]", &articles, &config).parse();
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"strong\""));
        assert!(json.contains("\"bold\""));
    }

    #[test]
    fn test_self_include_is_bounded() {
        let config = Config {
            max_includes: 3,
            ..Config::default()
        };
        let articles = ArticleMap::new().with("loop", "x [[include loop]]");
        let doc = Parser::new("[[include loop]]", &articles, &config).parse();
        let json = doc.to_json().unwrap();
        assert_eq!(json.matches("\"Include\"").count(), 4);
        assert_eq!(json.matches("\"text\": \"x \"").count(), 3);
    }

    #[test]
    fn test_depth_limit_falls_back_to_text() {
        let config = Config {
            max_depth: 2,
            ..Config::default()
        };
        let mut parser = Parser::new("**a //b __c__ b// a**", &NoArticles, &config);
        let strong = parser.parse_node().unwrap();
        assert_eq!(element_name(&strong), "strong");
        let em = &strong.children[1];
        assert_eq!(element_name(em), "em");
        assert_eq!(em.children, vec![Node::text("b __c__ b")]);
    }

    #[test]
    fn test_substitute_variables() {
        let attrs = vec![
            Attribute::new("a", Some("{$a}".into())),
            Attribute::new("a", Some("one".into())),
            Attribute::new("a", Some("two".into())),
            Attribute::new("b", None),
        ];
        assert_eq!(substitute_variables("{$a} {$b} {$c}", &attrs), "one {$b} {$c}");
    }

    #[test]
    fn test_total_on_bracket_soup() {
        for source in ["[[", "[[[", "]]", "[[div", "[[/div]]", "@@", "||", "+", ">", "--", "[!--"] {
            let doc = parse(source);
            assert!(matches!(doc.root.kind, NodeKind::Root));
        }
    }
}
