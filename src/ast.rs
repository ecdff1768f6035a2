/// Document tree for wiki markup
use serde::{Deserialize, Serialize};

use crate::tokenizer::WHITESPACE_CHARS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Attribute {
            name: name.into(),
            value,
        }
    }
}

/// Case-insensitive attribute lookup. Valueless attributes yield `None`.
pub fn get_attribute<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|attr| attr.name.eq_ignore_ascii_case(name))
        .and_then(|attr| attr.value.as_deref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    /// `[[image]]`
    Plain,
    /// `[[=image]]`
    Center,
    /// `[[<image]]`
    FlexLeft,
    /// `[[>image]]`
    FlexRight,
    /// `[[f<image]]`
    FloatLeft,
    /// `[[f>image]]`
    FloatRight,
}

impl ImageKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "image" => Some(ImageKind::Plain),
            "=image" => Some(ImageKind::Center),
            "<image" => Some(ImageKind::FlexLeft),
            ">image" => Some(ImageKind::FlexRight),
            "f<image" => Some(ImageKind::FloatLeft),
            "f>image" => Some(ImageKind::FloatRight),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    Left,
    Right,
    Center,
    Justify,
}

impl Alignment {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "<" => Some(Alignment::Left),
            ">" => Some(Alignment::Right),
            "=" => Some(Alignment::Center),
            "==" => Some(Alignment::Justify),
            _ => None,
        }
    }

    pub fn as_css(self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Right => "right",
            Alignment::Center => "center",
            Alignment::Justify => "justify",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    Text {
        text: String,
        // @@literal@@ content
        literal: bool,
        force_render: bool,
    },
    HtmlLiteral(String),
    Newline {
        forced: bool,
    },
    Paragraph {
        collapsed: bool,
    },
    NewlineEscape,
    Color {
        color: String,
        content: String,
    },
    HorizontalRule,
    Element {
        name: String,
        attributes: Vec<Attribute>,
        complex: bool,
        trim_paragraphs: bool,
    },
    Image {
        kind: ImageKind,
        source: String,
        attributes: Vec<Attribute>,
    },
    Link {
        url: String,
        text: String,
        blank: bool,
        exists: bool,
    },
    Comment(String),
    Include {
        name: String,
        attributes: Vec<Attribute>,
        // None when the target article does not exist
        code: Option<String>,
    },
    Iframe {
        url: String,
        attributes: Vec<Attribute>,
    },
    Module {
        name: String,
        attributes: Vec<Attribute>,
        content: Option<String>,
    },
    Collapsible {
        attributes: Vec<Attribute>,
    },
    TabView {
        attributes: Vec<Attribute>,
    },
    Tab {
        name: String,
    },
    TextAlign(Alignment),
    FontSize(String),
    Blockquote,
    UnsafeHtml(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<Node>,
    #[serde(skip)]
    pub(crate) paragraphs_set: bool,
}

/// Elements that close the current paragraph.
const BLOCK_ELEMENTS: &[&str] = &[
    "div", "h1", "h2", "h3", "h4", "h5", "h6", "table", "tr", "th", "td",
];

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            children: Vec::new(),
            paragraphs_set: false,
        }
    }

    pub fn with_children(kind: NodeKind, children: Vec<Node>) -> Self {
        let mut node = Node::new(kind);
        for child in children {
            node.append_child(child);
        }
        node
    }

    pub fn text(text: impl Into<String>) -> Self {
        Node::new(NodeKind::Text {
            text: text.into(),
            literal: false,
            force_render: false,
        })
    }

    /// Literal text is force-rendered unless it is empty or a lone newline.
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        let force_render = !text.is_empty() && text.trim_matches(' ') != "\n";
        Node::new(NodeKind::Text {
            text,
            literal: true,
            force_render,
        })
    }

    pub fn newline(forced: bool) -> Self {
        Node::new(NodeKind::Newline { forced })
    }

    /// A bracket-tag or formatting element. `row`, `hcell` and `cell` are
    /// stored under their HTML names.
    pub fn element(
        name: &str,
        attributes: Vec<Attribute>,
        children: Vec<Node>,
        complex: bool,
        trim_paragraphs: bool,
    ) -> Self {
        let name = match name {
            "row" => "tr",
            "hcell" => "th",
            "cell" => "td",
            other => other,
        };
        Node::with_children(
            NodeKind::Element {
                name: name.to_string(),
                attributes,
                complex,
                trim_paragraphs,
            },
            children,
        )
    }

    /// Same variant and payload, no children.
    pub fn clone_empty(&self) -> Self {
        Node {
            kind: self.kind.clone(),
            children: Vec::new(),
            paragraphs_set: self.paragraphs_set,
        }
    }

    /// Append a child, merging it into a trailing text node.
    pub fn append_child(&mut self, child: Node) {
        push_child(&mut self.children, child);
    }

    pub fn is_block(&self) -> bool {
        match &self.kind {
            NodeKind::Root
            | NodeKind::Newline { .. }
            | NodeKind::Paragraph { .. }
            | NodeKind::HorizontalRule
            | NodeKind::Iframe { .. }
            | NodeKind::Module { .. }
            | NodeKind::Collapsible { .. }
            | NodeKind::TabView { .. }
            | NodeKind::Tab { .. }
            | NodeKind::TextAlign(_)
            | NodeKind::Blockquote
            | NodeKind::UnsafeHtml(_) => true,
            NodeKind::Element { name, .. } => BLOCK_ELEMENTS.contains(&name.as_str()),
            _ => false,
        }
    }

    pub fn is_complex(&self) -> bool {
        match &self.kind {
            NodeKind::HorizontalRule
            | NodeKind::Image { .. }
            | NodeKind::Include { .. }
            | NodeKind::Iframe { .. }
            | NodeKind::Module { .. }
            | NodeKind::Collapsible { .. }
            | NodeKind::TabView { .. }
            | NodeKind::Tab { .. }
            | NodeKind::TextAlign(_)
            | NodeKind::Blockquote => true,
            NodeKind::Element { complex, .. } => *complex,
            _ => false,
        }
    }

    pub fn force_render(&self) -> bool {
        match &self.kind {
            NodeKind::Text { force_render, .. } => *force_render,
            NodeKind::HtmlLiteral(_) => true,
            NodeKind::Newline { forced } => *forced,
            _ => false,
        }
    }

    pub fn trim_paragraphs(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Element {
                trim_paragraphs: true,
                ..
            }
        )
    }

    pub fn is_newline(&self) -> bool {
        matches!(self.kind, NodeKind::Newline { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, NodeKind::Text { literal: true, .. })
    }

    pub fn is_span(&self) -> bool {
        matches!(&self.kind, NodeKind::Element { name, .. } if name == "span")
    }

    /// Newlines, comments and blank text, unless force-rendered.
    pub fn is_whitespace(&self) -> bool {
        if self.force_render() {
            return false;
        }
        match &self.kind {
            NodeKind::Newline { .. } | NodeKind::Comment(_) => true,
            NodeKind::Text { text, .. } => text.trim_matches(WHITESPACE_CHARS).is_empty(),
            _ => false,
        }
    }
}

/// Push onto a child list, merging adjacent text nodes. The merged node
/// keeps the flags of the first one.
pub fn push_child(children: &mut Vec<Node>, child: Node) {
    if let NodeKind::Text { text, .. } = &child.kind
        && let Some(Node {
            kind: NodeKind::Text { text: last_text, .. },
            ..
        }) = children.last_mut()
    {
        last_text.push_str(text);
        return;
    }
    children.push(child);
}

/// Drop leading and trailing whitespace nodes.
pub fn strip(mut children: Vec<Node>) -> Vec<Node> {
    let Some(first) = children.iter().position(|child| !child.is_whitespace()) else {
        return Vec::new();
    };
    let last = children
        .iter()
        .rposition(|child| !child.is_whitespace())
        .unwrap_or(first);
    children.truncate(last + 1);
    children.drain(..first);
    children
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_nodes_merge() {
        let mut root = Node::new(NodeKind::Root);
        root.append_child(Node::text("a"));
        root.append_child(Node::text("b"));
        root.append_child(Node::literal("c"));
        assert_eq!(root.children, vec![Node::text("abc")]);

        let mut root = Node::new(NodeKind::Root);
        root.append_child(Node::literal("b"));
        root.append_child(Node::text(" c"));
        assert_eq!(root.children, vec![Node::literal("b c")]);
        assert!(root.children[0].force_render());
    }

    #[test]
    fn test_merged_text_keeps_first_flags() {
        let mut root = Node::new(NodeKind::Root);
        root.append_child(Node::literal(""));
        root.append_child(Node::text("x"));
        assert!(root.children[0].is_literal());
        assert!(!root.children[0].force_render());
    }

    #[test]
    fn test_element_name_remap() {
        let cell = Node::element("hcell", vec![], vec![], true, false);
        assert!(matches!(&cell.kind, NodeKind::Element { name, .. } if name == "th"));
        assert!(cell.is_block());
        let span = Node::element("span", vec![], vec![], false, false);
        assert!(!span.is_block());
        assert!(span.is_span());
    }

    #[test]
    fn test_literal_force_render() {
        assert!(Node::literal("x").force_render());
        assert!(!Node::literal(" \n ").force_render());
        assert!(!Node::literal("").force_render());
        assert!(!Node::text("x").force_render());
    }

    #[test]
    fn test_strip() {
        let nodes = vec![
            Node::newline(false),
            Node::text("  "),
            Node::text("a"),
            Node::new(NodeKind::Comment("c".into())),
            Node::newline(false),
        ];
        assert_eq!(strip(nodes), vec![Node::text("a")]);
        assert!(strip(vec![Node::newline(false), Node::text(" ")]).is_empty());
        assert_eq!(strip(vec![Node::newline(true)]).len(), 1);
    }

    #[test]
    fn test_get_attribute_ignores_case() {
        let attrs = vec![
            Attribute::new("Style", Some("x".into())),
            Attribute::new("flag", None),
        ];
        assert_eq!(get_attribute(&attrs, "style"), Some("x"));
        assert_eq!(get_attribute(&attrs, "flag"), None);
        assert_eq!(get_attribute(&attrs, "class"), None);
    }
}
