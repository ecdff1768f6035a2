/// HTML renderer for parsed wiki documents
use std::sync::LazyLock;

use regex::{NoExpand, Regex};

use crate::articles::ArticleSource;
use crate::ast::{Attribute, ImageKind, Node, NodeKind, get_attribute};
use crate::config::Config;
use crate::parser::Document;

/// Browsers end a style element at `</style` in any letter case.
static STYLE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</style").expect("style close pattern is valid"));

/// Which article is being rendered, and whose source it is. Only used to
/// resolve relative image paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    /// Not read by the renderer. Hosts carry the page being viewed here.
    pub article: Option<String>,
    pub source_article: Option<String>,
}

impl RenderContext {
    pub fn new<A: ArticleSource>(
        articles: &A,
        article: Option<&A::Article>,
        source_article: Option<&A::Article>,
    ) -> Self {
        RenderContext {
            article: article.map(|article| articles.get_full_name(article)),
            source_article: source_article.map(|article| articles.get_full_name(article)),
        }
    }
}

pub struct HtmlRenderer {
    config: Config,
}

impl HtmlRenderer {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        HtmlRenderer { config }
    }

    pub fn render(&self, document: &Document, context: &RenderContext) -> String {
        self.render_node(&document.root, context)
    }

    fn render_children(&self, node: &Node, context: &RenderContext) -> String {
        node.children
            .iter()
            .map(|child| self.render_node(child, context))
            .collect()
    }

    fn render_node(&self, node: &Node, context: &RenderContext) -> String {
        match &node.kind {
            NodeKind::Root => self.render_children(node, context),
            NodeKind::Text {
                text,
                literal,
                force_render,
            } => render_text(text, *literal && *force_render),
            NodeKind::HtmlLiteral(text) => text.trim().to_string(),
            NodeKind::Newline { .. } => "<br>".to_string(),
            NodeKind::Paragraph { collapsed } => {
                let content = self.render_children(node, context);
                let bare = *collapsed
                    || node.children.first().is_some_and(Node::is_complex)
                    || (node.children.len() == 1 && node.children[0].force_render());
                if bare {
                    content
                } else {
                    format!("<p>{}</p>", content)
                }
            }
            NodeKind::NewlineEscape | NodeKind::Comment(_) => String::new(),
            NodeKind::Color { color, content } => {
                format!(
                    "<span style=\"color: {}\">{}</span>",
                    escape_html(&css_color(color)),
                    escape_html(content)
                )
            }
            NodeKind::HorizontalRule => "<hr>".to_string(),
            NodeKind::Element {
                name, attributes, ..
            } => {
                let name = escape_html(name);
                format!(
                    "<{}{}>{}</{}>",
                    name,
                    self.render_attributes(&name, attributes),
                    self.render_children(node, context),
                    name
                )
            }
            NodeKind::Image {
                kind,
                source,
                attributes,
            } => render_image(*kind, source, attributes, context),
            NodeKind::Link {
                url,
                text,
                blank,
                exists,
            } => {
                let target = if *blank { " target=\"_blank\"" } else { "" };
                let class = if *exists {
                    String::new()
                } else {
                    format!(" class=\"{}\"", escape_html(&self.config.missing_link_class))
                };
                format!(
                    "<a href=\"{}\"{}{}>{}</a>",
                    escape_html(url),
                    target,
                    class,
                    escape_html(text)
                )
            }
            NodeKind::Include { name, code, .. } => match code {
                // The included source was parsed in place of this node
                Some(_) => String::new(),
                None => {
                    let name = escape_html(name);
                    format!(
                        "<div class=\"error-block\"><p>{} (<a href=\"/{}/edit/true\" target=\"_blank\">{}</a>)</p></div>",
                        self.config.missing_include_text.replace("{name}", &name),
                        name,
                        self.config.missing_include_create_text
                    )
                }
            },
            NodeKind::Iframe { .. } => "<div>Iframe is not supported yet</div>".to_string(),
            NodeKind::Module { name, content, .. } => {
                if name == "css" {
                    let code = content.as_deref().unwrap_or_default().replace('\u{a0}', " ");
                    let code = STYLE_CLOSE.replace_all(&code, NoExpand(r"\u003c/style"));
                    format!("<style>{}</style>", code)
                } else {
                    format!("<div>Module '{}' is not supported yet</div>", escape_html(name))
                }
            }
            NodeKind::Collapsible { attributes } => self.render_collapsible(node, attributes, context),
            NodeKind::TabView { .. } => self.render_tab_view(node, context),
            NodeKind::Tab { .. } => self.render_tab(node, false, context),
            NodeKind::TextAlign(alignment) => format!(
                "<div style=\"text-align: {}\">{}</div>",
                alignment.as_css(),
                self.render_children(node, context)
            ),
            NodeKind::FontSize(size) => format!(
                "<span style=\"font-size: {}\">{}</span>",
                escape_html(size),
                self.render_children(node, context)
            ),
            NodeKind::Blockquote => {
                format!("<blockquote>{}</blockquote>", self.render_children(node, context))
            }
            NodeKind::UnsafeHtml(code) => format!(
                "<iframe srcdoc=\"{}\" sandbox=\"allow-same-origin allow-scripts\" style=\"width: 100%; height: 0\" class=\"w-iframe-autoresize\" frameborder=\"0\" allowtransparency=\"true\"></iframe>",
                escape_html(code)
            ),
        }
    }

    fn render_attributes(&self, name: &str, attributes: &[Attribute]) -> String {
        let mut out = String::new();
        for attr in attributes {
            let attr_name = attr.name.to_lowercase();
            let allowed = matches!(attr_name.as_str(), "class" | "id" | "style")
                || (name == "a" && matches!(attr_name.as_str(), "href" | "target"))
                || ((name == "th" || name == "td")
                    && matches!(attr_name.as_str(), "colspan" | "rowspan"))
                || attr_name.starts_with("data-");
            if !allowed {
                continue;
            }
            out.push(' ');
            out.push_str(&escape_html(&attr_name));
            if let Some(value) = &attr.value {
                let value = if attr_name == "id" && !value.starts_with(&self.config.id_prefix) {
                    format!("{}{}", self.config.id_prefix, value)
                } else {
                    value.clone()
                };
                out.push_str(&format!("=\"{}\"", escape_html(&value)));
            }
        }
        out
    }

    fn render_collapsible(
        &self,
        node: &Node,
        attributes: &[Attribute],
        context: &RenderContext,
    ) -> String {
        let show = get_attribute(attributes, "show").unwrap_or(&self.config.collapsible_show);
        let hide = get_attribute(attributes, "hide").unwrap_or(&self.config.collapsible_hide);
        let mut code = String::from("<div class=\"w-collapsible collapsible-block\">");
        code += "  <div class=\"collapsible-block-folded\" style=\"display: block\">";
        code += "    <a class=\"collapsible-block-link\" href=\"javascript:;\">";
        code += &escape_html(show);
        code += "    </a>";
        code += "  </div>";
        code += "  <div class=\"collapsible-block-unfolded\" style=\"display: none\">";
        code += "    <div class=\"collapsible-block-unfolded-link\">";
        code += "      <a class=\"collapsible-block-link\" href=\"javascript:;\">";
        code += &escape_html(hide);
        code += "      </a>";
        code += "    </div>";
        code += "    <div class=\"collapsible-block-content\">";
        code += &self.render_children(node, context);
        code += "    </div>";
        code += "  </div>";
        code += "</div>";
        code
    }

    fn render_tab_view(&self, node: &Node, context: &RenderContext) -> String {
        let first_tab = node
            .children
            .iter()
            .position(|child| matches!(child.kind, NodeKind::Tab { .. }));

        let mut code = String::from("<div class=\"yui-navset yui-navset-top w-tabview\">");
        code += "  <ul class=\"yui-nav\">";
        for (index, child) in node.children.iter().enumerate() {
            let NodeKind::Tab { name } = &child.kind else {
                continue;
            };
            // No whitespace between tab headers
            code += if Some(index) == first_tab {
                "<li class=\"selected\" title=\"active\">"
            } else {
                "<li>"
            };
            code += &format!("<a href=\"javascript:;\"><em>{}</em></a></li>", escape_html(name));
        }
        code += "  </ul>";
        code += "  <div class=\"yui-content\">";
        for (index, child) in node.children.iter().enumerate() {
            code += &match child.kind {
                NodeKind::Tab { .. } => self.render_tab(child, Some(index) == first_tab, context),
                _ => self.render_node(child, context),
            };
        }
        code += "  </div>";
        code += "</div>";
        code
    }

    fn render_tab(&self, node: &Node, visible: bool, context: &RenderContext) -> String {
        let display = if visible { "block" } else { "none" };
        format!(
            "<div class=\"w-tabview-tab\" style=\"display: {}\">{}</div>",
            display,
            self.render_children(node, context)
        )
    }
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn render_text(text: &str, pre_wrap: bool) -> String {
    let text = escape_html(text)
        .replace("--", "&mdash;")
        .replace("&lt;&lt;", "&laquo;")
        .replace("&gt;&gt;", "&raquo;");
    if pre_wrap {
        return format!("<span style=\"white-space: pre-wrap\">{}</span>", text);
    }
    text
}

/// Hex colors get their `#`, named colors pass through.
fn css_color(color: &str) -> String {
    let is_hex = matches!(color.len(), 3 | 6) && color.chars().all(|ch| ch.is_ascii_hexdigit());
    if is_hex {
        format!("#{}", color)
    } else {
        color.to_string()
    }
}

fn image_url(source: &str, context: &RenderContext) -> String {
    let lower = source.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return source.to_string();
    }
    match &context.source_article {
        Some(article) => format!("/local--files/{}/{}", article, source),
        None => source.to_string(),
    }
}

fn render_image(
    kind: ImageKind,
    source: &str,
    attributes: &[Attribute],
    context: &RenderContext,
) -> String {
    let url = escape_html(&image_url(source, context));
    let alt = escape_html(source);
    let style = escape_html(get_attribute(attributes, "style").unwrap_or_default());
    let class = escape_html(get_attribute(attributes, "class").unwrap_or_default());
    let img = |float: &str| {
        format!(
            "<img src=\"{}\" alt=\"{}\" style=\"{}{}\" class=\"{}\">",
            url, alt, float, style, class
        )
    };
    let flex = |justify: &str| {
        format!(
            "<div style=\"display: flex; justify-content: {}\">{}</div>",
            justify,
            img("")
        )
    };
    match kind {
        ImageKind::Plain => img(""),
        ImageKind::Center => flex("center"),
        ImageKind::FlexLeft => flex("flex-start"),
        ImageKind::FlexRight => flex("flex-end"),
        ImageKind::FloatLeft => img("float: left; "),
        ImageKind::FloatRight => img("float: right; "),
    }
}

/// Escape `&`, `<`, `>`, `"` and `'`.
pub fn escape_html(text: &str) -> String {
    html_escape::encode_quoted_attribute(text).into_owned()
}
