/// A Wikidot-style markup parser and HTML renderer
pub mod articles;
pub mod ast;
pub mod config;
pub mod paragraphs;
pub mod parser;
pub mod renderer;
pub mod tokenizer;

use articles::{ArticleSource, NoArticles};
use config::Config;
use parser::{Document, Parser};
use renderer::{HtmlRenderer, RenderContext};

/// Parse markup into a paragraph-folded document
pub fn parse<A: ArticleSource>(source: &str, articles: &A) -> Document {
    parse_with_config(source, articles, &Config::default())
}

pub fn parse_with_config<A: ArticleSource>(source: &str, articles: &A, config: &Config) -> Document {
    Parser::new(source, articles, config).parse()
}

/// Render a parsed document to HTML
pub fn render(document: &Document, context: &RenderContext) -> String {
    HtmlRenderer::new().render(document, context)
}

pub fn render_with_config(document: &Document, context: &RenderContext, config: &Config) -> String {
    HtmlRenderer::with_config(config.clone()).render(document, context)
}

/// Parse and render standalone markup, with no articles to link or include
pub fn markup_to_html(source: &str) -> String {
    let document = parse(source, &NoArticles);
    render(&document, &RenderContext::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use articles::ArticleMap;

    #[test]
    fn test_empty_input() {
        assert_eq!(markup_to_html(""), "");
    }

    #[test]
    fn test_plain_prose() {
        assert_eq!(markup_to_html("a b c"), "<p>a b c</p>");
    }

    #[test]
    fn test_crlf_is_normalized() {
        assert_eq!(markup_to_html("a\r\n\r\nb"), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_existing_link() {
        let articles = ArticleMap::new().with("ExistingArticle", "");
        let document = parse("[[[ExistingArticle|Text]]]", &articles);
        assert_eq!(
            render(&document, &RenderContext::default()),
            "<p><a href=\"/existingarticle\">Text</a></p>"
        );
    }

    #[test]
    fn test_image_under_source_article() {
        let articles = ArticleMap::new().with("Some Page", "");
        let page = articles.get_article("some page");
        let context = RenderContext::new(&articles, page.as_ref(), page.as_ref());
        let document = parse("[[image pic.png]]", &articles);
        assert_eq!(
            render(&document, &context),
            "<img src=\"/local--files/some-page/pic.png\" alt=\"pic.png\" style=\"\" class=\"\">"
        );
    }

    #[test]
    fn test_render_with_config() {
        let config = Config {
            missing_link_class: "absent".to_string(),
            ..Config::default()
        };
        let document = parse_with_config("[[[nowhere]]]", &NoArticles, &config);
        assert_eq!(
            render_with_config(&document, &RenderContext::default(), &config),
            "<p><a href=\"/nowhere\" class=\"absent\">nowhere</a></p>"
        );
    }
}
