/// Article lookups consumed by the parser and by render contexts
///
/// The surrounding application owns article storage. The parser only needs to
/// know whether an article exists, what its canonical name is, and what its
/// latest source text is.
use std::collections::HashMap;

use unicode_casefold::UnicodeCaseFold;

pub trait ArticleSource {
    type Article;

    fn get_article(&self, name: &str) -> Option<Self::Article>;

    /// Canonical name used to build asset URLs.
    fn get_full_name(&self, article: &Self::Article) -> String;

    fn get_latest_source(&self, article: &Self::Article) -> Option<String>;

    fn normalize_article_name(&self, name: &str) -> String {
        normalize_article_name(name)
    }
}

/// Case-fold and slugify an article name.
///
/// Letters and digits are kept, `:` separates categories, anything else
/// becomes a single `-`. Dashes never lead or trail a name or a category.
pub fn normalize_article_name(name: &str) -> String {
    let folded: String = name.trim().chars().case_fold().collect();
    let mut slug = String::with_capacity(folded.len());
    let mut pending_dash = false;
    for ch in folded.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_dash && !slug.is_empty() && !slug.ends_with(':') {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else if ch == ':' {
            pending_dash = false;
            slug.push(':');
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// No articles at all. Every link is missing and every include fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArticles;

impl ArticleSource for NoArticles {
    type Article = ();

    fn get_article(&self, _name: &str) -> Option<()> {
        None
    }

    fn get_full_name(&self, _article: &()) -> String {
        String::new()
    }

    fn get_latest_source(&self, _article: &()) -> Option<String> {
        None
    }
}

/// In-memory articles keyed by normalized name.
#[derive(Debug, Default, Clone)]
pub struct ArticleMap {
    sources: HashMap<String, String>,
}

impl ArticleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, source: impl Into<String>) {
        self.sources
            .insert(normalize_article_name(name), source.into());
    }

    pub fn with(mut self, name: &str, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }
}

impl ArticleSource for ArticleMap {
    type Article = String;

    fn get_article(&self, name: &str) -> Option<String> {
        let name = normalize_article_name(name);
        self.sources.contains_key(&name).then_some(name)
    }

    fn get_full_name(&self, article: &String) -> String {
        article.clone()
    }

    fn get_latest_source(&self, article: &String) -> Option<String> {
        self.sources.get(article).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_article_name("ExistingArticle"), "existingarticle");
        assert_eq!(normalize_article_name("  Some Page Name "), "some-page-name");
        assert_eq!(normalize_article_name("SCP-173"), "scp-173");
        assert_eq!(normalize_article_name("Component: Image Block"), "component:image-block");
        assert_eq!(normalize_article_name("--weird!!name--"), "weird-name");
        assert_eq!(normalize_article_name("Статья"), "статья");
    }

    #[test]
    fn test_article_map_lookup() {
        let articles = ArticleMap::new().with("Main Page", "hello");
        let article = articles.get_article("main page").unwrap();
        assert_eq!(articles.get_full_name(&article), "main-page");
        assert_eq!(articles.get_latest_source(&article).as_deref(), Some("hello"));
        assert!(articles.get_article("other").is_none());
    }
}
