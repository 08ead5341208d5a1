use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::middleware::Middleware;

/// Functional middleware: no request/response hooks, just HTML parsing
/// helpers recovered by handlers through `ScraperContext::attribute`.
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Parser
    }

    pub fn parse(&self, html: &str) -> Html {
        Html::parse_document(html)
    }

    /// Text content of every element matching `selector`, in document order.
    pub fn select_text(&self, html: &Html, selector: &str) -> Result<Vec<String>, String> {
        let selector = Selector::parse(selector).map_err(|e| e.to_string())?;
        Ok(html
            .select(&selector)
            .map(|el| el.text().collect::<String>())
            .collect())
    }

    /// Value of `attr` on every element matching `selector`.
    pub fn select_attr(
        &self,
        html: &Html,
        selector: &str,
        attr: &str,
    ) -> Result<Vec<String>, String> {
        let selector = Selector::parse(selector).map_err(|e| e.to_string())?;
        Ok(html
            .select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::to_string)
            .collect())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for Parser {
    fn name(&self) -> &'static str {
        "parser"
    }

    fn default_config(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_for_matching_elements() {
        let parser = Parser::new();
        let html = parser.parse("<ul><li>a</li><li>b</li></ul>");
        let items = parser.select_text(&html, "li").unwrap();
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn extracts_attribute_values() {
        let parser = Parser::new();
        let html = parser.parse(r#"<a href="/one">one</a><a href="/two">two</a>"#);
        let hrefs = parser.select_attr(&html, "a", "href").unwrap();
        assert_eq!(hrefs, vec!["/one".to_string(), "/two".to_string()]);
    }

    #[test]
    fn invalid_selector_is_an_error() {
        let parser = Parser::new();
        let html = parser.parse("<p>x</p>");
        assert!(parser.select_text(&html, ":::").is_err());
    }
}
