use serde::{Deserialize, Serialize};

use crate::{
    geometry::{Point, Rect},
    token_range::TokenRange,
};

/// Tokens that on their own carry almost no meaning for geocoding.
const COMMON_TOKENS: &[&str] = &[
    "a", "da", "de", "del", "der", "des", "di", "du", "el", "la", "le", "of",
    "the",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Search every shard, ordered by proximity to the pivot.
    #[default]
    Everywhere,
    /// Search only inside the pivot viewport.
    Viewport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryToken {
    pub text: String,
    /// Category keys hinted for this token ("cafe" -> "amenity-cafe").
    #[serde(default)]
    pub categories: Vec<String>,
}

impl QueryToken {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            categories: Vec::new(),
        }
    }

    pub fn with_categories(
        text: impl Into<String>,
        categories: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            text: text.into(),
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }
}

/// A tokenized query together with its geographic bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub tokens: Vec<QueryToken>,
    /// Whether the last token may be an incomplete prefix.
    #[serde(default)]
    pub last_token_is_prefix: bool,
    pub pivot: Rect,
    #[serde(default)]
    pub position: Option<Point>,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub mode: Mode,
}

impl QueryParams {
    pub fn new(tokens: Vec<QueryToken>, pivot: Rect) -> Self {
        Self {
            tokens,
            last_token_is_prefix: false,
            pivot,
            position: None,
            locale: "en".to_string(),
            mode: Mode::Everywhere,
        }
    }

    /// Splits `query` on whitespace and lowercases every token. The last
    /// token is a prefix unless the query ends with whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use geocoder::{QueryParams, Rect};
    ///
    /// let pivot = Rect::new(0.0, 0.0, 1.0, 1.0);
    /// let params = QueryParams::parse("Baker Str", pivot);
    /// assert_eq!(params.num_tokens(), 2);
    /// assert_eq!(params.token(1), "str");
    /// assert!(params.is_prefix_token(1));
    /// ```
    pub fn parse(query: &str, pivot: Rect) -> Self {
        let tokens = query
            .split_whitespace()
            .map(|t| QueryToken::new(t.to_lowercase()))
            .collect();
        let mut params = Self::new(tokens, pivot);
        params.last_token_is_prefix =
            !query.is_empty() && !query.ends_with(char::is_whitespace);
        params
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_position(mut self, position: Point) -> Self {
        self.position = Some(position);
        self
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn token(&self, i: usize) -> &str {
        &self.tokens[i].text
    }

    pub fn is_prefix_token(&self, i: usize) -> bool {
        self.last_token_is_prefix && i + 1 == self.tokens.len()
    }

    pub fn is_number_token(&self, i: usize) -> bool {
        let text = self.token(i);
        !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
    }

    /// True when every token in `range` is a number.
    pub fn is_number_tokens(&self, range: TokenRange) -> bool {
        range.tokens().all(|i| self.is_number_token(i))
    }

    pub fn is_common_token(&self, i: usize) -> bool {
        COMMON_TOKENS.contains(&self.token(i))
    }

    pub fn slice(&self, range: TokenRange) -> Vec<&str> {
        range.tokens().map(|i| self.token(i)).collect()
    }

    /// Joins the tokens of `range` with `sep`.
    pub fn join(&self, range: TokenRange, sep: &str) -> String {
        self.slice(range).join(sep)
    }

    /// Whether the last token of `range` is the query's prefix token.
    pub fn range_ends_with_prefix(&self, range: TokenRange) -> bool {
        !range.is_empty() && self.is_prefix_token(range.end - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pivot() -> Rect {
        Rect::new(0.0, 0.0, 100.0, 100.0)
    }

    #[test]
    fn parse_detects_trailing_prefix() {
        let params = QueryParams::parse("10 Downing Street ", pivot());
        assert_eq!(params.num_tokens(), 3);
        assert!(!params.last_token_is_prefix);

        let params = QueryParams::parse("10 Downing Str", pivot());
        assert!(params.is_prefix_token(2));
        assert!(!params.is_prefix_token(1));
    }

    #[test]
    fn number_tokens() {
        let params = QueryParams::parse("75008 paris 12b", pivot());
        assert!(params.is_number_token(0));
        assert!(!params.is_number_token(1));
        assert!(!params.is_number_token(2));
        assert!(params.is_number_tokens(TokenRange::new(0, 1)));
        assert!(!params.is_number_tokens(TokenRange::new(0, 2)));
    }

    #[test]
    fn common_tokens() {
        let params = QueryParams::parse("avenue des champs", pivot());
        assert!(!params.is_common_token(0));
        assert!(params.is_common_token(1));
    }

    #[test]
    fn join_uses_separator() {
        let params = QueryParams::parse("rue de la paix", pivot());
        assert_eq!(params.join(TokenRange::new(1, 4), " "), "de la paix");
        assert!(params.range_ends_with_prefix(TokenRange::new(1, 4)));
        assert!(!params.range_ends_with_prefix(TokenRange::new(0, 2)));
    }
}
