use std::borrow::Cow;

use regex::Regex;

use crate::error::ReconError;

/// Normalized form of any name without a single letter or digit.
pub const EMPTY_NAME_GROUP: &str = "#";

/// Turns display names into comparison keys.
///
/// Lowercases, blanks out ignore keywords and anything that is not a letter,
/// digit, `-`, `.` or `&`, then sorts the remaining tokens.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    keywords: Option<Regex>,
}

impl Normalizer {
    pub fn new<S: AsRef<str>>(ignore_keywords: &[S]) -> Result<Self, ReconError> {
        let mut words: Vec<String> = ignore_keywords
            .iter()
            .map(|k| k.as_ref().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if words.is_empty() {
            return Ok(Self::default());
        }
        // Longest first so "corporation" wins over "corp" at the same offset.
        words.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
        words.dedup();
        let pattern = words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");
        let keywords = Regex::new(&pattern)
            .map_err(|e| ReconError::ConfigValidation(format!("ignore keywords: {e}")))?;
        Ok(Self { keywords: Some(keywords) })
    }

    pub fn normalize(&self, name: &str) -> String {
        let lowered = name.to_lowercase();
        let stripped = match &self.keywords {
            Some(re) => re.replace_all(&lowered, " "),
            None => Cow::Borrowed(lowered.as_str()),
        };
        let cleaned: String = stripped
            .chars()
            .map(|c| if is_kept(c) { c } else { ' ' })
            .collect();

        let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
        if tokens.is_empty() {
            return EMPTY_NAME_GROUP.to_string();
        }
        tokens.sort_unstable();
        tokens.join(" ")
    }
}

fn is_kept(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '.' | '&')
}
