//! Lexical sanity checks on queries and search results.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use retrieval_core::SearchResult;

static KEYWORD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\p{L}+|\d+").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());
static QUESTION_ENDING: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"인가요?\??").ok());
static QUESTION_MARKERS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[?요]").ok());

fn strip(pattern: &LazyLock<Option<Regex>>, text: &str, with: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

/// Normalize a query before searching.
///
/// Trims and collapses whitespace. Korean questions containing `인가` together
/// with `?` or `요` lose the `인가요?` ending and stray question markers.
pub fn preprocess_query(query: &str) -> String {
    let mut processed = strip(&WHITESPACE, query.trim(), " ");

    if processed.contains("인가") && (processed.contains('?') || processed.contains('요')) {
        processed = strip(&QUESTION_ENDING, &processed, "");
        processed = strip(&QUESTION_MARKERS, &processed, "");
    }

    let processed = processed.trim().to_string();
    if processed != query {
        debug!("Preprocessed query {:?} -> {:?}", query, processed);
    }
    processed
}

/// Word-like tokens and digit runs, lowercased.
fn keywords(text: &str) -> HashSet<String> {
    let Some(re) = KEYWORD.as_ref() else {
        return HashSet::new();
    };
    re.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Lexical filter layered over semantic similarity.
///
/// Each result's score is scaled by `base + weight * relevance_ratio`
/// (capped at 1.0), where the ratio is the share of query keywords found in
/// the content. Results are kept when the ratio exceeds `min_ratio` or the
/// adjusted score exceeds `strong_score`.
#[derive(Debug, Clone, Copy)]
pub struct ResultQualityValidator {
    pub base: f32,
    pub weight: f32,
    pub min_ratio: f32,
    pub strong_score: f32,
}

impl Default for ResultQualityValidator {
    fn default() -> Self {
        Self {
            base: 0.7,
            weight: 0.3,
            min_ratio: 0.1,
            strong_score: 0.7,
        }
    }
}

impl ResultQualityValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let query_keywords = keywords(query);
        if query_keywords.is_empty() {
            return results;
        }

        let before = results.len();
        let validated: Vec<SearchResult> = results
            .into_iter()
            .filter_map(|mut result| {
                let content_keywords = keywords(&result.content);
                let matched = query_keywords.intersection(&content_keywords).count();
                let ratio = matched as f32 / query_keywords.len() as f32;

                result.score = (result.score * (self.base + self.weight * ratio)).min(1.0);
                (ratio > self.min_ratio || result.score > self.strong_score).then(|| {
                    result.with_metadata("relevance_ratio", ratio)
                })
            })
            .collect();

        debug!("Quality validation kept {}/{} results", validated.len(), before);
        validated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_korean_question() {
        assert_eq!(preprocess_query("임대료 인상 한도는 얼마인가요?"), "임대료 인상 한도는 얼마");
        assert_eq!(preprocess_query("계약 갱신이 가능한 것인가?"), "계약 갱신이 가능한 것");
    }

    #[test]
    fn test_preprocess_collapses_whitespace() {
        assert_eq!(preprocess_query("  rent   cap\n limit "), "rent cap limit");
        // No 인가: question marks stay
        assert_eq!(preprocess_query("임대료 인상 한도는?"), "임대료 인상 한도는?");
    }

    #[test]
    fn test_partial_keyword_match_scales_score() {
        let validator = ResultQualityValidator::new();
        let results = vec![SearchResult::new("1", "alpha only here", 0.6)];

        let validated = validator.validate("alpha beta", results);
        assert_eq!(validated.len(), 1);
        assert!((validated[0].score - 0.6 * 0.85).abs() < 1e-6);
        assert_eq!(validated[0].metadata["relevance_ratio"], 0.5);
    }

    #[test]
    fn test_off_topic_low_score_dropped() {
        let validator = ResultQualityValidator::new();
        let results = vec![
            SearchResult::new("weak", "nothing relevant", 0.8),
            SearchResult::new("strong", "nothing relevant", 1.0),
        ];

        let validated = validator.validate("alpha beta", results);
        // 0.8 * 0.7 = 0.56 is dropped; 1.0 * 0.7 = 0.7 is not above 0.7 either
        assert!(validated.is_empty());
    }

    #[test]
    fn test_full_match_capped_at_one() {
        let validator = ResultQualityValidator::new();
        let results = vec![SearchResult::new("1", "Alpha BETA gamma", 1.2)];

        let validated = validator.validate("alpha beta", results);
        assert_eq!(validated[0].score, 1.0);
    }

    #[test]
    fn test_query_without_keywords_passes_through() {
        let validator = ResultQualityValidator::new();
        let results = vec![SearchResult::new("1", "anything", 0.1)];

        let validated = validator.validate("?!", results.clone());
        assert_eq!(validated, results);
    }

    #[test]
    fn test_korean_and_digits() {
        let validator = ResultQualityValidator::new();
        let results = vec![SearchResult::new("1", "임대료 인상 한도는 연 5% 입니다", 0.6)];

        let validated = validator.validate("임대료 5", results);
        assert_eq!(validated.len(), 1);
        assert!((validated[0].score - 0.6).abs() < 1e-6);
    }
}
