use serde::{Deserialize, Serialize};

/// A single hit produced by any retrieval strategy.
///
/// `score` is only meaningful relative to other hits of the same strategy
/// (cosine similarity for vector search, term score for keyword search)
/// until the list has been normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    pub score: f32,
    pub source_id: String,
    pub index: i64,
}

impl RetrievalResult {
    pub fn new(text: impl Into<String>, score: f32, source_id: impl Into<String>, index: i64) -> Self {
        Self {
            text: text.into(),
            score,
            source_id: source_id.into(),
            index,
        }
    }

    /// Identity used when merging result lists from different strategies.
    pub fn identity(&self) -> (&str, i64) {
        (self.source_id.as_str(), self.index)
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_text_and_score() {
        let a = RetrievalResult::new("alpha", 0.3, "doc-1", 2);
        let b = RetrievalResult::new("other text", 0.9, "doc-1", 2);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_serializes_snake_case_fields() {
        let hit = RetrievalResult::new("t", 1.0, "doc-1-0", 0);
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["source_id"], "doc-1-0");
        assert_eq!(json["index"], 0);
    }
}
