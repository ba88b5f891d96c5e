use serde::{Deserialize, Serialize};

/// A retrievable slice of a document.
/// Stored as `(:Document)-[:HAS_CHUNK]->(:Chunk)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{document_id}-{index}"`
    pub id: String,
    pub document_id: String,
    pub index: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn new(document_id: &str, index: usize, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: Self::chunk_id(document_id, index),
            document_id: document_id.to_string(),
            index: index as i64,
            text: text.into(),
            embedding,
        }
    }

    pub fn chunk_id(document_id: &str, index: usize) -> String {
        format!("{}-{}", document_id, index)
    }
}

/// A large parent section whose small children carry the embeddings.
/// Stored as `(:Parent)-[:HAS_CHILD]->(:Child)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentChunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub children: Vec<Chunk>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_document_scoped() {
        let chunk = Chunk::new("report", 3, "text", vec![]);
        assert_eq!(chunk.id, "report-3");
        assert_eq!(chunk.index, 3);
    }
}
