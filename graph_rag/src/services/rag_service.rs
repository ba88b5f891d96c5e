//! Single-shot retrieval-augmented answering strategies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use kgrag_models::{ConversationTurn, RetrievalResult};
use kgrag_observability::log_search_executed;
use serde::{Deserialize, Serialize};

use super::hybrid_search::HybridSearch;
use crate::errors::GraphResult;
use crate::graph_db::{GraphStatistics, KnowledgeGraph, RetrievalBackend, CHUNK_FULLTEXT_INDEX, CHUNK_VECTOR_INDEX};
use crate::llm::{Embedder, GenerationOptions, TextGenerator};

const SERVICE: &str = "rag-service";

pub const NO_INFORMATION_ANSWER: &str = "I don't have enough information to answer this question.";
pub const NO_DOCUMENTS_ANSWER: &str = "No relevant documents found.";
pub const NOTHING_RELEVANT_ANSWER: &str = "No relevant information found in the documents.";
const NOT_RELEVANT_MARKER: &str = "NOT_RELEVANT";

const ANSWER_SYSTEM_PROMPT: &str = "You are an expert assistant that can only use the provided documents to respond to questions. \
Be accurate and cite the information from the documents. If the documents don't contain enough information \
to answer the question, say so clearly.";

const STEPBACK_SYSTEM_PROMPT: &str = r#"You are an expert at world knowledge. Your task is to step back
and paraphrase a question to a more generic step-back question, which
is easier to answer. Here are a few examples:

"input": "Could the members of The Police perform lawful arrests?"
"output": "what can the members of The Police do?"

"input": "Jan Sindel's was born in what country?"
"output": "what is Jan Sindel's personal history?"

"input": "What specific algorithm does company X use for recommendation?"
"output": "How do recommendation systems work?""#;

const COMPRESSED_ANSWER_SYSTEM_PROMPT: &str =
    "You are an expert assistant. Use the provided relevant document excerpts to answer the question accurately and concisely.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Vector,
    Keyword,
    Hybrid,
    StepbackRag,
    MultiQueryRag,
    ContextualCompressionRag,
}

/// A document excerpt kept by contextual compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedDocument {
    pub document: RetrievalResult,
    pub compressed_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub original_question: String,
    pub search_type: SearchType,
    pub answer: String,
    #[serde(default)]
    pub documents: Vec<RetrievalResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stepback_question: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compressed_documents: Vec<CompressedDocument>,
}

impl RagAnswer {
    fn new(question: &str, search_type: SearchType, answer: String) -> Self {
        Self {
            original_question: question.to_string(),
            search_type,
            answer,
            documents: Vec::new(),
            stepback_question: None,
            generated_questions: Vec::new(),
            compressed_documents: Vec::new(),
        }
    }
}

pub struct RagService {
    backend: Arc<dyn RetrievalBackend>,
    graph: Arc<dyn KnowledgeGraph>,
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
    hybrid: HybridSearch,
}

impl RagService {
    pub fn new(
        backend: Arc<dyn RetrievalBackend>,
        graph: Arc<dyn KnowledgeGraph>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let hybrid = HybridSearch::new(backend.clone(), embedder.clone());
        Self {
            backend,
            graph,
            generator,
            embedder,
            hybrid,
        }
    }

    pub async fn vector_search(&self, question: &str, k: usize) -> Vec<RetrievalResult> {
        if question.trim().is_empty() {
            return Vec::new();
        }
        let start = Instant::now();
        let hits = match self.embedder.embed(question).await {
            Ok(embedding) => self.backend.vector_search(&embedding, CHUNK_VECTOR_INDEX, k).await,
            Err(e) => Err(e),
        };
        let hits = hits.unwrap_or_else(|e| {
            tracing::warn!("⚠️ Vector search failed: {}", e);
            Vec::new()
        });
        log_search_executed(SERVICE, "vector", hits.len(), start.elapsed().as_millis() as u64);
        hits
    }

    pub async fn keyword_search(&self, question: &str, k: usize) -> Vec<RetrievalResult> {
        if question.trim().is_empty() {
            return Vec::new();
        }
        let start = Instant::now();
        let hits = self
            .backend
            .keyword_search(question, CHUNK_FULLTEXT_INDEX, k)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("⚠️ Keyword search failed: {}", e);
                Vec::new()
            });
        log_search_executed(SERVICE, "keyword", hits.len(), start.elapsed().as_millis() as u64);
        hits
    }

    pub async fn hybrid_search(&self, question: &str, k: usize) -> Vec<RetrievalResult> {
        self.hybrid.search(question, k).await
    }

    /// Answer strictly from `documents`.
    pub async fn generate_answer(&self, question: &str, documents: &[RetrievalResult]) -> GraphResult<String> {
        let texts: Vec<&str> = documents
            .iter()
            .map(|d| d.text.as_str())
            .filter(|t| !t.trim().is_empty())
            .collect();
        if texts.is_empty() {
            return Ok(NO_INFORMATION_ANSWER.to_string());
        }

        let user = format!(
            "Use the following documents to answer the question that will follow:\n{}\n\n---\n\n\
             The question to answer using information only from the above documents: {}",
            texts.join("\n\n"),
            question
        );
        self.generator
            .generate(
                &[ConversationTurn::system(ANSWER_SYSTEM_PROMPT), ConversationTurn::user(user)],
                GenerationOptions::default(),
            )
            .await
    }

    /// A more generic paraphrase of `question`; the question itself on failure.
    pub async fn generate_stepback(&self, question: &str) -> String {
        let messages = [ConversationTurn::system(STEPBACK_SYSTEM_PROMPT), ConversationTurn::user(question)];
        match self.generator.generate(&messages, GenerationOptions::default()).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => question.to_string(),
            Err(e) => {
                tracing::warn!("⚠️ Step-back generation failed, using original question: {}", e);
                question.to_string()
            }
        }
    }

    pub async fn parent_retrieval(&self, question: &str, k: usize) -> Vec<RetrievalResult> {
        if question.trim().is_empty() {
            return Vec::new();
        }
        let hits = match self.embedder.embed(question).await {
            Ok(embedding) => self.graph.parent_search(&embedding, k).await,
            Err(e) => Err(e),
        };
        hits.unwrap_or_else(|e| {
            tracing::warn!("⚠️ Parent retrieval failed: {}", e);
            Vec::new()
        })
    }

    pub async fn stepback_rag(&self, question: &str, k: usize) -> GraphResult<RagAnswer> {
        let stepback = self.generate_stepback(question).await;
        let documents = self.parent_retrieval(&stepback, k).await;
        let answer = self.generate_answer(question, &documents).await?;

        let mut result = RagAnswer::new(question, SearchType::StepbackRag, answer);
        result.stepback_question = Some(stepback);
        result.documents = documents;
        Ok(result)
    }

    /// Search with the question and up to three generated rephrasings.
    pub async fn multi_query_rag(&self, question: &str, k: usize) -> GraphResult<RagAnswer> {
        let prompt = format!(
            "Generate 3 different versions of the following question that would help retrieve \
             relevant information from a document database. Make them more specific and focused:\n\n\
             Original question: {}\n\nReturn only the 3 questions, one per line.",
            question
        );
        let generated: Vec<String> = match self
            .generator
            .generate(&[ConversationTurn::user(prompt)], GenerationOptions::default())
            .await
        {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                tracing::warn!("⚠️ Query generation failed, searching with the original only: {}", e);
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let mut documents = Vec::new();
        let queries = std::iter::once(question).chain(generated.iter().take(3).map(String::as_str));
        for query in queries {
            for doc in self.hybrid.search(query, k).await {
                if !doc.text.is_empty() && seen.insert(doc.text.clone()) {
                    documents.push(doc);
                }
            }
        }

        let answer = self.generate_answer(question, &documents).await?;
        let mut result = RagAnswer::new(question, SearchType::MultiQueryRag, answer);
        result.generated_questions = generated;
        result.documents = documents;
        Ok(result)
    }

    /// Answer from the question-relevant excerpts of each retrieved document.
    pub async fn contextual_compression_rag(&self, question: &str, k: usize) -> GraphResult<RagAnswer> {
        let documents = self.hybrid.search(question, k).await;
        if documents.is_empty() {
            return Ok(RagAnswer::new(
                question,
                SearchType::ContextualCompressionRag,
                NO_DOCUMENTS_ANSWER.to_string(),
            ));
        }

        let mut compressed = Vec::new();
        for doc in documents.iter().filter(|d| !d.text.is_empty()) {
            let prompt = format!(
                "Given the following question and document, extract only the parts of the document \
                 that are directly relevant to answering the question. If no part is relevant, return \"{}\".\n\n\
                 Question: {}\n\nDocument: {}\n\nRelevant parts:",
                NOT_RELEVANT_MARKER, question, doc.text
            );
            let excerpt = self
                .generator
                .generate(&[ConversationTurn::user(prompt)], GenerationOptions::default())
                .await?;
            let excerpt = excerpt.trim();
            if excerpt != NOT_RELEVANT_MARKER && !excerpt.is_empty() {
                compressed.push(CompressedDocument {
                    document: doc.clone(),
                    compressed_text: excerpt.to_string(),
                });
            }
        }

        let answer = if compressed.is_empty() {
            NOTHING_RELEVANT_ANSWER.to_string()
        } else {
            let excerpts: Vec<&str> = compressed.iter().map(|c| c.compressed_text.as_str()).collect();
            let user = format!("Relevant document excerpts:\n{}\n\nQuestion: {}", excerpts.join("\n\n"), question);
            self.generator
                .generate(
                    &[ConversationTurn::system(COMPRESSED_ANSWER_SYSTEM_PROMPT), ConversationTurn::user(user)],
                    GenerationOptions::default(),
                )
                .await?
        };

        let mut result = RagAnswer::new(question, SearchType::ContextualCompressionRag, answer);
        result.documents = documents;
        result.compressed_documents = compressed;
        Ok(result)
    }

    /// Retrieve with `search_type` and answer from the hits.
    pub async fn answer(&self, question: &str, search_type: SearchType, k: usize) -> GraphResult<RagAnswer> {
        let documents = match search_type {
            SearchType::Vector => self.vector_search(question, k).await,
            SearchType::Keyword => self.keyword_search(question, k).await,
            SearchType::Hybrid => self.hybrid_search(question, k).await,
            SearchType::StepbackRag => return self.stepback_rag(question, k).await,
            SearchType::MultiQueryRag => return self.multi_query_rag(question, k).await,
            SearchType::ContextualCompressionRag => return self.contextual_compression_rag(question, k).await,
        };
        let answer = self.generate_answer(question, &documents).await?;
        let mut result = RagAnswer::new(question, search_type, answer);
        result.documents = documents;
        Ok(result)
    }

    pub async fn document_counts(&self) -> GraphResult<GraphStatistics> {
        self.graph.statistics().await
    }
}
