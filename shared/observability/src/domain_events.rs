//! Domain event logging for the RAG pipelines.
//!
//! Every event is emitted as one `tracing` record under the `domain_event`
//! target with a stable JSON payload, so batch jobs (community summaries,
//! extraction) and per-question work (agent steps) can be audited the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a domain operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Success,
    Failure,
    Partial,
    Skipped,
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Partial => write!(f, "partial"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Ingestion,
    Extraction,
    Search,
    Community,
    Agent,
    Llm,
    System,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingestion => write!(f, "ingestion"),
            Self::Extraction => write!(f, "extraction"),
            Self::Search => write!(f, "search"),
            Self::Community => write!(f, "community"),
            Self::Agent => write!(f, "agent"),
            Self::Llm => write!(f, "llm"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A structured domain event for logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    /// Specific event type (e.g., "community_summarized", "tool_executed")
    pub event_type: String,
    /// Kind of object operated on (e.g., "community", "document", "tool")
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub result: OperationResult,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    /// Service that emitted the event
    pub service: String,
    pub metadata: Option<serde_json::Value>,
}

impl DomainEvent {
    pub fn new(service: impl Into<String>, category: EventCategory, event_type: impl Into<String>) -> DomainEventBuilder {
        DomainEventBuilder {
            service: service.into(),
            category,
            event_type: event_type.into(),
            entity_type: None,
            entity_id: None,
            result: OperationResult::Success,
            duration_ms: None,
            error: None,
            metadata: None,
        }
    }
}

pub struct DomainEventBuilder {
    service: String,
    category: EventCategory,
    event_type: String,
    entity_type: Option<String>,
    entity_id: Option<String>,
    result: OperationResult,
    duration_ms: Option<u64>,
    error: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl DomainEventBuilder {
    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn result(mut self, result: OperationResult) -> Self {
        self.result = result;
        self
    }

    pub fn success(mut self) -> Self {
        self.result = OperationResult::Success;
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.result = OperationResult::Failure;
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build and emit the event as a log
    pub fn emit(self) {
        let event = self.build();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

        match event.result {
            OperationResult::Success => tracing::info!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "success",
                "DomainEvent: {}", json
            ),
            OperationResult::Failure => tracing::error!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "failure",
                error = ?event.error,
                "DomainEvent: {}", json
            ),
            OperationResult::Partial => tracing::warn!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "partial",
                "DomainEvent: {}", json
            ),
            OperationResult::Skipped => tracing::debug!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "skipped",
                "DomainEvent: {}", json
            ),
        }
    }

    pub fn build(self) -> DomainEvent {
        DomainEvent {
            timestamp: Utc::now(),
            category: self.category,
            event_type: self.event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            result: self.result,
            duration_ms: self.duration_ms,
            error: self.error,
            service: self.service,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Convenience functions for common domain events
// ============================================================================

pub fn log_document_ingested(service: &str, document_id: &str, chunks: usize, duration_ms: u64) {
    DomainEvent::new(service, EventCategory::Ingestion, "document_ingested")
        .entity("document", document_id)
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({ "chunks_created": chunks }))
        .success()
        .emit();
}

pub fn log_entities_extracted(service: &str, chunk_id: Option<&str>, entities: usize, relationships: usize) {
    let mut builder = DomainEvent::new(service, EventCategory::Extraction, "entities_extracted")
        .metadata(serde_json::json!({ "entities": entities, "relationships": relationships }));
    if let Some(id) = chunk_id {
        builder = builder.entity("chunk", id);
    }
    let result = if entities == 0 && relationships == 0 {
        OperationResult::Skipped
    } else {
        OperationResult::Success
    };
    builder.result(result).emit();
}

pub fn log_search_executed(service: &str, strategy: &str, results_count: usize, duration_ms: u64) {
    DomainEvent::new(service, EventCategory::Search, "query_executed")
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({
            "strategy": strategy,
            "results_count": results_count,
        }))
        .success()
        .emit();
}

/// One community processed by the summarization batch.
pub fn log_community_summarized(service: &str, community_id: i64, members: usize, error: Option<&str>) {
    let builder = DomainEvent::new(service, EventCategory::Community, "community_summarized")
        .entity("community", community_id)
        .metadata(serde_json::json!({ "members": members }));
    match error {
        Some(err) => builder.failure(err).emit(),
        None => builder.success().emit(),
    }
}

pub fn log_communities_detected(service: &str, community_count: usize, entity_count: usize, duration_ms: u64) {
    DomainEvent::new(service, EventCategory::Community, "communities_detected")
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({
            "community_count": community_count,
            "entity_count": entity_count,
        }))
        .success()
        .emit();
}

pub fn log_tool_executed(service: &str, tool_name: &str, duration_ms: u64, error: Option<&str>) {
    let builder = DomainEvent::new(service, EventCategory::Agent, "tool_executed")
        .entity("tool", tool_name)
        .duration_ms(duration_ms);
    match error {
        Some(err) => builder.failure(err).emit(),
        None => builder.success().emit(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_event_builder() {
        let event = DomainEvent::new("graph-rag", EventCategory::Community, "community_summarized")
            .entity("community", 7)
            .duration_ms(100)
            .success()
            .build();

        assert_eq!(event.service, "graph-rag");
        assert_eq!(event.event_type, "community_summarized");
        assert_eq!(event.entity_id, Some("7".to_string()));
        assert_eq!(event.result, OperationResult::Success);
    }

    #[test]
    fn test_failure_records_error() {
        let event = DomainEvent::new("agentic", EventCategory::Agent, "tool_executed")
            .failure("boom")
            .build();
        assert_eq!(event.result, OperationResult::Failure);
        assert_eq!(event.error.as_deref(), Some("boom"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "agent");
        assert_eq!(json["result"], "failure");
    }
}
