//! Shared data contracts for the knowledge-graph RAG services.

pub mod chunking;
pub mod conversation;
pub mod graph;
pub mod retrieval;

pub use chunking::{Chunk, ParentChunk};
pub use conversation::{ConversationTurn, Role, ToolSelection, ToolSpec};
pub use graph::{
    Community, Entity, EntityRef, Relationship, DEFAULT_ENTITY_TYPES,
    DEFAULT_RELATIONSHIP_STRENGTH,
};
pub use retrieval::RetrievalResult;
