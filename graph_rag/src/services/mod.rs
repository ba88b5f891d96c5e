pub mod contract_extraction;
pub mod entity_extraction;
pub mod hybrid_search;
pub mod rag_service;
pub mod text2cypher;

pub use contract_extraction::{
    Contract, ContractAnswer, ContractExtractionService, ContractGraphData, ContractSearchField, ContractStatistics,
    ContractValidation,
};
pub use entity_extraction::{EntityExtractionService, Extraction};
pub use hybrid_search::HybridSearch;
pub use rag_service::{RagAnswer, RagService, SearchType};
pub use text2cypher::{Text2CypherOutcome, Text2CypherService};
