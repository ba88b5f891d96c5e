//! Structured contract extraction and storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use kgrag_models::ConversationTurn;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::{GraphError, GraphResult};
use crate::graph_db::{Record, RetrievalBackend};
use crate::llm::json::parse_salvaged;
use crate::llm::{GenerationOptions, TextGenerator};
use crate::services::text2cypher::clean_cypher_response;

pub const CONTRACT_TYPES: [&str; 8] = [
    "Service Agreement",
    "Licensing Agreement",
    "Non-Disclosure Agreement (NDA)",
    "Partnership Agreement",
    "Lease Agreement",
    "Employment Agreement",
    "Purchase Agreement",
    "Consulting Agreement",
];

const STORE_CONTRACT_QUERY: &str = r#"
MERGE (contract:Contract {id: $contract_id})
SET contract += {
    contract_type: $contract.contract_type,
    effective_date: $contract.effective_date,
    end_date: $contract.end_date,
    term: $contract.term,
    contract_scope: $contract.contract_scope,
    total_amount: $contract.total_amount,
    governing_law: $governing_law,
    extraction_timestamp: $extraction_timestamp,
    text_length: $text_length
}
WITH contract
UNWIND $contract.parties AS party
MERGE (org:Organization {name: party.name})
FOREACH (loc IN CASE WHEN party.location IS NOT NULL THEN [party.location] ELSE [] END |
    MERGE (location:Location {
        fullAddress: coalesce(loc.address, '') + ' ' + coalesce(loc.city, '') + ' ' +
                     coalesce(loc.state, '') + ' ' + coalesce(loc.country, '')
    })
    SET location += {address: loc.address, city: loc.city, state: loc.state, country: loc.country}
    MERGE (org)-[:LOCATED_AT]->(location)
)
MERGE (org)-[r:PARTY_TO]->(contract)
SET r.role = party.role
"#;

const CONTRACT_SCHEMA: &str = "\
- Contract nodes with properties: id, contract_type, effective_date, end_date, term, contract_scope, total_amount, governing_law
- Organization nodes with properties: name
- Location nodes with properties: fullAddress, address, city, state, country
- Relationships: (Organization)-[:PARTY_TO {role}]->(Contract), (Organization)-[:LOCATED_AT]->(Location)";

const CONTRACT_NODES_QUERY: &str = "MATCH (c:Contract) \
     RETURN c.id AS id, c.contract_type AS type, c.effective_date AS effective_date, c.end_date AS end_date, \
            c.term AS term, c.contract_scope AS scope, c.total_amount AS total_amount, c.governing_law AS governing_law \
     ORDER BY c.extraction_timestamp DESC";
const ORGANIZATION_NODES_QUERY: &str = "MATCH (o:Organization) RETURN o.name AS name ORDER BY name";
const LOCATION_NODES_QUERY: &str = "MATCH (l:Location) \
     RETURN l.fullAddress AS full_address, l.address AS address, l.city AS city, l.state AS state, l.country AS country";
const PARTY_EDGES_QUERY: &str = "MATCH (o:Organization)-[r:PARTY_TO]->(c:Contract) \
     RETURN o.name AS organization, c.id AS contract, r.role AS role";
const LOCATION_EDGES_QUERY: &str = "MATCH (o:Organization)-[:LOCATED_AT]->(l:Location) \
     RETURN o.name AS organization, l.fullAddress AS location";

const CONTRACT_STATISTICS_QUERY: &str = "\
     CALL { MATCH (c:Contract) RETURN count(c) AS contracts } \
     CALL { MATCH (o:Organization) RETURN count(o) AS organizations } \
     CALL { MATCH (l:Location) RETURN count(l) AS locations } \
     CALL { MATCH (:Organization)-[r:PARTY_TO]->(:Contract) RETURN count(r) AS party_relationships } \
     CALL { MATCH (:Organization)-[r:LOCATED_AT]->(:Location) RETURN count(r) AS location_relationships } \
     RETURN contracts, organizations, locations, party_relationships, location_relationships";
const CONTRACT_TYPES_QUERY: &str = "MATCH (c:Contract) \
     RETURN coalesce(c.contract_type, 'Unknown') AS contract_type, count(c) AS count";

const CLEAR_CONTRACTS_QUERY: &str = "MATCH (n) WHERE n:Contract OR n:Organization OR n:Location DETACH DELETE n";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Two-letter ISO country code.
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub parties: Vec<Party>,
    #[serde(default)]
    pub effective_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub contract_scope: String,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub governing_law: Option<Location>,
}

impl Contract {
    fn governing_law_label(&self) -> Option<String> {
        let law = self.governing_law.as_ref()?;
        let parts: Vec<&str> = [law.state.as_deref(), law.country.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// An extracted contract plus when and from how much text it was extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContract {
    #[serde(flatten)]
    pub contract: Contract,
    pub extraction_timestamp: String,
    pub text_length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractSearchField {
    #[default]
    All,
    Organization,
    Type,
    Scope,
}

impl ContractSearchField {
    fn query(self) -> &'static str {
        match self {
            ContractSearchField::Organization => {
                "MATCH (org:Organization)-[:PARTY_TO]->(c:Contract) \
                 WHERE toLower(org.name) CONTAINS toLower($term) \
                 RETURN DISTINCT c AS contract ORDER BY c.extraction_timestamp DESC"
            }
            ContractSearchField::Type => {
                "MATCH (c:Contract) WHERE toLower(c.contract_type) CONTAINS toLower($term) \
                 RETURN c AS contract ORDER BY c.extraction_timestamp DESC"
            }
            ContractSearchField::Scope => {
                "MATCH (c:Contract) WHERE toLower(c.contract_scope) CONTAINS toLower($term) \
                 RETURN c AS contract ORDER BY c.extraction_timestamp DESC"
            }
            ContractSearchField::All => {
                "MATCH (c:Contract) \
                 OPTIONAL MATCH (c)<-[:PARTY_TO]-(org:Organization) \
                 WITH c, org \
                 WHERE toLower(c.contract_type) CONTAINS toLower($term) \
                    OR toLower(c.contract_scope) CONTAINS toLower($term) \
                    OR toLower(coalesce(org.name, '')) CONTAINS toLower($term) \
                 RETURN DISTINCT c AS contract ORDER BY c.extraction_timestamp DESC"
            }
        }
    }
}

/// A natural-language question answered over the contract graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAnswer {
    pub question: String,
    pub cypher_query: String,
    pub results: Vec<Record>,
    pub answer: String,
}

/// Every contract, organization and location plus the edges between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractGraphData {
    pub contracts: Vec<Record>,
    pub organizations: Vec<Record>,
    pub locations: Vec<Record>,
    pub party_relationships: Vec<Record>,
    pub location_relationships: Vec<Record>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractStatistics {
    pub contracts: u64,
    pub organizations: u64,
    pub locations: u64,
    pub party_relationships: u64,
    pub location_relationships: u64,
    pub by_type: BTreeMap<String, u64>,
}

fn count(row: Option<&Record>, key: &str) -> u64 {
    row.and_then(|r| r.get(key)).and_then(|v| v.as_u64()).unwrap_or(0)
}

pub struct ContractExtractionService {
    backend: Arc<dyn RetrievalBackend>,
    generator: Arc<dyn TextGenerator>,
}

impl ContractExtractionService {
    pub fn new(backend: Arc<dyn RetrievalBackend>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { backend, generator }
    }

    pub async fn extract(&self, contract_text: &str) -> GraphResult<ExtractedContract> {
        if contract_text.trim().is_empty() {
            return Err(GraphError::InvalidInput("contract text is empty".to_string()));
        }
        let raw = self
            .generator
            .generate(&[ConversationTurn::user(extraction_prompt(contract_text))], GenerationOptions::json())
            .await?;
        let contract: Contract = parse_salvaged(&raw)?;
        tracing::info!(
            "✅ Extracted {} contract with {} parties",
            contract.contract_type,
            contract.parties.len()
        );
        Ok(ExtractedContract {
            contract,
            extraction_timestamp: chrono::Utc::now().to_rfc3339(),
            text_length: contract_text.chars().count(),
        })
    }

    /// Store the contract with its parties and their locations. Returns the new id.
    pub async fn store(&self, extracted: &ExtractedContract) -> GraphResult<String> {
        let contract_id = Uuid::new_v4().to_string();
        let params = json!({
            "contract_id": contract_id,
            "contract": serde_json::to_value(&extracted.contract)?,
            "governing_law": extracted.contract.governing_law_label(),
            "extraction_timestamp": extracted.extraction_timestamp,
            "text_length": extracted.text_length,
        });
        self.backend.graph_query(STORE_CONTRACT_QUERY, params).await?;
        tracing::info!("✅ Stored contract {}", contract_id);
        Ok(contract_id)
    }

    pub async fn search(&self, term: &str, field: ContractSearchField) -> GraphResult<Vec<Record>> {
        let rows = self.backend.graph_query(field.query(), json!({ "term": term })).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.get_mut("contract").map(serde_json::Value::take))
            .collect())
    }
}

impl ContractExtractionService {
    /// Generate Cypher for `question` against the contract schema, run it and
    /// phrase the rows as an answer.
    pub async fn query(&self, question: &str) -> GraphResult<ContractAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GraphError::InvalidInput("question is empty".to_string()));
        }

        let raw = self
            .generator
            .generate(&[ConversationTurn::user(contract_cypher_prompt(question))], GenerationOptions::default())
            .await?;
        let cypher_query = clean_cypher_response(&raw);
        tracing::info!(cypher = %cypher_query, "🔍 Generated contract query");

        let results = self.backend.graph_query(&cypher_query, json!({})).await?;
        let prompt = format!(
            "Based on the following query results, provide a clear answer to the question: \"{}\"\n\n\
             Query results: {}\n\n\
             Provide a concise, natural language answer.",
            question,
            serde_json::to_string_pretty(&results)?
        );
        let answer = self
            .generator
            .generate(&[ConversationTurn::user(prompt)], GenerationOptions::default())
            .await?;

        Ok(ContractAnswer {
            question: question.to_string(),
            cypher_query,
            results,
            answer: answer.trim().to_string(),
        })
    }

    pub async fn graph_data(&self) -> GraphResult<ContractGraphData> {
        let backend = &self.backend;
        let fetch = move |cypher: &'static str| backend.graph_query(cypher, json!({}));
        Ok(ContractGraphData {
            contracts: fetch(CONTRACT_NODES_QUERY).await?,
            organizations: fetch(ORGANIZATION_NODES_QUERY).await?,
            locations: fetch(LOCATION_NODES_QUERY).await?,
            party_relationships: fetch(PARTY_EDGES_QUERY).await?,
            location_relationships: fetch(LOCATION_EDGES_QUERY).await?,
        })
    }

    pub async fn statistics(&self) -> GraphResult<ContractStatistics> {
        let rows = self.backend.graph_query(CONTRACT_STATISTICS_QUERY, json!({})).await?;
        let row = rows.first();
        let by_type = self
            .backend
            .graph_query(CONTRACT_TYPES_QUERY, json!({}))
            .await?
            .iter()
            .filter_map(|r| {
                let contract_type = r.get("contract_type")?.as_str()?;
                Some((contract_type.to_string(), count(Some(r), "count")))
            })
            .collect();

        Ok(ContractStatistics {
            contracts: count(row, "contracts"),
            organizations: count(row, "organizations"),
            locations: count(row, "locations"),
            party_relationships: count(row, "party_relationships"),
            location_relationships: count(row, "location_relationships"),
            by_type,
        })
    }

    /// Delete every contract, organization and location. Entity and movie
    /// data is left alone.
    pub async fn clear(&self) -> GraphResult<()> {
        self.backend.graph_query(CLEAR_CONTRACTS_QUERY, json!({})).await?;
        tracing::info!("✅ Cleared contract data");
        Ok(())
    }
}

pub fn contract_cypher_prompt(question: &str) -> String {
    format!(
        "Generate a Cypher query to answer this question about contracts: \"{}\"\n\n\
         Available schema:\n{}\n\n\
         Return only the Cypher query, no explanations.",
        question, CONTRACT_SCHEMA
    )
}

pub fn extraction_prompt(contract_text: &str) -> String {
    let schema = json!({
        "contract_type": format!("one of: {}", CONTRACT_TYPES.join(", ")),
        "parties": [{
            "name": "organization name",
            "role": "role in the contract, such as provider, client or supplier",
            "location": {"address": "street", "city": "city", "state": "state or region", "country": "two-letter ISO code"}
        }],
        "effective_date": "yyyy-MM-dd",
        "end_date": "yyyy-MM-dd or null",
        "term": "duration of the agreement, including renewal or termination provisions",
        "contract_scope": "rights, duties and limitations covered by the contract",
        "total_amount": "number or null",
        "governing_law": {"state": "state", "country": "two-letter ISO code"}
    });
    format!(
        "Extract structured information from the following contract. \
         Respond with a single JSON object following this template and nothing else:\n{}\n\n\
         Use null for anything the contract does not state. Do not make anything up.\n\n\
         Contract:\n{}",
        schema, contract_text
    )
}

pub fn validate(contract: &Contract) -> ContractValidation {
    let mut validation = ContractValidation::default();

    let required = [
        ("contract_type", contract.contract_type.trim().is_empty()),
        ("parties", contract.parties.is_empty()),
        ("effective_date", contract.effective_date.trim().is_empty()),
        ("contract_scope", contract.contract_scope.trim().is_empty()),
    ];
    for (field, missing) in required {
        if missing {
            validation.errors.push(format!("Missing required field: {}", field));
        }
    }

    if !contract.contract_type.is_empty() && !CONTRACT_TYPES.contains(&contract.contract_type.as_str()) {
        validation
            .warnings
            .push(format!("Unrecognised contract type: {}", contract.contract_type));
    }

    let dates = [("Effective", Some(&contract.effective_date)), ("End", contract.end_date.as_ref())];
    for (label, date) in dates {
        if let Some(date) = date.filter(|d| !d.is_empty()) {
            if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                validation
                    .warnings
                    .push(format!("{} date format should be YYYY-MM-DD", label));
            }
        }
    }

    if !contract.parties.is_empty() && contract.parties.len() < 2 {
        validation
            .warnings
            .push("Contract should have at least 2 parties".to_string());
    }
    for (i, party) in contract.parties.iter().enumerate() {
        if party.name.trim().is_empty() {
            validation.errors.push(format!("Party {} missing name", i + 1));
        }
    }

    validation.is_valid = validation.errors.is_empty();
    validation
}
