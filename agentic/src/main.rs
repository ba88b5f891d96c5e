use std::sync::Arc;

use agentic::{AgenticRouter, Tool};
use anyhow::Context;
use clap::{Parser, Subcommand};
use graph_rag::graph_db::{Neo4jClient, RetrievalBackend};
use graph_rag::llm::build_generator;
use kgrag_config::{load_dotenv, AppConfig};
use kgrag_observability::init_tracing_for;

#[derive(Parser)]
#[command(name = "agentic", about = "Answer questions with the agentic graph router")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question and print the answer with its execution trace
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// List the tools the router can choose from
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing_for("agentic");
    let cli = Cli::parse();

    let question = match cli.command {
        Command::Tools => {
            let specs: Vec<_> = Tool::ALL.iter().map(Tool::spec).collect();
            println!("{}", serde_json::to_string_pretty(&specs)?);
            return Ok(());
        }
        Command::Ask { question } => question.join(" "),
    };

    let config = AppConfig::from_env().context("invalid configuration")?;
    let backend: Arc<dyn RetrievalBackend> = Arc::new(
        Neo4jClient::connect(&config.neo4j)
            .await
            .context("failed to connect to Neo4j")?,
    );
    let generator = build_generator(&config).context("failed to build LLM client")?;
    tracing::info!("✅ Agentic router initialized ({})", config.llm.provider.as_str());

    let router = AgenticRouter::new(backend, generator);
    let answer = router.answer(&question).await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}
