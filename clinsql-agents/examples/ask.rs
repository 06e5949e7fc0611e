//! Ask one natural-language question against the configured database.
//!
//! ```sh
//! CLINSQL_API_KEY=... cargo run --example ask -- "How many studies are in the database?"
//! ```

use clinsql_agents::{Pipeline, RunOptions};
use clinsql_core::PipelineConfig;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinsql=info".into()),
        )
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "How many studies are in the database?".to_string());

    let config = PipelineConfig::from_env();
    let pipeline = Pipeline::initialize(config).await?;

    let result = pipeline
        .run(&question, RunOptions::default(), &CancellationToken::new())
        .await;

    println!("{}", result.summary());
    println!(
        "\nGateway usage: {:?}",
        pipeline.usage_stats()
    );
    Ok(())
}
