mod args;
mod dispatcher;

use std::{process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::Parser;
use common::{
    storage::{db::SurrealDbClient, types::task_progress::TaskStatus},
    utils::{
        config::get_config,
        embedding::EmbeddingProvider,
        progress::{answer_topic, graph_topic, subscribe, ProgressChannel, SurrealProgressChannel},
    },
};
use futures::{pin_mut, StreamExt};
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::RetrievalPipeline;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Command};
use dispatcher::TaskDispatcher;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider =
        Arc::new(EmbeddingProvider::from_config(&config, Some(openai_client.clone())).await?);
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let progress: Arc<dyn ProgressChannel> = Arc::new(SurrealProgressChannel::new(db.clone()));

    let ingestion = Arc::new(IngestionPipeline::new(
        db.clone(),
        progress.clone(),
        openai_client.clone(),
        config.clone(),
        embedding_provider.clone(),
    ));
    let retrieval = Arc::new(RetrievalPipeline::new(
        db,
        progress.clone(),
        openai_client,
        &config,
        embedding_provider,
    ));
    let dispatcher = TaskDispatcher::new(
        ingestion,
        retrieval,
        progress,
        config.worker_concurrency,
    );

    let topic = match cli.command {
        Command::Ingest(args) => {
            let text = args.read_text().await?;
            let task_id = dispatcher.ingest(text, args.scope.scope, args.scope.language);
            println!("ingestion task {task_id}");
            graph_topic(&task_id)
        }
        Command::Ask(args) => {
            let task_id = dispatcher.retrieve(args.query, args.scope.scope, args.scope.language);
            println!("query task {task_id}");
            answer_topic(&task_id)
        }
    };

    follow(&dispatcher, topic).await
}

/// Prints every update of `topic` until it settles.
async fn follow(dispatcher: &TaskDispatcher, topic: String) -> Result<ExitCode> {
    let updates = subscribe(dispatcher.progress(), topic);
    pin_mut!(updates);

    while let Some(update) = updates.next().await {
        let progress = update?;
        match progress.status {
            TaskStatus::Running => {
                println!(
                    "running: {}/{} chunks",
                    progress.chunks_done, progress.chunks_total
                );
            }
            TaskStatus::Success => {
                match progress.answer {
                    Some(answer) => println!("{answer}"),
                    None => println!(
                        "done: graph {} ({} chunks)",
                        progress.graph_scope, progress.chunks_done
                    ),
                }
                return Ok(ExitCode::SUCCESS);
            }
            TaskStatus::Failure => {
                eprintln!(
                    "failed: {}",
                    progress.error.as_deref().unwrap_or("unknown error")
                );
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::FAILURE)
}
