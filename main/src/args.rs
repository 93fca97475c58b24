use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;

#[derive(Debug, Parser)]
#[command(name = "main", about = "Build knowledge graphs from text and ask them questions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract entities and relations from text into a graph scope
    Ingest(IngestArgs),
    /// Answer a question from a graph scope
    Ask(AskArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ScopeArgs {
    /// Graph scope the command works on
    #[arg(long)]
    pub scope: String,

    /// Language the model should write in
    #[arg(long)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct IngestArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Read the text from a file
    #[arg(long, conflicts_with = "text")]
    pub file: Option<PathBuf>,

    /// Text to ingest; read from stdin when neither this nor --file is given
    pub text: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct AskArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    pub query: String,
}

impl IngestArgs {
    pub async fn read_text(&self) -> Result<String> {
        if let Some(text) = &self.text {
            return Ok(text.clone());
        }

        if let Some(path) = &self.file {
            return tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()));
        }

        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("reading text from stdin")?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_ingest_with_inline_text() {
        let cli = Cli::try_parse_from([
            "main",
            "ingest",
            "--scope",
            "graph-1",
            "--language",
            "Russian",
            "Skolkovo Institute collaborates with MIT",
        ])
        .expect("parse ingest");

        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.scope.scope, "graph-1");
        assert_eq!(args.scope.language.as_deref(), Some("Russian"));
        assert_eq!(
            args.text.as_deref(),
            Some("Skolkovo Institute collaborates with MIT")
        );
        assert!(args.file.is_none());
    }

    #[test]
    fn test_file_and_text_conflict() {
        let result = Cli::try_parse_from([
            "main", "ingest", "--scope", "g", "--file", "notes.txt", "inline",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parses_ask() {
        let cli = Cli::try_parse_from(["main", "ask", "--scope", "g", "Who works with MIT?"])
            .expect("parse ask");

        let Command::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.query, "Who works with MIT?");
        assert!(args.scope.language.is_none());
    }

    #[tokio::test]
    async fn test_inline_text_wins() {
        let args = IngestArgs {
            scope: ScopeArgs {
                scope: "g".into(),
                language: None,
            },
            file: None,
            text: Some("hello".into()),
        };
        assert_eq!(args.read_text().await.expect("text"), "hello");
    }
}
