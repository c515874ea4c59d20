//! ctxop CLI - run context operations against a JSON store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use ctxop_context::{ContextError, ManagedContext, Session};
use ctxop_core::{EntityDescription, Model, OperationDefaults, Record, SaveDepth};
use ctxop_operation::OperationBuilder;
use ctxop_storage::JsonStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ctxop")]
#[command(about = "Run scratch-context operations against a JSON store", long_about = None)]
struct Cli {
    /// Store directory
    #[arg(long, default_value = ".ctxop")]
    store: PathBuf,

    /// JSON file with operation defaults
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a record through an operation
    Insert {
        /// Entity name
        entity: String,
        /// Attributes as key=value; values are parsed as JSON when possible
        #[arg(value_parser = parse_assignment)]
        attributes: Vec<(String, serde_json::Value)>,
        /// How far up the context chain to save (scratch-only, scratch-and-target, to-root)
        #[arg(long)]
        depth: Option<SaveDepth>,
        /// Keep temporary ids instead of obtaining permanent ones
        #[arg(long)]
        temporary_ids: bool,
        /// Attribute that must be present (repeatable)
        #[arg(long)]
        required: Vec<String>,
        /// Attribute whose value must be unique (repeatable)
        #[arg(long)]
        unique: Vec<String>,
    },
    /// List stored records of an entity
    List {
        /// Entity name
        entity: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let defaults = load_defaults(cli.config.as_deref())?;
    let store = Arc::new(JsonStore::open(&cli.store)?);
    let store_root = store.root().to_path_buf();

    match cli.command {
        Commands::Insert {
            entity,
            attributes,
            depth,
            temporary_ids,
            required,
            unique,
        } => {
            let mut description = EntityDescription::new(&entity);
            for attribute in required {
                description = description.required(attribute);
            }
            for attribute in unique {
                description = description.unique(attribute);
            }
            let root = ManagedContext::root(store, Model::new().with_entity(description));
            let working = root.child_named("working");

            let mut defaults = defaults;
            if let Some(depth) = depth {
                defaults = defaults.with_save_depth(depth);
            }
            if temporary_ids {
                defaults = defaults.with_obtain_permanent_ids(false);
            }

            let mut record = Record::new(&entity);
            for (key, value) in attributes {
                record.set(key, value);
            }

            let operation = OperationBuilder::new(&working)
                .with_defaults(&defaults)
                .build(move |session: &mut Session| Ok(session.insert(record)?));
            operation.start();
            operation.wait().await;

            if let Some(error) = operation.error() {
                if error.downcast_ref::<ContextError>().is_some_and(ContextError::is_validation) {
                    anyhow::bail!("Insert rejected: {}", error);
                }
                anyhow::bail!("Insert failed: {}", error);
            }
            if let Some(error) = operation.error_saving_ancestor() {
                warn!("{}", error);
            }
            println!("Inserted {} record (save depth {})", entity, defaults.save_depth);

            if root.has_changes().await? || working.has_changes().await? {
                println!("  Not written to the store; use --depth to-root to persist");
            } else {
                info!("Store at {} is up to date", store_root.display());
            }
        }
        Commands::List { entity } => {
            let root = ManagedContext::root(store, Model::new().with_entity(EntityDescription::new(&entity)));
            let records = root.fetch(&entity).await?;

            println!("{} ({})", entity, records.len());
            for record in records {
                println!("  {} | {}", record.id, serde_json::Value::Object(record.attributes));
            }
        }
    }

    Ok(())
}

fn load_defaults(path: Option<&Path>) -> Result<OperationDefaults> {
    let Some(path) = path else {
        return Ok(OperationDefaults::new());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    OperationDefaults::from_json(&json)
        .with_context(|| format!("Invalid config {}", path.display()))
}

fn parse_assignment(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("missing attribute name in '{}'", s));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("name=Harold").unwrap(),
            ("name".to_string(), serde_json::json!("Harold"))
        );
        assert_eq!(
            parse_assignment("age=42").unwrap(),
            ("age".to_string(), serde_json::json!(42))
        );
        assert_eq!(
            parse_assignment("motto=a=b").unwrap(),
            ("motto".to_string(), serde_json::json!("a=b"))
        );
        assert!(parse_assignment("name").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_load_defaults_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctxop.json");
        std::fs::write(&path, r#"{"save_depth": "to-root"}"#).unwrap();

        let defaults = load_defaults(Some(&path)).unwrap();
        assert_eq!(defaults.save_depth, SaveDepth::ToRoot);
        assert!(defaults.obtain_permanent_ids);
        assert_eq!(load_defaults(None).unwrap().save_depth, SaveDepth::ScratchAndTarget);
        assert!(load_defaults(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn test_cli_parses_insert() {
        let cli = Cli::try_parse_from([
            "ctxop", "--store", "/tmp/s", "insert", "Employee", "name=Harold", "--depth", "to-root",
            "--unique", "name",
        ])
        .unwrap();
        match cli.command {
            Commands::Insert { entity, attributes, depth, unique, .. } => {
                assert_eq!(entity, "Employee");
                assert_eq!(attributes.len(), 1);
                assert_eq!(depth, Some(SaveDepth::ToRoot));
                assert_eq!(unique, vec!["name".to_string()]);
            }
            Commands::List { .. } => panic!("expected insert"),
        }
    }
}
