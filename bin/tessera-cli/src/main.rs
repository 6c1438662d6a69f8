//! Tessera CLI
//!
//! Reads and writes models of one schema type through a configured
//! persistence backend and cache.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_cache::InMemoryCache;
use tessera_common::config::Backend;
use tessera_common::{Config, EncodingMode, MaskMode, WriteDisposition};
use tessera_model::codec::{self, json};
use tessera_model::{
    CacheOptions, FetchOptions, FieldMask, Model, Schema, SchemaCodec, SchemaRegistry,
    WriteOptions, metadata,
};
use tessera_store::{EmbeddedDriver, InMemoryDriver, ModelAdapter, PersistenceDriver};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(about = "Tessera model store CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// JSON schema file declaring the model types
    #[arg(long, env = "TESSERA_SCHEMA")]
    schema: PathBuf,

    /// Fully-qualified name of the model type to operate on
    #[arg(long = "type", env = "TESSERA_TYPE")]
    type_name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate fresh keys for the model type
    Keygen {
        /// Number of keys
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Write a model given as JSON
    Put {
        /// Record ID; generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// blind, must-exist or must-not-exist
        #[arg(long, default_value = "blind")]
        disposition: WriteDisposition,
        /// Model as a JSON object
        json: String,
    },
    /// Read a model by ID
    Get {
        /// Record ID
        id: String,
        /// Comma-separated field paths
        #[arg(long)]
        mask: Option<String>,
        /// include or exclude the masked fields
        #[arg(long, default_value = "include")]
        mode: MaskMode,
        /// Output encoding
        #[arg(long, default_value = "json")]
        encoding: EncodingMode,
    },
    /// Delete a model by ID
    Delete {
        /// Record ID
        id: String,
    },
    /// Re-encode a JSON model without touching storage
    Encode {
        /// Model as a JSON object
        json: String,
        /// Output encoding; binary output is base64
        #[arg(long)]
        encoding: EncodingMode,
    },
}

fn load_schema(path: &Path, type_name: &str) -> Result<Arc<Schema>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    let registry = SchemaRegistry::global();
    let loaded = registry.load_json(&raw)?;
    debug!(types = loaded.len(), "Loaded schema file");
    registry
        .get(type_name)
        .ok_or_else(|| anyhow!("Type '{type_name}' is not declared in {}", path.display()))
}

fn open_engine(config: &Config, schema: &Arc<Schema>) -> Result<Arc<dyn PersistenceDriver>> {
    let codec = SchemaCodec::new(schema.clone(), config.store.encoding).shared();
    let engine: Arc<dyn PersistenceDriver> = match config.store.backend {
        Backend::Memory => {
            warn!("Using the in-memory backend; records last only for this process");
            Arc::new(InMemoryDriver::new(codec, Handle::current()))
        }
        Backend::Redb => Arc::new(EmbeddedDriver::open(
            &config.store.path,
            codec,
            Handle::current(),
        )?),
    };
    info!(backend = engine.name(), type_name = schema.full_name(), "Opened store");
    Ok(engine)
}

fn open_adapter(config: &Config, schema: &Arc<Schema>) -> Result<ModelAdapter> {
    let engine = open_engine(config, schema)?;
    let cache_options = CacheOptions::from(&config.cache);
    let cache = Arc::new(InMemoryCache::new(cache_options.clone()));
    Ok(ModelAdapter::new(engine).with_cache(cache, cache_options))
}

fn parse_model(schema: &Arc<Schema>, raw: &str) -> Result<Model> {
    let value: serde_json::Value = serde_json::from_str(raw).context("Model is not valid JSON")?;
    Ok(json::from_json(schema, &value)?)
}

fn render(model: &Model, encoding: EncodingMode) -> Result<String> {
    Ok(match encoding {
        EncodingMode::Json => serde_json::to_string_pretty(&json::to_json(model))?,
        EncodingMode::Text => {
            String::from_utf8(codec::encode(model, EncodingMode::Text)?.into_data())?
        }
        EncodingMode::Binary => {
            let encoded = codec::encode(model, EncodingMode::Binary)?;
            base64::engine::general_purpose::STANDARD.encode(encoded.data())
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(args.config.as_deref())?;
    let schema = load_schema(&args.schema, &args.type_name)?;

    match args.command {
        Commands::Keygen { count } => {
            let engine = open_engine(&config, &schema)?;
            let template = Model::new(&schema);
            for _ in 0..count {
                let key = engine.generate_key(&template)?;
                let id = metadata::id(&key)?.ok_or_else(|| anyhow!("Generated key has no ID"))?;
                println!("{id}");
            }
        }
        Commands::Put {
            id,
            disposition,
            json,
        } => {
            let adapter = open_adapter(&config, &schema)?;
            let model = parse_model(&schema, &json)?;
            let key = id
                .map(|id| metadata::key_for_id(&schema, &id))
                .transpose()?;
            let options = WriteOptions {
                disposition,
                ..WriteOptions::from_store_config(&config.store)
            };
            let saved = adapter.persist(key.as_ref(), &model, &options).await?;
            println!("{}", render(&saved, EncodingMode::Json)?);
        }
        Commands::Get {
            id,
            mask,
            mode,
            encoding,
        } => {
            let adapter = open_adapter(&config, &schema)?;
            let key = metadata::key_for_id(&schema, &id)?;
            let mut options = FetchOptions::from_store_config(&config.store);
            if let Some(mask) = mask {
                options = options.with_mask(FieldMask::parse(&mask), mode);
            }
            let found = adapter
                .retrieve(&key, &options)
                .await?
                .ok_or_else(|| anyhow!("{} '{id}' not found", schema.full_name()))?;
            println!("{}", render(&found, encoding)?);
        }
        Commands::Delete { id } => {
            let adapter = open_adapter(&config, &schema)?;
            let key = metadata::key_for_id(&schema, &id)?;
            adapter
                .delete_with(&key, &WriteOptions::from_store_config(&config.store))
                .await?;
            println!("Deleted {} '{id}'", schema.full_name());
        }
        Commands::Encode { json, encoding } => {
            let model = parse_model(&schema, &json)?;
            println!("{}", render(&model, encoding)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const SCHEMA: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/schemas/person.json");

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_put() {
        let args = Args::try_parse_from([
            "tessera",
            "--schema",
            SCHEMA,
            "--type",
            "demo.Person",
            "put",
            "--id",
            "jd",
            "--disposition",
            "must-not-exist",
            r#"{"name":"John Doe"}"#,
        ])
        .unwrap();
        match args.command {
            Commands::Put {
                id, disposition, ..
            } => {
                assert_eq!(id.as_deref(), Some("jd"));
                assert_eq!(disposition, WriteDisposition::MustNotExist);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_sample_schema_and_render() {
        let schema = load_schema(Path::new(SCHEMA), "demo.Person").unwrap();
        let model = parse_model(
            &schema,
            r#"{"name":"John Doe","contact_info":{"email_address":"john@doe.com"}}"#,
        )
        .unwrap();

        let rendered = render(&model, EncodingMode::Text).unwrap();
        assert!(rendered.contains("name: \"John Doe\""));
        assert!(rendered.contains("email_address: \"john@doe.com\""));

        let json = render(&model, EncodingMode::Json).unwrap();
        let reparsed = parse_model(&schema, &json).unwrap();
        assert_eq!(reparsed, model);

        assert!(parse_model(&schema, r#"{"surname":"Doe"}"#).is_err());
    }
}
