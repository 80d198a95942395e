use clap::{Parser, Subcommand, ValueEnum};
use localref::config::parse_config;
use localref::{Collection, Fields, LocalStore, Options, StoreConfig};
use std::path::PathBuf;
use std::process;

/// localref CLI: read and write a persistent localref store from the command line
#[derive(Parser)]
#[command(name = "localref", version, about)]
struct Cli {
    /// Path to the SQLite database (default: $LOCALREF_DB or ./localref.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// YAML file with store settings (id_strategy, max_emit_depth)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Add a document under a generated id
    Add {
        /// Collection path (e.g. todos or todos/list-1/items)
        collection: String,
        /// Field values (e.g. --field name=milk)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Get a single document by ID
    Get {
        /// Collection path
        collection: String,
        /// Document ID
        id: String,
    },

    /// List documents in a collection
    List {
        /// Collection path
        collection: String,
    },

    /// Replace a document's fields, creating it if needed
    Set {
        /// Collection path
        collection: String,
        /// Document ID
        id: String,
        /// Field values
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Merge fields into an existing document
    Update {
        /// Collection path
        collection: String,
        /// Document ID
        id: String,
        /// Field values to update (e.g. --field done=true)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a document
    Delete {
        /// Collection path
        collection: String,
        /// Document ID
        id: String,
    },

    /// Increment a persistent counter document
    Counter {
        /// Counter document ID
        name: String,
        /// Amount to add
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },

    /// List every stored key
    Keys,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let db = cli
        .db
        .or_else(|| std::env::var_os("LOCALREF_DB").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("localref.db"));
    let config = match &cli.config {
        Some(path) => parse_config(path)?,
        None => StoreConfig::default(),
    };

    log::info!("Opening store at: {}", db.display());
    let store = LocalStore::open_with_config(&db, config)?;

    match cli.command {
        Command::Add { collection, fields } => {
            let (_root, target) = open_collection(&store, &collection)?;
            let doc = target.add(fields_to_map(&fields))?;
            print_output(&serde_json::json!({ "id": doc.id() }), &cli.format)?;
        }

        Command::Get { collection, id } => {
            let (_root, target) = open_collection(&store, &collection)?;
            let snapshot = target.doc(&id).get();
            if !snapshot.exists() {
                return Err(format!("Document not found: {}", snapshot.path()).into());
            }
            print_output(&snapshot.to_json(), &cli.format)?;
        }

        Command::List { collection } => {
            let (_root, target) = open_collection(&store, &collection)?;
            let rows: Vec<serde_json::Value> =
                target.get().docs().iter().map(|doc| doc.to_json()).collect();
            print_output(&serde_json::Value::Array(rows), &cli.format)?;
        }

        Command::Set {
            collection,
            id,
            fields,
        } => {
            let (_root, target) = open_collection(&store, &collection)?;
            target.doc(&id).set(fields_to_map(&fields))?;
            print_output(&serde_json::json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Update {
            collection,
            id,
            fields,
        } => {
            let (_root, target) = open_collection(&store, &collection)?;
            let doc = target.doc(&id);
            if !doc.get().exists() {
                return Err(format!("Document not found: {}", doc.path()).into());
            }
            doc.update(fields_to_map(&fields))?;
            print_output(&serde_json::json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Delete { collection, id } => {
            let (_root, target) = open_collection(&store, &collection)?;
            let doc = target.doc(&id);
            if !doc.get().exists() {
                return Err(format!("Document not found: {}", doc.path()).into());
            }
            doc.delete()?;
            print_output(&serde_json::json!({ "ok": true, "deleted": id }), &cli.format)?;
        }

        Command::Counter { name, by } => {
            let counter = store.document(&name, Options::persistent())?;
            let _sub = counter.on_snapshot(|snap| {
                log::debug!("{} -> {}", snap.path(), serde_json::Value::Object(snap.data()));
            });
            let current = counter.get().get("count").and_then(|v| v.as_i64()).unwrap_or(0);
            let mut fields = Fields::new();
            fields.insert("count".into(), serde_json::json!(current + by));
            counter.update(fields)?;
            print_output(&counter.get().to_json(), &cli.format)?;
        }

        Command::Keys => {
            let keys = store.backend().keys()?;
            print_output(&serde_json::json!(keys), &cli.format)?;
        }
    }

    Ok(())
}

/// Resolve `root/doc/sub/doc/sub...` to a collection. The first segment is
/// opened as a persistent root so writes anywhere below are saved. The root
/// handle is returned too; dropping it would detach the subtree.
fn open_collection(
    store: &LocalStore,
    path: &str,
) -> Result<(Collection, Collection), Box<dyn std::error::Error>> {
    let segments = localref::path::segments(path);
    if segments.is_empty() || segments.len() % 2 == 0 {
        return Err(format!("Not a collection path: '{path}'").into());
    }

    let root = store.collection(segments[0], Options::persistent())?;
    let mut target = root.clone();
    for pair in segments[1..].chunks(2) {
        target = target.doc(pair[0]).collection(pair[1]);
    }
    Ok((root, target))
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}

fn fields_to_map(fields: &[(String, String)]) -> Fields {
    let mut map = Fields::new();
    for (key, val) in fields {
        // Try to parse as JSON value (for numbers, booleans, arrays, objects)
        let json_val = serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    map
}
