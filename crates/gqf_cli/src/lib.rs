//! Command-line interface for gqf.
//!
//! # Usage
//!
//! ```bash
//! # Run a query or mutation
//! gqf --endpoint http://localhost:4000/graphql query user.graphql --variables '{"id": "1"}'
//!
//! # Follow a subscription over WebSocket
//! gqf --endpoint http://localhost:4000/graphql --transport ws subscribe ticks.graphql
//!
//! # Print a document canonically
//! gqf print user.graphql
//!
//! # Show the operation kind and the operation key
//! gqf classify user.graphql
//! gqf key user.graphql --variables '{"id": "1"}'
//! ```
//!
//! A file argument of `-` reads the document from stdin.

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use gqf_client::{
    classify, ClientConfig, GqfClient, OperationKey, Schema, SessionState, SubscriptionHandle,
    TransportKind,
};
use gqf_syntax::{parse, print, OperationDocument, TypedDocument};
use serde_json::Value;
use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "gqf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// GraphQL endpoint
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Subscription transport
    #[arg(long, value_enum, global = true, default_value = "sse")]
    pub transport: TransportArg,

    /// Extra header, as `name:value`. Repeatable.
    #[arg(long = "header", short = 'H', global = true)]
    pub headers: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    /// Server-sent events
    Sse,
    /// WebSocket (graphql-transport-ws)
    Ws,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Sse => TransportKind::Sse,
            TransportArg::Ws => TransportKind::Ws,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a query or mutation and print the data
    Query {
        /// Document file, or `-` for stdin
        file: PathBuf,

        /// Variables as a JSON object
        #[arg(long, default_value = "{}")]
        variables: String,
    },

    /// Follow a subscription and print each result
    Subscribe {
        /// Document file, or `-` for stdin
        file: PathBuf,

        /// Variables as a JSON object
        #[arg(long, default_value = "{}")]
        variables: String,

        /// Stop after this many results
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a document canonically
    Print {
        file: PathBuf,
    },

    /// Print the kind of the document's operation
    Classify {
        file: PathBuf,
    },

    /// Print the operation key of a document and its variables
    Key {
        file: PathBuf,

        /// Variables as a JSON object
        #[arg(long, default_value = "{}")]
        variables: String,
    },
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn Error>> {
    match &cli.command {
        Commands::Query { file, variables } => {
            let Some(document) = load_document(file)? else {
                return Ok(1);
            };
            run_query(&cli, document, parse_variables(variables)?).await
        }
        Commands::Subscribe {
            file,
            variables,
            limit,
        } => {
            let Some(document) = load_document(file)? else {
                return Ok(1);
            };
            run_subscription(&cli, document, parse_variables(variables)?, *limit).await
        }
        Commands::Print { file } => {
            let Some(document) = load_document(file)? else {
                return Ok(1);
            };
            println!("{}", print(&document));
            Ok(0)
        }
        Commands::Classify { file } => {
            let Some(document) = load_document(file)? else {
                return Ok(1);
            };
            match classify(&document) {
                Ok(kind) => {
                    println!("{kind}");
                    Ok(0)
                }
                Err(err) => {
                    eprintln!("{} {}", "Error".red().bold(), err);
                    Ok(1)
                }
            }
        }
        Commands::Key { file, variables } => {
            let Some(document) = load_document(file)? else {
                return Ok(1);
            };
            println!("{}", OperationKey::new(&document, &parse_variables(variables)?));
            Ok(0)
        }
    }
}

fn read_source(path: &Path) -> Result<String, Box<dyn Error>> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        Ok(source)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Parses a document file. Syntax errors are reported here and yield
/// `None`.
fn load_document(path: &Path) -> Result<Option<OperationDocument>, Box<dyn Error>> {
    let source = read_source(path)?;
    match parse(&source) {
        Ok(document) => Ok(Some(document)),
        Err(err) => {
            let report = miette::Report::new(err).wrap_err(format!("cannot parse {}", path.display()));
            eprintln!("{report:?}");
            Ok(None)
        }
    }
}

pub fn parse_variables(source: &str) -> Result<Value, Box<dyn Error>> {
    let value: Value = serde_json::from_str(source)?;
    if !value.is_object() && !value.is_null() {
        return Err("variables must be a JSON object".into());
    }
    Ok(value)
}

/// Splits `name:value`.
pub fn parse_header(header: &str) -> Result<(String, String), Box<dyn Error>> {
    let (name, value) = header
        .split_once(':')
        .ok_or_else(|| format!("header `{header}` is not of the form name:value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header `{header}` has an empty name").into());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn client(cli: &Cli) -> Result<GqfClient, Box<dyn Error>> {
    let mut config = ClientConfig::default();
    if let Some(endpoint) = &cli.endpoint {
        config = config.endpoint(endpoint.clone());
    }
    for header in &cli.headers {
        let (name, value) = parse_header(header)?;
        config = config.header(name, value);
    }
    let client = GqfClient::new(Schema::new(), config)?.with_transport(cli.transport.into());
    debug!(endpoint = client.endpoint(), transport = TransportKind::from(cli.transport).name(), "client ready");
    Ok(client)
}

async fn run_query(cli: &Cli, document: OperationDocument, variables: Value) -> Result<i32, Box<dyn Error>> {
    let client = client(cli)?;
    let operation = client.define_operation(TypedDocument::<Value, Value>::new(document), None)?;
    if cli.verbose {
        println!("{} {} {}", "Sending".blue(), operation.operation_type(), client.endpoint());
    }

    match operation.call(variables, None).await {
        Ok(data) => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(0)
        }
        Err(err) => {
            eprintln!("{} {}", "Error".red().bold(), err);
            Ok(1)
        }
    }
}

async fn run_subscription(
    cli: &Cli,
    document: OperationDocument,
    variables: Value,
    limit: Option<usize>,
) -> Result<i32, Box<dyn Error>> {
    let client = client(cli)?;
    let subscription =
        client.define_subscription(TypedDocument::<Value, Value>::new(document), None)?;

    let handle = match subscription.subscribe(variables, None).await {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{} {}", "Error".red().bold(), err);
            return Ok(1);
        }
    };
    if !cli.quiet {
        eprintln!("{} {} ({})", "Subscribed".green(), handle.key(), TransportKind::from(cli.transport).name());
    }

    let (code, received) = follow(&handle, limit).await?;
    handle.unsubscribe();
    if cli.verbose {
        println!("{} after {} result(s)", "Unsubscribed".dimmed(), received);
    }
    Ok(code)
}

/// Prints results until `limit` results arrived, the session closed or
/// ctrl-c. Returns the exit code and the number of results.
async fn follow(
    handle: &SubscriptionHandle<Value>,
    limit: Option<usize>,
) -> Result<(i32, usize), Box<dyn Error>> {
    let mut rx = handle.watch();
    let mut seen = 0;
    let mut received = 0;
    let code = loop {
        let snapshot = rx.borrow_and_update().clone();
        if snapshot.updates > seen {
            // Bursts coalesce into the latest result but still count.
            received += usize::try_from(snapshot.updates - seen).unwrap_or(usize::MAX);
            seen = snapshot.updates;
            if let Some(data) = &snapshot.data {
                println!("{}", serde_json::to_string(data)?);
            }
            if limit.is_some_and(|limit| received >= limit) {
                break 0;
            }
        }
        if snapshot.state == SessionState::Closed {
            break match snapshot.error {
                Some(err) => {
                    eprintln!("{} {}", "Closed".red().bold(), err);
                    1
                }
                None => 0,
            };
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break 0;
                }
            }
            _ = tokio::signal::ctrl_c() => break 0,
        }
    };
    Ok((code, received))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use gqf_client::{ClientResult, OperationContext, SubscriptionDescriptor, TransportSink};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from([
            "gqf",
            "--endpoint",
            "http://localhost/graphql",
            "--transport",
            "ws",
            "-H",
            "authorization: Bearer t",
            "subscribe",
            "ticks.graphql",
            "--limit",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.transport, TransportArg::Ws);
        assert_eq!(cli.headers, ["authorization: Bearer t"]);
        match cli.command {
            Commands::Subscribe { file, limit, .. } => {
                assert_eq!(file, PathBuf::from("ticks.graphql"));
                assert_eq!(limit, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("x-app: demo").unwrap(),
            ("x-app".to_string(), "demo".to_string())
        );
        assert_eq!(parse_header("url:http://h").unwrap().1, "http://h");
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": empty").is_err());
    }

    #[test]
    fn test_parse_variables() {
        assert_eq!(parse_variables(r#"{"id": 1}"#).unwrap()["id"], 1);
        assert!(parse_variables("[1]").is_err());
        assert!(parse_variables("{").is_err());
    }

    #[tokio::test]
    async fn test_follow_counts_repeated_results() {
        let transport = Arc::new(
            |sink: TransportSink, _: SubscriptionDescriptor, _: OperationContext| -> ClientResult<()> {
                sink.update(json!({ "tick": 1 }));
                sink.update(json!({ "tick": 1 }));
                Ok(())
            },
        );
        let client = GqfClient::new(Schema::with_endpoint("http://localhost/graphql"), ClientConfig::default())
            .unwrap()
            .with_transport(TransportKind::Custom(transport));
        let ticks = client
            .define_subscription(TypedDocument::<Value, Value>::parse("subscription { tick }").unwrap(), None)
            .unwrap();
        let handle = ticks.subscribe(json!({}), None).await.unwrap();

        let followed = tokio::time::timeout(Duration::from_secs(5), follow(&handle, Some(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(followed, (0, 2));
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_offline_commands() {
        let path = std::env::temp_dir().join(format!("gqf-cli-{}.graphql", std::process::id()));
        std::fs::write(&path, "query Q($id: ID) { user(id: $id) { name } }").unwrap();

        for command in ["print", "classify", "key"] {
            let cli = Cli::try_parse_from(["gqf", command, path.to_str().unwrap()]).unwrap();
            assert_eq!(run(cli).await.unwrap(), 0, "{command}");
        }

        let cli = Cli::try_parse_from(["gqf", "query", path.to_str().unwrap()]).unwrap();
        assert!(run(cli).await.is_err(), "no endpoint configured");

        std::fs::write(&path, "query {").unwrap();
        let cli = Cli::try_parse_from(["gqf", "print", path.to_str().unwrap()]).unwrap();
        assert_eq!(run(cli).await.unwrap(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
