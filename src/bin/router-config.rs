use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use router_sync::ports::PortMapping;
use router_sync::router::{ConnectorDifference, Endpoint, EndpointDifference, RouterConfig, CONFIG_KEY};

#[derive(Parser)]
#[command(name = "router-config")]
#[command(about = "Inspect router configuration documents", long_about = None)]
struct Cli {
    /// Key holding the document when a file contains key/value data.
    #[arg(short, long, default_value = CONFIG_KEY)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarise a configuration document
    Decode { file: PathBuf },
    /// Show what would change to turn one document into another
    Diff { actual: PathBuf, desired: PathBuf },
    /// Show the router ports allocated to bridge listeners
    Ports { file: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { file } => {
            let config = read(&file, &cli.key)?;
            print_summary(&config);
        }
        Commands::Diff { actual, desired } => {
            let actual = read(&actual, &cli.key)?;
            let desired = read(&desired, &cli.key)?;
            print_difference(&actual, &desired);
        }
        Commands::Ports { file } => {
            let config = read(&file, &cli.key)?;
            let mut mapping = PortMapping::default();
            mapping.recover(&config);
            println!("{}", mapping);
        }
    }

    Ok(())
}

/// Accepts a raw document or a JSON object holding it under `key`.
fn read(path: &Path, key: &str) -> Result<RouterConfig, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    if content.trim_start().starts_with('{') {
        let data: std::collections::BTreeMap<String, String> = serde_json::from_str(&content)?;
        let document = data
            .get(key)
            .ok_or_else(|| format!("{}: no '{}' entry", path.display(), key))?;
        Ok(RouterConfig::decode(document)?)
    } else {
        Ok(RouterConfig::decode(&content)?)
    }
}

fn print_summary(config: &RouterConfig) {
    let site = config.site_metadata();
    println!("router:      {} ({:?})", config.metadata.id, config.metadata.mode);
    println!("site:        {} {}", site.id, site.version);
    println!("listeners:   {}", names(config.listeners.keys()));
    println!("connectors:  {}", names(config.connectors.keys()));
    println!("sslProfiles: {}", names(config.ssl_profiles.keys()));
    println!("addresses:   {}", names(config.addresses.keys()));
    let bridges = &config.bridges;
    println!("tcpListeners:   {}", names(bridges.tcp_listeners.keys()));
    println!("tcpConnectors:  {}", names(bridges.tcp_connectors.keys()));
    println!("httpListeners:  {}", names(bridges.http_listeners.keys()));
    println!("httpConnectors: {}", names(bridges.http_connectors.keys()));
}

fn names<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    let keys: Vec<&str> = keys.map(String::as_str).collect();
    if keys.is_empty() {
        "-".to_string()
    } else {
        keys.join(", ")
    }
}

fn print_endpoints<E: Endpoint>(category: &str, difference: &EndpointDifference<E>) {
    for name in &difference.deleted {
        println!("- {} {}", category, name);
    }
    for endpoint in &difference.added {
        println!("+ {} {}", category, endpoint.name());
    }
}

fn print_difference(actual: &RouterConfig, desired: &RouterConfig) {
    let bridges = actual.bridges.difference(&desired.bridges);
    print_endpoints("tcpListener", &bridges.tcp_listeners);
    print_endpoints("tcpConnector", &bridges.tcp_connectors);
    print_endpoints("httpListener", &bridges.http_listeners);
    print_endpoints("httpConnector", &bridges.http_connectors);
    for name in &bridges.added_ssl_profiles {
        println!("+ sslProfile {}", name);
    }
    for name in &bridges.deleted_ssl_profiles {
        println!("- sslProfile {}", name);
    }

    let connectors = ConnectorDifference::compute(&actual.connectors, desired, None);
    for connector in &connectors.deleted {
        println!("- connector {}", connector.name);
    }
    for connector in &connectors.added {
        println!("+ connector {}", connector.name);
    }

    if bridges.is_empty() && connectors.is_empty() {
        println!("no differences");
    }
}
