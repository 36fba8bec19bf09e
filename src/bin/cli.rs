//! OpalKV CLI Client
//!
//! Command-line interface for interacting with an OpalKV server.

use clap::{Parser, Subcommand};

use opalkv::{Client, Config, Response, Value};

/// OpalKV CLI
#[derive(Parser, Debug)]
#[command(name = "opalkv-cli")]
#[command(about = "CLI for the OpalKV key-value store")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 7379)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete one or more keys
    Del {
        /// The keys to delete
        keys: Vec<String>,
    },

    /// Increment a key by 1
    Incr {
        key: String,
    },

    /// Decrement a key by 1
    Decr {
        key: String,
    },

    /// Count how many of the given keys exist
    Exists {
        keys: Vec<String>,
    },

    /// Remaining time to live of a key
    Ttl {
        key: String,
    },

    /// Type of the value stored at a key
    Type {
        key: String,
    },

    /// Delete every key in the database
    Flush,

    /// Ping the server
    Ping,

    /// Stream change notifications for a key until interrupted
    Watch {
        key: String,
    },
}

fn print_response(response: &Response) {
    match &response.value {
        Some(value) => println!("{value}"),
        None => println!("OK"),
    }
}

fn main() -> opalkv::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let client = Client::new(Config::new(args.host, args.port));
    client.connect()?;

    match args.command {
        Commands::Get { key } => print_response(&client.get(&key)?),
        Commands::Set { key, value } => print_response(&client.set(&key, &value)?),
        Commands::Del { keys } => {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            print_response(&client.del(&keys)?);
        }
        Commands::Incr { key } => print_response(&client.incr(&key)?),
        Commands::Decr { key } => print_response(&client.decr(&key)?),
        Commands::Exists { keys } => {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            print_response(&client.exists(&keys)?);
        }
        Commands::Ttl { key } => print_response(&client.ttl(&key)?),
        Commands::Type { key } => print_response(&client.key_type(&key)?),
        Commands::Flush => print_response(&client.flush()?),
        Commands::Ping => print_response(&client.ping()?),
        Commands::Watch { key } => {
            let session = client.watch(&key)?;
            let (tx, rx) = crossbeam::channel::unbounded::<Value>();
            session.register_listener(move |value| {
                let _ = tx.send(value.clone());
            });
            eprintln!("Watching '{key}' (Ctrl-C to stop)");
            for value in rx.iter() {
                println!("{value}");
            }
            session.close()?;
        }
    }

    client.close();
    Ok(())
}
