//! Interactive client for a distkv server
//!
//! Reads `get`/`put` commands from stdin and prints the results

use clap::Parser;
use distkv::{Client, DistKvError};
use std::io::{self, Write};

#[derive(Debug, Parser)]
#[command(author, version, about = "Interactive distkv client", long_about = None)]
struct Args {
    /// Server address
    #[arg(default_value = "127.0.0.1:3108", env = "DISTKV_SERVER")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to distkv server at {}...", args.server);
    let mut client = Client::connect(&args.server).await?;
    println!("Connected! Type 'help' for available commands or 'quit' to exit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => {
                print_help();
            }
            _ => {
                if let Err(e) = handle_command(&mut client, input).await {
                    println!("Error: {}", e);
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}

async fn handle_command(client: &mut Client, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parts: Vec<&str> = input.splitn(3, char::is_whitespace).collect();

    match parts[0].to_ascii_lowercase().as_str() {
        "put" | "set" => {
            if parts.len() != 3 {
                println!("Usage: put <key> <value>");
                return Ok(());
            }

            client.put(parts[1].as_bytes(), parts[2].as_bytes()).await?;
            println!("OK");
        }
        "get" => {
            if parts.len() != 2 {
                println!("Usage: get <key>");
                return Ok(());
            }

            match client.get(parts[1].as_bytes()).await {
                Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
                Err(DistKvError::KeyNotFound) => println!("(nil)"),
                Err(e) => return Err(e.into()),
            }
        }
        other => {
            println!("Unknown command: {}. Type 'help' for available commands.", other);
        }
    }

    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!("  put <key> <value>  - Store a value (the value may contain spaces)");
    println!("  get <key>          - Get value by key");
    println!("  help               - Show this help message");
    println!("  quit               - Exit the client");
}
