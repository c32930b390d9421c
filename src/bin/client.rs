//! Command-line client for a CheckVault server
//!
//! Runs a single command when one is given, otherwise an interactive shell.

use checkvault::Client;
use clap::{Parser, Subcommand};
use std::io::{self, Write};

#[derive(Parser, Debug)]
#[command(author, version, about = "CheckVault client")]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the checkpoint of a pipeline
    Get { pipeline: String },
    /// Store the checkpoint of a pipeline
    Set {
        pipeline: String,
        value: String,
        /// Expire the checkpoint after this many seconds
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Compact the server's append-only file
    Compact,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new(cli.server);

    match cli.command {
        Some(command) => run(&client, command).await,
        None => shell(&client).await,
    }
}

async fn run(client: &Client, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Get { pipeline } => match client.get_checkpoint(&pipeline).await? {
            Some(value) => println!("{}", value),
            None => println!("(nil)"),
        },
        Command::Set {
            pipeline,
            value,
            ttl,
        } => {
            client.set_checkpoint(&pipeline, &value, ttl).await?;
            println!("OK");
        }
        Command::Compact => {
            client.compact().await?;
            println!("OK");
        }
    }
    Ok(())
}

async fn shell(client: &Client) -> Result<(), Box<dyn std::error::Error>> {
    println!("CheckVault server at {}", client.addr());
    println!("Type 'help' for available commands or 'quit' to exit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        match input {
            "" => continue,
            "quit" | "exit" => break,
            "help" => print_help(),
            _ => match parse_shell_command(input) {
                Some(command) => {
                    if let Err(e) = run(client, command).await {
                        println!("Error: {}", e);
                    }
                }
                None => println!("Unrecognized input. Type 'help' for available commands."),
            },
        }
    }

    Ok(())
}

fn parse_shell_command(input: &str) -> Option<Command> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.as_slice() {
        ["get", pipeline] => Some(Command::Get {
            pipeline: pipeline.to_string(),
        }),
        ["set", pipeline, value] => Some(Command::Set {
            pipeline: pipeline.to_string(),
            value: value.to_string(),
            ttl: None,
        }),
        ["set", pipeline, value, ttl] => Some(Command::Set {
            pipeline: pipeline.to_string(),
            value: value.to_string(),
            ttl: Some(ttl.parse().ok()?),
        }),
        ["compact"] => Some(Command::Compact),
        _ => None,
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  get <pipeline>                - Show the checkpoint of a pipeline");
    println!("  set <pipeline> <value> [ttl]  - Store a checkpoint, optionally expiring");
    println!("  compact                       - Compact the server's append-only file");
    println!("  help                          - Show this help message");
    println!("  quit                          - Exit the client");
}
