use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Client for the bridge-relay HTTP API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8090")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a relay
    Submit {
        payload: String,
        destination: String,
        /// Payload is base64
        #[arg(long)]
        base64: bool,
    },
    /// Show the stage or result of a relay
    Status { id: String },
    /// Stop polling and retrying for a relay
    Cancel { id: String },
    /// Check service health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Submit {
            payload,
            destination,
            base64,
        } => {
            let body = json!({
                "payload": payload,
                "destination": destination,
                "encoding": if base64 { "base64" } else { "utf8" },
            });
            let res = client
                .post(format!("{}/v1/relays", base))
                .json(&body)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Status { id } => {
            let res = client.get(format!("{}/v1/relays/{}", base, id)).send().await?;
            print_response(res).await?;
        }
        Commands::Cancel { id } => {
            let res = client
                .delete(format!("{}/v1/relays/{}", base, id))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Health => {
            let res = client.get(format!("{}/health", base)).send().await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: relay API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
