mod event;
mod sse;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use sse::SseEvent;

#[derive(Debug, Parser)]
#[command(
    name = "turbotrap-cli",
    about = "Follow the turbotrapd incident feed or query its attack summary"
)]
struct Args {
    /// Base URL of the turbotrapd observability API.
    #[arg(long, env = "TURBOTRAP_URL", default_value = "http://127.0.0.1:5000")]
    url: String,

    /// Print the attack summary and exit instead of following the feed.
    #[arg(long)]
    summary: bool,

    /// Emit raw JSON lines instead of formatted output.
    #[arg(long)]
    json: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.summary {
        print_summary(&args).await
    } else {
        follow_feed(&args).await
    }
}

async fn print_summary(args: &Args) -> Result<()> {
    let summary: serde_json::Value = reqwest::get(format!("{}/api/summary", args.url))
        .await
        .context("failed to reach turbotrapd")?
        .error_for_status()?
        .json()
        .await
        .context("malformed summary response")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Total attacks:     {}", summary["total_attacks"]);
    println!("Unique attackers:  {}", summary["unique_attackers"]);
    println!("Suspicious writes: {}", summary["suspicious_writes"]);
    if let Some(tally) = summary["function_code_tally"].as_object() {
        println!("Function codes:");
        for (code, count) in tally {
            println!("  {code:>3} -> {count}");
        }
    }
    Ok(())
}

async fn follow_feed(args: &Args) -> Result<()> {
    let response = reqwest::Client::new()
        .get(format!("{}/feed", args.url))
        .send()
        .await
        .context("failed to reach turbotrapd")?
        .error_for_status()?;

    let mut stream = sse::SseStream::new(response.bytes_stream());
    while let Some(item) = stream.next().await {
        match item.context("feed connection lost")? {
            SseEvent::Data(payload) => {
                if args.json {
                    println!("{payload}");
                    continue;
                }
                match serde_json::from_str::<event::FeedEvent>(&payload) {
                    Ok(event) => println!("{}", event.pretty(!args.no_color)),
                    Err(e) => eprintln!("skipping unparseable feed event: {e}"),
                }
            }
            SseEvent::Heartbeat => {}
        }
    }
    Ok(())
}
