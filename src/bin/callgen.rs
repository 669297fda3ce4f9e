//! Call generator
//!
//! Fires randomized elevator calls at a running liftbank instance and
//! prints the assignment each call received. Useful for watching the
//! fleet spread work and for eyeballing the MQTT fan-out.

use clap::Parser;
use serde_json::json;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "callgen", about = "Randomized elevator call generator")]
struct Args {
    /// Base URL of the liftbank HTTP API
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Number of calls to send
    #[arg(long, default_value = "20")]
    count: u32,

    /// Delay between calls in milliseconds
    #[arg(long, default_value = "500")]
    interval_ms: u64,

    /// Highest floor to request
    #[arg(long, default_value = "10")]
    floors: i32,

    /// Seed for the floor picker (0 = derive from the clock)
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Print the full fleet status after the run
    #[arg(long)]
    status: bool,
}

/// xorshift64 - no need for a rand crate for picking floors
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn floor(&mut self, max: i32) -> i32 {
        (self.next() % (max as u64 + 1)) as i32
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let seed = if args.seed != 0 {
        args.seed
    } else {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15)
            | 1
    };
    let mut rng = Rng(seed);

    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;

    println!("callgen: {} calls to {} (seed {})", args.count, args.url, seed);

    let mut accepted = 0u32;
    let mut rejected = 0u32;

    for i in 1..=args.count {
        let from = rng.floor(args.floors);
        let mut to = rng.floor(args.floors);
        while to == from {
            to = rng.floor(args.floors);
        }

        let response = client
            .post(format!("{}/call", args.url))
            .json(&json!({ "from": from, "to": to }))
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                if status.is_success() {
                    accepted += 1;
                    println!(
                        "[{i:3}] call {from} -> {to}: assigned {}",
                        body["car"].as_str().unwrap_or("?")
                    );
                } else {
                    rejected += 1;
                    println!(
                        "[{i:3}] call {from} -> {to}: {} ({})",
                        status,
                        body["error"].as_str().unwrap_or("no detail")
                    );
                }
            }
            Err(e) => {
                rejected += 1;
                println!("[{i:3}] call {from} -> {to}: request failed: {e}");
            }
        }

        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    println!("done: {accepted} accepted, {rejected} rejected");

    if args.status {
        let cars: serde_json::Value =
            client.get(format!("{}/status", args.url)).send().await?.json().await?;
        println!("{}", serde_json::to_string_pretty(&cars)?);
    }

    Ok(())
}
