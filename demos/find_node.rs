use std::str::FromStr;
use std::time::Instant;

use clap::Parser;
use tracing::Level;

use xorkad::{Id, Testnet};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Size of the simulated network
    #[arg(short, long, default_value_t = 64)]
    nodes: usize,

    /// Target id to look up, hex encoded. Random if omitted.
    target: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        // Switch to TRACE to see individual requests and responses
        .with_max_level(Level::DEBUG)
        .init();

    let cli = Cli::parse();

    let target = match cli.target {
        Some(hex) => Id::from_str(&hex).expect("Expected a 64 character hex id"),
        None => Id::random(),
    };

    let testnet = Testnet::new(cli.nodes);
    let dht = testnet.client();

    println!("Looking up the closest nodes to {} ...", target);

    let start = Instant::now();
    let nodes = dht.find_node(target).unwrap();

    println!(
        "\nGot {} responding nodes in {:?}:",
        nodes.len(),
        start.elapsed()
    );

    for node in &nodes {
        println!(
            "{} at {} in {:?}",
            node.id(),
            node.node().address,
            node.rtt().unwrap_or_default()
        );
    }
}
