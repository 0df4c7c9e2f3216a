use std::sync::mpsc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::Level;

use xorkad::rpc::Config;
use xorkad::{Dht, Id, Testnet};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Size of the simulated network
    #[arg(short, long, default_value_t = 128)]
    nodes: usize,

    /// Fraction of nodes taken offline before each lookup
    #[arg(short, long, default_value_t = 0.2)]
    churn: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    let testnet = Testnet::new(cli.nodes);

    let mut dht = Dht::builder()
        .config(Config {
            // Offline nodes never answer, keep the wait for them short.
            base_timeout: Duration::from_millis(250),
            ..Default::default()
        })
        .build(
            Box::new(testnet.transport()),
            Box::new(testnet.routing_table()),
        );

    println!(
        "Soaking a testnet of {} nodes with {:.0}% churn. Press CTRL+C to stop and see the summary",
        cli.nodes,
        cli.churn * 100.0
    );

    let (tx_interrupted, rx_interrupted) = mpsc::channel::<()>();

    ctrlc::set_handler(move || {
        tx_interrupted.send(()).unwrap();
    })
    .expect("Error setting Ctrl-C handler");

    let all = testnet.nodes();

    let mut lookups = 0u32;
    let mut responders = 0usize;
    let mut elapsed = Duration::ZERO;

    while rx_interrupted.try_recv().is_err() {
        for node in &all {
            testnet.set_online(&node.id, true);
        }
        for node in all.iter().filter(|_| rand::random::<f64>() < cli.churn) {
            testnet.set_online(&node.id, false);
        }

        let start = Instant::now();
        let found = dht.find_node(Id::random()).unwrap();

        lookups += 1;
        responders += found.len();
        elapsed += start.elapsed();

        println!(
            "lookup {:>4}: {:>2} responders in {:?}",
            lookups,
            found.len(),
            start.elapsed()
        );
    }

    dht.shutdown();

    println!();
    println!("=== SUMMARY ===");
    println!("Lookups:            {}", lookups);
    println!(
        "Responders per run: {:.1}",
        responders as f64 / lookups.max(1) as f64
    );
    println!("Time per run:       {:?}", elapsed / lookups.max(1));
}
