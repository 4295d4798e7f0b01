//! The `foldwise init` command.

use std::path::Path;

use anyhow::Result;

use foldwise_models::config::starter_config;

pub fn execute() -> Result<()> {
    // Create foldwise.toml
    if Path::new("foldwise.toml").exists() {
        println!("foldwise.toml already exists, skipping.");
    } else {
        std::fs::write("foldwise.toml", starter_config())?;
        println!("Created foldwise.toml");
    }

    // Create example dataset
    let data_path = Path::new("data.csv");
    if data_path.exists() {
        println!("data.csv already exists, skipping.");
    } else {
        std::fs::write(data_path, example_dataset(60))?;
        println!("Created data.csv");
    }

    println!("\nNext steps:");
    println!("  1. Point [data] path in foldwise.toml at your own CSV");
    println!("  2. Run: foldwise validate");
    println!("  3. Run: foldwise run --format all");

    Ok(())
}

/// A small regression dataset where `target` depends on `x1` and `x2` only.
fn example_dataset(n: usize) -> String {
    let mut csv = String::from("subject,x1,x2,x3,target\n");
    for i in 0..n {
        let x1 = (i % 10) as f64 / 2.0;
        let x2 = ((i * 7) % 13) as f64 / 4.0;
        let x3 = ((i * 5) % 11) as f64;
        let noise = ((i * 3) % 7) as f64 / 20.0;
        let target = 2.0 * x1 - x2 + noise;
        csv.push_str(&format!("sub-{i:03},{x1},{x2},{x3},{target:.4}\n"));
    }
    csv
}
