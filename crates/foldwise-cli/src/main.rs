//! foldwise CLI, the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;
mod dataset;
mod observer;

#[derive(Parser)]
#[command(name = "foldwise", version, about = "Cross-validation and model evaluation engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run repeated cross-validation
    Run {
        /// Config file path (default: ./foldwise.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory (default: output_dir from the config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Output format: json, html, csv, all (comma-separated)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Train on every non-test subject and evaluate on a held-out set
    Test {
        /// Config file path (default: ./foldwise.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// File listing held-out subject ids, one per line
        #[arg(long)]
        test_subjects: Option<PathBuf>,

        /// Output directory (default: output_dir from the config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Output format: json, html, csv, all (comma-separated)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Compare two evaluation reports
    Compare {
        /// Baseline report JSON
        #[arg(long)]
        baseline: PathBuf,

        /// Current report JSON
        #[arg(long)]
        current: PathBuf,

        /// Regression threshold on metric means
        #[arg(long, default_value = "0.01")]
        threshold: f64,

        /// Exit code 1 if regressions found
        #[arg(long)]
        fail_on_regression: bool,

        /// Output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Check an experiment config for problems
    Validate {
        /// Config file path (default: ./foldwise.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter config and example dataset
    Init,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("foldwise=info".parse().expect("static directive")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            output,
            format,
        } => commands::run::execute(config, output, format),
        Commands::Test {
            config,
            test_subjects,
            output,
            format,
        } => commands::test::execute(config, test_subjects, output, format),
        Commands::Compare {
            baseline,
            current,
            threshold,
            fail_on_regression,
            format,
        } => commands::compare::execute(baseline, current, threshold, fail_on_regression, format),
        Commands::Validate { config } => commands::validate::execute(config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
