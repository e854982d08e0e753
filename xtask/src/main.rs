//! Build automation tasks for the rust-sproc-gateway workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sproc_client::Config;
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for rust-sproc-gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test)
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy with all features
    Clippy,
    /// Run all tests
    Test,
    /// Generate documentation
    Doc,
    /// Run a fuzz target (requires cargo-fuzz and a nightly toolchain)
    Fuzz {
        /// Target name under fuzz/fuzz_targets
        #[arg(default_value = "config_parse")]
        target: String,
        /// Time budget in seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
    /// Parse and validate a gateway configuration file
    CheckConfig {
        /// Path to the JSON configuration
        path: PathBuf,
    },
    /// Clean build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to workspace root
    let workspace_root = workspace_root()?;

    match cli.command {
        Command::Ci => {
            sh.change_dir(&workspace_root);
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => {
            sh.change_dir(&workspace_root);
            fmt(&sh)?;
        }
        Command::Clippy => {
            sh.change_dir(&workspace_root);
            clippy(&sh)?;
        }
        Command::Test => {
            sh.change_dir(&workspace_root);
            test(&sh)?;
        }
        Command::Doc => {
            sh.change_dir(&workspace_root);
            doc(&sh)?;
        }
        Command::Fuzz { target, seconds } => {
            sh.change_dir(workspace_root.join("fuzz"));
            fuzz(&sh, &target, seconds)?;
        }
        Command::CheckConfig { path } => check_config(&path)?,
        Command::Clean => {
            sh.change_dir(&workspace_root);
            clean(&sh)?;
        }
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    println!("Formatting check passed.");
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(
        sh,
        "cargo clippy --all-features --all-targets -- -D warnings"
    )
    .run()?;
    println!("Clippy check passed.");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("Running tests...");
    cmd!(sh, "cargo test --all-features").run()?;
    println!("All tests passed.");
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Generating documentation...");
    cmd!(sh, "cargo doc --all-features --no-deps").run()?;
    println!("Documentation generated.");
    Ok(())
}

fn fuzz(sh: &Shell, target: &str, seconds: u64) -> Result<()> {
    println!("Fuzzing {target} for {seconds}s...");
    let budget = format!("-max_total_time={seconds}");
    cmd!(sh, "cargo +nightly fuzz run {target} -- {budget}").run()?;
    println!("Fuzz run finished.");
    Ok(())
}

fn check_config(path: &std::path::Path) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    let registry = config
        .manifest_registry()
        .context("invalid procedure manifests")?;

    println!(
        "{}: {} connection(s), {} procedure(s), default connection '{}'",
        path.display(),
        config.connections.len(),
        registry.len(),
        config.default_connection
    );
    for manifest in registry.iter() {
        let keys: Vec<_> = manifest.params().iter().map(|b| b.key.as_str()).collect();
        println!("  {} -> {}({})", manifest.id(), manifest.procedure(), keys.join(", "));
    }
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("Clean complete.");
    Ok(())
}
