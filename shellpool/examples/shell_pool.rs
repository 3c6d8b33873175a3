//! Shell pool example: run commands from several workers on a shared pool
//!
//! This example starts a small pool of `/bin/sh` instances, runs a batch of
//! commands from concurrent tokio tasks and shuts the pool down.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example shell_pool -- --shells 4 --requests 12
//! ```
//!
//! Set `RUST_LOG=debug` to see sessions being spawned and torn down.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use shellpool::ShellPoolBuilder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    println!("Starting {} shells ({})...", args.shells, args.shell);
    let pool = Arc::new(
        ShellPoolBuilder::new(args.shells)
            .shell(&args.shell)
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .request_timeout(Duration::from_secs(args.timeout))
            .build()?,
    );

    let tasks: Vec<_> = (0..args.requests)
        .map(|i| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run_request_async(format!("echo request {i}; hostname")).await })
        })
        .collect();

    for task in tasks {
        let response = task.await??;
        if response.is_success() {
            println!(
                "{:>8.2?}  {}",
                response.elapsed,
                response.result.replace('\n', " | ")
            );
        } else {
            eprintln!("Command failed: {:?}", response.failure_message);
        }
    }

    println!("\nExecuting: uname -a");
    let response = pool.run_request_async("uname -a").await?;
    println!("System: {}", response.result.trim());

    println!("\nShutting down...");
    pool.shutdown(Duration::from_secs(2));
    println!("Done!");

    Ok(())
}

/// Simple argument parser
struct Args {
    shells: usize,
    requests: usize,
    shell: String,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut shells = 4usize;
        let mut requests = 12usize;
        let mut shell = shellpool::DEFAULT_SHELL.to_string();
        let mut timeout = 30u64;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--shells" | "-n" => {
                    i += 1;
                    if i < args.len() {
                        shells = args[i].parse().unwrap_or(4);
                    }
                }
                "--requests" | "-r" => {
                    i += 1;
                    if i < args.len() {
                        requests = args[i].parse().unwrap_or(12);
                    }
                }
                "--shell" | "-s" => {
                    i += 1;
                    if i < args.len() {
                        shell = args[i].clone();
                    }
                }
                "--timeout" | "-t" => {
                    i += 1;
                    if i < args.len() {
                        timeout = args[i].parse().unwrap_or(30);
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self {
            shells,
            requests,
            shell,
            timeout,
        }
    }

    fn print_help() {
        println!(
            r#"shellpool shell_pool example

USAGE:
    cargo run --example shell_pool -- [OPTIONS]

OPTIONS:
    -n, --shells <N>         Number of pooled shells [default: 4]
    -r, --requests <N>       Number of requests to run [default: 12]
    -s, --shell <PATH>       Shell binary [default: /bin/sh]
    -t, --timeout <SECS>     Per-request timeout [default: 30]
    --help                   Print this help message
"#
        );
    }
}
