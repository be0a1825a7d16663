use clap::Parser;
use radius_tracer::cli::{args::Args, commands};
use std::process;
use tokio_util::sync::CancellationToken;

fn main() {
    let args = Args::parse();

    if args.command.is_none() {
        show_help_and_commands();
        process::exit(0);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        // One token coordinates shutdown across orchestrators, heartbeat,
        // and per-source watchers
        let cancellation_token = CancellationToken::new();

        let signal_token = cancellation_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nReceived CTRL+C, finishing in-flight batches...");
                signal_token.cancel();
            }
        });

        commands::run(args, cancellation_token).await
    });

    match result {
        Ok(()) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}

/// Show help information when no subcommand is provided
fn show_help_and_commands() {
    println!("RADIUS Tracer - Accounting Detail Ingestion");
    println!("===========================================");
    println!();
    println!("Ingest RADIUS accounting detail files into a subscriber location");
    println!("history and a latest-known-location projection.");
    println!();
    println!("USAGE:");
    println!("    radius-tracer <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    backfill    Process today's detail files once, then exit");
    println!("    watch       Continuously tail today's detail files as they grow");
    println!("    help        Show this help message or help for specific commands");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Show help information");
    println!("    -V, --version    Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    # One-shot catch-up over today's files:");
    println!("    radius-tracer backfill --accounting-dir /var/log/freeradius/radacct");
    println!();
    println!("    # Keep files in place and accept any event day:");
    println!("    radius-tracer backfill --keep-files --all-days");
    println!();
    println!("    # Follow live appends with a 2s poll:");
    println!("    radius-tracer watch --poll-interval 2");
    println!();
    println!("For detailed help on any command, use:");
    println!("    radius-tracer <COMMAND> --help");
}
