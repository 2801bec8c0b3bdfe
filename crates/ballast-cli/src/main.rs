mod driver;
mod executor;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ballast", version, about = "Coarse-grained task scheduling with skew mitigation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the driver endpoint
    Driver(DriverArgs),
    /// Run an executor process
    Executor(ExecutorArgs),
}

#[derive(Args)]
struct DriverArgs {
    /// The application id announced to executors
    #[arg(long, default_value = "ballast-app")]
    app_id: String,
    /// The number of in-process executors to launch; zero expects
    /// externally managed executor processes
    #[arg(long, default_value_t = 0)]
    local_executors: usize,
    /// Cores per in-process executor
    #[arg(long, default_value_t = 1)]
    cores_per_executor: usize,
}

#[derive(Args)]
struct ExecutorArgs {
    /// The driver endpoint, e.g. http://10.0.0.1:7077
    #[arg(long)]
    driver_url: String,
    #[arg(long)]
    executor_id: String,
    /// The externally reachable hostname of this executor
    #[arg(long)]
    hostname: String,
    #[arg(long)]
    cores: usize,
    #[arg(long)]
    app_id: String,
    /// The worker endpoint supervising this executor, if any
    #[arg(long)]
    worker_url: Option<String>,
    /// Additional entries for the task class path, may repeat
    #[arg(long = "user-class-path")]
    user_class_path: Vec<String>,
}

fn main() {
    ballast_common::logging::init_logger();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => std::process::exit(0),
                _ => std::process::exit(1),
            }
        }
    };
    let out = match cli.command {
        Command::Driver(args) => driver::run_driver(args),
        Command::Executor(args) => executor::run_executor(args),
    };
    if let Err(e) = out {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
