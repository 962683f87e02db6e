use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "svw")]
#[command(about = "svcwarden - supervise a service and track its remote tasks")]
#[command(version)]
struct Cli {
    /// Path to the svcwarden directory (default: .svw in current dir)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Output as JSON for machine consumption
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new svcwarden directory with default configuration
    Init,

    /// Run the service in the foreground, polling health and task status
    Run {
        /// Only monitor; don't launch the service
        #[arg(long)]
        no_start: bool,

        /// Poll interval in seconds (overrides remote.poll_interval)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Probe the health endpoint once (exit status 1 if unreachable)
    Check,

    /// Kill leftover service processes matching the kill pattern
    Stop,

    /// Manage tracked tasks
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// List tracked tasks
    List,

    /// Track task ids by hand
    Add {
        /// Task ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Track every task id found in a log file ("-" for stdin)
    Scan {
        file: PathBuf,
    },

    /// Fetch the status of every active task once
    Poll,

    /// Drop completed tasks
    ClearCompleted,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Update configuration values
    Set {
        /// Service command to supervise
        #[arg(long)]
        command: Option<String>,

        /// Working directory for the service
        #[arg(long)]
        working_dir: Option<String>,

        /// Pattern for the leftover-process cleanup (pkill -f)
        #[arg(long)]
        kill_pattern: Option<String>,

        /// Base URL of the service API
        #[arg(long)]
        base_url: Option<String>,

        /// Poll interval in seconds
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Header the API key is sent in
        #[arg(long)]
        api_key_header: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    svcwarden::logging::init(cli.verbose);

    let svw_dir = cli.dir.unwrap_or_else(|| PathBuf::from(".svw"));

    match cli.command {
        Commands::Init => commands::init::run(&svw_dir),
        Commands::Run { no_start, interval } => {
            commands::run::run(&svw_dir, no_start, interval, cli.json)
        }
        Commands::Check => {
            if !commands::check::run(&svw_dir, cli.json)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Stop => commands::stop::run(&svw_dir, cli.json),
        Commands::Tasks { command } => match command {
            TaskCommands::List => commands::tasks::list(&svw_dir, cli.json),
            TaskCommands::Add { ids } => commands::tasks::add(&svw_dir, &ids, cli.json),
            TaskCommands::Scan { file } => commands::tasks::scan(&svw_dir, &file, cli.json),
            TaskCommands::Poll => commands::tasks::poll(&svw_dir, cli.json),
            TaskCommands::ClearCompleted => commands::tasks::clear_completed(&svw_dir, cli.json),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_cmd::show(&svw_dir, cli.json),
            ConfigCommands::Set {
                command,
                working_dir,
                kill_pattern,
                base_url,
                poll_interval,
                api_key_header,
            } => commands::config_cmd::update(
                &svw_dir,
                commands::config_cmd::ConfigUpdate {
                    command,
                    working_dir,
                    kill_pattern,
                    base_url,
                    poll_interval,
                    api_key_header,
                },
            ),
        },
    }
}
