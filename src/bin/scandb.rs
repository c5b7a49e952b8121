use clap::{Parser, Subcommand};
use scandb::ScanDbConfig;
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::create::CreateArgs;
use commands::instruments::InstrumentsArgs;
use commands::migrate::MigrateArgs;
use commands::status::StatusArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.escan/scandb.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// credentials file path, by default the file named in $ESCAN_CREDENTIALS is used
    #[clap(long)]
    credentials: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new scan database at the current schema version
    Create(CreateArgs),

    /// Migrate an existing scan database
    Migrate(MigrateArgs),

    /// Show the schema version, status and table sizes of a scan database
    Status(StatusArgs),

    /// List the instruments of a scan database
    Instruments(InstrumentsArgs),

    /// Show the configuration and the scan databases in the data directory
    Config(ConfigArgs),
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level TRACE or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    let config = match ScanDbConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Create(args) => commands::create::run(&config, cli.credentials.as_deref(), args),
        Commands::Migrate(args) => commands::migrate::run(&config, args),
        Commands::Status(args) => commands::status::run(&config, args),
        Commands::Instruments(args) => commands::instruments::run(&config, args),
        Commands::Config(args) => commands::config::run(&config, args),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}
