use clap::{Parser, Subcommand};

pub mod app;

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admits queued parties when seats free up.
    Dequeue,
    /// Purges parties whose check-in window lapsed.
    CheckinExpired,
    /// Clears seats whose service interval elapsed.
    SeatExpired,
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Dequeue => app::dequeue_worker::main().await,
        Commands::CheckinExpired => app::checkin_expired_worker::main().await,
        Commands::SeatExpired => app::seat_expired_worker::main().await,
    }
}
