// src/bin/set_admin.rs
//
// Usage: DATABASE_URL=postgres://... set-admin <email> <password>

use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use dotenvy::dotenv;
use examertric::error::AppError;
use examertric::services::accounts;
use examertric::store::PgStore;
use tracing_subscriber::EnvFilter;

/// Creates (or finds) an account and grants it administrator rights.
#[derive(Debug, Parser)]
#[command(name = "set-admin", version)]
struct Cli {
    /// Account email.
    email: String,
    /// Password used only when the account has to be created.
    password: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL must be set");
        return ExitCode::from(1);
    };

    match run(&database_url, &cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error setting admin claim: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(database_url: &str, cli: &Cli) -> Result<(), AppError> {
    let store = PgStore::connect(database_url, 0).await?;

    let (mut account, created) = accounts::find_or_create(&store, &cli.email, &cli.password).await?;
    if created {
        println!("Created user: {}", account.uid);
    } else {
        println!("Found existing user: {}", account.uid);
    }

    accounts::grant_admin(&store, &mut account).await?;
    println!("Set admin claim for user {} (uid: {})", account.email, account.uid);
    Ok(())
}
