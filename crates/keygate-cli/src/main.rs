//! Keygate CLI - Command-line interface for Keygate.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "keygate")]
#[command(about = "Keygate - RS256 token gateway with role and permission checks")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.keygate/keygate.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Check config, keys, catalog and revocation store
    Check,

    /// Permission catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogCommands,
    },

    /// User management
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Token operations
    Token {
        #[command(subcommand)]
        action: TokenCommands,
    },

    /// Probe a running gateway
    Status {
        /// Gateway URL (defaults to the configured bind address and port)
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// List permissions and roles
    List,

    /// Run the catalog self-audit
    Audit,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new user
    Create {
        /// Email of the new user
        #[arg(long)]
        email: String,

        /// Role name from the catalog
        #[arg(long, default_value = "user")]
        role: String,

        /// Password (or use --generate-password)
        #[arg(long)]
        password: Option<String>,

        /// Generate a random password
        #[arg(long)]
        generate_password: bool,
    },

    /// List all users
    List,

    /// Reset a user's password to a generated one
    ResetPassword {
        /// Email of the user
        #[arg(long)]
        email: String,
    },

    /// Enable a user account
    Enable {
        /// Email of the user
        #[arg(long)]
        email: String,
    },

    /// Disable a user account
    Disable {
        /// Email of the user
        #[arg(long)]
        email: String,
    },

    /// Delete a user
    Delete {
        /// Email of the user
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Issue a token for an existing user
    Issue {
        /// Email of the user
        #[arg(long)]
        email: String,

        /// Lifetime in seconds (defaults to the configured TTL)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Verify a token and print its claims
    Inspect {
        /// Encoded token
        token: String,
    },

    /// Revoke a token for the rest of its lifetime
    Revoke {
        /// Encoded token
        token: String,

        /// Gateway URL (defaults to the configured bind address and port)
        #[arg(long)]
        url: Option<String>,

        /// Write into the configured store directly instead of calling the gateway
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let Some(command) = cli.command else {
        ui::info("Run 'keygate check' to verify your setup, or 'keygate --help' for all commands.");
        return Ok(());
    };

    let config = commands::load_config(cli.config.as_deref())?;

    match command {
        Commands::Serve { port, bind } => {
            let args = commands::serve::ServeArgs { port, bind };
            commands::run_serve(config, args).await?;
        }

        Commands::Check => {
            commands::run_check(&config).await?;
        }

        Commands::Catalog { action } => {
            let action = match action {
                CatalogCommands::List => commands::catalog::CatalogAction::List,
                CatalogCommands::Audit => commands::catalog::CatalogAction::Audit,
            };
            commands::run_catalog(&config, action)?;
        }

        Commands::User { action } => {
            let action = match action {
                UserCommands::Create {
                    email,
                    role,
                    password,
                    generate_password,
                } => commands::user::UserAction::Create {
                    email,
                    role,
                    password,
                    generate_password,
                },
                UserCommands::List => commands::user::UserAction::List,
                UserCommands::ResetPassword { email } => {
                    commands::user::UserAction::ResetPassword { email }
                }
                UserCommands::Enable { email } => commands::user::UserAction::Enable { email },
                UserCommands::Disable { email } => commands::user::UserAction::Disable { email },
                UserCommands::Delete { email } => commands::user::UserAction::Delete { email },
            };
            commands::run_user(&config, action)?;
        }

        Commands::Token { action } => {
            let action = match action {
                TokenCommands::Issue { email, ttl_secs } => {
                    commands::token::TokenAction::Issue { email, ttl_secs }
                }
                TokenCommands::Inspect { token } => commands::token::TokenAction::Inspect { token },
                TokenCommands::Revoke {
                    token,
                    url,
                    offline,
                } => commands::token::TokenAction::Revoke {
                    token,
                    url,
                    offline,
                },
            };
            commands::run_token(&config, action).await?;
        }

        Commands::Status { url } => {
            commands::run_status(&config, url).await?;
        }
    }

    Ok(())
}
