//! green-library server entry point.

use clap::Parser;
use green_library::{
    auth::AuthService,
    config::{Cli, Command, Config, UserCommand},
    db::Database,
    server,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let mut config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };
    config.apply_env();

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force, &config).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => cmd_serve(config, None).await,
    }
}

/// Initialize config and database.
async fn cmd_init(force: bool, config: &Config) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    std::fs::create_dir_all(&config.covers.dir)?;
    println!("Created cover directory: {}", config.covers.dir.display());

    println!("\nSet auth.secret in config.toml (or GREEN_LIBRARY_SECRET).");
    println!("Then run: green-library user add <email> --password <password> --admin");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(
        db,
        config.auth.secret.clone(),
        config.auth.issuer.clone(),
        config.auth.token_minutes,
        config.auth.refresh_window_minutes,
    );

    match action {
        UserCommand::Add {
            email,
            password,
            admin,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.register(&email, &password, admin)?;
            println!(
                "Created user: {} (admin: {}, id: {})",
                user.email, user.admin, user.id
            );
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<32} {:<6} {:<36} CREATED", "EMAIL", "ADMIN", "ID");
                println!("{}", "-".repeat(90));
                for user in users {
                    let created = chrono::DateTime::from_timestamp(user.created_at, 0)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "{:<32} {:<6} {:<36} {}",
                        user.email,
                        if user.admin { "yes" } else { "no" },
                        user.id,
                        created
                    );
                }
            }
        }

        UserCommand::Passwd { email, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&email, &password)? {
                println!("Password changed for: {}", email);
            } else {
                println!("User not found: {}", email);
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "green_library=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.auth.secret.trim().is_empty() {
        return Err(green_library::AppError::Config(
            "auth.secret is empty; set it in the config file or GREEN_LIBRARY_SECRET".to_string(),
        )
        .into());
    }

    let db = Database::open(&config.database.path)?;
    std::fs::create_dir_all(&config.covers.dir)?;

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        covers = %config.covers.dir.display(),
        "Starting green-library server"
    );

    let bind_addr = config.server.bind;
    let state = server::AppState::new(config, db)?;
    let app = server::create_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(address = %bind_addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
