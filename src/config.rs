use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Personal library backend with reading tracking and catalog search.
#[derive(Parser, Debug, Clone)]
#[command(name = "green-library")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "GREEN_LIBRARY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user with the default collections.
    Add {
        /// Login email.
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// Allow the user to register other users.
        #[arg(long)]
        admin: bool,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Login email.
        email: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Token configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// External catalog configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Cover storage configuration.
    #[serde(default)]
    pub covers: CoversConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        5555,
    )
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/library.db")
}

/// Token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing secret. Must be set before serving.
    #[serde(default)]
    pub secret: String,

    /// Token issuer.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Token lifetime in minutes.
    #[serde(default = "default_token_minutes")]
    pub token_minutes: i64,

    /// Tokens closer than this to expiry may be refreshed.
    #[serde(default = "default_refresh_window")]
    pub refresh_window_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: default_issuer(),
            token_minutes: default_token_minutes(),
            refresh_window_minutes: default_refresh_window(),
        }
    }
}

fn default_issuer() -> String {
    "GreenLibrary".to_string()
}

fn default_token_minutes() -> i64 {
    60
}

fn default_refresh_window() -> i64 {
    10
}

/// External catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Search endpoint; the query string is appended.
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// Cover image base; `<key>-M.jpg` is appended.
    #[serde(default = "default_image_url")]
    pub image_url: String,

    /// User-Agent sent to the catalog.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Search request timeout.
    #[serde(default = "default_catalog_timeout")]
    pub timeout_seconds: u64,

    /// Maximum rows returned by the local search.
    #[serde(default = "default_local_limit")]
    pub local_limit: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            image_url: default_image_url(),
            user_agent: default_user_agent(),
            timeout_seconds: default_catalog_timeout(),
            local_limit: default_local_limit(),
        }
    }
}

fn default_search_url() -> String {
    "https://openlibrary.org/search.json?q=".to_string()
}

fn default_image_url() -> String {
    "https://covers.openlibrary.org/b/olid/".to_string()
}

fn default_user_agent() -> String {
    "bluefive.xyz:greenLibrary:andresdglez@gmail.com".to_string()
}

fn default_catalog_timeout() -> u64 {
    20
}

fn default_local_limit() -> u32 {
    50
}

/// Cover storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoversConfig {
    /// Directory for stored covers.
    #[serde(default = "default_covers_dir")]
    pub dir: PathBuf,

    /// Public URL prefix of stored covers.
    #[serde(default = "default_covers_url")]
    pub public_url: String,

    /// Stored cover width in pixels.
    #[serde(default = "default_cover_width")]
    pub width: u32,

    /// Download timeout.
    #[serde(default = "default_cover_timeout")]
    pub timeout_seconds: u64,
}

impl Default for CoversConfig {
    fn default() -> Self {
        Self {
            dir: default_covers_dir(),
            public_url: default_covers_url(),
            width: default_cover_width(),
            timeout_seconds: default_cover_timeout(),
        }
    }
}

fn default_covers_dir() -> PathBuf {
    PathBuf::from("data/covers")
}

fn default_covers_url() -> String {
    "/covers/".to_string()
}

fn default_cover_width() -> u32 {
    180
}

fn default_cover_timeout() -> u64 {
    10
}

impl CoversConfig {
    /// Route prefix the cover directory is served under, when the public URL
    /// is a local path.
    pub fn mount_path(&self) -> Option<String> {
        let trimmed = self.public_url.trim_end_matches('/');
        if trimmed.starts_with('/') && trimmed.len() > 1 {
            Some(trimmed.to_string())
        } else {
            None
        }
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> crate::error::Result<Self> {
        toml::from_str(content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("green-library.toml"),
            dirs::config_dir()
                .map(|p| p.join("green-library").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/green-library/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Apply `GREEN_LIBRARY_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("GREEN_LIBRARY_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(secret) = get("GREEN_LIBRARY_SECRET") {
            self.auth.secret = secret;
        }
        if let Some(url) = get("GREEN_LIBRARY_CATALOG_URL") {
            self.catalog.search_url = url;
        }
        if let Some(url) = get("GREEN_LIBRARY_IMAGE_URL") {
            self.catalog.image_url = url;
        }
        if let Some(dir) = get("GREEN_LIBRARY_COVERS_DIR") {
            self.covers.dir = PathBuf::from(dir);
        }
        if let Some(url) = get("GREEN_LIBRARY_COVERS_URL") {
            self.covers.public_url = url;
        }
        if let Some(origins) = get("GREEN_LIBRARY_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# green-library configuration

[server]
bind = "0.0.0.0:5555"
# Allowed CORS origins (empty allows any)
# cors_origins = ["https://library.example.com"]

[database]
# path = "/var/lib/green-library/library.db"

[auth]
# Token signing secret (or GREEN_LIBRARY_SECRET)
secret = ""
issuer = "GreenLibrary"
token_minutes = 60
refresh_window_minutes = 10

[catalog]
search_url = "https://openlibrary.org/search.json?q="
image_url = "https://covers.openlibrary.org/b/olid/"
timeout_seconds = 20
local_limit = 50

[covers]
# dir = "/var/lib/green-library/covers"
public_url = "/covers/"
width = 180
timeout_seconds = 10
"#
        .to_string()
    }
}
