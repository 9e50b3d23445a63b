use clap::{Args, Parser, Subcommand};

use crate::config::AuthMode;

/// regshelf — terminal browser for container image registries
#[derive(Parser, Debug)]
#[command(name = "regshelf", version, about)]
pub struct Cli {
    /// Registry endpoint: an http(s) URL, local:podman, or local:docker
    /// (can be specified multiple times)
    #[arg(long = "registry", env = "REGSHELF_REGISTRY", global = true)]
    pub registries: Vec<String>,

    /// Username for registry authentication
    #[arg(long, env = "REGSHELF_USERNAME", global = true)]
    pub username: Option<String>,

    /// Password or opaque token for registry authentication
    #[arg(long, env = "REGSHELF_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Authentication mode
    #[arg(long, value_enum, default_value_t = AuthMode::None, global = true)]
    pub auth_mode: AuthMode,

    /// Scope requested during token exchange
    #[arg(long, global = true)]
    pub auth_scope: Option<String>,

    /// Monitored repository, always shown first (can be specified
    /// multiple times; overrides the saved list)
    #[arg(long = "monitored", global = true)]
    pub monitored: Vec<String>,

    /// Maximum repositories to load
    #[arg(long, global = true)]
    pub max_repos: Option<usize>,

    /// Catalog page size per request
    #[arg(long, default_value_t = 100, global = true)]
    pub page_size: usize,

    /// Print the API call log after the command
    #[arg(long, default_value_t = false, global = true)]
    pub show_calls: bool,

    /// Verbose output
    #[arg(short, long, default_value_t = false, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check reachability and auth state of each registry
    Status,
    /// List repositories: monitored first, then the catalog
    Repos(ReposArgs),
    /// List tags for one repository, newest first
    Tags(TagsArgs),
    /// Show the manifest for one tag
    Manifest(ManifestArgs),
    /// Save monitored repositories and settings for a registry
    Configure(ConfigureArgs),
}

#[derive(Args, Debug)]
pub struct ReposArgs {
    /// Skip this many catalog entries
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Stop after this many repositories (defaults to --max-repos)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Reverse the sort order (monitored entries stay first)
    #[arg(short, long, default_value_t = false)]
    pub reverse: bool,
}

#[derive(Args, Debug)]
pub struct TagsArgs {
    /// Repository name, e.g. team/app
    pub repository: String,
}

#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Repository name, e.g. team/app
    pub repository: String,

    /// Tag or digest reference
    pub tag: String,
}

#[derive(Args, Debug)]
pub struct ConfigureArgs {
    /// Display name to store for the registry
    #[arg(long)]
    pub name: Option<String>,

    /// Cache TTL in seconds to store for the registry
    #[arg(long)]
    pub cache_ttl: Option<u64>,
}
