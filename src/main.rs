mod audit;
mod auth;
mod cli;
mod config;
mod error;
mod listing;
mod local;
mod models;
mod output;
mod paginate;
mod probe;
mod registry;

use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;

use audit::SharedAuditLog;
use cli::{Cli, Command, ConfigureArgs, ManifestArgs, ReposArgs, TagsArgs};
use config::{AuthConfig, ConfigStore, RegistryEndpoint, StoredRegistry, StoredSettings};
use listing::{ListingSession, RepositoryLister, SortDirection};
use local::LocalRuntimeClient;
use models::Manifest;
use probe::{probe_registry, ProbeReport, RegistryStatus, PROBE_TIMEOUT};
use registry::RegistryClient;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let audit = audit::shared_log();

    let mut endpoints = Vec::with_capacity(cli.registries.len());
    for raw in &cli.registries {
        endpoints.push(RegistryEndpoint::parse(raw)?);
    }
    if endpoints.is_empty() {
        bail!("no registry specified (use --registry)");
    }

    match &cli.command {
        Command::Status => run_status(&cli, &mut endpoints, &audit).await?,
        Command::Repos(args) => run_repos(&cli, single(&endpoints)?, args, &audit).await?,
        Command::Tags(args) => run_tags(&cli, single(&endpoints)?, args, &audit).await?,
        Command::Manifest(args) => run_manifest(&cli, single(&endpoints)?, args, &audit).await?,
        Command::Configure(args) => run_configure(&cli, single(&endpoints)?, args)?,
    }

    if cli.show_calls && !matches!(cli.command, Command::Status) {
        print_call_log(&cli, &audit);
    }

    Ok(())
}

/// Commands other than `status` operate on exactly one registry
fn single(endpoints: &[RegistryEndpoint]) -> Result<&RegistryEndpoint> {
    match endpoints {
        [endpoint] => Ok(endpoint),
        _ => bail!("this command operates on a single --registry"),
    }
}

/// Session config for one registry: saved settings and monitored repos,
/// overridden by whatever was passed on the command line. Credentials
/// only ever come from the command line.
fn session_config(cli: &Cli, url: &str) -> AuthConfig {
    let mut config = match ConfigStore::open_default() {
        Ok(store) => store.auth_config_for(url),
        Err(e) => {
            eprintln!("[WARN] Could not open config store: {}", e);
            AuthConfig::default()
        }
    };

    if let Some(username) = &cli.username {
        config.username = username.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    config.auth_mode = cli.auth_mode;
    if let Some(scope) = &cli.auth_scope {
        config.auth_scope = scope.clone();
    }
    if !cli.monitored.is_empty() {
        config.monitored_repos = cli.monitored.clone();
    }
    if let Some(max_repos) = cli.max_repos {
        config.max_repos = max_repos;
    }
    config.normalize();
    config
}

async fn run_status(
    cli: &Cli,
    endpoints: &mut Vec<RegistryEndpoint>,
    audit: &SharedAuditLog,
) -> Result<()> {
    endpoints.sort_by_key(|endpoint| endpoint.sort_key());
    output::print_status_header();

    for endpoint in endpoints.iter() {
        match endpoint {
            RegistryEndpoint::Local(runtime) => {
                let client = LocalRuntimeClient::new(runtime, audit.clone());
                let report = match client.check_health().await {
                    Ok(version) => {
                        let repo_count = client
                            .get_repositories()
                            .await
                            .map(|repos| repos.len().to_string())
                            .ok();
                        if cli.verbose {
                            eprintln!("[DEBUG] {} version {}", runtime, version);
                        }
                        ProbeReport {
                            status: RegistryStatus::Connected,
                            response_time_ms: 0,
                            repo_count,
                        }
                    }
                    Err(e) => {
                        if cli.verbose {
                            eprintln!("[DEBUG] {} health check failed: {}", runtime, e);
                        }
                        ProbeReport {
                            status: RegistryStatus::Unreachable { status: 0 },
                            response_time_ms: 0,
                            repo_count: None,
                        }
                    }
                };
                output::print_status(&endpoint.name(), &endpoint.to_string(), &report);
            }
            RegistryEndpoint::Mock(name) => {
                println!(
                    "  [----] {:<28} mock fixtures, nothing to probe",
                    format!("Mock {}", name)
                );
            }
            RegistryEndpoint::Remote(url) => {
                let config = session_config(cli, url);
                let client =
                    RegistryClient::with_timeout(url, config.clone(), audit.clone(), PROBE_TIMEOUT)
                        .context("failed to build HTTP client")?;
                let report = probe_registry(&client, &config).await;
                output::print_status(&endpoint.name(), url, &report);
            }
        }

        // Group the call log per registry when it was asked for
        if cli.show_calls {
            print_call_log(cli, audit);
            if let Ok(mut log) = audit.lock() {
                log.purge();
            }
        }
    }

    Ok(())
}

async fn run_repos(
    cli: &Cli,
    endpoint: &RegistryEndpoint,
    args: &ReposArgs,
    audit: &SharedAuditLog,
) -> Result<()> {
    let direction = if args.reverse {
        SortDirection::Descending
    } else {
        SortDirection::Ascending
    };

    let url = match endpoint {
        RegistryEndpoint::Local(runtime) => {
            let client = LocalRuntimeClient::new(runtime, audit.clone());
            let mut entries = client.get_repositories().await?;
            listing::sort_grouped(&mut entries, direction);
            output::print_repositories(
                &endpoint.name(),
                &entries,
                &[],
                &paginate::PaginationMethod::Complete,
                false,
            );
            return Ok(());
        }
        RegistryEndpoint::Mock(_) => bail!("mock endpoints serve test fixtures only"),
        RegistryEndpoint::Remote(url) => url,
    };

    let config = session_config(cli, url);
    let limit = args.limit.unwrap_or(config.max_repos);
    let client = RegistryClient::new(url, config.clone(), audit.clone())
        .context("failed to build HTTP client")?;
    let lister = RepositoryLister::new(&client, cli.page_size);

    if cli.verbose {
        eprintln!(
            "[DEBUG] Loading repositories from {} (offset={}, limit={}, monitored={})",
            url,
            args.offset,
            limit,
            config.monitored_repos.len()
        );
    }

    let mut session = ListingSession::new();
    let generation = session.begin_load();
    let initial = lister
        .load(&config, args.offset, limit.min(cli.page_size), direction)
        .await;
    session.apply_initial(generation, initial);

    while session.has_more() && session.len() < limit {
        let Some(state) = session.pagination().cloned() else {
            break;
        };
        if cli.verbose {
            eprintln!(
                "[DEBUG] Loading more ({} loaded, method: {})",
                session.len(),
                state.method
            );
        }
        let generation = session.begin_load();
        let batch = lister
            .load_more(&state, cli.page_size, session.monitored_ok())
            .await;
        let added = batch.repositories.len();
        if !session.apply_batch(generation, batch) || added == 0 {
            break;
        }
    }

    let mut entries = session.entries().to_vec();
    listing::sort_grouped(&mut entries, direction);
    output::print_repositories(
        &endpoint.name(),
        &entries,
        session.failures(),
        &session.method(),
        session.has_more(),
    );

    Ok(())
}

async fn run_tags(
    cli: &Cli,
    endpoint: &RegistryEndpoint,
    args: &TagsArgs,
    audit: &SharedAuditLog,
) -> Result<()> {
    match endpoint {
        RegistryEndpoint::Local(runtime) => {
            let client = LocalRuntimeClient::new(runtime, audit.clone());
            let tags = client.get_tags(&args.repository).await?;
            output::print_tags(&args.repository, &tags);
        }
        RegistryEndpoint::Mock(_) => bail!("mock endpoints serve test fixtures only"),
        RegistryEndpoint::Remote(url) => {
            let config = session_config(cli, url);
            let client = RegistryClient::new(url, config, audit.clone())
                .context("failed to build HTTP client")?;
            let record = client.get_tags(&args.repository).await;
            if record.status_code != 200 {
                let reason = record
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("HTTP {}", record.status_code));
                bail!("failed to fetch tags for {}: {}", args.repository, reason);
            }
            let list = record
                .parse_json::<models::TagList>()
                .context("failed to parse tag list")?;
            output::print_tags(&args.repository, &listing::tag_entries(&list));
        }
    }
    Ok(())
}

async fn run_manifest(
    cli: &Cli,
    endpoint: &RegistryEndpoint,
    args: &ManifestArgs,
    audit: &SharedAuditLog,
) -> Result<()> {
    let RegistryEndpoint::Remote(url) = endpoint else {
        bail!("manifests can only be fetched from remote registries");
    };

    let config = session_config(cli, url);
    let client =
        RegistryClient::new(url, config, audit.clone()).context("failed to build HTTP client")?;
    let record = client.get_manifest(&args.repository, &args.tag).await;
    let manifest = record.parse_json::<Manifest>();
    output::print_manifest(&args.repository, &args.tag, &record, manifest.as_ref());

    Ok(())
}

fn run_configure(cli: &Cli, endpoint: &RegistryEndpoint, args: &ConfigureArgs) -> Result<()> {
    let RegistryEndpoint::Remote(url) = endpoint else {
        bail!("local runtimes don't require configuration");
    };

    let store = ConfigStore::open_default().context("failed to open config store")?;
    let mut config = store.auth_config_for(url);
    if !cli.monitored.is_empty() {
        config.monitored_repos = cli.monitored.clone();
    }
    if let Some(max_repos) = cli.max_repos {
        config.max_repos = max_repos;
    }
    if let Some(scope) = &cli.auth_scope {
        config.auth_scope = scope.clone();
    }
    if let Some(cache_ttl) = args.cache_ttl {
        config.cache_ttl = cache_ttl;
    }
    config.normalize();

    store.upsert_registry(StoredRegistry {
        url: url.clone(),
        name: args.name.clone().unwrap_or_else(|| endpoint.name()),
        monitored_repos: config.monitored_repos.clone(),
        settings: StoredSettings {
            max_repos: config.max_repos,
            cache_ttl: config.cache_ttl,
            auth_scope: config.auth_scope.clone(),
        },
    })?;

    println!(
        "Saved configuration for {} ({} monitored repositories)",
        url,
        config.monitored_repos.len()
    );
    Ok(())
}

fn print_call_log(cli: &Cli, audit: &SharedAuditLog) {
    let records: Vec<audit::ApiCallRecord> = match audit.lock() {
        Ok(log) => (0..log.len())
            .filter_map(|index| log.get(index).cloned())
            .collect(),
        Err(_) => return,
    };
    output::print_calls(&records);
    if cli.verbose {
        for record in &records {
            output::print_call_detail(record);
        }
    }
}
