//! Command-line interface for modshelf.
//!
//! Provides commands for importing, listing, updating, removing and
//! exporting resources, and for watching the library directories.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use crate::config::{self, ResolvedConfig};
use crate::core::{ImportRequest, ResourceService, UpdateRequest};
use crate::domain::{Resource, ResourceDomain, ResourceEvent};
use crate::library::ResourceKey;

/// modshelf - content-addressed library for game mods, saves and packs
#[derive(Parser, Debug)]
#[command(name = "modshelf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import files into the library
    Import {
        /// Files to import
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Only accept resources of this domain (mods, saves, resourcepacks, ...)
        #[arg(short, long)]
        domain: Option<String>,

        /// Origin url to record (repeatable)
        #[arg(short, long = "url")]
        urls: Vec<String>,

        /// Tags to apply (comma-separated)
        #[arg(short, long)]
        tags: Option<String>,

        /// Skip unrecognised files instead of importing them as unknown
        #[arg(long)]
        optional: bool,

        /// Run without waiting for an import slot
        #[arg(long)]
        background: bool,
    },

    /// Copy resources out of the library
    Export {
        /// Hashes, urls or paths of the resources
        #[arg(required = true)]
        keys: Vec<String>,

        /// Target directory
        #[arg(long)]
        to: PathBuf,
    },

    /// List resources in the library
    List {
        /// Filter by domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Maximum number of items to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show details of a resource
    Show {
        /// Hash, url or path
        key: String,
    },

    /// Remove a resource and its stored file
    Remove {
        /// Hash, url or path
        key: String,
    },

    /// Update resource metadata
    Update {
        /// Hash, url or path
        key: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// Replace tags (comma-separated)
        #[arg(short, long)]
        tags: Option<String>,

        /// Origin url to add (repeatable)
        #[arg(short, long = "url")]
        urls: Vec<String>,
    },

    /// Add an image to the image store
    AddImage {
        /// Image file
        path: PathBuf,
    },

    /// Watch the library directories until interrupted
    Watch,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Import {
                paths,
                domain,
                urls,
                tags,
                optional,
                background,
            } => import_files(paths, domain, urls, tags, optional, background).await,
            Commands::Export { keys, to } => export_resources(keys, to).await,
            Commands::List { domain, limit } => list_resources(domain, limit).await,
            Commands::Show { key } => show_resource(&key).await,
            Commands::Remove { key } => remove_resource(&key).await,
            Commands::Update {
                key,
                name,
                tags,
                urls,
            } => update_resource(&key, name, tags, urls).await,
            Commands::AddImage { path } => add_image(&path).await,
            Commands::Watch => watch().await,
            Commands::Config => show_config().await,
        }
    }
}

/// Open the configured library and restore its index
async fn open_library() -> Result<(Arc<ResourceService>, mpsc::UnboundedReceiver<ResourceEvent>)> {
    let cfg: ResolvedConfig = config::config()?.clone();
    let home = cfg.home.clone();
    let (service, events) = ResourceService::open(cfg)
        .await
        .with_context(|| format!("Failed to open library at {}", home.display()))?;
    service.restore().await.context("Failed to load resource index")?;
    Ok((service, events))
}

fn parse_domain(domain: Option<String>) -> Result<Option<ResourceDomain>> {
    domain.map(|d| d.parse()).transpose()
}

fn parse_tags(tags: Option<String>) -> Option<BTreeSet<String>> {
    tags.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

fn print_row(resource: &Resource) {
    let name = if resource.name.chars().count() > 40 {
        format!("{}...", resource.name.chars().take(37).collect::<String>())
    } else {
        resource.name.clone()
    };
    println!(
        "{:<14} {:<14} {:<42} {}",
        short_hash(&resource.hash),
        resource.domain.to_string(),
        name,
        resource.file_name
    );
}

/// Import one or more files
async fn import_files(
    paths: Vec<PathBuf>,
    domain: Option<String>,
    urls: Vec<String>,
    tags: Option<String>,
    optional: bool,
    background: bool,
) -> Result<()> {
    let domain = parse_domain(domain)?;
    let tags = parse_tags(tags).unwrap_or_default();
    let (service, _events) = open_library().await?;

    let requests: Vec<ImportRequest> = paths
        .into_iter()
        .map(|path| ImportRequest {
            path,
            urls: urls.clone(),
            tags: tags.clone(),
            restrict_to_domain: domain,
            optional,
            background,
            ..Default::default()
        })
        .collect();

    let result = service.import_many(requests).await;

    for resource in &result.imported {
        println!("Imported {}", resource.stored_path.display());
        print_row(resource);
    }
    for resource in &result.existing {
        println!("Already in library: {}", resource.path.display());
        print_row(resource);
    }
    for path in &result.skipped {
        println!("Skipped {}", path.display());
    }
    for failure in &result.errors {
        eprintln!("Failed {}: {}", failure.path.display(), failure.error);
    }

    service.shutdown().await;

    if !result.is_success() {
        anyhow::bail!("{} of the imports failed", result.errors.len());
    }
    Ok(())
}

/// Copy resources into a directory
async fn export_resources(keys: Vec<String>, to: PathBuf) -> Result<()> {
    let (service, _events) = open_library().await?;
    let written = service
        .export(keys, &to)
        .await
        .with_context(|| format!("Failed to export to {}", to.display()))?;

    for path in &written {
        println!("{}", path.display());
    }
    eprintln!("\n[Exported {} resources]", written.len());

    service.shutdown().await;
    Ok(())
}

/// List resources
async fn list_resources(domain: Option<String>, limit: usize) -> Result<()> {
    let domain = parse_domain(domain)?;
    let (service, _events) = open_library().await?;
    let resources = service.list(domain);

    if resources.is_empty() {
        println!("Library is empty. Use 'modshelf import <path>' to add resources.");
        service.shutdown().await;
        return Ok(());
    }

    println!("{:<14} {:<14} {:<42} FILE", "HASH", "DOMAIN", "NAME");
    println!("{}", "-".repeat(90));
    for resource in resources.iter().take(limit) {
        print_row(resource);
    }
    println!("\nTotal: {} resources", resources.len());

    service.shutdown().await;
    Ok(())
}

/// Show details of one resource
async fn show_resource(key: &str) -> Result<()> {
    let (service, _events) = open_library().await?;
    let resource = service.require(ResourceKey::from(key))?;

    println!("Hash:       {}", resource.hash);
    println!("Name:       {}", resource.name);
    println!("Domain:     {}", resource.domain);
    println!("Type:       {}", resource.resource_type);
    println!("File:       {}", resource.file_name);
    println!("Path:       {}", resource.path.display());
    println!("Stored at:  {}", resource.stored_path.display());
    println!("Size:       {} bytes", resource.size);
    println!("Imported:   {}", resource.imported_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(icon) = &resource.icon_url {
        println!("Icon:       {}", icon);
    }
    if !resource.tags.is_empty() {
        let tags: Vec<&str> = resource.tags.iter().map(String::as_str).collect();
        println!("Tags:       {}", tags.join(", "));
    }
    if !resource.uri.is_empty() {
        println!("\nOrigins:");
        for url in &resource.uri {
            println!("  {}", url);
        }
    }
    if let Some(cf) = &resource.sources.curseforge {
        println!("CurseForge: project {} file {}", cf.project_id, cf.file_id);
    }
    if let Some(mr) = &resource.sources.modrinth {
        println!("Modrinth:   project {} version {}", mr.project_id, mr.version_id);
    }
    if let Some(gh) = &resource.sources.github {
        println!("GitHub:     {}/{} @ {}", gh.owner, gh.repo, gh.release);
    }

    service.shutdown().await;
    Ok(())
}

/// Remove a resource
async fn remove_resource(key: &str) -> Result<()> {
    let (service, _events) = open_library().await?;
    let removed = service.remove(ResourceKey::from(key)).await?;
    println!("Removed {} ({})", removed.name, short_hash(&removed.hash));
    service.shutdown().await;
    Ok(())
}

/// Update resource metadata
async fn update_resource(
    key: &str,
    name: Option<String>,
    tags: Option<String>,
    urls: Vec<String>,
) -> Result<()> {
    let (service, _events) = open_library().await?;
    let update = UpdateRequest {
        name,
        tags: parse_tags(tags),
        urls,
        ..Default::default()
    };
    let updated = service.update(ResourceKey::from(key), update).await?;
    print_row(&updated);
    service.shutdown().await;
    Ok(())
}

/// Store an image and print its reference
async fn add_image(path: &std::path::Path) -> Result<()> {
    let (service, _events) = open_library().await?;
    let reference = service
        .add_image(path)
        .await
        .with_context(|| format!("Failed to add image: {}", path.display()))?;
    println!("{}", reference);
    service.shutdown().await;
    Ok(())
}

/// Watch every domain directory until Ctrl-C, printing events
async fn watch() -> Result<()> {
    let cfg: ResolvedConfig = config::config()?.clone();
    let (service, mut events) = ResourceService::open(cfg).await?;
    service.start().await?;

    eprintln!("Watching {} (Ctrl-C to stop)", service.config().home.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nStopping...");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

fn print_event(event: &ResourceEvent) {
    match event {
        ResourceEvent::Committed { resources } => {
            for r in resources {
                println!("[committed] {} {} {}", short_hash(&r.hash), r.domain, r.file_name);
            }
        }
        ResourceEvent::Removed { resource } => {
            println!(
                "[removed]   {} {} {}",
                short_hash(&resource.hash),
                resource.domain,
                resource.file_name
            );
        }
        ResourceEvent::ModpackImported { path, name } => {
            println!("[modpack]   {} ({})", name, path.display());
        }
        ResourceEvent::DomainReady { domain } => {
            println!("[ready]     {}", domain);
        }
        ResourceEvent::Fault {
            domain,
            error,
            timestamp,
        } => {
            eprintln!("[fault]     {} {} {}", timestamp.to_rfc3339(), domain, error);
        }
    }
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("modshelf configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database_path().display());
    println!("  Images:   {}", cfg.images_dir().display());
    println!();
    println!("Domain directories:");
    for domain in ResourceDomain::ALL {
        println!("  {:<14} {}", domain.to_string(), cfg.domain_dir(domain).display());
    }
    println!();
    println!("Import:");
    println!("  Materialize:    {:?}", cfg.materialize);
    println!("  Max concurrent: {}", cfg.max_concurrent_imports);
    println!();
    println!("Watch:");
    println!("  Settle: {}ms", cfg.settle.as_millis());
    if cfg.ignore.is_empty() {
        println!("  Ignore: (none)");
    } else {
        println!("  Ignore: {}", cfg.ignore.join(", "));
    }

    Ok(())
}
