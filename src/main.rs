//! statestore - main entry point.

use statestore::cli::{entry_line, Cli, Commands, NsCommands};
use statestore::client::RemoteStore;
use statestore::config::StoreConfig;
use statestore::model::NamespaceEntry;
use statestore::observability;
use statestore::oracle::TimestampOracle;
use statestore::service::run_service;
use statestore::shutdown::{ShutdownCoordinator, SignalHandler};
use statestore::store::{open_store, MakeDirectory, MetadataStore};
use statestore::types::PermissionWord;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let config = cli.store_config()?;
    observability::init(&config.observability)?;

    match cli.command {
        Commands::Serve { bind, prefix } => serve(config, bind, prefix).await?,

        Commands::Tso { count } => {
            let store = open_store(&config)?;
            for value in store.next_batch(count).await? {
                println!("{}", value);
            }
        }

        Commands::Health => {
            let client = RemoteStore::from_config(&config.remote)?;
            match client.health().await {
                Ok(healthy) => {
                    println!("Health: {}", if healthy { "OK" } else { "DEGRADED" });
                }
                Err(e) => {
                    eprintln!("Health: UNREACHABLE ({})", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Ns { command } => {
            let store = open_store(&config)?;
            run_ns(store, command).await?;
        }

        Commands::Version => {
            println!("statestore {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn serve(
    mut config: StoreConfig,
    bind: Option<SocketAddr>,
    prefix: Option<String>,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.service.bind_addr = bind;
    }
    if let Some(prefix) = prefix {
        config.service.api_prefix = prefix;
    }
    config.validate()?;

    let coordinator = ShutdownCoordinator::new();
    let signals = tokio::spawn(SignalHandler::new(coordinator.clone()).run());

    if config.observability.metrics_enabled {
        let metrics = observability::run_metrics_server(
            config.observability.clone(),
            coordinator.signal(),
        );
        tokio::spawn(async move {
            if let Err(e) = metrics.await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    let mut service = tokio::spawn(run_service(config.service.clone(), coordinator.signal()));

    tokio::select! {
        result = &mut service => result??,
        _ = coordinator.wait_for_shutdown() => {
            match tokio::time::timeout(coordinator.timeout(), &mut service).await {
                Ok(result) => result??,
                Err(_) => warn!("Shutdown timed out after {:?}", coordinator.timeout()),
            }
        }
    }

    coordinator.shutdown();
    signals.abort();
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn describe(entry: &NamespaceEntry) {
    let attrs = entry.attrs();
    println!("  Id: {}", attrs.id);
    println!("  Parent: {}", attrs.parent_id);
    match attrs.name() {
        Ok(name) => println!("  Name: {}", name),
        Err(e) => println!("  Name: <{}>", e),
    }
    println!("  Type: {}", entry.tag());
    println!(
        "  Mode: {:04o} (user {}, group {})",
        attrs.permission.mode(),
        attrs.permission.user_serial(),
        attrs.permission.group_serial()
    );
    println!("  Modified: {}", attrs.modification_time);
    println!("  Accessed: {}", attrs.access_time);
    if let Some(file) = entry.as_file() {
        println!("  Replication: {}", attrs.header.replication());
        println!("  Block size: {}", attrs.header.preferred_block_size());
        println!("  Blocks: {}", file.blocks.len());
        match &file.lease {
            Some(lease) => println!(
                "  Lease: {} on {}",
                lease.client_name, lease.client_machine
            ),
            None => println!("  Lease: none"),
        }
    }
}

async fn run_ns(store: Arc<dyn MetadataStore>, command: NsCommands) -> anyhow::Result<()> {
    match command {
        NsCommands::Ls { dir } => {
            for entry in store.get_children(dir).await? {
                println!("{}", entry_line(entry.id(), &entry.tag().to_string(), entry.name()));
            }
        }

        NsCommands::Stat { id } => {
            let entry = match store.get_file(id).await? {
                Some(file) => Some(NamespaceEntry::File(file)),
                None => store.get_directory(id).await?.map(NamespaceEntry::Directory),
            };
            match entry {
                Some(entry) => describe(&entry),
                None => {
                    eprintln!("Entry not found: {}", id);
                    std::process::exit(1);
                }
            }
        }

        NsCommands::Lookup { dir, name } => match store.get_child(dir, &name).await? {
            Some(entry) => describe(&entry),
            None => {
                eprintln!("No child {} in directory {}", name, dir);
                std::process::exit(1);
            }
        },

        NsCommands::Mkdir { parent, name, mode } => {
            let id = store.next().await?;
            let now = now_millis();
            let dir = store
                .mkdir(MakeDirectory {
                    parent_id: parent,
                    id,
                    name,
                    permission: PermissionWord::pack(0, 0, mode),
                    modification_time: now,
                    access_time: now,
                })
                .await?;
            println!("Created directory {} under {}", dir.attrs.id, parent);
        }

        NsCommands::Blocks { file } => {
            let Some(entry) = store.get_file(file).await? else {
                eprintln!("File not found: {}", file);
                std::process::exit(1);
            };
            for (index, block) in entry.blocks.iter().enumerate() {
                println!(
                    "{:>4}  {:>12}  gen {:<8}  {:>12} bytes  {} replicas",
                    index,
                    block.id,
                    block.generation_stamp,
                    block.num_bytes,
                    block.replicas.len()
                );
            }
        }
    }
    Ok(())
}
