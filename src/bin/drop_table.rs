//! Drop the destination table
//!
//! Offline admin utility: deletes the table and every row in it. A running
//! bridge keeps its memoized readiness and must be restarted afterwards.

use prombridge::config::{ComponentFactory, StoreArgs, TableArgs};
use prombridge::schema::TableDescriptor;
use prombridge::store::StoreGateway;
use prombridge::table::{ReadinessConfig, TableManager};
use prombridge::telemetry::Telemetry;
use prombridge::{StoreConfig, TableConfig};

use clap::Parser;
use std::sync::Arc;

/// Delete the bridge's destination table
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    table: TableArgs,

    #[command(flatten)]
    store: StoreArgs,

    /// Skip the existence check and delete unconditionally
    #[arg(long)]
    force: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _telemetry = Telemetry::init_for_component("prombridge-drop-table", &args.log_level)?;

    let table: TableConfig = args.table.into();
    let store_config: StoreConfig = args.store.into();
    let store = ComponentFactory::create_store_gateway(&table.project, &store_config)?;

    println!("Dropping table...");
    println!("  Table: {}", table.table_ref());
    println!("  Backend: {}", store_config.backend.as_str());

    if !args.force && !store.table_exists(&table.table_ref()).await? {
        println!("Table does not exist, nothing to do");
        return Ok(());
    }

    let manager = TableManager::new(
        Arc::clone(&store),
        TableDescriptor::for_storage_rows(table.table_ref()),
        ReadinessConfig::default(),
    );
    manager.drop_table().await?;

    println!("✓ Table dropped");
    Ok(())
}
