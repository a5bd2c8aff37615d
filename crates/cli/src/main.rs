//! lft demo binary.
//!
//! Opens several simulated tabs on one in-memory origin and walks them
//! through the sync protocol:
//! - legacy key migration and state hydration
//! - leader election and handover when the leader closes
//! - propagation of a synced key and an initial sync request
//! - persistence of the final state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use lft_state::{StateManager, Value};
use lft_storage::{KvStore, MemoryOrigin, MemoryStore, migrate_legacy, stats};
use lft_sync::{BroadcastHub, SyncConfig, SyncManager};
use tracing::{info, warn};

/// Demo command line arguments.
#[derive(Parser, Debug)]
#[command(name = "lft")]
#[command(about = "Simulates tabs sharing state through the lft sync protocol")]
struct Args {
	/// Number of tabs to open
	#[arg(short, long, default_value_t = 3)]
	tabs: usize,

	/// Sync configuration file (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Carry messages through storage pulses instead of a broadcast channel
	#[arg(long)]
	storage_only: bool,

	/// Theme value the first tab switches to
	#[arg(long, default_value = "light")]
	theme: String,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

struct Tab {
	sync: SyncManager,
	state: StateManager,
	store: MemoryStore,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	if args.tabs == 0 {
		bail!("at least one tab is required");
	}
	let config = load_config(args.config.as_deref())?;
	let ns = config.namespace.clone();
	let settle = config.settle_window() * 2;

	let origin = MemoryOrigin::new();
	let seed = origin.context();
	seed.set("theme", "dark").context("seeding legacy theme")?;
	let report = migrate_legacy(&seed, &ns);
	info!(migrated = ?report.migrated, failed = ?report.failed, "lft.migrated");

	let hub = BroadcastHub::new();
	let mut tabs = (0..args.tabs)
		.map(|_| open_tab(&origin, &hub, &config, args.storage_only))
		.collect::<anyhow::Result<Vec<Tab>>>()?;
	tokio::time::sleep(settle).await;
	report_leaders(&tabs);

	let first = &tabs[0];
	first.state.set_path("user.theme", args.theme.as_str());
	first.sync.sync("theme", args.theme.as_str());
	tokio::time::sleep(Duration::from_millis(10)).await;
	for tab in &tabs {
		let seen = tab.state.get_state().get_path("sync.theme").cloned().unwrap_or(Value::Null);
		info!(tab = %tab.sync.tab_id(), theme = %serde_json::Value::from(seen), "lft.theme");
	}

	let report = first.state.persist(&first.store, &ns);
	if !report.is_complete() {
		warn!(failed = ?report.failed, "lft.persist_incomplete");
	}
	if !report.trimmed.is_empty() {
		info!(trimmed = ?report.trimmed, "lft.persist_trimmed");
	}
	let usage = stats(&first.store, &ns);
	info!(bytes = usage.used, keys = usage.items, "lft.storage_usage");

	let late = open_tab(&origin, &hub, &config, args.storage_only)?;
	match late.sync.request_initial_sync().await {
		Some(data) => info!(tab = %late.sync.tab_id(), keys = ?data.keys().collect::<Vec<_>>(), "lft.initial_sync"),
		None => info!(tab = %late.sync.tab_id(), "lft.initial_sync.timed_out"),
	}
	tabs.push(late);

	if let Some(index) = tabs.iter().position(|tab| tab.sync.is_leader()) {
		let leader = tabs.remove(index);
		info!(tab = %leader.sync.tab_id(), "lft.leader_closing");
		leader.sync.destroy();
		tokio::time::sleep(settle).await;
		report_leaders(&tabs);
	}

	for tab in &tabs {
		tab.sync.destroy();
	}
	info!(keys = origin.len(), "lft.done");
	Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<SyncConfig> {
	let Some(path) = path else {
		return Ok(SyncConfig::default());
	};
	let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
	SyncConfig::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn open_tab(
	origin: &MemoryOrigin,
	hub: &BroadcastHub,
	config: &SyncConfig,
	storage_only: bool,
) -> anyhow::Result<Tab> {
	let store = origin.context();
	let state = StateManager::new();
	state.hydrate(&store, &config.namespace);
	let shared: Arc<MemoryStore> = Arc::new(store.clone());
	let sync = if storage_only {
		SyncManager::new(config.clone(), state.clone(), shared, None)
	} else {
		SyncManager::with_hub(config.clone(), state.clone(), shared, hub)
	}
	.context("joining sync")?;
	info!(tab = %sync.tab_id(), transport = ?sync.transport_kind(), "lft.tab_opened");
	Ok(Tab { sync, state, store })
}

fn report_leaders(tabs: &[Tab]) {
	let leaders: Vec<String> = tabs
		.iter()
		.filter(|tab| tab.sync.is_leader())
		.map(|tab| tab.sync.tab_id().to_string())
		.collect();
	info!(tabs = tabs.len(), ?leaders, "lft.leaders");
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("lft=debug,lft_sync=trace,lft_state=debug,lft_storage=debug")
		} else {
			EnvFilter::new("info")
		}
	});
	tracing_subscriber::fmt().with_env_filter(filter).init();
}
