// SPDX-FileCopyrightText: Cluster Discovery Contributors
//
// SPDX-License-Identifier: EUPL-1.2

//! Standalone node binary: wires `discovery-settings`, `discovery-core` and a real etcd store
//! together so the bootstrap/membership-maintenance protocol can be exercised against a live
//! cluster.

mod membership;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use discovery_core::{DiscoveryFsm, EtcdStore};

use membership::StaticMembership;

/// Runs one node's participation in the etcd-backed rendezvous protocol.
#[derive(Debug, Parser)]
struct Args {
    /// Path to the TOML configuration file loaded by `discovery-settings`.
    #[clap(long, default_value = "discovery.toml")]
    config: String,

    /// This node's own address, as it should appear in the published seed list.
    #[clap(long)]
    self_address: String,

    /// Addresses of peers already known out-of-band (e.g. from a prior run), seeded into the
    /// cluster-membership snapshot handed to the Seed-list FSM on leader entry.
    #[clap(long = "peer")]
    known_peers: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = discovery_settings::load(&args.config).context("failed to load configuration")?;

    log::info!(
        "connecting to etcd at {:?}, namespace {}",
        config.etcd_urls,
        config.etcd_path
    );
    let store = EtcdStore::connect(&config.etcd_urls)
        .await
        .context("failed to connect to etcd")?;

    let membership = StaticMembership::new(args.self_address, args.known_peers);

    let handle = DiscoveryFsm::spawn(config, Arc::new(store), Arc::new(membership))
        .context("failed to start discovery FSM")?;

    let mut state_changes = handle.subscribe_state();
    tokio::spawn(async move {
        loop {
            let state = *state_changes.borrow_and_update();
            log::info!("discovery state: {state:?}");
            if state_changes.changed().await.is_err() {
                break;
            }
        }
    });

    handle.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    log::info!("shutdown signal received, exiting");

    Ok(())
}
