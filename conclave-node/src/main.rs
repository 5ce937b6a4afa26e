//! Council member binary.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use conclave_core::{PeerId, ResponseProfile, Value};
use conclave_node::{NodeConfig, PeerNode, ProposalOutcome};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Time allowed for sessions to form before a startup proposal is issued.
const STARTUP_GRACE: Duration = Duration::from_secs(2);

const COUNCIL_SIZE: u8 = 9;
const BASE_PORT: u16 = 8000;

#[derive(Parser, Debug)]
#[command(name = "conclave")]
#[command(about = "Run a council member")]
struct Args {
    /// Member id, 1..=9
    member_id: u8,

    /// TCP port to listen on
    port: u16,

    /// Pass `propose` to issue one proposal after startup
    mode: Option<String>,
}

/// Default addressbook: members 1..=9 on localhost:8001..=8009.
fn default_addressbook() -> BTreeMap<PeerId, SocketAddr> {
    (1..=COUNCIL_SIZE)
        .filter_map(PeerId::new)
        .map(|id| {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, BASE_PORT + u16::from(id.get())));
            (id, addr)
        })
        .collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let Some(id) = PeerId::new(args.member_id) else {
        eprintln!("member id must be in 1..={}", PeerId::MAX);
        return ExitCode::FAILURE;
    };

    let should_propose = args
        .mode
        .as_deref()
        .is_some_and(|mode| mode.eq_ignore_ascii_case("propose"));

    let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, args.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port = args.port, error = %e, "failed to start listener");
            return ExitCode::FAILURE;
        }
    };
    info!(member = %id, port = args.port, "listening");

    let config = NodeConfig {
        id,
        peers: default_addressbook(),
    };
    let profile = Arc::new(ResponseProfile::for_member(id));

    let node = match PeerNode::start(listener, config, profile) {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "failed to start node");
            return ExitCode::FAILURE;
        }
    };

    if should_propose {
        tokio::time::sleep(STARTUP_GRACE).await;
        let value =
            Value::new(format!("Value from Member {id}")).expect("startup value is non-empty");
        match node.propose(value).await {
            ProposalOutcome::Chosen(chosen) => info!(%chosen, "proposal succeeded"),
            ProposalOutcome::LostQuorum => warn!("proposal lost quorum"),
            ProposalOutcome::Aborted => warn!("proposal aborted"),
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    node.shutdown().await;
    ExitCode::SUCCESS
}
