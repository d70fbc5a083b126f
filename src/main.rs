use std::{sync::Arc, time::Duration};

use anyhow::Result;
use rust_web3_sequencer::{
    ActionSequencer, SequencerConfig, Session,
    client::{
        loader::SourceLoader,
        local_chain::{LocalChain, LocalWallet},
        subscription::DiagnosticChannel,
    },
    helpers::units::to_base_unit,
    types::{Account, event::Diagnostic},
};
use tokio::{sync::mpsc, time::timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Funded account of the in-process chain
const DEMO_ACCOUNT: &str = "0x5B38Da6a701c568545dCfcdDFcE3b64cBc1B4c9A";

fn create_tracing_subscriber() {
    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(false)
        .compact();
    tracing_subscriber::fmt()
        .event_format(format)
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    create_tracing_subscriber();

    let config = SequencerConfig::from_env();
    let account = Account::new(DEMO_ACCOUNT);

    let chain = LocalChain::new();
    chain.fund(&account, to_base_unit("10")?).await?;
    if !config.contract_address.is_empty() {
        chain
            .deploy_token(&config.contract_address, &account, to_base_unit("1000")?)
            .await;
    }

    let (tx, mut diagnostics) = mpsc::unbounded_channel();
    let sequencer =
        ActionSequencer::new(config, Arc::new(chain), Arc::new(SourceLoader::new()))
            .with_wallet(Arc::new(LocalWallet::new(vec![account])))
            .with_diagnostics(DiagnosticChannel::new(tx));
    let session = Session::new(sequencer);

    let report = session.trigger().await?;

    for line in session.inspect(|s| s.output().lines().to_vec()).await {
        println!("{}", line);
    }

    if report.is_complete() {
        match timeout(Duration::from_secs(1), diagnostics.recv()).await {
            Ok(Some(Diagnostic::Event(log))) => info!(event = ?log, "transfer event observed"),
            Ok(Some(Diagnostic::Error(message))) => warn!(%message, "subscription error"),
            _ => warn!("no transfer event observed"),
        }
    }

    session.teardown().await;

    Ok(())
}
