//! The Courier relayer.
//!
//! The relayer ingests message emissions from every configured spoke chain,
//! deduplicates and orders them, forms bundles per (origin, destination)
//! pair, submits bundle commitments to the hub, tracks confirmations and the
//! challenge window, executes finalized messages in order, and settles
//! collected fees between the treasury and public goods.

#![forbid(unsafe_code)]
#![warn(unused_extern_crates)]

mod bundler;
mod chains;
mod fees;
mod finality;
mod ingest;
#[cfg(test)]
mod mocks;
mod relayer;
mod server;
mod settings;
mod store;
mod submit;

use color_eyre::Result;

use courier_base::CourierAgent;

use crate::{relayer::Relayer, settings::RelayerSettings as Settings};

async fn _main() -> Result<()> {
    color_eyre::install()?;
    let settings = Settings::new()?;
    settings.as_ref().tracing.start_tracing()?;

    let agent = Relayer::from_settings(settings).await?;
    agent.run().await??;
    Ok(())
}

fn main() -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(_main())
}
