//! Wires the store, federator, listeners and RPC server together and runs
//! until a signal or the privileged `stop` command arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use jsonrpsee::server::Server;
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
    sync::watch,
    time,
};
use tracing::info;

use crate::{
    api::{self, RpcContext},
    cfg::Config,
    chain_listener::ChainSide,
    crypto::SecretKey,
    db::Db,
    events::FederatorEvent,
    federator::{make_federator, Federator},
};

pub struct App {
    config: Config,
    federator: Arc<Federator>,
    rpc_context: Arc<RpcContext>,
    stop_rx: watch::Receiver<bool>,
}

impl App {
    pub fn new(config: Config) -> Result<App> {
        let db = Arc::new(Db::new(Some(&config.data_dir))?);
        let signing_key = SecretKey::from_hex(config.key_type, &config.signing_key)?;
        info!(public_key = %signing_key.public_key(), "witness identity loaded");

        let federator = make_federator(
            Arc::clone(&db),
            config.bridge.clone(),
            signing_key,
            config.locking_chain_reward_account,
            config.issuing_chain_reward_account,
            config.witness_submit,
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let rpc_context = Arc::new(RpcContext {
            db,
            bridge: config.bridge.clone(),
            federator: Arc::clone(&federator),
            stop: stop_tx,
            admin: config.admin.clone(),
        });

        Ok(App {
            config,
            federator,
            rpc_context,
            stop_rx,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        // Connect both listeners. Subscriptions go out from the connect
        // callback; the endpoint replays the door account's history with
        // negative indices before switching to live traffic.
        for (side, endpoint) in [
            (ChainSide::Locking, &self.config.locking_chain_endpoint),
            (ChainSide::Issuing, &self.config.issuing_chain_endpoint),
        ] {
            let listener = self
                .federator
                .listener(side)
                .context("federator listeners not initialized")?;
            listener.init(endpoint);
            info!(chain = side.name(), endpoint = %endpoint, "chain listener connected");
        }

        let server = Server::builder()
            .build(self.config.rpc_endpoint)
            .await
            .with_context(|| format!("binding rpc server to {}", self.config.rpc_endpoint))?;
        let rpc_handle = server.start(api::rpc_module(Arc::clone(&self.rpc_context)));
        info!(endpoint = %self.config.rpc_endpoint, "rpc server listening");

        self.federator.start()?;
        // The store is open and the history subscriptions are issued; the
        // loop may now observe backfill and live events in order.
        self.federator.unlock_main_loop();

        let heartbeat = {
            let federator = Arc::clone(&self.federator);
            let period = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
            tokio::spawn(async move {
                let mut ticker = time::interval(period);
                loop {
                    ticker.tick().await;
                    federator.push(FederatorEvent::Heartbeat);
                }
            })
        };

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = self.stop_rx.changed() => info!("stop requested over rpc"),
        }

        heartbeat.abort();
        // stop() joins the federator's OS thread; keep that off the runtime.
        let federator = Arc::clone(&self.federator);
        tokio::task::spawn_blocking(move || federator.stop()).await?;
        let _ = rpc_handle.stop();
        rpc_handle.stopped().await;
        info!("witness stopped");
        Ok(())
    }
}
