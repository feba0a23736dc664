//! Background maintenance loops.
//!
//! Each loop ticks on its own interval and runs one blocking messenger call
//! per tick on the blocking pool. Shutdown is signalled through a watch
//! channel; a call already in flight finishes before its loop exits.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::wallet::BalanceSource;

/// Handles of the running loops.
pub struct LoopHandles {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl LoopHandles {
    /// Number of loops started.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop to stop and wait until they have.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Background loop panicked");
            }
        }
        info!("Background loops stopped");
    }
}

/// Start the resend, backup, settle and (when configured) periodic sync and
/// wallet refresh loops. Must be called from within a Tokio runtime.
pub fn spawn_background_loops(
    messenger: Arc<Messenger>,
    balances: Option<Arc<dyn BalanceSource>>,
) -> LoopHandles {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = messenger.config().clone();
    let mut handles = Vec::new();

    handles.push(spawn_loop(
        "resend",
        config.resend_interval,
        shutdown_rx.clone(),
        messenger.clone(),
        |m| {
            let resent = m.resend_expired_messages()?;
            if resent > 0 {
                debug!(resent, "Resend tick");
            }
            Ok(())
        },
    ));

    handles.push(spawn_loop(
        "backup",
        config.backup_interval,
        shutdown_rx.clone(),
        messenger.clone(),
        |m| m.backup().map(|_| ()),
    ));

    handles.push(spawn_loop(
        "settle",
        config.settle_tick,
        shutdown_rx.clone(),
        messenger.clone(),
        |m| m.settle().map(|_| ()),
    ));

    if let Some(period) = config.periodic_sync_interval {
        handles.push(spawn_loop(
            "sync",
            period,
            shutdown_rx.clone(),
            messenger.clone(),
            |m| m.sync_devices().map(|_| ()),
        ));
    }

    if let Some(source) = balances {
        handles.push(spawn_loop(
            "wallet",
            config.wallet_refresh_interval,
            shutdown_rx.clone(),
            messenger.clone(),
            move |m| m.refresh_wallet_balances(source.as_ref()).map(|_| ()),
        ));
    }

    info!(loops = handles.len(), "Background loops started");
    LoopHandles {
        shutdown_tx,
        handles,
    }
}

fn spawn_loop<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    messenger: Arc<Messenger>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn(&Messenger) -> Result<(), CoreError> + Send + Sync + 'static,
{
    let task = Arc::new(task);
    tokio::spawn(async move {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let messenger = messenger.clone();
            let task = task.clone();
            match tokio::task::spawn_blocking(move || task(&messenger)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
                Err(e) => error!(task = name, error = %e, "Background task panicked"),
            }
        }
        debug!(task = name, "Loop exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimeSource;
    use crate::testkit::{self, Device, TestNet};
    use crate::transport::Transport;
    use crate::wallet::FixedBalances;
    use parley_shared::protocol::WalletAccount;
    use parley_store::Chat;

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    fn fast_device() -> Device {
        let mut config = testkit::config();
        config.settle_tick = Duration::from_millis(10);
        config.wallet_refresh_interval = Duration::from_millis(10);
        config.periodic_sync_interval = None;
        TestNet::new().device_with_config("laptop", config)
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_loop() {
        let device = fast_device();
        let loops = spawn_background_loops(device.messenger.clone(), None);
        assert_eq!(loops.len(), 3);
        loops.shutdown().await;

        let with_wallet =
            spawn_background_loops(device.messenger.clone(), Some(Arc::new(FixedBalances::new())));
        assert_eq!(with_wallet.len(), 4);
        with_wallet.shutdown().await;
    }

    #[tokio::test]
    async fn test_settle_loop_joins_noted_chats() {
        let device = fast_device();
        let now = device.time.now_ms();
        device
            .messenger
            .save_chat(Chat::new_public("status", now))
            .unwrap();
        device.messenger.settler().note(vec!["status".to_string()], now);

        let loops = spawn_background_loops(device.messenger.clone(), None);
        device.time.advance(60_000);
        let joined = wait_for(|| device.transport.filters().contains(&"status".to_string())).await;
        loops.shutdown().await;
        assert!(joined);
    }

    #[tokio::test]
    async fn test_wallet_loop_stores_balances() {
        let device = fast_device();
        device
            .messenger
            .save_wallet_account(WalletAccount {
                address: "0xabc".into(),
                name: "main".into(),
                ..WalletAccount::default()
            })
            .unwrap();
        let source = Arc::new(FixedBalances::new());
        source.set("0xabc", "1500");

        let loops = spawn_background_loops(device.messenger.clone(), Some(source));
        let stored = wait_for(|| {
            device
                .messenger
                .wallet_balance("0xabc")
                .ok()
                .flatten()
                .is_some_and(|b| b.balance == "1500")
        })
        .await;
        loops.shutdown().await;
        assert!(stored);
    }
}
