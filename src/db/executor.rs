use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::db::command::{CmdReceiver, Command};
use crate::db::store::KvStore;
use crate::persist::Persister;

/// How often the batch expiration sweep runs.
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// The single-writer loop. Owns the store outright; every mutation in the
/// process funnels through its ingress channel, which gives commands a total
/// order without any locking inside the data engine.
#[derive(Debug)]
pub struct Executor {
    store: KvStore,
    persister: Arc<Persister>,
    ingress: CmdReceiver,
    shutdown: broadcast::Receiver<()>,
}

impl Executor {
    pub fn new(
        store: KvStore,
        persister: Arc<Persister>,
        ingress: CmdReceiver,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            store,
            persister,
            ingress,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut gc_tick = time::interval(GC_INTERVAL);
        gc_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = gc_tick.tick() => {
                    self.store.gc();
                }
                maybe = self.ingress.recv() => {
                    let Some(command) = maybe else { return };
                    self.handle(command).await;
                }
                _ = self.shutdown.recv() => {
                    debug!("executor stopped");
                    return;
                }
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        let Command {
            ctx,
            verb,
            args,
            receiver,
        } = command;
        let (reply, records) = self.store.apply(verb, &args);
        // Persist after the mutation, in commit order. A full log buffer
        // back-pressures this loop.
        for line in &records {
            self.persister.persist_cmd(&ctx, line).await;
        }
        let _ = receiver.send(reply);
    }
}
