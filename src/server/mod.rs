pub mod connection;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::db::command::CmdContext;
use crate::db::executor::Executor;
use crate::db::store::KvStore;
use crate::db::trigger::Trigger;
use crate::parser::reply::Reply;
use crate::persist::Persister;
use crate::server::connection::Connection;

const MAX_CONNECTIONS: usize = 250;
const INGRESS_CAPACITY: usize = 128;

/// Wires the whole stack by hand, replays the append-only log, then serves
/// until the shutdown future completes. Errors out of bind or replay are
/// fatal; the caller maps them to a nonzero exit.
pub async fn run(
    listener: TcpListener,
    shutdown: impl Future,
    config: &ServerConfig,
    clock: Clock,
) -> crate::Result<()> {
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    let persister = Arc::new(Persister::new(config, clock.clone()).await?);
    let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_CAPACITY);
    let executor = Executor::new(
        KvStore::new(clock),
        persister.clone(),
        ingress_rx,
        notify_shutdown.subscribe(),
    );
    tokio::spawn(executor.run());
    let trigger = Arc::new(Trigger::new(ingress_tx, notify_shutdown.clone()));

    // The log replays to EOF before the first connection is accepted.
    replay(&trigger, &persister).await?;

    let mut server = Listener {
        listener,
        trigger: trigger.clone(),
        notify_shutdown,
        limit_connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        shutdown_complete_tx,
    };

    tokio::select! {
        res = server.run() => {
            if let Err(err) = res {
                error!(cause = %err, "accept loop failed");
            }
        }
        _ = shutdown => {
            info!("server shutting down");
        }
    }

    let Listener {
        notify_shutdown,
        shutdown_complete_tx,
        ..
    } = server;
    trigger.close();
    drop(notify_shutdown);
    drop(shutdown_complete_tx);
    let _ = shutdown_complete_rx.recv().await;
    persister.close().await;
    Ok(())
}

/// Feeds the log back through the normal parse-dispatch-execute pipeline,
/// with the loading marker set so nothing re-persists. Corrupt or truncated
/// tail frames end the replay instead of failing startup.
async fn replay(trigger: &Trigger, persister: &Persister) -> crate::Result<()> {
    let Some(file) = persister.reloader().await? else {
        return Ok(());
    };
    let mut conn = Connection::new(file);
    let mut replayed = 0u64;
    loop {
        let frame = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                warn!(cause = %err, "log ended mid-frame, treating as end of log");
                break;
            }
        };
        let Some(cmdline) = frame.into_args() else {
            warn!("skipping non-command frame in log");
            continue;
        };
        let reply = trigger.dispatch(CmdContext::loading(), cmdline).await;
        if let Reply::Err(msg) = reply {
            warn!(%msg, "replayed command rejected");
        }
        replayed += 1;
    }
    info!(replayed, "append-only log replayed");
    Ok(())
}

struct Listener {
    listener: TcpListener,
    trigger: Arc<Trigger>,
    notify_shutdown: broadcast::Sender<()>,
    limit_connections: Arc<Semaphore>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl Listener {
    async fn run(&mut self) -> crate::Result<()> {
        loop {
            self.limit_connections.acquire().await?.forget();
            let socket = self.accept().await?;
            debug!("accepted connection");
            let mut handler = ConnHandler {
                connection: Connection::new(socket),
                trigger: self.trigger.clone(),
                limit_connections: self.limit_connections.clone(),
                shutdown: self.notify_shutdown.subscribe(),
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };
            tokio::spawn(async move {
                if let Err(err) = handler.run().await {
                    warn!(cause = %err, "connection terminated");
                }
            });
        }
    }

    async fn accept(&mut self) -> crate::Result<TcpStream> {
        let mut backoff = 1;
        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err.into());
                    }
                }
            }
            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

struct ConnHandler {
    connection: Connection<TcpStream>,
    trigger: Arc<Trigger>,
    limit_connections: Arc<Semaphore>,
    shutdown: broadcast::Receiver<()>,
    _shutdown_complete: mpsc::Sender<()>,
}

impl ConnHandler {
    async fn run(&mut self) -> crate::Result<()> {
        loop {
            let frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = self.shutdown.recv() => return Ok(()),
            };
            let Some(frame) = frame else {
                return Ok(());
            };
            let Some(cmdline) = frame.into_args() else {
                warn!("discarding non-command frame");
                continue;
            };
            let reply = self.trigger.dispatch(CmdContext::default(), cmdline).await;
            self.connection.write_reply(&reply).await?;
        }
    }
}

impl Drop for ConnHandler {
    fn drop(&mut self) {
        self.limit_connections.add_permits(1);
    }
}
