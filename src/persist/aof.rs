use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{FsyncStrategy, ServerConfig};
use crate::db::command::{CmdLine, Verb};
use crate::db::store::KvStore;
use crate::parser::reply::multibulk_bytes;
use crate::server::connection::Connection;

/// Command lines buffered between the executor and the log writer. A full
/// buffer back-pressures the executor.
const BUFFER_CAPACITY: usize = 1 << 10;

/// The append-only log engine: a dedicated writer draining a bounded buffer,
/// a sync policy, and a concurrent three-phase rewrite that compacts the log
/// without stalling writes for longer than two short critical sections.
#[derive(Debug)]
pub struct AofPersister {
    tx: mpsc::Sender<CmdLine>,
    shared: Arc<Shared>,
    notify_shutdown: broadcast::Sender<()>,
    done_rx: Mutex<mpsc::Receiver<()>>,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Shared {
    /// Guards every touch of the log: appends, fsync, and the rewrite's
    /// tail-copy plus rename plus reopen.
    file: Mutex<File>,
    path: PathBuf,
    fsync: FsyncStrategy,
    /// Rewrite once this many commands were persisted; <= 1 disables.
    rewrite_after: u64,
    counter: AtomicU64,
    rewriting: AtomicBool,
    clock: Clock,
}

impl AofPersister {
    pub async fn new(config: &ServerConfig, clock: Clock) -> io::Result<Self> {
        let path = PathBuf::from(&config.append_filename);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let shared = Arc::new(Shared {
            file: Mutex::new(file),
            path,
            fsync: config.append_fsync,
            rewrite_after: config.auto_aof_rewrite_after_cmds,
            counter: AtomicU64::new(0),
            rewriting: AtomicBool::new(false),
            clock,
        });

        let (tx, rx) = mpsc::channel(BUFFER_CAPACITY);
        let (notify_shutdown, _) = broadcast::channel(1);
        let (done_tx, done_rx) = mpsc::channel::<()>(1);

        if shared.fsync == FsyncStrategy::EverySec {
            tokio::spawn(fsync_every_second(
                shared.clone(),
                notify_shutdown.subscribe(),
                done_tx.clone(),
            ));
        }
        tokio::spawn(run_writer(
            shared.clone(),
            rx,
            notify_shutdown.subscribe(),
            done_tx,
        ));

        Ok(Self {
            tx,
            shared,
            notify_shutdown,
            done_rx: Mutex::new(done_rx),
            closed: AtomicBool::new(false),
        })
    }

    pub async fn persist_cmd(&self, cmd: &[Vec<u8>]) {
        let _ = self.tx.send(cmd.to_vec()).await;
    }

    pub async fn reloader(&self) -> io::Result<File> {
        File::open(&self.shared.path).await
    }

    /// Idempotent. Signals the writer and the fsync ticker, waits for both
    /// to drain, then forces the last bytes down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.notify_shutdown.send(());
        let mut done_rx = self.done_rx.lock().await;
        let _ = done_rx.recv().await;

        let mut file = self.shared.file.lock().await;
        if let Err(err) = flush_and_sync(&mut file).await {
            warn!(cause = %err, "final aof fsync failed");
        }
        debug!("aof persister closed");
    }

    /// Number of commands appended so far, for rewrite-trigger tests.
    #[cfg(test)]
    pub(crate) fn persisted_count(&self) -> u64 {
        self.shared.counter.load(Ordering::SeqCst)
    }
}

async fn run_writer(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<CmdLine>,
    mut shutdown: broadcast::Receiver<()>,
    _done: mpsc::Sender<()>,
) {
    loop {
        tokio::select! {
            maybe = rx.recv() => {
                let Some(cmd) = maybe else { return };
                write_aof(&shared, &cmd).await;
                maybe_rewrite(&shared);
            }
            _ = shutdown.recv() => {
                // Flush what the executor already enqueued, then stop.
                while let Ok(cmd) = rx.try_recv() {
                    write_aof(&shared, &cmd).await;
                }
                debug!("aof writer stopped");
                return;
            }
        }
    }
}

async fn write_aof(shared: &Arc<Shared>, cmd: &CmdLine) {
    let bytes = multibulk_bytes(cmd);
    let mut file = shared.file.lock().await;
    if let Err(err) = file.write_all(&bytes).await {
        // The in-memory mutation stands; the log goes gappy instead of the
        // client seeing a failure.
        error!(cause = %err, "aof append failed");
        return;
    }
    if let Err(err) = file.flush().await {
        error!(cause = %err, "aof flush failed");
        return;
    }
    if shared.fsync != FsyncStrategy::Always {
        return;
    }
    if let Err(err) = file.sync_data().await {
        error!(cause = %err, "aof fsync failed");
    }
}

async fn fsync_every_second(
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
    _done: mpsc::Sender<()>,
) {
    let mut tick = time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let mut file = shared.file.lock().await;
                if let Err(err) = flush_and_sync(&mut file).await {
                    // Transient; the next tick retries.
                    warn!(cause = %err, "background fsync failed");
                }
            }
            _ = shutdown.recv() => {
                debug!("fsync ticker stopped");
                return;
            }
        }
    }
}

async fn flush_and_sync(file: &mut File) -> io::Result<()> {
    file.flush().await?;
    file.sync_data().await
}

fn maybe_rewrite(shared: &Arc<Shared>) {
    if shared.rewrite_after <= 1 {
        return;
    }
    let ticked = shared.counter.fetch_add(1, Ordering::SeqCst) + 1;
    if ticked < shared.rewrite_after {
        return;
    }
    shared.counter.fetch_sub(shared.rewrite_after, Ordering::SeqCst);
    if shared.rewriting.swap(true, Ordering::SeqCst) {
        return;
    }
    let shared = shared.clone();
    tokio::spawn(async move {
        if let Err(err) = rewrite(&shared).await {
            error!(cause = %err, "aof rewrite failed");
        }
        shared.rewriting.store(false, Ordering::SeqCst);
    });
}

/// Three phases. Only the first and third hold the file mutex; the expensive
/// middle runs against a point-in-time prefix of the log.
async fn rewrite(shared: &Arc<Shared>) -> crate::Result<()> {
    let (tmp_path, prefix_len) = start_rewrite(shared).await?;
    if let Err(err) = fork_and_dump(shared, &tmp_path, prefix_len).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    end_rewrite(shared, &tmp_path, prefix_len).await?;
    info!(path = %shared.path.display(), "aof rewrite complete");
    Ok(())
}

/// Phase one: settle the log and record how much of it the dump will cover.
async fn start_rewrite(shared: &Arc<Shared>) -> crate::Result<(PathBuf, u64)> {
    let mut file = shared.file.lock().await;
    flush_and_sync(&mut file).await?;
    let prefix_len = file.metadata().await?.len();

    // Same directory as the log so the final rename stays on one filesystem.
    let tmp_path = rewrite_path(&shared.path);
    File::create(&tmp_path).await?;
    Ok((tmp_path, prefix_len))
}

/// Phase two, off the mutex: replay the prefix into a shadow store, then
/// dump the shadow as a minimal command stream.
async fn fork_and_dump(
    shared: &Arc<Shared>,
    tmp_path: &Path,
    prefix_len: u64,
) -> crate::Result<()> {
    let file = File::open(&shared.path).await?;
    let mut conn = Connection::new(file.take(prefix_len));
    let mut shadow = KvStore::new(shared.clock.clone());
    loop {
        let frame = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                warn!(cause = %err, "log prefix ended mid-frame");
                break;
            }
        };
        let Some(cmdline) = frame.into_args() else {
            continue;
        };
        if cmdline.len() < 2 {
            continue;
        }
        let Some(verb) = Verb::resolve(&cmdline[0]) else {
            continue;
        };
        let _ = shadow.apply(verb, &cmdline[1..]);
    }

    let mut tmp = OpenOptions::new().append(true).open(tmp_path).await?;
    for line in shadow.dump_cmds() {
        tmp.write_all(&multibulk_bytes(&line)).await?;
    }
    tmp.flush().await?;
    Ok(())
}

/// Phase three: graft on whatever was appended during the dump, then swap
/// the rewritten file into place and reopen for appending.
async fn end_rewrite(shared: &Arc<Shared>, tmp_path: &Path, prefix_len: u64) -> crate::Result<()> {
    let mut file = shared.file.lock().await;
    flush_and_sync(&mut file).await?;

    let mut src = File::open(&shared.path).await?;
    src.seek(SeekFrom::Start(prefix_len)).await?;
    let mut tmp = OpenOptions::new().append(true).open(tmp_path).await?;
    tokio::io::copy(&mut src, &mut tmp).await?;
    tmp.flush().await?;
    tmp.sync_data().await?;
    drop(tmp);
    drop(src);

    tokio::fs::rename(tmp_path, &shared.path).await?;
    *file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&shared.path)
        .await?;
    Ok(())
}

fn rewrite_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "aof".into());
    name.push(".rewrite");
    path.with_file_name(name)
}
