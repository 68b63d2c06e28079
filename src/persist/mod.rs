pub mod aof;

use std::io;

use tokio::fs::File;

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::db::command::CmdContext;
use crate::persist::aof::AofPersister;

/// The executor's durable-log collaborator. `Fake` stands in when
/// persistence is disabled and for the shadow replay inside a rewrite.
#[derive(Debug)]
pub enum Persister {
    Aof(AofPersister),
    Fake,
}

impl Persister {
    pub async fn new(config: &ServerConfig, clock: Clock) -> io::Result<Persister> {
        if !config.append_only {
            return Ok(Persister::Fake);
        }
        Ok(Persister::Aof(AofPersister::new(config, clock).await?))
    }

    /// Enqueues one command line for the log writer. A loading context means
    /// the line came from replay and must not loop back into the log.
    pub async fn persist_cmd(&self, ctx: &CmdContext, cmd: &[Vec<u8>]) {
        if ctx.loading {
            return;
        }
        match self {
            Persister::Aof(aof) => aof.persist_cmd(cmd).await,
            Persister::Fake => {}
        }
    }

    /// A fresh read handle over the log, for startup replay.
    pub async fn reloader(&self) -> io::Result<Option<File>> {
        match self {
            Persister::Aof(aof) => aof.reloader().await.map(Some),
            Persister::Fake => Ok(None),
        }
    }

    /// Idempotent. Stops the writer and the fsync ticker, then flushes.
    pub async fn close(&self) {
        if let Persister::Aof(aof) = self {
            aof.close().await;
        }
    }
}
