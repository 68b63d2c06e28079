use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::db::command::{CmdContext, CmdSender, Command, Verb};
use crate::parser::reply::Reply;

/// The dispatcher in front of the executor. Turns a raw command line into a
/// `Command` envelope, enqueues it, and waits on the single-shot reply.
#[derive(Debug)]
pub struct Trigger {
    sender: CmdSender,
    notify_shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl Trigger {
    pub fn new(sender: CmdSender, notify_shutdown: broadcast::Sender<()>) -> Self {
        Self {
            sender,
            notify_shutdown,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn dispatch(&self, ctx: CmdContext, cmdline: Vec<Vec<u8>>) -> Reply {
        if cmdline.is_empty() {
            return Reply::Err("Err empty command line".to_string());
        }
        let Some(verb) = Verb::resolve(&cmdline[0]) else {
            return Reply::unknown_command(&cmdline[0]);
        };

        // Arity is each verb handler's concern; a verb-only line goes
        // through and comes back with that verb's argument-count error.
        let (tx, rx) = oneshot::channel();
        let command = Command {
            ctx,
            verb,
            args: cmdline[1..].to_vec(),
            receiver: tx,
        };
        if self.sender.send(command).await.is_err() {
            return Reply::Err("Err server is shutting down".to_string());
        }
        // The command may still execute after a failed wait; the executor
        // never depends on this side consuming the result.
        match rx.await {
            Ok(reply) => reply,
            Err(_) => Reply::Err("Err command aborted".to_string()),
        }
    }

    /// Idempotent; tells the executor to stop exactly once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("trigger closed, stopping executor");
        let _ = self.notify_shutdown.send(());
    }
}
