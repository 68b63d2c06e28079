use tokio::sync::{mpsc, oneshot};

use crate::parser::reply::Reply;

/// A command line as it appears on the wire and in the append-only log:
/// verb first, then the arguments, all byte strings.
pub type CmdLine = Vec<Vec<u8>>;

pub type CmdSender = mpsc::Sender<Command>;
pub type CmdReceiver = mpsc::Receiver<Command>;

/// Per-request state threaded dispatcher -> executor -> persister.
#[derive(Clone, Copy, Debug, Default)]
pub struct CmdContext {
    /// Set while the append-only log is being replayed; the persister
    /// suppresses writes so replay cannot feed back into the log.
    pub loading: bool,
}

impl CmdContext {
    pub fn loading() -> Self {
        Self { loading: true }
    }
}

/// The envelope handed to the executor. The reply travels back over the
/// single-shot channel; a caller that stopped listening is ignored.
#[derive(Debug)]
pub struct Command {
    pub ctx: CmdContext,
    pub verb: Verb,
    pub args: Vec<Vec<u8>>,
    pub receiver: oneshot::Sender<Reply>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Expire,
    ExpireAt,
    Get,
    Set,
    MGet,
    MSet,
    LPush,
    LPop,
    RPush,
    RPop,
    LRange,
    SAdd,
    SIsMember,
    SRem,
    HSet,
    HGet,
    HDel,
    ZAdd,
    ZRangeByScore,
    ZRem,
}

impl Verb {
    /// Case-insensitive lookup against the verb table.
    pub fn resolve(name: &[u8]) -> Option<Verb> {
        let name = std::str::from_utf8(name).ok()?;
        let verb = match name.to_ascii_lowercase().as_str() {
            "expire" => Verb::Expire,
            "expireat" => Verb::ExpireAt,
            "get" => Verb::Get,
            "set" => Verb::Set,
            "mget" => Verb::MGet,
            "mset" => Verb::MSet,
            "lpush" => Verb::LPush,
            "lpop" => Verb::LPop,
            "rpush" => Verb::RPush,
            "rpop" => Verb::RPop,
            "lrange" => Verb::LRange,
            "sadd" => Verb::SAdd,
            "sismember" => Verb::SIsMember,
            "srem" => Verb::SRem,
            "hset" => Verb::HSet,
            "hget" => Verb::HGet,
            "hdel" => Verb::HDel,
            "zadd" => Verb::ZAdd,
            "zrangebyscore" => Verb::ZRangeByScore,
            "zrem" => Verb::ZRem,
            _ => return None,
        };
        Some(verb)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Verb::Expire => "expire",
            Verb::ExpireAt => "expireat",
            Verb::Get => "get",
            Verb::Set => "set",
            Verb::MGet => "mget",
            Verb::MSet => "mset",
            Verb::LPush => "lpush",
            Verb::LPop => "lpop",
            Verb::RPush => "rpush",
            Verb::RPop => "rpop",
            Verb::LRange => "lrange",
            Verb::SAdd => "sadd",
            Verb::SIsMember => "sismember",
            Verb::SRem => "srem",
            Verb::HSet => "hset",
            Verb::HGet => "hget",
            Verb::HDel => "hdel",
            Verb::ZAdd => "zadd",
            Verb::ZRangeByScore => "zrangebyscore",
            Verb::ZRem => "zrem",
        }
    }
}
