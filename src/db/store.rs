use std::collections::HashMap;

use crate::clock::Clock;
use crate::db::command::{CmdLine, Verb};
use crate::db::entity::{Entity, HashEntity, ListEntity, SetEntity, StrEntity, ZsetEntity};
use crate::db::skiplist::{Added, SkipList};
use crate::parser::reply::Reply;

/// The data engine. Owned exclusively by the executor loop, which is the sole
/// mutator, so nothing in here needs interior locking.
///
/// Three structures stay in lockstep: the value map, the deadline map, and
/// the expiration wheel (a skiplist from deadline-unix-seconds to the keys
/// due at that second). A key present in the deadline map is always present
/// in the value map; the reverse need not hold.
#[derive(Debug)]
pub struct KvStore {
    data: HashMap<Vec<u8>, Entity>,
    expire_at: HashMap<Vec<u8>, i64>,
    expire_wheel: SkipList,
    clock: Clock,
}

impl KvStore {
    pub fn new(clock: Clock) -> Self {
        Self {
            data: HashMap::new(),
            expire_at: HashMap::new(),
            expire_wheel: SkipList::new(),
            clock,
        }
    }

    /// Runs one command: lazy expiration on the primary key, then the verb
    /// handler. Returns the reply plus the command lines to persist, in
    /// commit order.
    pub fn apply(&mut self, verb: Verb, args: &[Vec<u8>]) -> (Reply, Vec<CmdLine>) {
        if let Some(primary) = args.first() {
            self.expire_preprocess(primary);
        }
        let mut records = Vec::new();
        let reply = match verb {
            Verb::Expire => self.expire_cmd(args, &mut records),
            Verb::ExpireAt => self.expire_at_cmd(args, &mut records),
            Verb::Get => self.get(args),
            Verb::Set => self.set(args, &mut records),
            Verb::MGet => self.mget(args),
            Verb::MSet => self.mset(args, &mut records),
            Verb::LPush => self.push(args, &mut records, Verb::LPush),
            Verb::RPush => self.push(args, &mut records, Verb::RPush),
            Verb::LPop => self.pop(args, &mut records, Verb::LPop),
            Verb::RPop => self.pop(args, &mut records, Verb::RPop),
            Verb::LRange => self.lrange(args),
            Verb::SAdd => self.sadd(args, &mut records),
            Verb::SIsMember => self.sismember(args),
            Verb::SRem => self.srem(args, &mut records),
            Verb::HSet => self.hset(args, &mut records),
            Verb::HGet => self.hget(args),
            Verb::HDel => self.hdel(args, &mut records),
            Verb::ZAdd => self.zadd(args, &mut records),
            Verb::ZRangeByScore => self.zrangebyscore(args),
            Verb::ZRem => self.zrem(args, &mut records),
        };
        (reply, records)
    }

    // ---- expiration ----

    /// Lazy eviction: a past-due key is removed before the operation sees it.
    pub fn expire_preprocess(&mut self, key: &[u8]) {
        let Some(&deadline) = self.expire_at.get(key) else {
            return;
        };
        if deadline > self.clock.now_unix() {
            return;
        }
        self.evict(key);
    }

    /// Batch sweep over everything due by now.
    pub fn gc(&mut self) {
        let now = self.clock.now_unix();
        for key in self.expire_wheel.range(0, now) {
            self.evict(&key);
        }
    }

    fn evict(&mut self, key: &[u8]) {
        self.expire_at.remove(key);
        self.data.remove(key);
        self.expire_wheel.remove(key);
    }

    /// Registers a deadline. A key that does not exist is left alone.
    fn register_deadline(&mut self, key: &[u8], deadline: i64) {
        if !self.data.contains_key(key) {
            return;
        }
        self.expire_at.insert(key.to_vec(), deadline);
        self.expire_wheel.add(deadline, key);
    }

    fn expire_cmd(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() != 2 {
            return Reply::wrong_arg_count(Verb::Expire.as_str());
        }
        let Some(ttl) = parse_i64(&args[1]) else {
            return Reply::SyntaxErr;
        };
        let deadline = self.clock.now_unix() + ttl;
        self.register_deadline(&args[0], deadline);
        records.push(expireat_cmd(&args[0], deadline));
        Reply::Ok
    }

    fn expire_at_cmd(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() != 2 {
            return Reply::wrong_arg_count(Verb::ExpireAt.as_str());
        }
        let Some(deadline) = parse_i64(&args[1]) else {
            return Reply::SyntaxErr;
        };
        self.register_deadline(&args[0], deadline);
        records.push(expireat_cmd(&args[0], deadline));
        Reply::Ok
    }

    // ---- strings ----

    fn get(&mut self, args: &[Vec<u8>]) -> Reply {
        if args.len() != 1 {
            return Reply::wrong_arg_count(Verb::Get.as_str());
        }
        match self.data.get(&args[0]) {
            None => Reply::Nil,
            Some(Entity::Str(s)) => Reply::Bulk(s.value().to_vec()),
            Some(_) => Reply::WrongTypeErr,
        }
    }

    /// `SET key value [NX] [EX seconds]`, flags in any order. The persisted
    /// form has the EX pair stripped; the deadline goes into the log as its
    /// own EXPIREAT line right after the SET.
    fn set(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() < 2 {
            return Reply::wrong_arg_count(Verb::Set.as_str());
        }

        let mut insert_only = false;
        let mut ttl_seconds: Option<i64> = None;
        let mut ttl_index = None;

        let mut i = 2;
        while i < args.len() {
            match args[i].to_ascii_lowercase().as_slice() {
                b"nx" => insert_only = true,
                b"ex" => {
                    if ttl_seconds.is_some() {
                        return Reply::SyntaxErr;
                    }
                    if i == args.len() - 1 {
                        return Reply::SyntaxErr;
                    }
                    let Some(ttl) = parse_i64(&args[i + 1]) else {
                        return Reply::SyntaxErr;
                    };
                    ttl_seconds = Some(ttl);
                    ttl_index = Some(i);
                    i += 1;
                }
                _ => return Reply::SyntaxErr,
            }
            i += 1;
        }

        let affected = self.put(args[0].clone(), args[1].clone(), insert_only);
        if affected == 0 {
            return Reply::Nil;
        }

        let mut persist_args = args.to_vec();
        if let Some(idx) = ttl_index {
            persist_args.drain(idx..idx + 2);
        }
        records.push(cmdline("SET", &persist_args));

        if let Some(ttl) = ttl_seconds {
            let deadline = self.clock.now_unix() + ttl;
            self.register_deadline(&args[0], deadline);
            records.push(expireat_cmd(&args[0], deadline));
        }
        Reply::Ok
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>, insert_only: bool) -> i64 {
        if insert_only && self.data.contains_key(&key) {
            return 0;
        }
        self.data
            .insert(key.clone(), Entity::Str(StrEntity::new(key, value)));
        1
    }

    fn mget(&mut self, args: &[Vec<u8>]) -> Reply {
        if args.is_empty() {
            return Reply::wrong_arg_count(Verb::MGet.as_str());
        }
        let mut out = Vec::with_capacity(args.len());
        for key in args {
            self.expire_preprocess(key);
            match self.data.get(key) {
                Some(Entity::Str(s)) => out.push(Some(s.value().to_vec())),
                _ => out.push(None),
            }
        }
        Reply::MultiBulk(out)
    }

    fn mset(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.is_empty() || args.len() % 2 != 0 {
            return Reply::SyntaxErr;
        }
        for pair in args.chunks(2) {
            self.expire_preprocess(&pair[0]);
            self.put(pair[0].clone(), pair[1].clone(), false);
        }
        records.push(cmdline("MSET", args));
        Reply::Ok
    }

    // ---- lists ----

    fn push(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>, verb: Verb) -> Reply {
        if args.len() < 2 {
            return Reply::wrong_arg_count(verb.as_str());
        }
        let list = match self.list_entry(&args[0]) {
            Ok(list) => list,
            Err(reply) => return reply,
        };
        for value in &args[1..] {
            match verb {
                Verb::LPush => list.lpush(value.clone()),
                _ => list.rpush(value.clone()),
            }
        }
        let len = list.len() as i64;
        records.push(cmdline(
            if verb == Verb::LPush { "LPUSH" } else { "RPUSH" },
            args,
        ));
        Reply::Int(len)
    }

    fn pop(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>, verb: Verb) -> Reply {
        if args.is_empty() || args.len() > 2 {
            return Reply::wrong_arg_count(verb.as_str());
        }
        let count = if args.len() == 2 {
            match parse_i64(&args[1]) {
                Some(n) if n > 0 => n as usize,
                _ => return Reply::SyntaxErr,
            }
        } else {
            1
        };

        let popped = match self.data.get_mut(&args[0]) {
            None => return Reply::Nil,
            Some(Entity::List(list)) => {
                if verb == Verb::LPop {
                    list.lpop(count)
                } else {
                    list.rpop(count)
                }
            }
            Some(_) => return Reply::WrongTypeErr,
        };
        let Some(values) = popped else {
            return Reply::Nil;
        };

        self.drop_if_drained(&args[0]);
        records.push(cmdline(
            if verb == Verb::LPop { "LPOP" } else { "RPOP" },
            args,
        ));
        if args.len() == 1 {
            match values.into_iter().next() {
                Some(value) => Reply::Bulk(value),
                None => Reply::Nil,
            }
        } else {
            Reply::multi(values)
        }
    }

    fn lrange(&mut self, args: &[Vec<u8>]) -> Reply {
        if args.len() != 3 {
            return Reply::wrong_arg_count(Verb::LRange.as_str());
        }
        let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
            return Reply::SyntaxErr;
        };
        match self.data.get(&args[0]) {
            None => Reply::EmptyMultiBulk,
            Some(Entity::List(list)) => Reply::multi(list.range(start, stop)),
            Some(_) => Reply::WrongTypeErr,
        }
    }

    // ---- sets ----

    fn sadd(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() < 2 {
            return Reply::wrong_arg_count(Verb::SAdd.as_str());
        }
        let set = match self.set_entry(&args[0]) {
            Ok(set) => set,
            Err(reply) => return reply,
        };
        let mut added = 0;
        for member in &args[1..] {
            if set.add(member.clone()) {
                added += 1;
            }
        }
        if added > 0 {
            records.push(cmdline("SADD", args));
        }
        Reply::Int(added)
    }

    fn sismember(&mut self, args: &[Vec<u8>]) -> Reply {
        if args.len() != 2 {
            return Reply::wrong_arg_count(Verb::SIsMember.as_str());
        }
        match self.data.get(&args[0]) {
            None => Reply::Int(0),
            Some(Entity::Set(set)) => Reply::Int(set.contains(&args[1]) as i64),
            Some(_) => Reply::WrongTypeErr,
        }
    }

    fn srem(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() < 2 {
            return Reply::wrong_arg_count(Verb::SRem.as_str());
        }
        let removed = match self.data.get_mut(&args[0]) {
            None => return Reply::Int(0),
            Some(Entity::Set(set)) => {
                args[1..].iter().filter(|m| set.remove(m.as_slice())).count() as i64
            }
            Some(_) => return Reply::WrongTypeErr,
        };
        if removed > 0 {
            self.drop_if_drained(&args[0]);
            records.push(cmdline("SREM", args));
        }
        Reply::Int(removed)
    }

    // ---- hashes ----

    fn hset(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() != 3 {
            return Reply::wrong_arg_count(Verb::HSet.as_str());
        }
        let hash = match self.hash_entry(&args[0]) {
            Ok(hash) => hash,
            Err(reply) => return reply,
        };
        let created = hash.put(args[1].clone(), args[2].clone());
        records.push(cmdline("HSET", args));
        Reply::Int(created as i64)
    }

    fn hget(&mut self, args: &[Vec<u8>]) -> Reply {
        if args.len() != 2 {
            return Reply::wrong_arg_count(Verb::HGet.as_str());
        }
        match self.data.get(&args[0]) {
            None => Reply::Nil,
            Some(Entity::Hash(hash)) => match hash.get(&args[1]) {
                Some(value) => Reply::Bulk(value.to_vec()),
                None => Reply::Nil,
            },
            Some(_) => Reply::WrongTypeErr,
        }
    }

    fn hdel(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() < 2 {
            return Reply::wrong_arg_count(Verb::HDel.as_str());
        }
        let removed = match self.data.get_mut(&args[0]) {
            None => return Reply::Int(0),
            Some(Entity::Hash(hash)) => {
                args[1..].iter().filter(|f| hash.del(f.as_slice())).count() as i64
            }
            Some(_) => return Reply::WrongTypeErr,
        };
        if removed > 0 {
            self.drop_if_drained(&args[0]);
            records.push(cmdline("HDEL", args));
        }
        Reply::Int(removed)
    }

    // ---- sorted sets ----

    fn zadd(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() < 3 || (args.len() - 1) % 2 != 0 {
            return Reply::wrong_arg_count(Verb::ZAdd.as_str());
        }
        // Validate every score before touching the zset.
        let mut pairs = Vec::with_capacity((args.len() - 1) / 2);
        for pair in args[1..].chunks(2) {
            let Some(score) = parse_i64(&pair[0]) else {
                return Reply::SyntaxErr;
            };
            pairs.push((score, pair[1].clone()));
        }

        let zset = match self.zset_entry(&args[0]) {
            Ok(zset) => zset,
            Err(reply) => return reply,
        };
        let mut new_members = 0;
        let mut changed = false;
        for (score, member) in pairs {
            match zset.add(score, &member) {
                Added::New => {
                    new_members += 1;
                    changed = true;
                }
                Added::Rescored => changed = true,
                Added::Unchanged => {}
            }
        }
        if changed {
            records.push(cmdline("ZADD", args));
        }
        Reply::Int(new_members)
    }

    fn zrangebyscore(&mut self, args: &[Vec<u8>]) -> Reply {
        if args.len() != 3 {
            return Reply::wrong_arg_count(Verb::ZRangeByScore.as_str());
        }
        let (Some(lo), Some(hi)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
            return Reply::SyntaxErr;
        };
        match self.data.get(&args[0]) {
            None => Reply::EmptyMultiBulk,
            Some(Entity::Zset(zset)) => Reply::multi(zset.range(lo, hi)),
            Some(_) => Reply::WrongTypeErr,
        }
    }

    fn zrem(&mut self, args: &[Vec<u8>], records: &mut Vec<CmdLine>) -> Reply {
        if args.len() < 2 {
            return Reply::wrong_arg_count(Verb::ZRem.as_str());
        }
        let removed = match self.data.get_mut(&args[0]) {
            None => return Reply::Int(0),
            Some(Entity::Zset(zset)) => {
                args[1..].iter().filter(|m| zset.remove(m.as_slice())).count() as i64
            }
            Some(_) => return Reply::WrongTypeErr,
        };
        if removed > 0 {
            self.drop_if_drained(&args[0]);
            records.push(cmdline("ZREM", args));
        }
        Reply::Int(removed)
    }

    // ---- plumbing ----

    /// Command lines that rebuild the current live state, for the rewrite
    /// dump. Keys with a deadline get an extra EXPIREAT line.
    pub fn dump_cmds(&self) -> Vec<CmdLine> {
        let mut out = Vec::new();
        for (key, entity) in &self.data {
            out.extend(entity.to_cmds());
            if let Some(&deadline) = self.expire_at.get(key) {
                out.push(expireat_cmd(key, deadline));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn deadline_of(&self, key: &[u8]) -> Option<i64> {
        self.expire_at.get(key).copied()
    }

    /// Aggregates with zero members must not be observable.
    fn drop_if_drained(&mut self, key: &[u8]) {
        let drained = self.data.get(key).map(Entity::is_drained).unwrap_or(false);
        if drained {
            self.evict(key);
        }
    }

    fn list_entry(&mut self, key: &[u8]) -> Result<&mut ListEntity, Reply> {
        let entity = self
            .data
            .entry(key.to_vec())
            .or_insert_with(|| Entity::List(ListEntity::new(key.to_vec())));
        match entity {
            Entity::List(list) => Ok(list),
            _ => Err(Reply::WrongTypeErr),
        }
    }

    fn set_entry(&mut self, key: &[u8]) -> Result<&mut SetEntity, Reply> {
        let entity = self
            .data
            .entry(key.to_vec())
            .or_insert_with(|| Entity::Set(SetEntity::new(key.to_vec())));
        match entity {
            Entity::Set(set) => Ok(set),
            _ => Err(Reply::WrongTypeErr),
        }
    }

    fn hash_entry(&mut self, key: &[u8]) -> Result<&mut HashEntity, Reply> {
        let entity = self
            .data
            .entry(key.to_vec())
            .or_insert_with(|| Entity::Hash(HashEntity::new(key.to_vec())));
        match entity {
            Entity::Hash(hash) => Ok(hash),
            _ => Err(Reply::WrongTypeErr),
        }
    }

    fn zset_entry(&mut self, key: &[u8]) -> Result<&mut ZsetEntity, Reply> {
        let entity = self
            .data
            .entry(key.to_vec())
            .or_insert_with(|| Entity::Zset(ZsetEntity::new(key.to_vec())));
        match entity {
            Entity::Zset(zset) => Ok(zset),
            _ => Err(Reply::WrongTypeErr),
        }
    }
}

fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn cmdline(verb: &str, args: &[Vec<u8>]) -> CmdLine {
    let mut line = Vec::with_capacity(args.len() + 1);
    line.push(verb.as_bytes().to_vec());
    line.extend(args.iter().cloned());
    line
}

fn expireat_cmd(key: &[u8], deadline: i64) -> CmdLine {
    vec![
        b"EXPIREAT".to_vec(),
        key.to_vec(),
        deadline.to_string().into_bytes(),
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> (KvStore, crate::clock::ManualClock) {
        let (clock, handle) = Clock::manual(1_000);
        (KvStore::new(clock), handle)
    }

    fn args(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    fn run(store: &mut KvStore, verb: Verb, parts: &[&[u8]]) -> Reply {
        store.apply(verb, &args(parts)).0
    }

    #[test]
    fn set_then_get() {
        let (mut kv, _) = store();
        assert_eq!(run(&mut kv, Verb::Set, &[b"foo", b"bar"]), Reply::Ok);
        assert_eq!(
            run(&mut kv, Verb::Get, &[b"foo"]),
            Reply::Bulk(b"bar".to_vec())
        );
        assert_eq!(run(&mut kv, Verb::Get, &[b"nope"]), Reply::Nil);
    }

    #[test]
    fn set_is_idempotent() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::Set, &[b"k", b"v"]);
        run(&mut kv, Verb::Set, &[b"k", b"v"]);
        assert_eq!(kv.len(), 1);
        assert_eq!(run(&mut kv, Verb::Get, &[b"k"]), Reply::Bulk(b"v".to_vec()));
    }

    #[test]
    fn set_nx_skips_existing_keys() {
        let (mut kv, _) = store();
        assert_eq!(run(&mut kv, Verb::Set, &[b"k", b"v1"]), Reply::Ok);
        assert_eq!(run(&mut kv, Verb::Set, &[b"k", b"v2", b"NX"]), Reply::Nil);
        assert_eq!(
            run(&mut kv, Verb::Get, &[b"k"]),
            Reply::Bulk(b"v1".to_vec())
        );
        assert_eq!(run(&mut kv, Verb::Set, &[b"new", b"v", b"nx"]), Reply::Ok);
    }

    #[test]
    fn set_nx_skip_registers_no_deadline() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::Set, &[b"k", b"v"]);
        let (reply, records) = kv.apply(Verb::Set, &args(&[b"k", b"v2", b"NX", b"EX", b"10"]));
        assert_eq!(reply, Reply::Nil);
        assert!(records.is_empty());
        assert_eq!(kv.deadline_of(b"k"), None);
    }

    #[test]
    fn set_flag_syntax_errors() {
        let (mut kv, _) = store();
        for bad in [
            &[&b"k"[..], b"v", b"EX"][..],
            &[b"k", b"v", b"EX", b"abc"],
            &[b"k", b"v", b"EX", b"1", b"EX", b"2"],
            &[b"k", b"v", b"XX"],
        ] {
            assert_eq!(run(&mut kv, Verb::Set, bad), Reply::SyntaxErr);
        }
    }

    #[test]
    fn set_persists_expireat_separately() {
        let (mut kv, _) = store();
        let (reply, records) = kv.apply(Verb::Set, &args(&[b"k", b"v", b"EX", b"60"]));
        assert_eq!(reply, Reply::Ok);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], args(&[b"SET", b"k", b"v"]));
        assert_eq!(records[1], args(&[b"EXPIREAT", b"k", b"1060"]));
        assert_eq!(kv.deadline_of(b"k"), Some(1_060));
    }

    #[test]
    fn get_wrong_type() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::LPush, &[b"l", b"a"]);
        assert_eq!(run(&mut kv, Verb::Get, &[b"l"]), Reply::WrongTypeErr);
    }

    #[test]
    fn mget_mixes_hits_and_misses() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::Set, &[b"a", b"1"]);
        run(&mut kv, Verb::LPush, &[b"l", b"x"]);
        assert_eq!(
            run(&mut kv, Verb::MGet, &[b"a", b"missing", b"l"]),
            Reply::MultiBulk(vec![Some(b"1".to_vec()), None, None])
        );
    }

    #[test]
    fn mset_requires_even_args() {
        let (mut kv, _) = store();
        assert_eq!(run(&mut kv, Verb::MSet, &[b"a", b"1", b"b"]), Reply::SyntaxErr);
        assert_eq!(run(&mut kv, Verb::MSet, &[b"a", b"1", b"b", b"2"]), Reply::Ok);
        assert_eq!(run(&mut kv, Verb::Get, &[b"b"]), Reply::Bulk(b"2".to_vec()));
    }

    #[test]
    fn lazy_expiration_on_access() {
        let (mut kv, clock) = store();
        run(&mut kv, Verb::Set, &[b"k", b"v", b"EX", b"10"]);
        assert_eq!(run(&mut kv, Verb::Get, &[b"k"]), Reply::Bulk(b"v".to_vec()));

        clock.advance(10);
        assert_eq!(run(&mut kv, Verb::Get, &[b"k"]), Reply::Nil);
        assert_eq!(kv.len(), 0);
        assert_eq!(kv.deadline_of(b"k"), None);
    }

    #[test]
    fn deadline_is_exclusive_of_now() {
        let (mut kv, clock) = store();
        run(&mut kv, Verb::Set, &[b"k", b"v", b"EX", b"10"]);
        clock.advance(9);
        assert_eq!(run(&mut kv, Verb::Get, &[b"k"]), Reply::Bulk(b"v".to_vec()));
    }

    #[test]
    fn gc_sweeps_everything_due() {
        let (mut kv, clock) = store();
        run(&mut kv, Verb::Set, &[b"a", b"1", b"EX", b"5"]);
        run(&mut kv, Verb::Set, &[b"b", b"2", b"EX", b"50"]);
        run(&mut kv, Verb::Set, &[b"c", b"3"]);

        clock.advance(10);
        kv.gc();
        assert_eq!(kv.len(), 2);
        assert_eq!(run(&mut kv, Verb::Get, &[b"a"]), Reply::Nil);
        assert_eq!(run(&mut kv, Verb::Get, &[b"b"]), Reply::Bulk(b"2".to_vec()));
    }

    #[test]
    fn expireat_on_missing_key_is_a_noop() {
        let (mut kv, _) = store();
        assert_eq!(
            run(&mut kv, Verb::ExpireAt, &[b"ghost", b"2000"]),
            Reply::Ok
        );
        assert_eq!(kv.deadline_of(b"ghost"), None);
    }

    #[test]
    fn expire_registers_relative_deadline() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::Set, &[b"k", b"v"]);
        let (reply, records) = kv.apply(Verb::Expire, &args(&[b"k", b"30"]));
        assert_eq!(reply, Reply::Ok);
        assert_eq!(records, vec![args(&[b"EXPIREAT", b"k", b"1030"])]);
        assert_eq!(kv.deadline_of(b"k"), Some(1_030));
    }

    #[test]
    fn re_expire_moves_the_wheel_slot() {
        let (mut kv, clock) = store();
        run(&mut kv, Verb::Set, &[b"k", b"v"]);
        run(&mut kv, Verb::Expire, &[b"k", b"5"]);
        run(&mut kv, Verb::Expire, &[b"k", b"100"]);

        clock.advance(10);
        kv.gc();
        assert_eq!(run(&mut kv, Verb::Get, &[b"k"]), Reply::Bulk(b"v".to_vec()));
    }

    #[test]
    fn list_push_pop_range() {
        let (mut kv, _) = store();
        assert_eq!(run(&mut kv, Verb::LPush, &[b"l", b"a"]), Reply::Int(1));
        assert_eq!(run(&mut kv, Verb::LPush, &[b"l", b"b"]), Reply::Int(2));
        assert_eq!(
            run(&mut kv, Verb::LRange, &[b"l", b"0", b"-1"]),
            Reply::multi(vec![b"b".to_vec(), b"a".to_vec()])
        );

        assert_eq!(run(&mut kv, Verb::RPush, &[b"l", b"c"]), Reply::Int(3));
        assert_eq!(
            run(&mut kv, Verb::RPop, &[b"l"]),
            Reply::Bulk(b"c".to_vec())
        );
        assert_eq!(
            run(&mut kv, Verb::LPop, &[b"l"]),
            Reply::Bulk(b"b".to_vec())
        );
    }

    #[test]
    fn lrange_edges() {
        let (mut kv, _) = store();
        assert_eq!(
            run(&mut kv, Verb::LRange, &[b"none", b"0", b"-1"]),
            Reply::EmptyMultiBulk
        );
        run(&mut kv, Verb::RPush, &[b"l", b"a", b"b", b"c"]);
        assert_eq!(
            run(&mut kv, Verb::LRange, &[b"l", b"5", b"9"]),
            Reply::EmptyMultiBulk
        );
        assert_eq!(
            run(&mut kv, Verb::LRange, &[b"l", b"2", b"1"]),
            Reply::EmptyMultiBulk
        );
        assert_eq!(
            run(&mut kv, Verb::LRange, &[b"l", b"1", b"2"]),
            Reply::multi(vec![b"b".to_vec(), b"c".to_vec()])
        );
    }

    #[test]
    fn counted_pop_is_all_or_nothing() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::RPush, &[b"l", b"a", b"b"]);
        assert_eq!(run(&mut kv, Verb::LPop, &[b"l", b"3"]), Reply::Nil);
        assert_eq!(
            run(&mut kv, Verb::LPop, &[b"l", b"2"]),
            Reply::multi(vec![b"a".to_vec(), b"b".to_vec()])
        );
        // Emptied by the pop, so the key is gone.
        assert_eq!(run(&mut kv, Verb::LRange, &[b"l", b"0", b"-1"]), Reply::EmptyMultiBulk);
        assert_eq!(kv.len(), 0);
    }

    #[test]
    fn set_membership_round_trip() {
        let (mut kv, _) = store();
        assert_eq!(run(&mut kv, Verb::SAdd, &[b"s", b"m1", b"m2"]), Reply::Int(2));
        assert_eq!(run(&mut kv, Verb::SAdd, &[b"s", b"m1"]), Reply::Int(0));
        assert_eq!(run(&mut kv, Verb::SIsMember, &[b"s", b"m1"]), Reply::Int(1));
        assert_eq!(run(&mut kv, Verb::SIsMember, &[b"s", b"mx"]), Reply::Int(0));
        assert_eq!(run(&mut kv, Verb::SRem, &[b"s", b"m1", b"mx"]), Reply::Int(1));
        assert_eq!(run(&mut kv, Verb::SRem, &[b"s", b"m2"]), Reply::Int(1));
        // Set drained away entirely.
        assert_eq!(kv.len(), 0);
        assert_eq!(run(&mut kv, Verb::SIsMember, &[b"s", b"m2"]), Reply::Int(0));
    }

    #[test]
    fn hash_field_round_trip() {
        let (mut kv, _) = store();
        assert_eq!(run(&mut kv, Verb::HSet, &[b"h", b"f", b"1"]), Reply::Int(1));
        assert_eq!(run(&mut kv, Verb::HSet, &[b"h", b"f", b"2"]), Reply::Int(0));
        assert_eq!(
            run(&mut kv, Verb::HGet, &[b"h", b"f"]),
            Reply::Bulk(b"2".to_vec())
        );
        assert_eq!(run(&mut kv, Verb::HGet, &[b"h", b"nope"]), Reply::Nil);
        assert_eq!(run(&mut kv, Verb::HDel, &[b"h", b"f"]), Reply::Int(1));
        assert_eq!(kv.len(), 0);
    }

    #[test]
    fn zset_round_trip() {
        let (mut kv, _) = store();
        assert_eq!(
            run(&mut kv, Verb::ZAdd, &[b"z", b"10", b"alice"]),
            Reply::Int(1)
        );
        assert_eq!(
            run(&mut kv, Verb::ZAdd, &[b"z", b"5", b"bob"]),
            Reply::Int(1)
        );
        assert_eq!(
            run(&mut kv, Verb::ZRangeByScore, &[b"z", b"0", b"100"]),
            Reply::multi(vec![b"bob".to_vec(), b"alice".to_vec()])
        );
        // Re-score moves a member without growing the zset.
        assert_eq!(
            run(&mut kv, Verb::ZAdd, &[b"z", b"1", b"alice"]),
            Reply::Int(0)
        );
        assert_eq!(
            run(&mut kv, Verb::ZRangeByScore, &[b"z", b"0", b"100"]),
            Reply::multi(vec![b"alice".to_vec(), b"bob".to_vec()])
        );
        assert_eq!(run(&mut kv, Verb::ZRem, &[b"z", b"alice", b"bob"]), Reply::Int(2));
        assert_eq!(kv.len(), 0);
    }

    #[test]
    fn zrangebyscore_unbounded_above() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::ZAdd, &[b"z", b"5", b"a", b"500", b"b"]);
        assert_eq!(
            run(&mut kv, Verb::ZRangeByScore, &[b"z", b"6", b"-1"]),
            Reply::multi(vec![b"b".to_vec()])
        );
        assert_eq!(run(&mut kv, Verb::ZAdd, &[b"z", b"abc", b"m"]), Reply::SyntaxErr);
    }

    #[test]
    fn wrong_type_across_variants() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::Set, &[b"k", b"v"]);
        assert_eq!(run(&mut kv, Verb::LPush, &[b"k", b"a"]), Reply::WrongTypeErr);
        assert_eq!(run(&mut kv, Verb::SAdd, &[b"k", b"a"]), Reply::WrongTypeErr);
        assert_eq!(run(&mut kv, Verb::HSet, &[b"k", b"f", b"v"]), Reply::WrongTypeErr);
        assert_eq!(run(&mut kv, Verb::ZAdd, &[b"k", b"1", b"m"]), Reply::WrongTypeErr);
        assert_eq!(run(&mut kv, Verb::LRange, &[b"k", b"0", b"-1"]), Reply::WrongTypeErr);
        assert_eq!(run(&mut kv, Verb::HGet, &[b"k", b"f"]), Reply::WrongTypeErr);
    }

    #[test]
    fn dump_covers_values_and_deadlines() {
        let (mut kv, _) = store();
        run(&mut kv, Verb::Set, &[b"k", b"v", b"EX", b"60"]);
        run(&mut kv, Verb::RPush, &[b"l", b"a", b"b"]);

        let mut dump = kv.dump_cmds();
        dump.sort();
        assert!(dump.contains(&args(&[b"SET", b"k", b"v"])));
        assert!(dump.contains(&args(&[b"EXPIREAT", b"k", b"1060"])));
        assert!(dump.contains(&args(&[b"RPUSH", b"l", b"a", b"b"])));
    }

    #[test]
    fn replaying_own_records_reproduces_state() {
        let (mut kv, _) = store();
        let mut log: Vec<CmdLine> = Vec::new();
        for parts in [
            &[&b"SET"[..], b"k", b"v1"][..],
            &[b"SET", b"k", b"v2"],
            &[b"RPUSH", b"l", b"a", b"b"],
            &[b"LPOP", b"l"],
            &[b"ZADD", b"z", b"10", b"alice", b"5", b"bob"],
            &[b"SADD", b"s", b"m"],
            &[b"HSET", b"h", b"f", b"v"],
        ] {
            let line = args(parts);
            let verb = Verb::resolve(&line[0]).unwrap();
            let (_, records) = kv.apply(verb, &line[1..]);
            log.extend(records);
        }

        let (replay_clock, _) = Clock::manual(1_000);
        let mut replayed = KvStore::new(replay_clock);
        for line in log {
            let verb = Verb::resolve(&line[0]).unwrap();
            replayed.apply(verb, &line[1..]);
        }

        assert_eq!(replayed.len(), kv.len());
        assert_eq!(
            replayed.apply(Verb::Get, &args(&[b"k"])).0,
            Reply::Bulk(b"v2".to_vec())
        );
        assert_eq!(
            replayed.apply(Verb::LRange, &args(&[b"l", b"0", b"-1"])).0,
            Reply::multi(vec![b"b".to_vec()])
        );
        assert_eq!(
            replayed
                .apply(Verb::ZRangeByScore, &args(&[b"z", b"0", b"-1"]))
                .0,
            Reply::multi(vec![b"bob".to_vec(), b"alice".to_vec()])
        );
    }
}
