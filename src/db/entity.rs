use std::collections::{HashMap, HashSet, VecDeque};

use crate::db::command::CmdLine;
use crate::db::skiplist::{Added, SkipList};

/// One stored value. Every variant remembers its owning key so the rewrite
/// dump can re-materialize it as commands.
#[derive(Debug)]
pub enum Entity {
    Str(StrEntity),
    List(ListEntity),
    Set(SetEntity),
    Hash(HashEntity),
    Zset(ZsetEntity),
}

impl Entity {
    /// Whether an aggregate has emptied out and its key must be dropped.
    pub fn is_drained(&self) -> bool {
        match self {
            Entity::Str(_) => false,
            Entity::List(l) => l.len() == 0,
            Entity::Set(s) => s.len() == 0,
            Entity::Hash(h) => h.len() == 0,
            Entity::Zset(z) => z.len() == 0,
        }
    }

    /// The write commands that rebuild this value from scratch.
    pub fn to_cmds(&self) -> Vec<CmdLine> {
        match self {
            Entity::Str(s) => s.to_cmds(),
            Entity::List(l) => l.to_cmds(),
            Entity::Set(s) => s.to_cmds(),
            Entity::Hash(h) => h.to_cmds(),
            Entity::Zset(z) => z.to_cmds(),
        }
    }
}

#[derive(Debug)]
pub struct StrEntity {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl StrEntity {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    fn to_cmds(&self) -> Vec<CmdLine> {
        vec![vec![b"SET".to_vec(), self.key.clone(), self.value.clone()]]
    }
}

#[derive(Debug)]
pub struct ListEntity {
    key: Vec<u8>,
    data: VecDeque<Vec<u8>>,
}

impl ListEntity {
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            data: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn lpush(&mut self, value: Vec<u8>) {
        self.data.push_front(value);
    }

    pub fn rpush(&mut self, value: Vec<u8>) {
        self.data.push_back(value);
    }

    /// Pops `count` elements from the front. All or nothing: fewer buffered
    /// elements than requested leaves the list untouched.
    pub fn lpop(&mut self, count: usize) -> Option<Vec<Vec<u8>>> {
        if self.data.len() < count {
            return None;
        }
        Some((0..count).filter_map(|_| self.data.pop_front()).collect())
    }

    pub fn rpop(&mut self, count: usize) -> Option<Vec<Vec<u8>>> {
        if self.data.len() < count {
            return None;
        }
        Some((0..count).filter_map(|_| self.data.pop_back()).collect())
    }

    /// Inclusive index range; `stop == -1` addresses the last element. Any
    /// other out-of-range or reversed pair yields nothing.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Vec<u8>> {
        let len = self.data.len() as i64;
        let stop = if stop == -1 { len - 1 } else { stop };
        if start < 0 || start >= len {
            return Vec::new();
        }
        if stop < 0 || stop >= len || stop < start {
            return Vec::new();
        }
        self.data
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect()
    }

    fn to_cmds(&self) -> Vec<CmdLine> {
        let mut line = Vec::with_capacity(self.data.len() + 2);
        line.push(b"RPUSH".to_vec());
        line.push(self.key.clone());
        line.extend(self.data.iter().cloned());
        vec![line]
    }
}

#[derive(Debug)]
pub struct SetEntity {
    key: Vec<u8>,
    members: HashSet<Vec<u8>>,
}

impl SetEntity {
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            members: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Idempotent; reports whether the member was new.
    pub fn add(&mut self, member: Vec<u8>) -> bool {
        self.members.insert(member)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains(member)
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.members.remove(member)
    }

    fn to_cmds(&self) -> Vec<CmdLine> {
        let mut line = Vec::with_capacity(self.members.len() + 2);
        line.push(b"SADD".to_vec());
        line.push(self.key.clone());
        line.extend(self.members.iter().cloned());
        vec![line]
    }
}

#[derive(Debug)]
pub struct HashEntity {
    key: Vec<u8>,
    fields: HashMap<Vec<u8>, Vec<u8>>,
}

impl HashEntity {
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            fields: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Reports whether the field was new.
    pub fn put(&mut self, field: Vec<u8>, value: Vec<u8>) -> bool {
        self.fields.insert(field, value).is_none()
    }

    pub fn get(&self, field: &[u8]) -> Option<&[u8]> {
        self.fields.get(field).map(|v| v.as_slice())
    }

    pub fn del(&mut self, field: &[u8]) -> bool {
        self.fields.remove(field).is_some()
    }

    fn to_cmds(&self) -> Vec<CmdLine> {
        self.fields
            .iter()
            .map(|(field, value)| {
                vec![
                    b"HSET".to_vec(),
                    self.key.clone(),
                    field.clone(),
                    value.clone(),
                ]
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct ZsetEntity {
    key: Vec<u8>,
    index: SkipList,
}

impl ZsetEntity {
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            index: SkipList::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn add(&mut self, score: i64, member: &[u8]) -> Added {
        self.index.add(score, member)
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.index.remove(member)
    }

    pub fn range(&self, lo: i64, hi: i64) -> Vec<Vec<u8>> {
        self.index.range(lo, hi)
    }

    fn to_cmds(&self) -> Vec<CmdLine> {
        let mut line = vec![b"ZADD".to_vec(), self.key.clone()];
        for (score, members) in self.index.entries() {
            for member in members {
                line.push(score.to_string().into_bytes());
                line.push(member);
            }
        }
        vec![line]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn list_range_edges() {
        let mut list = ListEntity::new(b"l".to_vec());
        for v in [b"a", b"b", b"c"] {
            list.rpush(v.to_vec());
        }
        assert_eq!(
            list.range(0, -1),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(list.range(1, 1), vec![b"b".to_vec()]);
        assert!(list.range(3, 5).is_empty());
        assert!(list.range(2, 1).is_empty());
        assert!(list.range(-2, 2).is_empty());
    }

    #[test]
    fn list_pop_is_all_or_nothing() {
        let mut list = ListEntity::new(b"l".to_vec());
        list.rpush(b"a".to_vec());
        list.rpush(b"b".to_vec());
        assert!(list.lpop(3).is_none());
        assert_eq!(list.len(), 2);
        assert_eq!(list.rpop(2).unwrap(), vec![b"b".to_vec(), b"a".to_vec()]);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn set_add_is_idempotent() {
        let mut set = SetEntity::new(b"s".to_vec());
        assert!(set.add(b"m".to_vec()));
        assert!(!set.add(b"m".to_vec()));
        assert_eq!(set.len(), 1);
        assert!(set.contains(b"m"));
        assert!(set.remove(b"m"));
        assert!(!set.remove(b"m"));
    }

    #[test]
    fn hash_put_reports_new_fields() {
        let mut hash = HashEntity::new(b"h".to_vec());
        assert!(hash.put(b"f".to_vec(), b"1".to_vec()));
        assert!(!hash.put(b"f".to_vec(), b"2".to_vec()));
        assert_eq!(hash.get(b"f"), Some(&b"2"[..]));
        assert!(hash.del(b"f"));
        assert_eq!(hash.get(b"f"), None);
    }

    #[test]
    fn entities_rebuild_themselves_as_commands() {
        let mut list = ListEntity::new(b"l".to_vec());
        list.rpush(b"a".to_vec());
        list.rpush(b"b".to_vec());
        assert_eq!(
            Entity::List(list).to_cmds(),
            vec![vec![
                b"RPUSH".to_vec(),
                b"l".to_vec(),
                b"a".to_vec(),
                b"b".to_vec()
            ]]
        );

        let mut zset = ZsetEntity::new(b"z".to_vec());
        zset.add(5, b"bob");
        zset.add(10, b"alice");
        assert_eq!(
            Entity::Zset(zset).to_cmds(),
            vec![vec![
                b"ZADD".to_vec(),
                b"z".to_vec(),
                b"5".to_vec(),
                b"bob".to_vec(),
                b"10".to_vec(),
                b"alice".to_vec()
            ]]
        );

        let s = StrEntity::new(b"k".to_vec(), b"v".to_vec());
        assert_eq!(
            Entity::Str(s).to_cmds(),
            vec![vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]]
        );
    }
}
