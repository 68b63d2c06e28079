use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Upper-bound sentinel accepted by `range`.
pub const UNBOUNDED: i64 = -1;

/// Outcome of an `add`, so callers can tell mutation from a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Added {
    /// The member was not present before.
    New,
    /// The member moved from another score.
    Rescored,
    /// The member already sat at this score.
    Unchanged,
}

#[derive(Debug)]
struct Node {
    score: i64,
    members: HashSet<Vec<u8>>,
    nexts: Vec<Option<usize>>,
}

/// A probabilistic ordered index from score to member set. One node per
/// distinct score; members sharing a score share the node. Backs both sorted
/// sets and the expiration wheel.
///
/// Nodes live in an index arena; slot 0 is the head sentinel, whose level
/// vector grows to match the tallest node.
#[derive(Debug)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    score_to_node: HashMap<i64, usize>,
    member_to_score: HashMap<Vec<u8>, i64>,
    rng: StdRng,
}

impl SkipList {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Deterministic level rolls for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            nodes: vec![Node {
                score: i64::MIN,
                members: HashSet::new(),
                nexts: Vec::new(),
            }],
            free: Vec::new(),
            score_to_node: HashMap::new(),
            member_to_score: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.member_to_score.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_to_score.is_empty()
    }

    pub fn score_of(&self, member: &[u8]) -> Option<i64> {
        self.member_to_score.get(member).copied()
    }

    /// Fair coin, count heads: the node height minus one.
    fn roll(&mut self) -> usize {
        let mut level = 0;
        while self.rng.random_bool(0.5) {
            level += 1;
        }
        level
    }

    pub fn add(&mut self, score: i64, member: &[u8]) -> Added {
        match self.member_to_score.get(member).copied() {
            Some(old) if old == score => Added::Unchanged,
            Some(old) => {
                self.unlink(old, member);
                self.insert(score, member);
                Added::Rescored
            }
            None => {
                self.insert(score, member);
                Added::New
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.member_to_score.get(member).copied() {
            Some(score) => {
                self.unlink(score, member);
                true
            }
            None => false,
        }
    }

    /// Members with score in `[lo, hi]`, ascending by score. `hi == -1` means
    /// unbounded above. Order inside one score is unspecified but consistent
    /// within a single call.
    pub fn range(&self, lo: i64, hi: i64) -> Vec<Vec<u8>> {
        let hi = if hi == UNBOUNDED { i64::MAX } else { hi };
        if lo > hi {
            return Vec::new();
        }

        let mut at = 0;
        for level in (0..self.nodes[0].nexts.len()).rev() {
            loop {
                match self.nodes[at].nexts[level] {
                    Some(next) if self.nodes[next].score < lo => at = next,
                    _ => break,
                }
            }
        }
        if self.nodes[at].nexts.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut cur = self.nodes[at].nexts[0];
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            if node.score > hi {
                break;
            }
            out.extend(node.members.iter().cloned());
            cur = node.nexts[0];
        }
        out
    }

    /// Every (score, members) pair in ascending score order. Used by the
    /// rewrite dump, which must see negative scores too.
    pub fn entries(&self) -> Vec<(i64, Vec<Vec<u8>>)> {
        let mut out = Vec::new();
        let mut cur = self.nodes[0].nexts.first().copied().flatten();
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            out.push((node.score, node.members.iter().cloned().collect()));
            cur = node.nexts[0];
        }
        out
    }

    fn insert(&mut self, score: i64, member: &[u8]) {
        self.member_to_score.insert(member.to_vec(), score);

        if let Some(&idx) = self.score_to_node.get(&score) {
            self.nodes[idx].members.insert(member.to_vec());
            return;
        }

        let height = self.roll() + 1;
        while self.nodes[0].nexts.len() < height {
            self.nodes[0].nexts.push(None);
        }

        let idx = self.alloc(score, height);
        self.nodes[idx].members.insert(member.to_vec());
        self.score_to_node.insert(score, idx);

        let mut at = 0;
        for level in (0..height).rev() {
            loop {
                match self.nodes[at].nexts[level] {
                    Some(next) if self.nodes[next].score < score => at = next,
                    _ => break,
                }
            }
            self.nodes[idx].nexts[level] = self.nodes[at].nexts[level];
            self.nodes[at].nexts[level] = Some(idx);
        }
    }

    fn unlink(&mut self, score: i64, member: &[u8]) {
        self.member_to_score.remove(member);
        let Some(&idx) = self.score_to_node.get(&score) else {
            return;
        };
        self.nodes[idx].members.remove(member);
        if !self.nodes[idx].members.is_empty() {
            return;
        }

        // Last member at this score: unlink the node at every level it spans.
        self.score_to_node.remove(&score);
        let mut at = 0;
        for level in (0..self.nodes[0].nexts.len()).rev() {
            loop {
                match self.nodes[at].nexts[level] {
                    Some(next) if self.nodes[next].score < score => at = next,
                    _ => break,
                }
            }
            if self.nodes[at].nexts[level] == Some(idx) {
                self.nodes[at].nexts[level] = self.nodes[idx].nexts[level];
            }
        }
        self.release(idx);
    }

    fn alloc(&mut self, score: i64, height: usize) -> usize {
        let node = Node {
            score,
            members: HashSet::new(),
            nexts: vec![None; height],
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.free.push(idx);
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}
