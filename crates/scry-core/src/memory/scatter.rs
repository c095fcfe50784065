//! Batched ("scatter") read scheduling.
//!
//! A [`ScatterRound`] collects independent read requests plus continuations.
//! Executing it performs every read in one backend batch and then runs the
//! continuations in registration order. Continuations receive the round's
//! results and the *next* round, so pointer chains are expressed as a
//! sequence of rounds:
//!
//! ```text
//!   round 1: read ptr @ base+0x10 ──┐
//!                                   │ continuation derives `ptr`
//!   round 2: read i32 @ ptr+0x08 ◄──┘
//! ```
//!
//! Round k+1 only exists after every continuation of round k has run, and a
//! failed read only skips the continuation branches that depended on it.

use std::collections::{HashMap, HashSet};

use bytemuck::Pod;
use tracing::{trace, warn};

use super::address::Address;
use super::reader::{ReadMemory, ScatterEntry, decode_array, decode_value};
use super::unity::decode_utf8_z;
use crate::error::ReadError;

/// Safety valve for runaway chains.
pub const DEFAULT_MAX_ROUNDS: usize = 16;

type Key = (Address, usize);

pub type Continuation<'a> = Box<dyn FnOnce(&RoundResults, &mut ScatterRound<'a>) + 'a>;

/// Results of one executed round, keyed by `(address, len)`.
#[derive(Debug, Default)]
pub struct RoundResults {
    entries: HashMap<Key, Result<Vec<u8>, ReadError>>,
}

impl RoundResults {
    pub fn bytes(&self, address: Address, len: usize) -> Option<&[u8]> {
        match self.entries.get(&(address, len)) {
            Some(Ok(bytes)) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    pub fn error(&self, address: Address, len: usize) -> Option<ReadError> {
        match self.entries.get(&(address, len)) {
            Some(Err(e)) => Some(*e),
            _ => None,
        }
    }

    pub fn value<T: Pod>(&self, address: Address) -> Option<T> {
        let bytes = self.bytes(address, std::mem::size_of::<T>())?;
        decode_value(address, bytes).ok()
    }

    /// A pointer that is also a valid user-space address.
    pub fn ptr(&self, address: Address) -> Option<Address> {
        let raw = self.value::<u64>(address)?;
        Address(raw).validate().ok()
    }

    pub fn array<T: Pod>(&self, address: Address, count: usize) -> Option<Vec<T>> {
        let bytes = self.bytes(address, std::mem::size_of::<T>() * count)?;
        decode_array(address, bytes, count).ok()
    }

    pub fn utf8(&self, address: Address, len: usize) -> Option<String> {
        self.bytes(address, len).map(decode_utf8_z)
    }
}

/// What an execution did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScatterStats {
    pub rounds: usize,
    pub requests: usize,
    pub failed: usize,
}

/// One batch of independent reads and the continuations that consume them.
#[derive(Default)]
pub struct ScatterRound<'a> {
    requests: Vec<Key>,
    seen: HashSet<Key>,
    continuations: Vec<Continuation<'a>>,
}

impl<'a> ScatterRound<'a> {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            seen: HashSet::new(),
            continuations: Vec::new(),
        }
    }

    /// Queue a read of `len` bytes. Duplicate requests are merged.
    pub fn prepare_bytes(&mut self, address: Address, len: usize) {
        let key = (address, len);
        if self.seen.insert(key) {
            self.requests.push(key);
        }
    }

    pub fn prepare_ptr(&mut self, address: Address) {
        self.prepare_bytes(address, std::mem::size_of::<u64>());
    }

    pub fn prepare_value<T: Pod>(&mut self, address: Address) {
        self.prepare_bytes(address, std::mem::size_of::<T>());
    }

    pub fn prepare_array<T: Pod>(&mut self, address: Address, count: usize) {
        self.prepare_bytes(address, std::mem::size_of::<T>() * count);
    }

    /// Register a continuation to run after this round's reads complete.
    pub fn on_complete<F>(&mut self, f: F)
    where
        F: FnOnce(&RoundResults, &mut ScatterRound<'a>) + 'a,
    {
        self.continuations.push(Box::new(f));
    }

    /// Number of distinct pending reads.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn is_idle(&self) -> bool {
        self.requests.is_empty() && self.continuations.is_empty()
    }

    /// Execute this round and any rounds its continuations populate.
    pub fn execute<R: ReadMemory + ?Sized>(self, reader: &R) -> ScatterStats {
        ScatterMap::with_round(self).execute(reader)
    }

    fn fetch<R: ReadMemory + ?Sized>(
        self,
        reader: &R,
        stats: &mut ScatterStats,
    ) -> (RoundResults, Vec<Continuation<'a>>) {
        let mut results = RoundResults::default();
        if !self.requests.is_empty() {
            let mut entries: Vec<ScatterEntry> = self
                .requests
                .iter()
                .map(|&(address, len)| ScatterEntry::new(address, len))
                .collect();
            reader.read_scatter(&mut entries);
            for entry in entries {
                let result = entry.result.unwrap_or(Err(ReadError::Backend {
                    address: entry.address.raw(),
                }));
                if result.is_err() {
                    stats.failed += 1;
                }
                results.entries.insert((entry.address, entry.len), result);
            }
            stats.requests += self.requests.len();
        }
        (results, self.continuations)
    }
}

/// A chain of dependent rounds.
pub struct ScatterMap<'a> {
    first: ScatterRound<'a>,
    completions: Vec<Box<dyn FnOnce() + 'a>>,
    max_rounds: usize,
}

impl Default for ScatterMap<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ScatterMap<'a> {
    pub fn new() -> Self {
        Self::with_round(ScatterRound::new())
    }

    pub fn with_round(first: ScatterRound<'a>) -> Self {
        Self {
            first,
            completions: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// The first round; later rounds are populated by continuations.
    pub fn first_round(&mut self) -> &mut ScatterRound<'a> {
        &mut self.first
    }

    /// Register a callback to run once after the final round.
    pub fn on_complete<F>(&mut self, f: F)
    where
        F: FnOnce() + 'a,
    {
        self.completions.push(Box::new(f));
    }

    /// Run rounds strictly in sequence until one produces no further work.
    pub fn execute<R: ReadMemory + ?Sized>(self, reader: &R) -> ScatterStats {
        let mut stats = ScatterStats::default();
        let mut round = self.first;
        while !round.is_idle() {
            if stats.rounds >= self.max_rounds {
                warn!(
                    "Scatter chain exceeded {} rounds, dropping {} pending reads",
                    self.max_rounds,
                    round.len()
                );
                break;
            }
            let (results, continuations) = round.fetch(reader, &mut stats);
            stats.rounds += 1;
            let mut next = ScatterRound::new();
            for continuation in continuations {
                continuation(&results, &mut next);
            }
            round = next;
        }
        for completion in self.completions {
            completion();
        }
        trace!(
            "Scatter map done: {} rounds, {} reads, {} failed",
            stats.rounds, stats.requests, stats.failed
        );
        stats
    }
}
