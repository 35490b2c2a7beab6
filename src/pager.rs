//! Victim selection for when the free pool runs dry.
//!
//! Every pager looks at the same frame table and reaches the reference and
//! modified bits through each frame's reverse mapping. Scan state (hands,
//! reset epochs, random position) belongs to the pager and lives for the
//! whole run; aging counters and activity timestamps live on the frames.

use std::fmt;

use log::trace;

use crate::constants::{AGE_TOP_BIT, NRU_RESET_INTERVAL, WS_TAU};
use crate::error::ConfigError;
use crate::memory::{FrameOwner, FrameTable};
use crate::process::{PageTableEntry, Process};

/// Which replacement algorithm to run, named by its command-line letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Fifo,
    Random,
    Clock,
    Nru,
    Aging,
    WorkingSet,
}

impl PolicyKind {
    pub fn from_letter(letter: char) -> Result<Self, ConfigError> {
        match letter {
            'f' => Ok(PolicyKind::Fifo),
            'r' => Ok(PolicyKind::Random),
            'c' => Ok(PolicyKind::Clock),
            'e' => Ok(PolicyKind::Nru),
            'a' => Ok(PolicyKind::Aging),
            'w' => Ok(PolicyKind::WorkingSet),
            other => Err(ConfigError::UnknownPolicy(other)),
        }
    }

    pub fn letter(&self) -> char {
        match self {
            PolicyKind::Fifo => 'f',
            PolicyKind::Random => 'r',
            PolicyKind::Clock => 'c',
            PolicyKind::Nru => 'e',
            PolicyKind::Aging => 'a',
            PolicyKind::WorkingSet => 'w',
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::Fifo => "FIFO",
            PolicyKind::Random => "Random",
            PolicyKind::Clock => "Clock",
            PolicyKind::Nru => "NRU",
            PolicyKind::Aging => "Aging",
            PolicyKind::WorkingSet => "Working-Set",
        };
        f.write_str(name)
    }
}

/// Pre-recorded random values, replayed cyclically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomSource {
    values: Vec<u64>,
    next: usize,
}

impl RandomSource {
    pub fn new(values: Vec<u64>) -> Result<Self, ConfigError> {
        if values.is_empty() {
            return Err(ConfigError::EmptyRandomSequence);
        }
        Ok(RandomSource { values, next: 0 })
    }

    /// Next value reduced into `0..modulus`, wrapping to the first value when exhausted.
    pub fn next_below(&mut self, modulus: usize) -> usize {
        if self.next == self.values.len() {
            self.next = 0;
        }
        let value = self.values[self.next];
        self.next += 1;
        (value % modulus as u64) as usize
    }
}

/// The six replacement policies, each carrying only its own scan state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pager {
    Fifo { hand: usize },
    Random { source: RandomSource },
    Clock { hand: usize },
    Nru { hand: usize, last_reset: u64 },
    Aging { hand: usize },
    WorkingSet { hand: usize },
}

impl Pager {
    /// Build the pager for `kind`. `randoms` is only consulted by the random policy.
    pub fn new(kind: PolicyKind, randoms: Vec<u64>) -> Result<Self, ConfigError> {
        Ok(match kind {
            PolicyKind::Fifo => Pager::Fifo { hand: 0 },
            PolicyKind::Random => Pager::Random {
                source: RandomSource::new(randoms)?,
            },
            PolicyKind::Clock => Pager::Clock { hand: 0 },
            PolicyKind::Nru => Pager::Nru {
                hand: 0,
                last_reset: 0,
            },
            PolicyKind::Aging => Pager::Aging { hand: 0 },
            PolicyKind::WorkingSet => Pager::WorkingSet { hand: 0 },
        })
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            Pager::Fifo { .. } => PolicyKind::Fifo,
            Pager::Random { .. } => PolicyKind::Random,
            Pager::Clock { .. } => PolicyKind::Clock,
            Pager::Nru { .. } => PolicyKind::Nru,
            Pager::Aging { .. } => PolicyKind::Aging,
            Pager::WorkingSet { .. } => PolicyKind::WorkingSet,
        }
    }

    /// Pick the frame to evict. Only called while every frame is owned;
    /// `now` is the number of instructions issued so far, current one included.
    pub fn select_victim(
        &mut self,
        frames: &mut FrameTable,
        processes: &mut [Process],
        now: u64,
    ) -> usize {
        let n = frames.len();
        debug_assert!(n > 0, "victim selection over an empty frame table");

        let victim = match self {
            Pager::Fifo { hand } => {
                let victim = *hand;
                *hand = (victim + 1) % n;
                victim
            }

            Pager::Random { source } => source.next_below(n),

            Pager::Clock { hand } => loop {
                let idx = *hand;
                *hand = (idx + 1) % n;
                match owner_pte(frames[idx].owner, processes) {
                    Some(pte) if pte.referenced => {
                        trace!("clock: frame {} gets a second chance", idx);
                        pte.referenced = false;
                    }
                    _ => break idx,
                }
            },

            Pager::Nru { hand, last_reset } => {
                let reset = now.saturating_sub(*last_reset) >= NRU_RESET_INTERVAL;
                if reset {
                    trace!("nru: clearing reference bits at instruction {}", now);
                    *last_reset = now;
                }

                // First frame seen in each class, lowest class preferred.
                let mut classes: [Option<usize>; 4] = [None; 4];
                for _ in 0..n {
                    let idx = *hand;
                    let class = match owner_pte(frames[idx].owner, processes) {
                        Some(pte) => {
                            let class = nru_class(pte);
                            if reset {
                                pte.referenced = false;
                            }
                            class
                        }
                        None => 0,
                    };
                    if classes[class].is_none() {
                        classes[class] = Some(idx);
                    }
                    if class == 0 && !reset {
                        break;
                    }
                    *hand = (idx + 1) % n;
                }

                let victim = classes.iter().flatten().next().copied().unwrap_or(*hand);
                *hand = (victim + 1) % n;
                victim
            }

            Pager::Aging { hand } => {
                let mut best: Option<(usize, u32)> = None;
                for _ in 0..n {
                    let idx = *hand;
                    let frame = &mut frames[idx];
                    frame.age >>= 1;
                    if let Some(pte) = owner_pte(frame.owner, processes) {
                        if pte.referenced {
                            frame.age |= AGE_TOP_BIT;
                            pte.referenced = false;
                        }
                    }
                    if best.map_or(true, |(_, age)| frame.age < age) {
                        best = Some((idx, frame.age));
                    }
                    *hand = (idx + 1) % n;
                }

                let victim = best.map_or(*hand, |(idx, _)| idx);
                *hand = (victim + 1) % n;
                victim
            }

            Pager::WorkingSet { hand } => {
                let mut immediate = None;
                let mut oldest: Option<(usize, u64)> = None;
                for _ in 0..n {
                    let idx = *hand;
                    *hand = (idx + 1) % n;
                    let frame = &mut frames[idx];
                    let pte = owner_pte(frame.owner, processes);
                    let referenced = pte.as_ref().map_or(false, |pte| pte.referenced);

                    if !referenced && now.saturating_sub(frame.last_active) >= WS_TAU {
                        immediate = Some(idx);
                        break;
                    }
                    if let Some(pte) = pte {
                        if pte.referenced {
                            pte.referenced = false;
                            frame.last_active = now;
                        }
                    }

                    let idle = now.saturating_sub(frame.last_active);
                    if idle > oldest.map_or(0, |(_, idle)| idle) {
                        oldest = Some((idx, idle));
                    }
                }

                let victim = immediate
                    .or(oldest.map(|(idx, _)| idx))
                    .unwrap_or(*hand);
                *hand = (victim + 1) % n;
                victim
            }
        };

        trace!("{}: victim frame {}", self.kind(), victim);
        victim
    }
}

/// NRU class: 0 = unreferenced clean, 1 = unreferenced dirty, 2 = referenced clean, 3 = referenced dirty.
#[inline]
fn nru_class(pte: &PageTableEntry) -> usize {
    2 * usize::from(pte.referenced) + usize::from(pte.modified)
}

/// The page table entry currently mapped into a frame with owner `owner`.
fn owner_pte(owner: Option<FrameOwner>, processes: &mut [Process]) -> Option<&mut PageTableEntry> {
    owner.map(move |o| processes[o.pid].pte_mut(o.page))
}
