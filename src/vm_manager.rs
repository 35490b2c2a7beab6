use std::fmt;

use log::{debug, info, warn};

use crate::constants::*;
use crate::error::ConfigError;
use crate::fault::{Event, FaultOutcome};
use crate::memory::{FrameOwner, FrameTable, FreeFramePool};
use crate::pager::Pager;
use crate::process::{PageState, Process, Region};

/// One line of the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Read(usize),
    Write(usize),
    /// Make the given process current.
    Switch(usize),
    /// Terminate the current process. The operand is informational only.
    Exit(usize),
}

impl Instruction {
    pub fn opcode(&self) -> char {
        match self {
            Instruction::Read(_) => 'r',
            Instruction::Write(_) => 'w',
            Instruction::Switch(_) => 'c',
            Instruction::Exit(_) => 'e',
        }
    }

    pub fn operand(&self) -> usize {
        match *self {
            Instruction::Read(n)
            | Instruction::Write(n)
            | Instruction::Switch(n)
            | Instruction::Exit(n) => n,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.opcode(), self.operand())
    }
}

/// What executing one instruction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// Zero-based position in the trace
    pub index: u64,
    pub instruction: Instruction,
    /// Process that was current when the instruction started
    pub pid: Option<usize>,
    pub events: Vec<Event>,
}

/// Run-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub instructions: u64,
    pub ctx_switches: u64,
    pub process_exits: u64,
    pub cost: u64,
}

/// The simulation context: frames, free pool, pager and processes, plus the
/// engine that drives them through a trace.
#[derive(Debug, Clone)]
pub struct VmManager {
    pub(crate) frames: FrameTable,
    pub(crate) free: FreeFramePool,
    pub(crate) pager: Pager,
    pub(crate) processes: Vec<Process>,
    pub(crate) current: Option<usize>,
    pub(crate) stats: GlobalStats,
}

impl VmManager {
    /// Set up `frame_count` free frames and one process per region list;
    /// process ids are positions in `region_lists`.
    pub fn new(
        frame_count: usize,
        pager: Pager,
        region_lists: Vec<Vec<Region>>,
    ) -> Result<Self, ConfigError> {
        if frame_count == 0 {
            return Err(ConfigError::NoFrames);
        }

        let processes = region_lists
            .into_iter()
            .enumerate()
            .map(|(pid, regions)| Process::new(pid, regions))
            .collect::<Result<Vec<_>, _>>()?;

        let frames = FrameTable::new(frame_count);
        let free = FreeFramePool::full(&frames);

        Ok(VmManager {
            frames,
            free,
            pager,
            processes,
            current: None,
            stats: GlobalStats::default(),
        })
    }

    /// Check a trace against this manager's processes without running it.
    pub fn validate(&self, trace: &[Instruction]) -> Result<(), ConfigError> {
        let mut current = self.current;
        for (index, instr) in trace.iter().enumerate() {
            match *instr {
                Instruction::Read(page) | Instruction::Write(page) => {
                    if current.is_none() {
                        return Err(ConfigError::NoCurrentProcess {
                            index,
                            op: instr.opcode(),
                        });
                    }
                    if page >= PT_LEN {
                        return Err(ConfigError::PageOutOfRange { index, page });
                    }
                }
                Instruction::Switch(pid) => {
                    if pid >= self.processes.len() {
                        return Err(ConfigError::UnknownProcess { index, pid });
                    }
                    current = Some(pid);
                }
                Instruction::Exit(_) => {
                    if current.take().is_none() {
                        return Err(ConfigError::NoCurrentProcess { index, op: 'e' });
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate `trace`, then execute all of it.
    pub fn run(&mut self, trace: &[Instruction]) -> Result<(), ConfigError> {
        self.run_with(trace, |_| {})
    }

    /// Like [`VmManager::run`], handing each step's record to `on_step` as it completes.
    pub fn run_with<F>(&mut self, trace: &[Instruction], mut on_step: F) -> Result<(), ConfigError>
    where
        F: FnMut(&StepRecord),
    {
        self.validate(trace)?;
        info!(
            "simulating {} instructions, {} processes, {} frames, {} pager",
            trace.len(),
            self.processes.len(),
            self.frames.len(),
            self.pager.kind()
        );

        for instr in trace {
            let record = self.step(instr);
            on_step(&record);
        }

        info!(
            "done: {} instructions, total cost {}",
            self.stats.instructions, self.stats.cost
        );
        Ok(())
    }

    /// Execute one instruction. Instructions that [`VmManager::validate`]
    /// would reject still count and cost, but are logged and skipped.
    pub fn step(&mut self, instr: &Instruction) -> StepRecord {
        let index = self.stats.instructions;
        self.stats.instructions += 1;
        let pid = self.current;
        let mut events = Vec::new();

        match *instr {
            Instruction::Read(page) | Instruction::Write(page) => {
                self.stats.cost += COST_INSTRUCTION;
                match pid {
                    Some(_) if page >= PT_LEN => {
                        warn!("instruction {}: page {} is outside the page table", index, page)
                    }
                    Some(pid) => {
                        let write = matches!(instr, Instruction::Write(_));
                        self.access(pid, page, write, &mut events);
                    }
                    None => warn!("instruction {}: '{}' with no current process", index, instr),
                }
            }
            Instruction::Switch(next) => {
                self.stats.ctx_switches += 1;
                self.stats.cost += COST_CONTEXT_SWITCH;
                if next < self.processes.len() {
                    debug!("switch to process {}", next);
                    self.current = Some(next);
                } else {
                    warn!("instruction {}: switch to unknown process {}", index, next);
                }
            }
            Instruction::Exit(_) => {
                self.stats.process_exits += 1;
                self.stats.cost += COST_PROCESS_EXIT;
                match self.current.take() {
                    Some(pid) => self.exit_process(pid, &mut events),
                    None => warn!("instruction {}: exit with no current process", index),
                }
            }
        }

        StepRecord {
            index,
            instruction: *instr,
            pid,
            events,
        }
    }

    fn access(&mut self, pid: usize, page: usize, write: bool, events: &mut Vec<Event>) {
        if !self.processes[pid].pte(page).is_present()
            && self.resolve_fault(pid, page, events) == FaultOutcome::SegmentationViolation
        {
            return;
        }

        let pte = self.processes[pid].pte_mut(page);
        pte.referenced = true;
        if !write {
            return;
        }
        if pte.write_protected {
            debug!("segprot: write to protected page {}:{}", pid, page);
            self.processes[pid].stats.segprot += 1;
            self.charge(Event::Segprot, events);
        } else {
            pte.modified = true;
        }
    }

    /// Tear down every mapping of `pid`. Dirty file-backed pages are written
    /// back; dirty anonymous pages are discarded.
    fn exit_process(&mut self, pid: usize, events: &mut Vec<Event>) {
        debug!("exit process {}", pid);
        for page in 0..PT_LEN {
            let pte = *self.processes[pid].pte(page);
            if let Some(frame) = pte.frame {
                self.processes[pid].stats.unmaps += 1;
                self.charge(Event::Unmap { pid, page }, events);
                self.frames[frame].reset();
                self.free.release(frame);

                if pte.modified && pte.file_backed {
                    self.processes[pid].stats.fouts += 1;
                    self.charge(Event::Fout, events);
                }
            }
            self.processes[pid].pte_mut(page).reset();
        }
    }

    pub fn stats(&self) -> &GlobalStats {
        &self.stats
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn frame_table(&self) -> &FrameTable {
        &self.frames
    }

    pub fn free_pool(&self) -> &FreeFramePool {
        &self.free
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Owner of every frame, `None` for free ones
    pub fn frame_occupancy(&self) -> Vec<Option<FrameOwner>> {
        self.frames.iter().map(|f| f.owner).collect()
    }

    /// State of every page of process `pid`
    pub fn page_summary(&self, pid: usize) -> Vec<PageState> {
        let process = &self.processes[pid];
        (0..PT_LEN).map(|page| process.page_state(page)).collect()
    }

    /// Check that resident pages and owned frames point at each other one to
    /// one, and that every frame is either free or owned.
    pub fn check_invariants(&self) -> Result<(), String> {
        for frame in self.frames.iter() {
            match frame.owner {
                Some(FrameOwner { pid, page }) => {
                    if self.free.contains(frame.id) {
                        return Err(format!("frame {} is owned but in the free pool", frame.id));
                    }
                    let pte = self.processes[pid].pte(page);
                    if pte.frame != Some(frame.id) {
                        return Err(format!(
                            "frame {} claims {}:{} but that page maps {:?}",
                            frame.id, pid, page, pte.frame
                        ));
                    }
                }
                None => {
                    if !self.free.contains(frame.id) {
                        return Err(format!("frame {} is neither owned nor free", frame.id));
                    }
                }
            }
        }

        for process in &self.processes {
            for (page, pte) in process.page_table().iter().enumerate() {
                if let Some(frame) = pte.frame {
                    let owner = self.frames[frame].owner;
                    if owner != Some(FrameOwner { pid: process.pid, page }) {
                        return Err(format!(
                            "page {}:{} maps frame {} owned by {:?}",
                            process.pid, page, frame, owner
                        ));
                    }
                }
            }
        }

        let owned = self.frames.owned_count();
        if owned + self.free.len() != self.frames.len() {
            return Err(format!(
                "{} owned + {} free != {} frames",
                owned,
                self.free.len(),
                self.frames.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::PolicyKind;

    fn manager(frames: usize, kind: PolicyKind, regions: Vec<Vec<Region>>) -> VmManager {
        VmManager::new(frames, Pager::new(kind, vec![1, 2, 3]).unwrap(), regions).unwrap()
    }

    #[test]
    fn test_rejects_zero_frames() {
        let err = VmManager::new(0, Pager::Fifo { hand: 0 }, vec![]).unwrap_err();
        assert_eq!(err, ConfigError::NoFrames);
    }

    #[test]
    fn test_rejects_bad_regions() {
        let err = VmManager::new(
            4,
            Pager::Fifo { hand: 0 },
            vec![
                vec![Region::new(0, 3, false, false)],
                vec![Region::new(0, 3, false, false), Region::new(2, 9, false, false)],
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingRegions { pid: 1, .. }));
    }

    #[test]
    fn test_validate_trace() {
        let vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 3, false, false)]]);

        assert!(vm
            .validate(&[Instruction::Switch(0), Instruction::Read(3), Instruction::Exit(0)])
            .is_ok());
        assert_eq!(
            vm.validate(&[Instruction::Read(0)]),
            Err(ConfigError::NoCurrentProcess { index: 0, op: 'r' })
        );
        assert_eq!(
            vm.validate(&[Instruction::Switch(1)]),
            Err(ConfigError::UnknownProcess { index: 0, pid: 1 })
        );
        assert_eq!(
            vm.validate(&[Instruction::Switch(0), Instruction::Write(64)]),
            Err(ConfigError::PageOutOfRange { index: 1, page: 64 })
        );
        assert_eq!(
            vm.validate(&[Instruction::Switch(0), Instruction::Exit(0), Instruction::Exit(0)]),
            Err(ConfigError::NoCurrentProcess { index: 2, op: 'e' })
        );
    }

    #[test]
    fn test_run_refuses_invalid_trace_before_executing() {
        let mut vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 3, false, false)]]);
        let trace = [Instruction::Switch(0), Instruction::Read(1), Instruction::Switch(7)];

        assert!(vm.run(&trace).is_err());
        assert_eq!(*vm.stats(), GlobalStats::default());
    }

    #[test]
    fn test_step_skips_page_outside_table() {
        let mut vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 63, false, false)]]);
        vm.step(&Instruction::Switch(0));
        let record = vm.step(&Instruction::Write(PT_LEN));

        assert!(record.events.is_empty());
        assert_eq!(vm.stats().instructions, 2);
        assert_eq!(vm.stats().cost, COST_CONTEXT_SWITCH + COST_INSTRUCTION);
        assert_eq!(vm.free_pool().len(), 2);
        assert_eq!(vm.processes()[0].stats.maps, 0);
        assert_eq!(vm.processes()[0].stats.segv, 0);
        vm.check_invariants().unwrap();
    }

    #[test]
    fn test_step_ignores_switch_to_unknown_process() {
        let mut vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 3, false, false)]]);
        vm.step(&Instruction::Switch(0));
        vm.step(&Instruction::Switch(5));

        assert_eq!(vm.current(), Some(0));
        assert_eq!(vm.stats().ctx_switches, 2);
        let record = vm.step(&Instruction::Read(2));
        assert_eq!(record.pid, Some(0));
        assert_eq!(record.events, vec![Event::Zero, Event::Map { frame: 0 }]);

        let mut vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 3, false, false)]]);
        vm.step(&Instruction::Switch(1));
        assert_eq!(vm.current(), None);
        let record = vm.step(&Instruction::Exit(1));
        assert!(record.events.is_empty());
        assert_eq!(vm.stats().process_exits, 1);
    }

    #[test]
    fn test_read_sets_reference_only() {
        let mut vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 3, false, false)]]);
        vm.step(&Instruction::Switch(0));
        let record = vm.step(&Instruction::Read(1));

        assert_eq!(record.index, 1);
        assert_eq!(record.pid, Some(0));
        assert_eq!(record.events, vec![Event::Zero, Event::Map { frame: 0 }]);
        let pte = vm.processes()[0].pte(1);
        assert!(pte.referenced);
        assert!(!pte.modified);
        assert_eq!(
            vm.stats().cost,
            COST_CONTEXT_SWITCH + COST_INSTRUCTION + COST_ZERO_FILL + COST_MAP
        );
    }

    #[test]
    fn test_write_to_protected_page() {
        let mut vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 3, true, false)]]);
        vm.step(&Instruction::Switch(0));
        let record = vm.step(&Instruction::Write(2));

        assert_eq!(
            record.events,
            vec![Event::Zero, Event::Map { frame: 0 }, Event::Segprot]
        );
        let pte = vm.processes()[0].pte(2);
        assert!(pte.referenced);
        assert!(!pte.modified);
        assert_eq!(vm.processes()[0].stats.segprot, 1);

        // resident now: a second write only charges the violation
        let record = vm.step(&Instruction::Write(2));
        assert_eq!(record.events, vec![Event::Segprot]);
    }

    #[test]
    fn test_resident_access_does_not_fault() {
        let mut vm = manager(1, PolicyKind::Clock, vec![vec![Region::new(0, 3, false, false)]]);
        vm.step(&Instruction::Switch(0));
        vm.step(&Instruction::Write(0));
        let record = vm.step(&Instruction::Read(0));

        assert!(record.events.is_empty());
        assert_eq!(vm.processes()[0].stats.maps, 1);
    }

    #[test]
    fn test_exit_discards_dirty_anonymous_pages() {
        let mut vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 3, false, false)]]);
        vm.run(&[Instruction::Switch(0), Instruction::Write(0), Instruction::Exit(0)])
            .unwrap();

        let stats = vm.processes()[0].stats;
        assert_eq!(stats.unmaps, 1);
        assert_eq!(stats.outs, 0);
        assert_eq!(stats.fouts, 0);
        assert_eq!(vm.current(), None);
        assert_eq!(vm.free_pool().len(), 2);
        assert_eq!(vm.page_summary(0)[0], PageState::NeverMapped);
        vm.check_invariants().unwrap();
    }

    #[test]
    fn test_exit_clears_swap_state() {
        let mut vm = manager(1, PolicyKind::Fifo, vec![vec![Region::new(0, 3, false, false)]]);
        vm.run(&[
            Instruction::Switch(0),
            Instruction::Write(0),
            Instruction::Read(1),
            Instruction::Exit(0),
        ])
        .unwrap();

        let pte = vm.processes()[0].pte(0);
        assert_eq!(*pte, crate::process::PageTableEntry::default());
        assert_eq!(vm.processes()[0].stats.outs, 1);
    }

    #[test]
    fn test_run_with_reports_every_step() {
        let mut vm = manager(2, PolicyKind::Fifo, vec![vec![Region::new(0, 3, false, false)]]);
        let trace = [Instruction::Switch(0), Instruction::Read(0), Instruction::Read(9)];
        let mut records = Vec::new();
        vm.run_with(&trace, |r| records.push(r.clone())).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].pid, None);
        assert_eq!(records[2].events, vec![Event::Segv]);
        assert_eq!(vm.stats().instructions, 3);
    }

    #[test]
    fn test_instruction_display() {
        assert_eq!(Instruction::Read(5).to_string(), "r 5");
        assert_eq!(Instruction::Switch(2).to_string(), "c 2");
        assert_eq!(Instruction::Exit(1).opcode(), 'e');
    }
}
