//! Page-fault resolution and the cost model.
//!
//! A fault on a page outside every region is a segmentation violation and
//! maps nothing. Otherwise a frame is taken from the free pool or, failing
//! that, from the pager; its previous owner is unmapped (and written back if
//! dirty) before the faulting page is installed and filled from swap, its
//! file or zeroes.

use std::fmt;

use log::debug;

use crate::constants::*;
use crate::memory::FrameOwner;
use crate::vm_manager::VmManager;

/// Something that happened while executing one instruction, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Segv,
    Segprot,
    Unmap { pid: usize, page: usize },
    Out,
    Fout,
    In,
    Fin,
    Zero,
    Map { frame: usize },
}

impl Event {
    /// What this event adds to the total cost
    pub fn cost(&self) -> u64 {
        match self {
            Event::Segv => COST_SEGV,
            Event::Segprot => COST_SEGPROT,
            Event::Unmap { .. } => COST_UNMAP,
            Event::Out => COST_SWAP_OUT,
            Event::Fout => COST_FILE_OUT,
            Event::In => COST_SWAP_IN,
            Event::Fin => COST_FILE_IN,
            Event::Zero => COST_ZERO_FILL,
            Event::Map { .. } => COST_MAP,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Segv => write!(f, "SEGV"),
            Event::Segprot => write!(f, "SEGPROT"),
            Event::Unmap { pid, page } => write!(f, "UNMAP {}:{}", pid, page),
            Event::Out => write!(f, "OUT"),
            Event::Fout => write!(f, "FOUT"),
            Event::In => write!(f, "IN"),
            Event::Fin => write!(f, "FIN"),
            Event::Zero => write!(f, "ZERO"),
            Event::Map { frame } => write!(f, "MAP {}", frame),
        }
    }
}

/// Result of resolving a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Mapped { frame: usize },
    SegmentationViolation,
}

impl VmManager {
    /// Resolve a fault on `page` of process `pid`. The page must not be resident.
    pub(crate) fn resolve_fault(
        &mut self,
        pid: usize,
        page: usize,
        events: &mut Vec<Event>,
    ) -> FaultOutcome {
        debug_assert!(
            !self.processes[pid].pte(page).is_present(),
            "fault on resident page {}:{}",
            pid,
            page
        );

        let Some(region_idx) = self.processes[pid].lookup_region(page) else {
            debug!("segv: process {} page {} lies outside every region", pid, page);
            self.processes[pid].stats.segv += 1;
            self.charge(Event::Segv, events);
            return FaultOutcome::SegmentationViolation;
        };
        let region = *self.processes[pid].region(region_idx);
        self.processes[pid].pte_mut(page).region = Some(region_idx);

        let frame = self.acquire_frame();
        if let Some(owner) = self.frames[frame].owner {
            self.evict(owner, events);
        }

        let now = self.stats.instructions;
        let pte = self.processes[pid].pte_mut(page);
        pte.install(frame, &region);
        let from_swap = pte.paged_out;
        self.frames[frame].assign(FrameOwner { pid, page }, now);

        let origin = if from_swap {
            self.processes[pid].stats.ins += 1;
            Event::In
        } else if region.file_backed {
            self.processes[pid].stats.fins += 1;
            Event::Fin
        } else {
            self.processes[pid].stats.zeros += 1;
            Event::Zero
        };
        self.charge(origin, events);

        self.processes[pid].stats.maps += 1;
        self.charge(Event::Map { frame }, events);
        debug!("map {}:{} -> frame {} ({})", pid, page, frame, origin);

        FaultOutcome::Mapped { frame }
    }

    /// A frame for the next mapping: the free pool first, then the pager.
    fn acquire_frame(&mut self) -> usize {
        match self.free.acquire() {
            Some(frame) => frame,
            None => {
                let now = self.stats.instructions;
                self.pager
                    .select_victim(&mut self.frames, &mut self.processes, now)
            }
        }
    }

    /// Take a page out of its frame, writing it back if it was modified.
    /// Anonymous pages go to swap and remember it; file-backed pages go to their file.
    fn evict(&mut self, owner: FrameOwner, events: &mut Vec<Event>) {
        let FrameOwner { pid, page } = owner;
        debug!("evict {}:{}", pid, page);

        let process = &mut self.processes[pid];
        let pte = process.pte_mut(page);
        pte.frame = None;
        let write_back = match (pte.modified, pte.file_backed) {
            (false, _) => None,
            (true, false) => {
                pte.paged_out = true;
                Some(Event::Out)
            }
            (true, true) => Some(Event::Fout),
        };
        process.stats.unmaps += 1;
        match write_back {
            Some(Event::Out) => process.stats.outs += 1,
            Some(Event::Fout) => process.stats.fouts += 1,
            _ => {}
        }

        self.charge(Event::Unmap { pid, page }, events);
        if let Some(event) = write_back {
            self.charge(event, events);
        }
    }

    /// Add an event's cost to the total and record it
    pub(crate) fn charge(&mut self, event: Event, events: &mut Vec<Event>) {
        self.stats.cost += event.cost();
        events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::{Pager, PolicyKind};
    use crate::process::{PageTableEntry, Region};

    fn manager(frames: usize, regions: Vec<Region>) -> VmManager {
        VmManager::new(
            frames,
            Pager::new(PolicyKind::Fifo, vec![]).unwrap(),
            vec![regions],
        )
        .unwrap()
    }

    #[test]
    fn test_event_display() {
        assert_eq!(Event::Unmap { pid: 1, page: 42 }.to_string(), "UNMAP 1:42");
        assert_eq!(Event::Map { frame: 3 }.to_string(), "MAP 3");
        assert_eq!(Event::Segprot.to_string(), "SEGPROT");
    }

    #[test]
    fn test_segv_leaves_pte_untouched() {
        let mut vm = manager(2, vec![Region::new(0, 3, false, false)]);
        let mut events = Vec::new();

        let outcome = vm.resolve_fault(0, 10, &mut events);
        assert_eq!(outcome, FaultOutcome::SegmentationViolation);
        assert_eq!(events, vec![Event::Segv]);
        assert_eq!(vm.stats().cost, COST_SEGV);
        assert_eq!(vm.processes()[0].stats.segv, 1);
        assert_eq!(*vm.processes()[0].pte(10), PageTableEntry::default());
        assert_eq!(vm.free_pool().len(), 2);
    }

    #[test]
    fn test_zero_fill_from_free_pool() {
        let mut vm = manager(2, vec![Region::new(0, 3, true, false)]);
        let mut events = Vec::new();

        let outcome = vm.resolve_fault(0, 2, &mut events);
        assert_eq!(outcome, FaultOutcome::Mapped { frame: 0 });
        assert_eq!(events, vec![Event::Zero, Event::Map { frame: 0 }]);
        assert_eq!(vm.stats().cost, COST_ZERO_FILL + COST_MAP);

        let pte = vm.processes()[0].pte(2);
        assert_eq!(pte.frame, Some(0));
        assert_eq!(pte.region, Some(0));
        assert!(pte.write_protected);
        assert!(!pte.file_backed);
        assert_eq!(
            vm.frame_table()[0].owner,
            Some(FrameOwner { pid: 0, page: 2 })
        );
    }

    #[test]
    fn test_file_backed_fault_reads_file() {
        let mut vm = manager(1, vec![Region::new(0, 3, false, true)]);
        let mut events = Vec::new();

        vm.resolve_fault(0, 1, &mut events);
        assert_eq!(events, vec![Event::Fin, Event::Map { frame: 0 }]);
        assert_eq!(vm.processes()[0].stats.fins, 1);
        assert_eq!(vm.processes()[0].stats.zeros, 0);
    }

    #[test]
    fn test_dirty_anonymous_eviction_goes_to_swap_and_back() {
        let mut vm = manager(1, vec![Region::new(0, 3, false, false)]);
        let mut events = Vec::new();

        vm.resolve_fault(0, 0, &mut events);
        vm.processes[0].pte_mut(0).modified = true;

        events.clear();
        vm.resolve_fault(0, 1, &mut events);
        assert_eq!(
            events,
            vec![
                Event::Unmap { pid: 0, page: 0 },
                Event::Out,
                Event::Zero,
                Event::Map { frame: 0 }
            ]
        );
        assert!(vm.processes()[0].pte(0).paged_out);
        assert!(!vm.processes()[0].pte(0).is_present());

        events.clear();
        vm.resolve_fault(0, 0, &mut events);
        assert_eq!(
            events,
            vec![
                Event::Unmap { pid: 0, page: 1 },
                Event::In,
                Event::Map { frame: 0 }
            ]
        );
        let stats = vm.processes()[0].stats;
        assert_eq!(stats.outs, 1);
        assert_eq!(stats.ins, 1);
        assert_eq!(stats.unmaps, 2);
        assert_eq!(stats.maps, 3);
    }

    #[test]
    fn test_dirty_file_eviction_writes_file_not_swap() {
        let mut vm = manager(1, vec![Region::new(0, 3, false, true)]);
        let mut events = Vec::new();

        vm.resolve_fault(0, 0, &mut events);
        vm.processes[0].pte_mut(0).modified = true;
        events.clear();
        vm.resolve_fault(0, 1, &mut events);

        assert_eq!(
            events,
            vec![
                Event::Unmap { pid: 0, page: 0 },
                Event::Fout,
                Event::Fin,
                Event::Map { frame: 0 }
            ]
        );
        assert!(!vm.processes()[0].pte(0).paged_out);
        assert_eq!(vm.processes()[0].stats.fouts, 1);
        assert_eq!(vm.processes()[0].stats.outs, 0);
    }

    #[test]
    fn test_event_costs_sum_to_total() {
        let mut vm = manager(1, vec![Region::new(0, 3, false, false)]);
        let mut events = Vec::new();
        vm.resolve_fault(0, 0, &mut events);
        vm.processes[0].pte_mut(0).modified = true;
        vm.resolve_fault(0, 1, &mut events);

        let sum: u64 = events.iter().map(Event::cost).sum();
        assert_eq!(sum, vm.stats().cost);
    }
}
