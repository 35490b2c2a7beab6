use std::fmt;

use crate::constants::PT_LEN;
use crate::error::ConfigError;

/// A contiguous range of virtual pages `start..=end` sharing protection and backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub end: usize,
    pub write_protected: bool,
    pub file_backed: bool,
}

impl Region {
    pub fn new(start: usize, end: usize, write_protected: bool, file_backed: bool) -> Self {
        Region {
            start,
            end,
            write_protected,
            file_backed,
        }
    }

    #[inline]
    pub fn contains(&self, page: usize) -> bool {
        self.start <= page && page <= self.end
    }
}

/// Per-page state of one process.
///
/// `frame` is `Some` exactly while the page is resident, and the frame it
/// names points back at this entry. `paged_out` survives eviction: it records
/// that the page has content on swap, so the next fault reads it back instead
/// of zero-filling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTableEntry {
    pub frame: Option<usize>,
    pub write_protected: bool,
    pub modified: bool,
    pub referenced: bool,
    pub paged_out: bool,
    pub file_backed: bool,
    /// Region covering this page, memoized on the first fault.
    pub region: Option<usize>,
}

impl PageTableEntry {
    #[inline]
    pub fn is_present(&self) -> bool {
        self.frame.is_some()
    }

    /// Map the page into `frame`, taking protection and backing from `region`.
    pub fn install(&mut self, frame: usize, region: &Region) {
        self.frame = Some(frame);
        self.referenced = false;
        self.modified = false;
        self.write_protected = region.write_protected;
        self.file_backed = region.file_backed;
    }

    /// Return to the never-mapped state, forgetting swap content and the region cache.
    pub fn reset(&mut self) {
        *self = PageTableEntry::default();
    }
}

/// Event counters kept per process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub maps: u64,
    pub unmaps: u64,
    pub ins: u64,
    pub outs: u64,
    pub fins: u64,
    pub fouts: u64,
    pub zeros: u64,
    pub segv: u64,
    pub segprot: u64,
}

impl fmt::Display for ProcessStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "U={} M={} I={} O={} FI={} FO={} Z={} SV={} SP={}",
            self.unmaps,
            self.maps,
            self.ins,
            self.outs,
            self.fins,
            self.fouts,
            self.zeros,
            self.segv,
            self.segprot
        )
    }
}

/// What a page looks like from outside, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    NeverMapped,
    Resident {
        referenced: bool,
        modified: bool,
        swapped: bool,
    },
    SwappedOut,
}

#[derive(Debug, Clone)]
pub struct Process {
    pub pid: usize,
    regions: Vec<Region>,
    page_table: [PageTableEntry; PT_LEN],
    page_to_region: [Option<usize>; PT_LEN],
    pub stats: ProcessStats,
}

impl Process {
    /// Build a process from its region list, rejecting inverted, out-of-range
    /// or overlapping regions.
    pub fn new(pid: usize, regions: Vec<Region>) -> Result<Self, ConfigError> {
        let mut page_to_region = [None; PT_LEN];

        for (idx, region) in regions.iter().enumerate() {
            if region.start > region.end {
                return Err(ConfigError::InvertedRegion {
                    pid,
                    region: idx,
                    start: region.start,
                    end: region.end,
                });
            }
            if region.end >= PT_LEN {
                return Err(ConfigError::RegionOutOfRange {
                    pid,
                    region: idx,
                    end: region.end,
                });
            }
            for page in region.start..=region.end {
                if let Some(first) = page_to_region[page] {
                    return Err(ConfigError::OverlappingRegions {
                        pid,
                        first,
                        second: idx,
                        page,
                    });
                }
                page_to_region[page] = Some(idx);
            }
        }

        Ok(Process {
            pid,
            regions,
            page_table: [PageTableEntry::default(); PT_LEN],
            page_to_region,
            stats: ProcessStats::default(),
        })
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, idx: usize) -> &Region {
        &self.regions[idx]
    }

    pub fn page_table(&self) -> &[PageTableEntry] {
        &self.page_table
    }

    #[inline]
    pub fn pte(&self, page: usize) -> &PageTableEntry {
        &self.page_table[page]
    }

    #[inline]
    pub fn pte_mut(&mut self, page: usize) -> &mut PageTableEntry {
        &mut self.page_table[page]
    }

    /// Region covering `page`: the entry's cached index if set, otherwise the
    /// page map built at construction.
    pub fn lookup_region(&self, page: usize) -> Option<usize> {
        self.page_table[page].region.or(self.page_to_region[page])
    }

    pub fn page_state(&self, page: usize) -> PageState {
        let pte = &self.page_table[page];
        if pte.is_present() {
            PageState::Resident {
                referenced: pte.referenced,
                modified: pte.modified,
                swapped: pte.paged_out,
            }
        } else if pte.paged_out {
            PageState::SwappedOut
        } else {
            PageState::NeverMapped
        }
    }
}
