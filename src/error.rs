//! Configuration errors detected before a simulation starts.

use thiserror::Error;

use crate::constants::PT_LEN;

/// A precondition of the run that does not hold.
///
/// Simulated faults (segmentation and protection violations) are not errors;
/// they are charged and counted by the engine. Anything here halts the run
/// before the first instruction executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("frame pool must hold at least one frame")]
    NoFrames,

    #[error("unknown replacement algorithm '{0}' (expected one of f, r, c, e, a, w)")]
    UnknownPolicy(char),

    #[error("random algorithm needs at least one random value")]
    EmptyRandomSequence,

    #[error("process {pid}: region {region} starts at page {start} after its end page {end}")]
    InvertedRegion {
        pid: usize,
        region: usize,
        start: usize,
        end: usize,
    },

    #[error("process {pid}: region {region} ends at page {end}, beyond the last page {}", PT_LEN - 1)]
    RegionOutOfRange { pid: usize, region: usize, end: usize },

    #[error("process {pid}: regions {first} and {second} overlap at page {page}")]
    OverlappingRegions {
        pid: usize,
        first: usize,
        second: usize,
        page: usize,
    },

    #[error("instruction {index}: switch to unknown process {pid}")]
    UnknownProcess { index: usize, pid: usize },

    #[error("instruction {index}: '{op}' issued with no current process")]
    NoCurrentProcess { index: usize, op: char },

    #[error("instruction {index}: page {page} is outside the page table (0..{})", PT_LEN)]
    PageOutOfRange { index: usize, page: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = ConfigError::OverlappingRegions {
            pid: 2,
            first: 0,
            second: 1,
            page: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("process 2"));
        assert!(msg.contains("page 7"));

        let err = ConfigError::RegionOutOfRange {
            pid: 0,
            region: 3,
            end: 64,
        };
        assert!(err.to_string().contains("last page 63"));
    }
}
