/// Virtual pages per process; page numbers are `0..PT_LEN`.
pub const PT_LEN: usize = 64;

// Cost model. Every policy is charged the same amounts so totals are comparable.
pub const COST_INSTRUCTION: u64 = 1;
pub const COST_MAP: u64 = 300;
pub const COST_UNMAP: u64 = 400;
pub const COST_SWAP_IN: u64 = 3100;
pub const COST_SWAP_OUT: u64 = 2700;
pub const COST_FILE_IN: u64 = 2800;
pub const COST_FILE_OUT: u64 = 2400;
pub const COST_ZERO_FILL: u64 = 140;
pub const COST_SEGV: u64 = 340;
pub const COST_SEGPROT: u64 = 420;
pub const COST_CONTEXT_SWITCH: u64 = 130;
pub const COST_PROCESS_EXIT: u64 = 1250;

/// Instructions between NRU reference-bit resets.
pub const NRU_RESET_INTERVAL: u64 = 50;

/// Idle time after which the working-set pager considers a frame outside the working set.
pub const WS_TAU: u64 = 50;

/// Bit OR-ed into an aging counter when its page was referenced.
pub const AGE_TOP_BIT: u32 = 0x8000_0000;
