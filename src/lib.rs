pub mod constants;
pub mod error;
pub mod fault;
pub mod io;
pub mod memory;
pub mod pager;
pub mod process;
pub mod vm_manager;

// Re-export commonly used items for convenience
pub use error::ConfigError;
pub use fault::{Event, FaultOutcome};
pub use pager::{Pager, PolicyKind};
pub use process::{PageState, Region};
pub use vm_manager::{GlobalStats, Instruction, StepRecord, VmManager};
