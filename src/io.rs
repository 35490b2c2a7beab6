//! Input parsing and report formatting around the simulator.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};

use crate::process::{PageState, PageTableEntry, Region};
use crate::vm_manager::{Instruction, StepRecord, VmManager};

/// Everything the input file describes: the processes' regions and the trace.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Workload {
    pub region_lists: Vec<Vec<Region>>,
    pub trace: Vec<Instruction>,
}

impl Workload {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("in input file {}", path.display()))
    }

    /// Parse the process count, each process's regions, then the instructions.
    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let (lineno, line) = lines.next().ok_or_else(|| anyhow!("input is empty"))?;
        let process_count: usize = parse_num(line, lineno, "process count")?;

        let mut region_lists = Vec::with_capacity(process_count);
        for pid in 0..process_count {
            let (lineno, line) = lines
                .next()
                .ok_or_else(|| anyhow!("missing region count for process {}", pid))?;
            let region_count: usize = parse_num(line, lineno, "region count")?;

            let mut regions = Vec::with_capacity(region_count);
            for r in 0..region_count {
                let (lineno, line) = lines
                    .next()
                    .ok_or_else(|| anyhow!("missing region {} of process {}", r, pid))?;
                regions.push(parse_region(line, lineno)?);
            }
            region_lists.push(regions);
        }

        let trace = lines
            .map(|(lineno, line)| parse_instruction(line, lineno))
            .collect::<Result<Vec<_>>>()?;

        Ok(Workload {
            region_lists,
            trace,
        })
    }
}

fn parse_num<T: FromStr>(token: &str, lineno: usize, what: &str) -> Result<T> {
    token
        .trim()
        .parse()
        .map_err(|_| anyhow!("line {}: invalid {}: {:?}", lineno, what, token))
}

fn parse_region(line: &str, lineno: usize) -> Result<Region> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 4 {
        bail!(
            "line {}: region needs 4 fields (start end write_protected file_backed), got {}",
            lineno,
            tokens.len()
        );
    }
    let start = parse_num(tokens[0], lineno, "start page")?;
    let end = parse_num(tokens[1], lineno, "end page")?;
    let write_protected: u32 = parse_num(tokens[2], lineno, "write_protected flag")?;
    let file_backed: u32 = parse_num(tokens[3], lineno, "file_backed flag")?;
    Ok(Region::new(start, end, write_protected != 0, file_backed != 0))
}

fn parse_instruction(line: &str, lineno: usize) -> Result<Instruction> {
    let mut chars = line.chars();
    let op = chars
        .next()
        .ok_or_else(|| anyhow!("line {}: empty instruction", lineno))?;
    let operand: usize = parse_num(chars.as_str(), lineno, "operand")?;
    match op {
        'r' => Ok(Instruction::Read(operand)),
        'w' => Ok(Instruction::Write(operand)),
        'c' => Ok(Instruction::Switch(operand)),
        'e' => Ok(Instruction::Exit(operand)),
        other => bail!("line {}: unknown instruction '{}'", lineno, other),
    }
}

/// Read the random-value file: a leading count, then the values themselves.
pub fn read_random_values<P: AsRef<Path>>(path: P) -> Result<Vec<u64>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read random file {}", path.display()))?;
    parse_random_values(&content).with_context(|| format!("in random file {}", path.display()))
}

pub fn parse_random_values(content: &str) -> Result<Vec<u64>> {
    let mut tokens = content.split_whitespace();
    let count = tokens.next().ok_or_else(|| anyhow!("random file is empty"))?;
    count
        .parse::<u64>()
        .map_err(|_| anyhow!("invalid random value count: {:?}", count))?;

    tokens
        .map(|t| {
            t.parse::<u64>()
                .map_err(|_| anyhow!("invalid random value: {:?}", t))
        })
        .collect()
}

/// The `O` trace lines for one executed instruction.
pub fn format_step(record: &StepRecord) -> String {
    let mut out = format!("{}: ==> {}\n", record.index, record.instruction);
    if let (Instruction::Exit(_), Some(pid)) = (record.instruction, record.pid) {
        out.push_str(&format!("EXIT current process {}\n", pid));
    }
    for event in &record.events {
        out.push_str(&format!(" {}\n", event));
    }
    out
}

/// One `PT[pid]:` line per process.
pub fn format_page_tables(vm: &VmManager) -> String {
    let mut out = String::new();
    for process in vm.processes() {
        out.push_str(&format!("PT[{}]:", process.pid));
        for (page, state) in vm.page_summary(process.pid).into_iter().enumerate() {
            match state {
                PageState::Resident {
                    referenced,
                    modified,
                    swapped,
                } => out.push_str(&format!(
                    " {}:{}{}{}",
                    page,
                    if referenced { 'R' } else { '-' },
                    if modified { 'M' } else { '-' },
                    if swapped { 'S' } else { '-' }
                )),
                PageState::SwappedOut => out.push_str(" #"),
                PageState::NeverMapped => out.push_str(" *"),
            }
        }
        out.push('\n');
    }
    out
}

/// The `FT:` line: who owns each frame.
pub fn format_frame_table(vm: &VmManager) -> String {
    let mut out = String::from("FT:");
    for owner in vm.frame_occupancy() {
        match owner {
            Some(owner) => out.push_str(&format!(" {}:{}", owner.pid, owner.page)),
            None => out.push_str(" *"),
        }
    }
    out.push('\n');
    out
}

/// Per-process counters followed by the `TOTALCOST` line.
pub fn format_summary(vm: &VmManager) -> String {
    let mut out = String::new();
    for process in vm.processes() {
        out.push_str(&format!("PROC[{}]: {}\n", process.pid, process.stats));
    }
    let stats = vm.stats();
    out.push_str(&format!(
        "TOTALCOST {} {} {} {} {}\n",
        stats.instructions,
        stats.ctx_switches,
        stats.process_exits,
        stats.cost,
        std::mem::size_of::<PageTableEntry>()
    ));
    out
}
