//! Emulator configuration: scheduling discipline, workload sizing, memory sizing.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Scheduling discipline for the CPU dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// First come, first served: a dispatched process runs until it sleeps or finishes.
    Fcfs,
    /// Round robin: a dispatched process is preempted after `quantum_cycles` executed instructions.
    Rr,
}

impl FromStr for SchedulerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fcfs" => Ok(SchedulerPolicy::Fcfs),
            "rr" => Ok(SchedulerPolicy::Rr),
            other => Err(format!("unknown scheduler policy: {other}")),
        }
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerPolicy::Fcfs => write!(f, "fcfs"),
            SchedulerPolicy::Rr => write!(f, "rr"),
        }
    }
}

/// Frozen emulator configuration. Loaded once at `initialize`, immutable thereafter.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of CPU cores.
    pub num_cpu: usize,
    /// Scheduling discipline.
    pub scheduler: SchedulerPolicy,
    /// Round-robin quantum, in executed instructions per dispatch.
    pub quantum_cycles: u32,
    /// Batch generator period, in generator ticks.
    pub batch_process_freq: u64,
    /// Minimum generated program length.
    pub min_ins: usize,
    /// Maximum generated program length.
    pub max_ins: usize,
    /// Per-instruction blocking delay in milliseconds.
    pub delays_per_exec: u64,
    /// Total main memory, in allocation units.
    pub max_overall_mem: usize,
    /// Frame size (carried for display; placement is frame-agnostic).
    pub mem_per_frame: usize,
    /// Contiguous allocation granted to each admitted process.
    pub mem_per_proc: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_cpu: 2,
            scheduler: SchedulerPolicy::Rr,
            quantum_cycles: 4,
            batch_process_freq: 1,
            min_ins: 100,
            max_ins: 100,
            delays_per_exec: 0,
            max_overall_mem: 16384,
            mem_per_frame: 16,
            mem_per_proc: 4096,
        }
    }
}

impl Config {
    /// Load configuration from a `key value` text file. A missing file yields the
    /// defaults; an unknown key is ignored; a malformed value keeps that key's
    /// default and logs a warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => Self::parse(&text),
            Err(_) => {
                log::warn!(
                    "config file {} not found, using defaults",
                    path.as_ref().display()
                );
                Self::default()
            }
        }
    }

    /// Parse `key value` lines into a configuration over the defaults.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            match key {
                "num-cpu" => config.num_cpu = parse_or_keep(key, value, config.num_cpu),
                "scheduler" => config.scheduler = parse_or_keep(key, value, config.scheduler),
                "quantum-cycles" => {
                    config.quantum_cycles = parse_or_keep(key, value, config.quantum_cycles)
                }
                "batch-process-freq" => {
                    config.batch_process_freq = parse_or_keep(key, value, config.batch_process_freq)
                }
                "min-ins" => config.min_ins = parse_or_keep(key, value, config.min_ins),
                "max-ins" => config.max_ins = parse_or_keep(key, value, config.max_ins),
                "delays-per-exec" => {
                    config.delays_per_exec = parse_or_keep(key, value, config.delays_per_exec)
                }
                "max-overall-mem" => {
                    config.max_overall_mem = parse_or_keep(key, value, config.max_overall_mem)
                }
                "mem-per-frame" => {
                    config.mem_per_frame = parse_or_keep(key, value, config.mem_per_frame)
                }
                "mem-per-proc" => {
                    config.mem_per_proc = parse_or_keep(key, value, config.mem_per_proc)
                }
                _ => {}
            }
        }
        config
    }

    /// Upper bound on simultaneously resident processes.
    pub fn max_resident_processes(&self) -> usize {
        if self.mem_per_proc == 0 {
            return 0;
        }
        self.max_overall_mem / self.mem_per_proc
    }
}

fn parse_or_keep<T: FromStr + Copy>(key: &str, value: &str, default: T) -> T {
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            log::warn!("malformed value {value:?} for config key {key:?}, keeping default");
            default
        }
    }
}
