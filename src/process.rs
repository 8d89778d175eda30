//! Process state machine and the one-step instruction interpreter.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::clock::{log_timestamp, Clock};
use crate::instruction::{Instruction, MAX_LOOP_DEPTH};

/// Identifies a process. Ids increase monotonically from 1 for the lifetime
/// of the emulator; finished processes keep theirs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessId(pub usize);

/// Identifies a core (0..num_cpu).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CoreId(pub usize);

/// Scheduling state. Exactly one is current at any time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Waiting,
    Finished,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Ready => write!(f, "Ready"),
            ProcessState::Running => write!(f, "Running"),
            ProcessState::Waiting => write!(f, "Waiting"),
            ProcessState::Finished => write!(f, "Finished"),
        }
    }
}

/// Result of executing one scheduler-driven step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// An instruction executed and the process can keep running.
    Continued,
    /// A SLEEP took effect; the process left the Running state.
    WentToSleep,
    /// The cursor had reached the end of the program; nothing executed.
    Finished,
}

/// One open FOR loop: where its body starts and which iteration is underway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopFrame {
    /// Index of the FOR_START instruction.
    pub start: usize,
    /// 1-based iteration currently executing.
    pub iteration: u8,
}

/// The scheduling unit: a program, its variable store, its log, and the
/// execution cursor. Mutated only by the scheduler while the process runs.
#[derive(Clone, Debug)]
pub struct Process {
    pub id: ProcessId,
    pub name: String,
    pub state: ProcessState,
    pub program: Vec<Instruction>,
    /// Next instruction index; `program.len()` once finished.
    pub cursor: usize,
    pub variables: HashMap<String, u16>,
    pub log: Vec<String>,
    pub sleep_ticks_remaining: u32,
    /// Assigned core while Running, `None` otherwise.
    pub core: Option<CoreId>,
    pub loop_stack: Vec<LoopFrame>,
    pub creation_time: DateTime<Local>,
    pub finish_time: Option<DateTime<Local>>,
    /// Total instructions executed, loop revisits included.
    pub instructions_executed: u64,
    /// Base address of this process's block while resident in memory.
    pub memory_base: Option<usize>,
}

impl Process {
    pub fn new(id: ProcessId, name: impl Into<String>, program: Vec<Instruction>, clock: &dyn Clock) -> Self {
        Self {
            id,
            name: name.into(),
            state: ProcessState::Ready,
            program,
            cursor: 0,
            variables: HashMap::new(),
            log: Vec::new(),
            sleep_ticks_remaining: 0,
            core: None,
            loop_stack: Vec::with_capacity(MAX_LOOP_DEPTH),
            creation_time: clock.now(),
            finish_time: None,
            instructions_executed: 0,
            memory_base: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ProcessState::Finished
    }

    /// Completion percentage for progress displays. Loops can revisit
    /// instructions, so this is capped at 100.
    pub fn progress_percent(&self) -> f64 {
        if self.program.is_empty() {
            return 0.0;
        }
        let pct = self.instructions_executed as f64 / self.program.len() as f64 * 100.0;
        pct.min(100.0)
    }

    /// Execute one step on behalf of the scheduler. The process must be
    /// Running. A positive `delay_ms` blocks the calling thread after the
    /// instruction executes (pedagogical model: the delay is part of the step).
    pub fn execute_one_step(&mut self, delay_ms: u64, clock: &dyn Clock) -> StepOutcome {
        debug_assert_eq!(self.state, ProcessState::Running);

        if self.cursor >= self.program.len() {
            self.state = ProcessState::Finished;
            self.finish_time = Some(clock.now());
            return StepOutcome::Finished;
        }

        let mut outcome = StepOutcome::Continued;
        let mut jumped = false;

        match self.program[self.cursor].clone() {
            Instruction::Print(msg) => {
                let core = self.core.map_or(-1, |c| c.0 as i64);
                self.log
                    .push(format!("({}) Core:{} {}", log_timestamp(clock), core, msg));
            }
            Instruction::Declare { name, value } => {
                self.variables.insert(name, value);
            }
            Instruction::Add { dest, lhs, rhs } => {
                let sum = self.resolve(&lhs) as u32 + self.resolve(&rhs) as u32;
                self.variables.insert(dest, saturate_u16(sum));
            }
            Instruction::Subtract { dest, lhs, rhs } => {
                let diff = self.resolve(&lhs).saturating_sub(self.resolve(&rhs));
                self.variables.insert(dest, diff);
            }
            Instruction::Sleep { ticks } => {
                if ticks > 0 {
                    self.sleep_ticks_remaining = u32::from(ticks);
                    self.state = ProcessState::Waiting;
                    outcome = StepOutcome::WentToSleep;
                }
            }
            Instruction::ForStart { .. } => {
                // Re-entry guard: unreachable in generated programs because
                // FOR_END jumps past the FOR_START, but kept as overflow
                // protection alongside the depth cap.
                let reentry = self
                    .loop_stack
                    .last()
                    .is_some_and(|frame| frame.start == self.cursor);
                if !reentry && self.loop_stack.len() < MAX_LOOP_DEPTH {
                    self.loop_stack.push(LoopFrame {
                        start: self.cursor,
                        iteration: 1,
                    });
                }
            }
            Instruction::ForEnd => {
                if let Some(frame) = self.loop_stack.last_mut() {
                    let repeat = match self.program[frame.start] {
                        Instruction::ForStart { repeat } => repeat,
                        _ => 0,
                    };
                    if frame.iteration < repeat {
                        frame.iteration += 1;
                        self.cursor = frame.start + 1;
                        jumped = true;
                    } else {
                        self.loop_stack.pop();
                    }
                }
            }
        }

        self.instructions_executed += 1;

        if delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(delay_ms));
        }

        if !jumped {
            self.cursor += 1;
        }
        outcome
    }

    /// Resolve an ADD/SUBTRACT operand: variable lookup first, then numeric
    /// literal, then 0. Operand tokens are generator-produced, so the final
    /// fallback should not trigger in practice.
    fn resolve(&self, token: &str) -> u16 {
        if let Some(&value) = self.variables.get(token) {
            return value;
        }
        token.parse().unwrap_or(0)
    }
}

/// Clamp to the unsigned 16-bit range.
pub fn saturate_u16(x: u32) -> u16 {
    x.min(u32::from(u16::MAX)) as u16
}
