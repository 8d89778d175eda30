//! Tick-driven scheduling engine: wake sleepers, admit and dispatch ready
//! processes onto idle cores, execute one instruction per busy core, and
//! preempt on quantum expiry under round robin.

use std::collections::VecDeque;
use std::path::Path;

use rand::Rng;

use crate::clock::Clock;
use crate::config::{Config, SchedulerPolicy};
use crate::error::{EmulatorError, Result};
use crate::instruction::Instruction;
use crate::memory::MemoryManager;
use crate::process::{CoreId, Process, ProcessId, ProcessState, StepOutcome};
use crate::workload::generate_program;

/// One CPU core: the process it runs and the quantum it has left.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoreSlot {
    pub current: Option<ProcessId>,
    pub quantum_remaining: u32,
}

impl CoreSlot {
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }
}

/// The guarded scheduler state: process registry, ready FIFO, core slots, and
/// the memory allocator, advanced one tick at a time. The emulator wraps this
/// in a mutex and drives it from the scheduler thread; tests drive it
/// directly.
pub struct SchedulerCore {
    config: Config,
    clock: Box<dyn Clock>,
    /// Registry. A process's id is its position + 1; processes are never
    /// removed, so ids stay stable for the emulator's lifetime.
    processes: Vec<Process>,
    ready_queue: VecDeque<ProcessId>,
    cores: Vec<CoreSlot>,
    memory: MemoryManager,
    ticks: u64,
}

impl SchedulerCore {
    pub fn new(config: Config, clock: Box<dyn Clock>) -> Self {
        let cores = vec![CoreSlot::default(); config.num_cpu];
        let memory = MemoryManager::new(
            config.max_overall_mem,
            config.mem_per_frame,
            config.mem_per_proc,
        );
        Self {
            config,
            clock,
            processes: Vec::new(),
            ready_queue: VecDeque::new(),
            cores,
            memory,
            ticks: 0,
        }
    }

    /// Redirect memory snapshot files (tests point this at a temp dir).
    pub fn set_snapshot_dir(&mut self, dir: impl AsRef<Path>) {
        self.memory.set_snapshot_dir(dir);
    }

    /// Create a process with a freshly generated random program and enqueue
    /// it Ready. Rejects duplicate names.
    pub fn create_process(&mut self, name: &str, rng: &mut impl Rng) -> Result<ProcessId> {
        let program = generate_program(name, self.config.min_ins, self.config.max_ins, rng);
        self.register_process(name, program)
    }

    /// Register a process with a caller-supplied program and enqueue it
    /// Ready. Rejects duplicate names (live or finished).
    pub fn register_process(&mut self, name: &str, program: Vec<Instruction>) -> Result<ProcessId> {
        if self.processes.iter().any(|p| p.name == name) {
            return Err(EmulatorError::AlreadyExists { name: name.into() });
        }
        let pid = ProcessId(self.processes.len() + 1);
        let process = Process::new(pid, name, program, self.clock.as_ref());
        self.processes.push(process);
        self.ready_queue.push_back(pid);
        log::debug!("created process {name:?} as pid {}", pid.0);
        Ok(pid)
    }

    /// Advance the emulation by one tick.
    pub fn tick(&mut self) {
        self.ticks += 1;

        // 1) Wake sleepers: decrement counters, requeue any that reach zero.
        for i in 0..self.processes.len() {
            let p = &mut self.processes[i];
            if p.state == ProcessState::Waiting && p.sleep_ticks_remaining > 0 {
                p.sleep_ticks_remaining -= 1;
                if p.sleep_ticks_remaining == 0 {
                    p.state = ProcessState::Ready;
                    self.ready_queue.push_back(p.id);
                }
            }
        }

        // 2) Admission and dispatch: fill idle cores in ascending index while
        //    the queue head can be admitted to memory. A failed admission
        //    requeues the head and ends dispatching for this tick.
        while let Some(core_idx) = self.cores.iter().position(|c| !c.is_busy()) {
            let Some(pid) = self.ready_queue.pop_front() else {
                break;
            };
            let p = &mut self.processes[pid.0 - 1];
            if p.memory_base.is_none() {
                match self.memory.try_admit(pid) {
                    Some(base) => p.memory_base = Some(base),
                    None => {
                        self.ready_queue.push_back(pid);
                        break;
                    }
                }
            }
            p.state = ProcessState::Running;
            p.core = Some(CoreId(core_idx));
            self.cores[core_idx].current = Some(pid);
            if self.config.scheduler == SchedulerPolicy::Rr {
                self.cores[core_idx].quantum_remaining = self.config.quantum_cycles;
            }
        }

        // 3) Execution: one step per busy core, ascending core index.
        for core_idx in 0..self.cores.len() {
            let Some(pid) = self.cores[core_idx].current else {
                continue;
            };
            let delay = self.config.delays_per_exec;
            let outcome = self.processes[pid.0 - 1].execute_one_step(delay, &*self.clock);
            match outcome {
                StepOutcome::Finished => {
                    self.memory.release(pid);
                    let p = &mut self.processes[pid.0 - 1];
                    p.memory_base = None;
                    p.core = None;
                    self.cores[core_idx] = CoreSlot::default();
                    log::debug!("process {:?} finished at tick {}", p.name, self.ticks);
                    if self.config.scheduler == SchedulerPolicy::Rr {
                        self.write_snapshot();
                    }
                }
                StepOutcome::WentToSleep => {
                    self.processes[pid.0 - 1].core = None;
                    self.cores[core_idx] = CoreSlot::default();
                }
                StepOutcome::Continued => {
                    if self.config.scheduler == SchedulerPolicy::Rr {
                        self.cores[core_idx].quantum_remaining =
                            self.cores[core_idx].quantum_remaining.saturating_sub(1);
                        if self.cores[core_idx].quantum_remaining == 0 {
                            let p = &mut self.processes[pid.0 - 1];
                            p.state = ProcessState::Ready;
                            p.core = None;
                            self.ready_queue.push_back(pid);
                            self.cores[core_idx] = CoreSlot::default();
                            self.write_snapshot();
                        }
                    }
                }
            }
        }
    }

    /// Memory snapshot at a quantum boundary (preemption or completion).
    fn write_snapshot(&mut self) {
        let processes = &self.processes;
        self.memory
            .snapshot(&*self.clock, |pid| processes[pid.0 - 1].name.clone());
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn used_cores(&self) -> usize {
        self.cores.iter().filter(|c| c.is_busy()).count()
    }

    pub fn available_cores(&self) -> usize {
        self.config.num_cpu - self.used_cores()
    }

    /// Busy cores as a percentage of all cores.
    pub fn cpu_utilization(&self) -> f64 {
        if self.config.num_cpu == 0 {
            return 0.0;
        }
        self.used_cores() as f64 / self.config.num_cpu as f64 * 100.0
    }

    pub fn residents(&self) -> usize {
        self.memory.residents()
    }

    pub fn external_fragmentation(&self) -> usize {
        self.memory.external_fragmentation()
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(pid.0.checked_sub(1)?)
    }

    pub fn find_process(&self, name: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.name == name)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn cores(&self) -> &[CoreSlot] {
        &self.cores
    }
}
