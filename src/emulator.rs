//! The owned emulator: background scheduler and generator threads over one
//! guarded scheduler core, plus the read-only query surface the shell uses.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::{log_timestamp, SystemClock};
use crate::config::Config;
use crate::error::{EmulatorError, Result};
use crate::process::{Process, ProcessState};
use crate::scheduler::SchedulerCore;

/// Nominal period of both background loops.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Read-only view of one process, copied out under the scheduler lock.
/// Consumers never hold references into the registry.
#[derive(Clone, Debug)]
pub struct ProcessSnapshot {
    pub id: usize,
    pub name: String,
    pub state: ProcessState,
    pub cursor: usize,
    pub program_len: usize,
    pub core: Option<usize>,
    pub instructions_executed: u64,
    pub creation_time: DateTime<Local>,
    pub finish_time: Option<DateTime<Local>>,
    pub log: Vec<String>,
}

impl ProcessSnapshot {
    fn from_process(p: &Process) -> Self {
        Self {
            id: p.id.0,
            name: p.name.clone(),
            state: p.state,
            cursor: p.cursor,
            program_len: p.program.len(),
            core: p.core.map(|c| c.0),
            instructions_executed: p.instructions_executed,
            creation_time: p.creation_time,
            finish_time: p.finish_time,
            log: p.log.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ProcessState::Finished
    }

    /// Completion percentage for progress displays, capped at 100.
    pub fn progress_percent(&self) -> f64 {
        if self.program_len == 0 {
            return 0.0;
        }
        let pct = self.instructions_executed as f64 / self.program_len as f64 * 100.0;
        pct.min(100.0)
    }
}

/// System counters for `screen -ls` and `report-util`.
#[derive(Clone, Copy, Debug)]
pub struct UtilizationSnapshot {
    pub cpu_utilization: f64,
    pub used_cores: usize,
    pub available_cores: usize,
    pub ticks: u64,
    pub memory_residents: usize,
    pub external_fragmentation: usize,
}

/// State shared with the background threads.
struct Shared {
    core: Mutex<SchedulerCore>,
    scheduler_running: AtomicBool,
    generation_active: AtomicBool,
    /// Monotonic counter behind `process<k>` names, shared so generation can
    /// stop and restart without reusing names.
    generated: AtomicU64,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, SchedulerCore> {
        // Lock poisoning would mean a panic inside a tick; the state object
        // has no invalid intermediate states observable here, so recover.
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Inner {
    shared: Arc<Shared>,
    scheduler_thread: Option<JoinHandle<()>>,
    generator_thread: Option<JoinHandle<()>>,
    /// Program randomness for shell-created processes.
    rng: StdRng,
}

/// The emulator as one owned value. Created uninitialized; every operation
/// before `initialize` reports `NotInitialized`.
pub struct Emulator {
    inner: Option<Inner>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Record the configuration and build the scheduler state. Idempotent
    /// while the scheduler loop has not started; a second call after `start`
    /// is ignored.
    pub fn initialize(&mut self, config: Config) {
        if let Some(inner) = &self.inner {
            if inner.shared.scheduler_running.load(Ordering::SeqCst) {
                log::warn!("initialize ignored: scheduler already running");
                return;
            }
        }
        let core = SchedulerCore::new(config, Box::new(SystemClock));
        self.inner = Some(Inner {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                scheduler_running: AtomicBool::new(false),
                generation_active: AtomicBool::new(false),
                generated: AtomicU64::new(0),
            }),
            scheduler_thread: None,
            generator_thread: None,
            rng: StdRng::from_entropy(),
        });
        log::info!("emulator initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    fn inner(&self) -> Result<&Inner> {
        self.inner.as_ref().ok_or(EmulatorError::NotInitialized)
    }

    fn inner_mut(&mut self) -> Result<&mut Inner> {
        self.inner.as_mut().ok_or(EmulatorError::NotInitialized)
    }

    /// Launch the scheduler loop (one tick per `TICK_INTERVAL`).
    pub fn start(&mut self) -> Result<()> {
        let inner = self.inner_mut()?;
        if inner.shared.scheduler_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shared = Arc::clone(&inner.shared);
        inner.scheduler_thread = Some(std::thread::spawn(move || scheduler_loop(shared)));
        log::info!("scheduler started");
        Ok(())
    }

    /// Signal both loops to halt and join them. The current tick completes;
    /// in-flight instruction execution is never interrupted.
    pub fn stop(&mut self) -> Result<()> {
        let inner = self.inner_mut()?;
        inner.shared.scheduler_running.store(false, Ordering::SeqCst);
        inner.shared.generation_active.store(false, Ordering::SeqCst);
        if let Some(handle) = inner.scheduler_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = inner.generator_thread.take() {
            let _ = handle.join();
        }
        log::info!("scheduler stopped");
        Ok(())
    }

    /// Start the batch process generator: one `process<k>` every
    /// `batch_process_freq` generator ticks.
    pub fn start_generation(&mut self) -> Result<()> {
        let inner = self.inner_mut()?;
        if inner.shared.generation_active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shared = Arc::clone(&inner.shared);
        inner.generator_thread = Some(std::thread::spawn(move || generator_loop(shared)));
        log::info!("batch process generation started");
        Ok(())
    }

    /// Stop the generator at its next tick boundary. The scheduler keeps
    /// draining the queue.
    pub fn stop_generation(&mut self) -> Result<()> {
        let inner = self.inner_mut()?;
        inner.shared.generation_active.store(false, Ordering::SeqCst);
        if let Some(handle) = inner.generator_thread.take() {
            let _ = handle.join();
        }
        log::info!("batch process generation stopped");
        Ok(())
    }

    /// Create a named process with a random program and return its snapshot.
    pub fn create_process(&mut self, name: &str) -> Result<ProcessSnapshot> {
        let inner = self.inner.as_mut().ok_or(EmulatorError::NotInitialized)?;
        let mut core = inner.shared.lock_core();
        let pid = core.create_process(name, &mut inner.rng)?;
        core.process(pid)
            .map(ProcessSnapshot::from_process)
            .ok_or(EmulatorError::NotFound { name: name.into() })
    }

    /// Snapshot a process for attachment. Waiting processes are attachable;
    /// Finished (or unknown) names are not.
    pub fn attach(&self, name: &str) -> Result<ProcessSnapshot> {
        let snapshot = self.process_snapshot(name)?;
        if snapshot.is_finished() {
            return Err(EmulatorError::NotFound { name: name.into() });
        }
        Ok(snapshot)
    }

    /// Snapshot any process by name, finished ones included.
    pub fn process_snapshot(&self, name: &str) -> Result<ProcessSnapshot> {
        let inner = self.inner()?;
        let core = inner.shared.lock_core();
        core.find_process(name)
            .map(ProcessSnapshot::from_process)
            .ok_or(EmulatorError::NotFound { name: name.into() })
    }

    /// Snapshots of every process, in creation order.
    pub fn list_processes(&self) -> Result<Vec<ProcessSnapshot>> {
        let inner = self.inner()?;
        let core = inner.shared.lock_core();
        Ok(core.processes().iter().map(ProcessSnapshot::from_process).collect())
    }

    /// Every process that has not finished (Running, Ready, or Waiting).
    pub fn active_processes(&self) -> Result<Vec<ProcessSnapshot>> {
        Ok(self
            .list_processes()?
            .into_iter()
            .filter(|p| !p.is_finished())
            .collect())
    }

    pub fn finished_processes(&self) -> Result<Vec<ProcessSnapshot>> {
        Ok(self
            .list_processes()?
            .into_iter()
            .filter(|p| p.is_finished())
            .collect())
    }

    pub fn utilization(&self) -> Result<UtilizationSnapshot> {
        let inner = self.inner()?;
        let core = inner.shared.lock_core();
        Ok(UtilizationSnapshot {
            cpu_utilization: core.cpu_utilization(),
            used_cores: core.used_cores(),
            available_cores: core.available_cores(),
            ticks: core.ticks(),
            memory_residents: core.residents(),
            external_fragmentation: core.external_fragmentation(),
        })
    }

    pub fn current_ticks(&self) -> Result<u64> {
        Ok(self.utilization()?.ticks)
    }

    pub fn config(&self) -> Result<Config> {
        let inner = self.inner()?;
        let core = inner.shared.lock_core();
        Ok(core.config().clone())
    }

    /// Timestamp string from the emulator's clock, for report headers.
    pub fn now_timestamp(&self) -> Result<String> {
        let inner = self.inner()?;
        let core = inner.shared.lock_core();
        Ok(log_timestamp(core.clock()))
    }

    /// Redirect memory snapshot files (tests point this at a temp dir).
    pub fn set_snapshot_dir(&self, dir: impl AsRef<std::path::Path>) -> Result<()> {
        let inner = self.inner()?;
        inner.shared.lock_core().set_snapshot_dir(dir);
        Ok(())
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn scheduler_loop(shared: Arc<Shared>) {
    while shared.scheduler_running.load(Ordering::SeqCst) {
        shared.lock_core().tick();
        std::thread::sleep(TICK_INTERVAL);
    }
}

fn generator_loop(shared: Arc<Shared>) {
    let mut rng = StdRng::from_entropy();
    let freq = shared.lock_core().config().batch_process_freq.max(1);
    let mut ticks_since_spawn = 0;
    while shared.generation_active.load(Ordering::SeqCst) {
        ticks_since_spawn += 1;
        if ticks_since_spawn >= freq {
            ticks_since_spawn = 0;
            let k = shared.generated.fetch_add(1, Ordering::SeqCst) + 1;
            let name = format!("process{k}");
            if let Err(err) = shared.lock_core().create_process(&name, &mut rng) {
                // A shell-created process may already hold the name; skip it.
                log::warn!("generator skipped {name:?}: {err}");
            }
        }
        std::thread::sleep(TICK_INTERVAL);
    }
}
