//! CPU and memory utilization report: gathered from the emulator, rendered
//! as text, written to `report-util.txt`.

use std::io;
use std::path::Path;

use crate::emulator::{Emulator, ProcessSnapshot, UtilizationSnapshot};
use crate::error::Result;

/// Default report file name.
pub const REPORT_FILE: &str = "report-util.txt";

/// Everything `report-util` prints and writes.
#[derive(Clone, Debug)]
pub struct UtilizationReport {
    pub generated_at: String,
    pub utilization: UtilizationSnapshot,
    /// Processes not yet finished (Running, Ready, or Waiting).
    pub running: Vec<ProcessSnapshot>,
    pub finished: Vec<ProcessSnapshot>,
}

impl UtilizationReport {
    /// Copy the report data out of the emulator under its lock.
    pub fn gather(emulator: &Emulator) -> Result<Self> {
        Ok(Self {
            generated_at: emulator.now_timestamp()?,
            utilization: emulator.utilization()?,
            running: emulator.active_processes()?,
            finished: emulator.finished_processes()?,
        })
    }

    /// The report text, identical on screen and on disk.
    pub fn render(&self) -> String {
        let u = &self.utilization;
        let mut out = String::new();
        out.push_str(&format!("Generated at: {}\n\n", self.generated_at));
        out.push_str(&format!("CPU utilization: {:.2}%\n", u.cpu_utilization));
        out.push_str(&format!("Cores used: {}\n", u.used_cores));
        out.push_str(&format!("Cores available: {}\n", u.available_cores));
        out.push_str(&format!("Current CPU ticks: {}\n\n", u.ticks));
        out.push_str(&format!("Processes in memory: {}\n", u.memory_residents));
        out.push_str(&format!(
            "Total external fragmentation: {} KB\n\n",
            u.external_fragmentation
        ));
        out.push_str(&format!("Running processes: {}\n", self.running.len()));
        for p in &self.running {
            out.push_str(&format!("  {} (ID: {})\n", p.name, p.id));
        }
        out.push_str(&format!("\nFinished processes: {}\n", self.finished.len()));
        for p in &self.finished {
            out.push_str(&format!("  {} (ID: {})\n", p.name, p.id));
        }
        out
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.render())
    }
}
