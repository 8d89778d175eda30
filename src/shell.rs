//! Interactive command shell: process screens, scheduler control, reports.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::clock::format_timestamp;
use crate::config::{Config, SchedulerPolicy};
use crate::emulator::{Emulator, ProcessSnapshot};
use crate::report::{UtilizationReport, REPORT_FILE};

const BANNER: &str = r"
   ____    _____   ______  __  __  _    _
  / __ \  / ____| |  ____||  \/  || |  | |
 | |  | || (___   | |__   | \  / || |  | |
 | |  | | \___ \  |  __|  | |\/| || |  | |
 | |__| | ____) | | |____ | |  | || |__| |
  \____/ |_____/  |______||_|  |_| \____/
";

const USAGE_SCREEN: &str = "Usage: screen -s <process_name> | screen -r <process_name> | screen -ls";

/// Whether the command loop should keep reading.
enum Outcome {
    Continue,
    Exit,
}

/// Line-oriented shell over one owned emulator. While attached to a process
/// screen, commands are routed to the screen handler.
pub struct Shell {
    emulator: Emulator,
    attached: Option<String>,
    config_path: PathBuf,
    report_path: PathBuf,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self::with_paths("config.txt", REPORT_FILE)
    }

    /// Override where the config is read and the report written (tests).
    pub fn with_paths(config_path: impl Into<PathBuf>, report_path: impl Into<PathBuf>) -> Self {
        Self {
            emulator: Emulator::new(),
            attached: None,
            config_path: config_path.into(),
            report_path: report_path.into(),
        }
    }

    /// Read commands from stdin until `exit` or EOF.
    pub fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        writeln!(stdout, "{BANNER}")?;
        writeln!(stdout, "Type 'initialize' to start, or 'exit' to quit.\n")?;
        let mut line = String::new();
        loop {
            match &self.attached {
                Some(name) => write!(stdout, "[{name}] >> ")?,
                None => write!(stdout, ">> ")?,
            }
            stdout.flush()?;
            line.clear();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            if let Outcome::Exit = self.handle_line(line.trim(), &mut stdout)? {
                break;
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str, out: &mut impl Write) -> io::Result<Outcome> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Outcome::Continue);
        }
        if self.attached.is_some() {
            self.screen_command(&tokens, out)
        } else {
            self.main_command(&tokens, out)
        }
    }

    fn main_command(&mut self, tokens: &[&str], out: &mut impl Write) -> io::Result<Outcome> {
        match tokens[0] {
            "exit" => {
                if self.emulator.is_initialized() {
                    let _ = self.emulator.stop();
                }
                writeln!(out, "Goodbye!")?;
                return Ok(Outcome::Exit);
            }
            "initialize" => self.cmd_initialize(out)?,
            _ if !self.emulator.is_initialized() => {
                writeln!(out, "Error: System not initialized. Please run 'initialize' first.")?;
            }
            "screen" => self.cmd_screen(&tokens[1..], out)?,
            "scheduler-start" => match self.emulator.start_generation() {
                Ok(()) => writeln!(out, "Scheduler started. Generating processes...")?,
                Err(err) => writeln!(out, "{err}")?,
            },
            "scheduler-stop" => match self.emulator.stop_generation() {
                Ok(()) => writeln!(out, "Scheduler stopped.")?,
                Err(err) => writeln!(out, "{err}")?,
            },
            "report-util" => self.cmd_report(out)?,
            other => {
                writeln!(out, "Unknown command: {other}")?;
                writeln!(
                    out,
                    "Available commands: initialize, exit, screen, scheduler-start, scheduler-stop, report-util"
                )?;
            }
        }
        Ok(Outcome::Continue)
    }

    fn screen_command(&mut self, tokens: &[&str], out: &mut impl Write) -> io::Result<Outcome> {
        match tokens[0] {
            "exit" => {
                self.attached = None;
                clear_screen(out)?;
                writeln!(out, "{BANNER}")?;
            }
            "process-smi" => self.cmd_process_smi(out)?,
            other => {
                writeln!(out, "Unknown command in process screen: {other}")?;
                writeln!(out, "Available commands: process-smi, exit")?;
            }
        }
        Ok(Outcome::Continue)
    }

    fn cmd_initialize(&mut self, out: &mut impl Write) -> io::Result<()> {
        let config = Config::load(&self.config_path);
        self.emulator.initialize(config.clone());
        if let Err(err) = self.emulator.start() {
            writeln!(out, "{err}")?;
            return Ok(());
        }
        writeln!(out, "System initialized successfully.")?;
        writeln!(out, "Configuration:")?;
        writeln!(out, "  CPU cores: {}", config.num_cpu)?;
        let policy = match config.scheduler {
            SchedulerPolicy::Fcfs => "fcfs (First Come First Serve)",
            SchedulerPolicy::Rr => "rr (Round Robin)",
        };
        writeln!(out, "  Scheduler: {policy}")?;
        if config.scheduler == SchedulerPolicy::Rr {
            writeln!(out, "  Quantum cycles: {}", config.quantum_cycles)?;
        }
        writeln!(out, "  Process generation frequency: {} ticks", config.batch_process_freq)?;
        writeln!(out, "  Instructions per process: {}-{}", config.min_ins, config.max_ins)?;
        writeln!(out)?;
        writeln!(out, "Memory configuration:")?;
        writeln!(out, "  Total memory: {}", config.max_overall_mem)?;
        writeln!(out, "  Memory per frame: {}", config.mem_per_frame)?;
        writeln!(out, "  Memory per process: {}", config.mem_per_proc)?;
        writeln!(out, "  Maximum resident processes: {}", config.max_resident_processes())?;
        Ok(())
    }

    fn cmd_screen(&mut self, args: &[&str], out: &mut impl Write) -> io::Result<()> {
        match args {
            ["-s", name, ..] => match self.emulator.create_process(name) {
                Ok(_) => {
                    self.attached = Some((*name).to_string());
                    clear_screen(out)?;
                    writeln!(out, "Created and attached to process: {name}")?;
                }
                Err(err) => writeln!(out, "{err}")?,
            },
            ["-r", name, ..] => match self.emulator.attach(name) {
                Ok(_) => {
                    self.attached = Some((*name).to_string());
                    clear_screen(out)?;
                    writeln!(out, "Attached to process: {name}")?;
                }
                Err(err) => writeln!(out, "{err}")?,
            },
            ["-ls", ..] => self.cmd_screen_ls(out)?,
            _ => writeln!(out, "{USAGE_SCREEN}")?,
        }
        Ok(())
    }

    fn cmd_screen_ls(&mut self, out: &mut impl Write) -> io::Result<()> {
        let (utilization, running, finished) = match (
            self.emulator.utilization(),
            self.emulator.active_processes(),
            self.emulator.finished_processes(),
        ) {
            (Ok(u), Ok(r), Ok(f)) => (u, r, f),
            (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => {
                writeln!(out, "{err}")?;
                return Ok(());
            }
        };
        writeln!(out, "CPU utilization: {:.2}%", utilization.cpu_utilization)?;
        writeln!(out, "Cores used: {}", utilization.used_cores)?;
        writeln!(out, "Cores available: {}", utilization.available_cores)?;
        writeln!(out, "Processes in memory: {}", utilization.memory_residents)?;
        writeln!(out, "External fragmentation: {} KB", utilization.external_fragmentation)?;
        writeln!(out)?;
        writeln!(out, "Running processes:")?;
        for p in &running {
            let core = match p.core {
                Some(idx) => format!("Core: {idx}"),
                None => "Core: Not assigned".to_string(),
            };
            writeln!(
                out,
                "{} ({}) {} {}/{}",
                p.name,
                format_timestamp(&p.creation_time),
                core,
                p.cursor,
                p.program_len
            )?;
        }
        writeln!(out)?;
        writeln!(out, "Finished processes:")?;
        for p in &finished {
            let stamp = p.finish_time.unwrap_or(p.creation_time);
            writeln!(
                out,
                "{} ({}) Finished {}/{}",
                p.name,
                format_timestamp(&stamp),
                p.program_len,
                p.program_len
            )?;
        }
        Ok(())
    }

    fn cmd_report(&mut self, out: &mut impl Write) -> io::Result<()> {
        let report = match UtilizationReport::gather(&self.emulator) {
            Ok(report) => report,
            Err(err) => {
                writeln!(out, "{err}")?;
                return Ok(());
            }
        };
        write!(out, "{}", report.render())?;
        match report.write_to(&self.report_path) {
            Ok(()) => writeln!(out, "\nReport saved to {}", self.report_path.display())?,
            Err(err) => writeln!(out, "\nFailed to save report: {err}")?,
        }
        Ok(())
    }

    fn cmd_process_smi(&mut self, out: &mut impl Write) -> io::Result<()> {
        let Some(name) = self.attached.clone() else {
            return Ok(());
        };
        let process: ProcessSnapshot = match self.emulator.process_snapshot(&name) {
            Ok(p) => p,
            Err(err) => {
                writeln!(out, "{err}")?;
                return Ok(());
            }
        };
        writeln!(out)?;
        writeln!(out, "Process: {}", process.name)?;
        writeln!(out, "ID: {}", process.id)?;
        if process.is_finished() {
            writeln!(out, "Status: Finished!")?;
        } else {
            writeln!(
                out,
                "Current instruction line: {} / {}",
                process.cursor + 1,
                process.program_len
            )?;
            writeln!(out, "State: {}", process.state)?;
            writeln!(out, "Progress: {:.2}%", process.progress_percent())?;
        }
        writeln!(out)?;
        writeln!(out, "Logs:")?;
        for line in &process.log {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

fn clear_screen(out: &mut impl Write) -> io::Result<()> {
    write!(out, "\x1B[2J\x1B[1;1H")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_commands(shell: &mut Shell, commands: &[&str]) -> String {
        let mut out = Vec::new();
        for command in commands {
            shell.handle_line(command, &mut out).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    fn temp_shell(tag: &str) -> (Shell, PathBuf) {
        let dir = std::env::temp_dir().join(format!("os_emulator_shell_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        // FCFS keeps the background loop from emitting memory snapshots.
        std::fs::write(
            dir.join("config.txt"),
            "scheduler fcfs\nmin-ins 2\nmax-ins 2\nnum-cpu 1\n",
        )
        .unwrap();
        let shell = Shell::with_paths(dir.join("config.txt"), dir.join("report-util.txt"));
        (shell, dir)
    }

    #[test]
    fn commands_require_initialization() {
        let mut shell = Shell::new();
        let output = run_commands(&mut shell, &["screen -ls"]);
        assert!(output.contains("not initialized"));
    }

    #[test]
    fn unknown_command_lists_available_ones() {
        let (mut shell, dir) = temp_shell("unknown");
        let output = run_commands(&mut shell, &["initialize", "frobnicate"]);
        assert!(output.contains("Unknown command: frobnicate"));
        assert!(output.contains("Available commands:"));
        run_commands(&mut shell, &["exit"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn blank_lines_are_ignored() {
        let mut shell = Shell::new();
        let output = run_commands(&mut shell, &["", "   "]);
        assert!(output.is_empty());
    }

    #[test]
    fn initialize_echoes_configuration() {
        let (mut shell, dir) = temp_shell("init");
        let output = run_commands(&mut shell, &["initialize"]);
        assert!(output.contains("System initialized successfully."));
        assert!(output.contains("CPU cores: 1"));
        assert!(output.contains("fcfs (First Come First Serve)"));
        assert!(output.contains("Instructions per process: 2-2"));
        run_commands(&mut shell, &["exit"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn screen_create_attach_smi_and_detach() {
        let (mut shell, dir) = temp_shell("screen");
        let output = run_commands(
            &mut shell,
            &["initialize", "screen -s demo", "process-smi", "exit"],
        );
        assert!(output.contains("Created and attached to process: demo"));
        assert!(output.contains("Process: demo"));
        assert!(output.contains("ID: 1"));
        assert!(output.contains("Logs:"));
        // The screen-level exit detaches instead of quitting.
        assert!(shell.attached.is_none());
        let output = run_commands(&mut shell, &["screen -s demo"]);
        assert!(output.contains("already exists"));
        run_commands(&mut shell, &["exit"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn screen_attach_unknown_process_fails() {
        let (mut shell, dir) = temp_shell("attach");
        let output = run_commands(&mut shell, &["initialize", "screen -r ghost"]);
        assert!(output.contains("not found"));
        assert!(shell.attached.is_none());
        run_commands(&mut shell, &["exit"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn screen_ls_lists_sections() {
        let (mut shell, dir) = temp_shell("ls");
        let output = run_commands(&mut shell, &["initialize", "screen -ls"]);
        assert!(output.contains("CPU utilization:"));
        assert!(output.contains("Running processes:"));
        assert!(output.contains("Finished processes:"));
        run_commands(&mut shell, &["exit"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn report_util_writes_the_report_file() {
        let (mut shell, dir) = temp_shell("report");
        let output = run_commands(&mut shell, &["initialize", "report-util"]);
        assert!(output.contains("CPU utilization:"));
        assert!(output.contains("Report saved to"));
        assert!(dir.join("report-util.txt").exists());
        run_commands(&mut shell, &["exit"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn exit_terminates_the_loop() {
        let (mut shell, dir) = temp_shell("exit");
        let mut out = Vec::new();
        shell.handle_line("initialize", &mut out).unwrap();
        let outcome = shell.handle_line("exit", &mut out).unwrap();
        assert!(matches!(outcome, Outcome::Exit));
        assert!(String::from_utf8(out).unwrap().contains("Goodbye!"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
