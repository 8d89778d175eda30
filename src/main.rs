//! Binary entry point: install the logger, then hand the terminal to the shell.

use anyhow::Result;

use os_emulator::shell::Shell;

fn main() -> Result<()> {
    env_logger::init();
    let mut shell = Shell::new();
    shell.run()?;
    Ok(())
}
