//! Contiguous main memory: first-fit allocation, coalescing, fragmentation
//! accounting, and on-demand snapshot files.

use std::path::{Path, PathBuf};

use crate::clock::{snapshot_timestamp, Clock};
use crate::process::ProcessId;

/// A half-open range `[start, start + size)`, free or owned by one process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    pub start: usize,
    pub size: usize,
    /// Owning process, or `None` when free.
    pub owner: Option<ProcessId>,
}

impl MemoryBlock {
    pub fn end(&self) -> usize {
        self.start + self.size
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}

/// First-fit allocator over `[0, max_overall_mem)`. The block list stays
/// sorted by start address and always covers the whole range exactly.
pub struct MemoryManager {
    max_overall_mem: usize,
    mem_per_frame: usize,
    mem_per_proc: usize,
    blocks: Vec<MemoryBlock>,
    snapshot_counter: u64,
    snapshot_dir: PathBuf,
}

impl MemoryManager {
    pub fn new(max_overall_mem: usize, mem_per_frame: usize, mem_per_proc: usize) -> Self {
        Self {
            max_overall_mem,
            mem_per_frame,
            mem_per_proc,
            blocks: vec![MemoryBlock {
                start: 0,
                size: max_overall_mem,
                owner: None,
            }],
            snapshot_counter: 0,
            snapshot_dir: PathBuf::from("."),
        }
    }

    /// Where `memory_stamp_<k>.txt` files are written (defaults to the
    /// working directory).
    pub fn set_snapshot_dir(&mut self, dir: impl AsRef<Path>) {
        self.snapshot_dir = dir.as_ref().to_path_buf();
    }

    /// Admit a process: take `mem_per_proc` units out of the lowest-address
    /// free block that can hold them. Returns the base address, or `None`
    /// when no free block is large enough.
    pub fn try_admit(&mut self, pid: ProcessId) -> Option<usize> {
        let i = self
            .blocks
            .iter()
            .position(|b| b.is_free() && b.size >= self.mem_per_proc)?;
        let base = self.blocks[i].start;
        if self.blocks[i].size > self.mem_per_proc {
            let remainder = MemoryBlock {
                start: base + self.mem_per_proc,
                size: self.blocks[i].size - self.mem_per_proc,
                owner: None,
            };
            self.blocks[i].size = self.mem_per_proc;
            self.blocks.insert(i + 1, remainder);
        }
        self.blocks[i].owner = Some(pid);
        Some(base)
    }

    /// Free the block owned by `pid` and merge adjacent free neighbors.
    /// Unknown pids are a silent no-op.
    pub fn release(&mut self, pid: ProcessId) {
        let Some(block) = self.blocks.iter_mut().find(|b| b.owner == Some(pid)) else {
            return;
        };
        block.owner = None;
        self.coalesce();
    }

    /// Number of occupied blocks.
    pub fn residents(&self) -> usize {
        self.blocks.iter().filter(|b| !b.is_free()).count()
    }

    /// External fragmentation: `max(A, B)` where A sums free blocks too small
    /// to admit a process, and B is the free total minus the largest free
    /// block (0 when at most one block is free).
    pub fn external_fragmentation(&self) -> usize {
        let free: Vec<usize> = self
            .blocks
            .iter()
            .filter(|b| b.is_free())
            .map(|b| b.size)
            .collect();
        let a: usize = free.iter().filter(|&&s| s < self.mem_per_proc).sum();
        let b = if free.len() > 1 {
            free.iter().sum::<usize>() - free.iter().max().copied().unwrap_or(0)
        } else {
            0
        };
        a.max(b)
    }

    pub fn max_overall_mem(&self) -> usize {
        self.max_overall_mem
    }

    pub fn mem_per_frame(&self) -> usize {
        self.mem_per_frame
    }

    pub fn mem_per_proc(&self) -> usize {
        self.mem_per_proc
    }

    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    /// Write `memory_stamp_<k>.txt` into the snapshot directory, `k`
    /// incrementing from 1. `resolve_name` maps an owning pid to its process
    /// name for the block entries. Write failures are logged and swallowed.
    pub fn snapshot(&mut self, clock: &dyn Clock, resolve_name: impl Fn(ProcessId) -> String) {
        self.snapshot_counter += 1;
        let path = self
            .snapshot_dir
            .join(format!("memory_stamp_{}.txt", self.snapshot_counter));
        let contents = self.render_snapshot(clock, resolve_name);
        if let Err(err) = std::fs::write(&path, contents) {
            log::warn!("failed to write memory snapshot {}: {err}", path.display());
        }
    }

    pub fn snapshot_counter(&self) -> u64 {
        self.snapshot_counter
    }

    /// The snapshot text: header, then blocks from high addresses to low.
    /// An occupied block prints its owner's name, end address, a blank line,
    /// and its start address; a free block prints its start address alone.
    fn render_snapshot(
        &self,
        clock: &dyn Clock,
        resolve_name: impl Fn(ProcessId) -> String,
    ) -> String {
        let mut out = String::new();
        out.push_str(&format!("Timestamp: ({})\n", snapshot_timestamp(clock)));
        out.push_str(&format!(
            "Number of processes in memory: {}\n",
            self.residents()
        ));
        out.push_str(&format!(
            "Total external fragmentation in KB: {}\n\n",
            self.external_fragmentation()
        ));
        out.push_str(&format!("----end---- = {}\n", self.max_overall_mem));
        for block in self.blocks.iter().rev() {
            match block.owner {
                Some(pid) => {
                    out.push_str(&format!(
                        "{}\n{}\n\n{}\n",
                        resolve_name(pid),
                        block.end(),
                        block.start
                    ));
                }
                None => out.push_str(&format!("{}\n", block.start)),
            }
        }
        out.push_str("----start---- = 0\n");
        out
    }

    /// Merge adjacent free blocks in one pass over the sorted list.
    fn coalesce(&mut self) {
        let mut i = 0;
        while i + 1 < self.blocks.len() {
            if self.blocks[i].is_free()
                && self.blocks[i + 1].is_free()
                && self.blocks[i].end() == self.blocks[i + 1].start
            {
                self.blocks[i].size += self.blocks[i + 1].size;
                self.blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn assert_invariants(mem: &MemoryManager) {
        let blocks = mem.blocks();
        assert!(!blocks.is_empty());
        assert_eq!(blocks[0].start, 0);
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start, "gap or overlap in {blocks:?}");
            assert!(
                !(pair[0].is_free() && pair[1].is_free()),
                "adjacent free blocks in {blocks:?}"
            );
        }
        assert_eq!(
            blocks.iter().map(|b| b.size).sum::<usize>(),
            mem.max_overall_mem()
        );
    }

    #[test]
    fn admit_is_first_fit_from_low_addresses() {
        let mut mem = MemoryManager::new(12, 4, 4);
        assert_eq!(mem.try_admit(ProcessId(1)), Some(0));
        assert_eq!(mem.try_admit(ProcessId(2)), Some(4));
        assert_eq!(mem.try_admit(ProcessId(3)), Some(8));
        assert_eq!(mem.try_admit(ProcessId(4)), None);
        assert_eq!(mem.residents(), 3);
        assert_invariants(&mem);
    }

    #[test]
    fn release_reuses_the_hole() {
        let mut mem = MemoryManager::new(12, 4, 4);
        mem.try_admit(ProcessId(1));
        mem.try_admit(ProcessId(2));
        mem.try_admit(ProcessId(3));
        mem.release(ProcessId(2));
        assert_invariants(&mem);
        // The freed middle hole is the lowest fit.
        assert_eq!(mem.try_admit(ProcessId(4)), Some(4));
    }

    #[test]
    fn release_unknown_pid_is_noop() {
        let mut mem = MemoryManager::new(12, 4, 4);
        mem.try_admit(ProcessId(1));
        mem.release(ProcessId(99));
        assert_eq!(mem.residents(), 1);
        assert_invariants(&mem);
    }

    #[test]
    fn coalesce_merges_neighbors_both_sides() {
        let mut mem = MemoryManager::new(12, 4, 4);
        mem.try_admit(ProcessId(1));
        mem.try_admit(ProcessId(2));
        mem.try_admit(ProcessId(3));
        mem.release(ProcessId(1));
        mem.release(ProcessId(3));
        // Free [0,4) and [8,12) around occupied [4,8).
        assert_eq!(mem.blocks().len(), 3);
        mem.release(ProcessId(2));
        // Everything merges back into one free block.
        assert_eq!(mem.blocks().len(), 1);
        assert!(mem.blocks()[0].is_free());
        assert_invariants(&mem);
    }

    #[test]
    fn fragmentation_counts_split_free_space() {
        let mut mem = MemoryManager::new(12, 4, 4);
        mem.try_admit(ProcessId(1));
        mem.try_admit(ProcessId(2));
        mem.try_admit(ProcessId(3));
        assert_eq!(mem.external_fragmentation(), 0);

        // One process-sized hole is usable memory, not fragmentation.
        mem.release(ProcessId(2));
        assert_eq!(mem.residents(), 2);
        assert_eq!(mem.external_fragmentation(), 0);

        // Two process-sized holes: only the largest counts as usable.
        let mut mem = MemoryManager::new(12, 4, 4);
        mem.try_admit(ProcessId(1));
        mem.try_admit(ProcessId(2));
        mem.try_admit(ProcessId(3));
        mem.release(ProcessId(1));
        mem.release(ProcessId(3));
        assert_eq!(mem.external_fragmentation(), 4);
    }

    #[test]
    fn fragmentation_after_full_coalesce_is_zero() {
        let mut mem = MemoryManager::new(12, 4, 4);
        mem.try_admit(ProcessId(1));
        mem.try_admit(ProcessId(2));
        mem.try_admit(ProcessId(3));
        mem.release(ProcessId(2));
        mem.release(ProcessId(1));
        // [0,8) free and coalesced, [8,12) occupied.
        assert_eq!(mem.blocks().len(), 2);
        assert_eq!(mem.external_fragmentation(), 0);
        assert_invariants(&mem);
    }

    #[test]
    fn exhaustion_defers_until_release() {
        let mut mem = MemoryManager::new(4, 4, 4);
        assert_eq!(mem.try_admit(ProcessId(1)), Some(0));
        assert_eq!(mem.try_admit(ProcessId(2)), None);
        assert_eq!(mem.residents(), 1);
        assert_eq!(mem.external_fragmentation(), 0);
        mem.release(ProcessId(1));
        assert_eq!(mem.try_admit(ProcessId(2)), Some(0));
    }

    #[test]
    fn snapshot_renders_blocks_high_to_low() {
        let mut mem = MemoryManager::new(12, 4, 4);
        mem.try_admit(ProcessId(1));
        mem.try_admit(ProcessId(2));
        mem.try_admit(ProcessId(3));
        mem.release(ProcessId(2));
        let clock = FixedClock::default();
        let text = mem.render_snapshot(&clock, |pid| format!("p{}", pid.0));
        assert_eq!(
            text,
            "Timestamp: (01/15/2024 09:30:00)\n\
             Number of processes in memory: 2\n\
             Total external fragmentation in KB: 0\n\
             \n\
             ----end---- = 12\n\
             p3\n12\n\n8\n\
             4\n\
             p1\n4\n\n0\n\
             ----start---- = 0\n"
        );
    }

    #[test]
    fn snapshot_files_get_unique_increasing_names() {
        let dir = std::env::temp_dir().join(format!("os_emulator_mem_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut mem = MemoryManager::new(8, 4, 4);
        mem.set_snapshot_dir(&dir);
        mem.try_admit(ProcessId(1));
        let clock = FixedClock::default();
        mem.snapshot(&clock, |_| "p1".to_string());
        mem.snapshot(&clock, |_| "p1".to_string());
        assert_eq!(mem.snapshot_counter(), 2);
        assert!(dir.join("memory_stamp_1.txt").exists());
        assert!(dir.join("memory_stamp_2.txt").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
