//! 5-stage in-order pipeline (C7): Fetch/Decode/Execute/Memory/
//! WriteBack with a register scoreboard, EX/MEM and MEM/WB forwarding,
//! and a structural stall on the data cache.
//!
//! Grounded on `pipe.h`'s `PipeLine`/`Latch`/`RegBoard` declarations
//! (`pipe.cc` itself was not retained, so the stage bodies below are
//! reconstructed from those declarations directly). Fetch drives the
//! functional interpreter's own one-instruction `step_funct` to
//! completion — registers and memory are committed right there — and
//! the four downstream stages only replay the scoreboard/forwarding
//! bookkeeping needed to reproduce the timing a real 5-stage datapath
//! would have shown. This is why `exec_stage`/`mem_stage` never touch
//! an ALU or `MemoryMap`: the values are already correct by the time
//! they see the latch.

use crate::archstate::{ArchState, REG_RA};
use crate::cache::{Access as CacheAccess, DataCache};
use crate::cp0::Cp0;
use crate::inst::{Attr, InstructionRecord};
use crate::memctl::{MemoryController, MemoryMap};
use crate::mips::{ExecMode, Mips};

pub const PIPE_DEPTH: usize = 5;
pub const STAGE_FETCH: usize = 0;
pub const STAGE_DECODE: usize = 1;
pub const STAGE_EXEC: usize = 2;
pub const STAGE_MEM: usize = 3;
pub const STAGE_WB: usize = 4;
pub const STAGE_NAMES: [&str; PIPE_DEPTH] = ["F", "D", "E", "M", "W"];

/// Scoreboard register-file indices 32/33 stand in for HI/LO, matching
/// the "34 entries = 32 GPR + HI + LO" data-model note.
const REG_HI: usize = 32;
const REG_LO: usize = 33;
const SCOREBOARD_REGS: usize = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Busy,
    Stall,
}

/// One pipeline latch: whether it holds a live instruction, the
/// already-decoded (and, per the layering above, already-executed)
/// instruction, and the effective address a load/store resolved (used
/// only for cache timing in the Memory stage).
#[derive(Clone, Default)]
pub struct Latch {
    pub contain: bool,
    pub inst: InstructionRecord,
    pub mem_vaddr: u32,
}

/// Scoreboard entry per logical register: `locked` counts in-flight
/// instructions that will write it; `ex_fw`/`ex2_fw`/`load0_fw`/
/// `load_fw` track which forwarding path (if any) can currently supply
/// its value, mirroring `pipe.h`'s `RegBoard` record fields.
#[derive(Clone, Copy, Default)]
struct RegBoard {
    locked: u32,
    ex_fw: bool,
    ex2_fw: bool,
    load0_fw: bool,
    load_fw: bool,
}

fn read_regs(ir: &InstructionRecord) -> Vec<usize> {
    let mut v = Vec::with_capacity(3);
    if ir.attr.intersects(Attr::READ_RS) {
        v.push(ir.rs);
    }
    if ir.attr.intersects(Attr::READ_RT) {
        v.push(ir.rt);
    }
    if ir.attr.intersects(Attr::READ_RD) {
        v.push(ir.rd);
    }
    if ir.attr.intersects(Attr::READ_HI) {
        v.push(REG_HI);
    }
    if ir.attr.intersects(Attr::READ_LO) {
        v.push(REG_LO);
    }
    v
}

fn written_regs(ir: &InstructionRecord) -> Vec<usize> {
    let mut v = Vec::with_capacity(3);
    if ir.attr.intersects(Attr::WRITE_RS) {
        v.push(ir.rs);
    }
    if ir.attr.intersects(Attr::WRITE_RT) {
        v.push(ir.rt);
    }
    if ir.attr.intersects(Attr::WRITE_RD | Attr::WRITE_RD_COND) {
        v.push(ir.rd);
    }
    if ir.attr.intersects(Attr::WRITE_RRA) {
        v.push(REG_RA);
    }
    if ir.attr.intersects(Attr::WRITE_HI) {
        v.push(REG_HI);
    }
    if ir.attr.intersects(Attr::WRITE_LO) {
        v.push(REG_LO);
    }
    v
}

/// The 5-stage pipeline. Owns a functional [`Mips`] purely to get a
/// correct one-instruction step out of its Fetch stage; everything
/// else here is timing simulation layered on top.
pub struct PipeLine {
    pub mips: Mips,
    pub forwarding: bool,
    dcache: Option<DataCache>,
    latches: [Latch; PIPE_DEPTH],
    stage_state: [StageState; PIPE_DEPTH],
    stage_wait: [u32; PIPE_DEPTH],
    reg_board: [RegBoard; SCOREBOARD_REGS],
    pub cycle: u64,
    pub inst_count: u64,
}

impl PipeLine {
    pub fn new(forwarding: bool, dcache: Option<DataCache>) -> Self {
        Self {
            mips: Mips::new(ExecMode::Functional),
            forwarding,
            dcache,
            latches: Default::default(),
            stage_state: [StageState::Idle; PIPE_DEPTH],
            stage_wait: [0; PIPE_DEPTH],
            reg_board: [RegBoard::default(); SCOREBOARD_REGS],
            cycle: 0,
            inst_count: 0,
        }
    }

    pub fn arch(&self) -> &ArchState {
        &self.mips.arch
    }

    /// `true` once the functional core has stopped/errored and every
    /// latch has drained — the pipeline run loop's stopping condition.
    pub fn drained(&self) -> bool {
        !self.mips.running() && self.latches.iter().all(|l| !l.contain)
    }

    pub fn stage_state(&self, stage: usize) -> StageState {
        self.stage_state[stage]
    }

    pub fn latch_inst(&self, stage: usize) -> Option<&InstructionRecord> {
        self.latches[stage].contain.then_some(&self.latches[stage].inst)
    }

    /// Scoreboard lock count for `reg`: the number of in-flight
    /// instructions between Decode (inclusive) and Writeback (exclusive)
    /// that will write it. Always `>= 0` by construction (`u32`); a
    /// black-box check can confirm it never exceeds the pipeline depth.
    pub fn locked_count(&self, reg: usize) -> u32 {
        self.reg_board[reg].locked
    }

    fn reg_available(&self, reg: usize, is_branch: bool) -> bool {
        if reg == 0 {
            return true;
        }
        let rb = self.reg_board[reg];
        if rb.locked == 0 {
            return true;
        }
        if !self.forwarding {
            return false;
        }
        if is_branch {
            return rb.ex2_fw;
        }
        rb.ex_fw || (!rb.load0_fw && rb.ex2_fw) || rb.load_fw
    }

    /// Advance the pipeline by one cycle: stages run in reverse order
    /// (W, M, E, D, F) against the latch contents left by the previous
    /// cycle's shift, then latches shift forward wherever the
    /// downstream slot is free and the upstream stage finished.
    pub fn step(&mut self, map: &mut MemoryMap, mc: &mut MemoryController, cp0: Option<&mut Cp0>, time_us: u64) {
        self.cycle += 1;
        self.writeback_stage();
        self.mem_stage();
        self.exec_stage();
        self.decode_stage();
        self.fetch_stage(map, mc, cp0, time_us);
        self.shift_latches();
    }

    /// If idle, drive the functional interpreter through one complete
    /// instruction (its own fetch/decode/execute/mem/writeback); the
    /// resulting instruction record and effective address become this
    /// cycle's Fetch latch. A non-positive return means the functional
    /// core is still working through a static-latency stall, is
    /// waiting, or has halted — nothing new to latch this cycle.
    fn fetch_stage(&mut self, map: &mut MemoryMap, mc: &mut MemoryController, cp0: Option<&mut Cp0>, time_us: u64) {
        if self.stage_state[STAGE_FETCH] != StageState::Idle {
            return;
        }
        if !self.mips.running() {
            return;
        }
        let delta = self.mips.step_funct(map, mc, cp0, time_us);
        if delta <= 0 {
            return;
        }
        self.latches[STAGE_FETCH] = Latch {
            contain: true,
            inst: self.mips.ir,
            mem_vaddr: self.mips.last_eff_vaddr(),
        };
        self.stage_state[STAGE_FETCH] = StageState::Stall;
    }

    fn decode_stage(&mut self) {
        if self.stage_state[STAGE_DECODE] != StageState::Idle {
            return;
        }
        if !self.latches[STAGE_DECODE].contain {
            return;
        }
        let ir = self.latches[STAGE_DECODE].inst;
        let is_branch = ir.attr.intersects(Attr::BRANCH | Attr::BRANCH_LIKELY | Attr::BRANCH_ERET);
        for r in read_regs(&ir) {
            if !self.reg_available(r, is_branch) {
                return; // stall: stays Idle, retried next tick.
            }
        }
        for r in written_regs(&ir) {
            if r != 0 {
                self.reg_board[r].locked += 1;
            }
        }
        self.stage_state[STAGE_DECODE] = StageState::Stall;
    }

    fn exec_stage(&mut self) {
        if self.stage_state[STAGE_EXEC] != StageState::Idle {
            return;
        }
        if !self.latches[STAGE_EXEC].contain {
            return;
        }
        let ir = self.latches[STAGE_EXEC].inst;
        if self.forwarding {
            if ir.attr.intersects(Attr::LOAD_ANY) {
                for r in written_regs(&ir) {
                    if r != 0 {
                        self.reg_board[r].load0_fw = true;
                    }
                }
            } else if !ir.attr.intersects(Attr::LOADSTORE) {
                for r in written_regs(&ir) {
                    if r != 0 {
                        self.reg_board[r].ex_fw = true;
                    }
                }
            }
        }
        self.reg_board[0].ex_fw = false;
        self.stage_state[STAGE_EXEC] = StageState::Stall;
    }

    fn mem_stage(&mut self) {
        match self.stage_state[STAGE_MEM] {
            StageState::Stall => return,
            StageState::Busy => {
                self.stage_wait[STAGE_MEM] -= 1;
                if self.stage_wait[STAGE_MEM] == 0 {
                    self.stage_state[STAGE_MEM] = StageState::Stall;
                }
                return;
            }
            StageState::Idle => {}
        }
        if !self.latches[STAGE_MEM].contain {
            return;
        }
        let ir = self.latches[STAGE_MEM].inst;
        let mut wait = 0u32;
        if ir.attr.intersects(Attr::LOADSTORE) {
            if let Some(cache) = self.dcache.as_mut() {
                let kind = if ir.attr.intersects(Attr::STORE_ANY) { CacheAccess::Write } else { CacheAccess::Read };
                let (_outcome, latency, _evicted) = cache.access(self.latches[STAGE_MEM].mem_vaddr, kind);
                wait = latency.saturating_sub(1);
            }
        }

        if ir.attr.intersects(Attr::LOAD_ANY) {
            for r in written_regs(&ir) {
                if r != 0 {
                    self.reg_board[r].load_fw = true;
                    self.reg_board[r].load0_fw = false;
                }
            }
        } else if !ir.attr.intersects(Attr::LOADSTORE) {
            for r in written_regs(&ir) {
                if r != 0 {
                    self.reg_board[r].ex_fw = false;
                    self.reg_board[r].ex2_fw = true;
                }
            }
        }

        if wait > 0 {
            self.stage_state[STAGE_MEM] = StageState::Busy;
            self.stage_wait[STAGE_MEM] = wait;
        } else {
            self.stage_state[STAGE_MEM] = StageState::Stall;
        }
    }

    fn writeback_stage(&mut self) {
        if self.latches[STAGE_WB].contain {
            let ir = self.latches[STAGE_WB].inst;
            for r in written_regs(&ir) {
                if r != 0 {
                    self.reg_board[r].locked = self.reg_board[r].locked.saturating_sub(1);
                    if self.forwarding {
                        self.reg_board[r].ex2_fw = false;
                        self.reg_board[r].load_fw = false;
                    }
                }
            }
            self.inst_count += 1;
        }
        self.latches[STAGE_WB] = Latch::default();
        self.stage_state[STAGE_WB] = StageState::Idle;
    }

    /// From M down to F: a `Stall`ed stage whose downstream latch is
    /// free hands its latch forward and goes back to `Idle`. Run in
    /// this order within a single tick so a chain that fully drains
    /// (e.g. W emptied this tick) lets every upstream stage ripple
    /// forward once, matching a real latch array's simultaneous update.
    fn shift_latches(&mut self) {
        for stage in (STAGE_FETCH..STAGE_WB).rev() {
            if self.stage_state[stage] == StageState::Stall && !self.latches[stage + 1].contain {
                self.latches[stage + 1] = self.latches[stage].clone();
                self.stage_state[stage + 1] = StageState::Idle;
                self.latches[stage] = Latch::default();
                self.stage_state[stage] = StageState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mainmem::MainMemory;
    use crate::memctl::{Device, McMode, MemoryController, MemoryMap};

    fn harness(forwarding: bool, dcache: Option<DataCache>) -> (PipeLine, MemoryMap, MemoryController) {
        let mut map = MemoryMap::new();
        map.add(0, 0x10000, Device::MainMemory(MainMemory::new(0x10000)));
        let mc = MemoryController::new(McMode::Through);
        (PipeLine::new(forwarding, dcache), map, mc)
    }

    fn assemble_r(funct: u32, rs: u32, rt: u32, rd: u32, shamt: u32) -> u32 {
        (rs << 21) | (rt << 16) | (rd << 11) | (shamt << 6) | funct
    }

    fn assemble_i(opcode: u32, rs: u32, rt: u32, imm: u16) -> u32 {
        (opcode << 26) | (rs << 21) | (rt << 16) | imm as u32
    }

    /// `lw $t0,0($sp); addu $t1,$t0,$t0` with forwarding disabled must
    /// stall `addu` in Decode until the load has fully retired — three
    /// idle cycles between the load-use pair's Fetch and Decode issue.
    #[test]
    fn load_use_hazard_without_forwarding_stalls_in_decode() {
        let (mut pipe, mut map, mut mc) = harness(false, None);
        pipe.mips.arch.r[29] = 0x100; // $sp
        if let Device::MainMemory(m) = map.devices_mut().next().unwrap() {
            m.write4b(0x100, 0x1234_5678);
        }
        // lw $t0, 0($sp)  (opcode 0x23, rs=29, rt=8)
        map_word(&mut map, 0x0, assemble_i(0x23, 29, 8, 0));
        // addu $t1,$t0,$t0 (rs=8,rt=8,rd=9,funct=0x21)
        map_word(&mut map, 0x4, assemble_r(0x21, 8, 8, 9, 0));

        let mut decode_cycle = None;
        for cyc in 1..=8 {
            pipe.step(&mut map, &mut mc, None, cyc);
            if let Some(ir) = pipe.latch_inst(STAGE_DECODE) {
                if ir.rd == 9 && decode_cycle.is_none() {
                    decode_cycle = Some(cyc);
                }
            }
        }
        // lw fetches at cycle 1 and moves to D at cycle 2; addu fetches
        // at cycle 2. Without forwarding it cannot issue from D until lw
        // has written back (3 bubbles).
        assert!(decode_cycle.unwrap() >= 5);
    }

    /// Same hazard with forwarding on: exactly one bubble (the
    /// load-use hazard forwarding cannot remove) instead of three.
    #[test]
    fn load_use_hazard_with_forwarding_has_one_bubble() {
        let (mut pipe, mut map, mut mc) = harness(true, None);
        pipe.mips.arch.r[29] = 0x100;
        map_word(&mut map, 0x0, assemble_i(0x23, 29, 8, 0));
        map_word(&mut map, 0x4, assemble_r(0x21, 8, 8, 9, 0));

        let mut fetch_cycle = None;
        let mut decode_cycle = None;
        for cyc in 1..=6 {
            pipe.step(&mut map, &mut mc, None, cyc);
            if let Some(ir) = pipe.latch_inst(STAGE_FETCH) {
                if ir.rd == 9 && fetch_cycle.is_none() {
                    fetch_cycle = Some(cyc);
                }
            }
            if let Some(ir) = pipe.latch_inst(STAGE_DECODE) {
                if ir.rd == 9 && decode_cycle.is_none() {
                    decode_cycle = Some(cyc);
                }
            }
        }
        assert_eq!(decode_cycle.unwrap() - fetch_cycle.unwrap(), 2);
    }

    fn map_word(map: &mut MemoryMap, addr: u32, word: u32) {
        if let Device::MainMemory(m) = map.devices_mut().next().unwrap() {
            m.write4b(addr, word);
        }
    }
}
