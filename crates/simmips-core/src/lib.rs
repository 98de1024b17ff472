//! `simmips-core`: MIPS32 instruction decoding, architectural state,
//! CP0/TLB, the memory subsystem, a functional/multicycle interpreter,
//! a 5-stage pipeline, and a set-associative data cache.
//!
//! Grounded throughout on the `SimMips`/`SimPipe` sources under
//! `examples/original_source/`; see `DESIGN.md` at the workspace root
//! for the full grounding ledger.

pub mod archstate;
pub mod cache;
pub mod config;
pub mod cp0;
pub mod devices;
pub mod error;
pub mod inst;
pub mod loader;
pub mod mainmem;
pub mod memctl;
pub mod mips;
pub mod pipeline;

use cp0::Cp0;
use devices::{IsaBus, IsaIo, MieruIo};
use mainmem::MainMemory;
use memctl::{Device, McMode, MemoryController, MemoryMap};
use mips::{CpuState, ExecMode, Mips};

/// Overall halt reason, mirroring `Chip::getstate()`'s `HALT_*`
/// values: the run loop stops when the cycle budget is exhausted, the
/// CPU itself halts (stop/error), or an external interrupt arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Running,
    Cycle,
    Mips,
    Interrupt,
}

/// Orchestrates one MIPS hart plus its CP0, memory map, and memory
/// controller for a single cycle, mirroring the source's `Chip`.
pub struct Chip {
    pub mips: Mips,
    pub cp0: Option<Cp0>,
    pub map: MemoryMap,
    pub mc: MemoryController,
    pub cycle: u64,
    pub max_cycle: u64,
    pub ready: bool,
}

impl Chip {
    pub fn new(mode: ExecMode, use_cp0: bool, mem_size: u32) -> Self {
        let mut map = MemoryMap::new();
        map.add(0, mem_size, Device::MainMemory(MainMemory::new(mem_size)));

        let mc_mode = match mode {
            ExecMode::Functional => McMode::Through,
            ExecMode::Multicycle => McMode::Buffer,
        };

        Self {
            mips: Mips::new(mode),
            cp0: use_cp0.then(Cp0::new),
            map,
            mc: MemoryController::new(mc_mode),
            cycle: 0,
            max_cycle: u64::MAX,
            ready: false,
        }
    }

    /// Registers an ISA I/O range (PIC + serial) at `base`.
    pub fn map_isa_io(&mut self, base: u32, size: u32) {
        self.map.add(base, size, Device::IsaIo(IsaIo::default()));
    }

    pub fn map_isa_bus(&mut self, base: u32, size: u32) {
        self.map.add(base, size, Device::IsaBus(IsaBus));
    }

    pub fn map_mieru_io(&mut self, base: u32, size: u32, debug_mode: bool) {
        self.map.add(base, size, Device::MieruIo(MieruIo::new(debug_mode)));
    }

    /// One tick: runs the interpreter (functional or multicycle
    /// depending on how this `Chip` was constructed), steps CP0 and
    /// every mapped device, and for multicycle mode steps the memory
    /// controller once more (mirroring `Chip::step_funct`/
    /// `step_multi`'s exact call order).
    pub fn step(&mut self, time_us: u64) {
        self.cycle += 1;
        match self.mips.mode {
            ExecMode::Functional => {
                self.mips.step_funct(&mut self.map, &mut self.mc, self.cp0.as_mut(), time_us);
            }
            ExecMode::Multicycle => {
                self.mips.step_multi(&mut self.map, &mut self.mc, self.cp0.as_mut(), time_us);
            }
        }
        if let Some(cp0) = self.cp0.as_mut() {
            cp0.step();
        }
        for device in self.map.devices_mut() {
            device.step(self.cp0.as_mut().unwrap_or(&mut Cp0::new()), time_us);
        }
    }

    pub fn getstate(&self, interrupted: bool) -> HaltReason {
        if self.cycle >= self.max_cycle {
            HaltReason::Cycle
        } else if !self.mips.running() {
            HaltReason::Mips
        } else if interrupted {
            HaltReason::Interrupt
        } else {
            HaltReason::Running
        }
    }

    pub fn error(&self) -> bool {
        self.mips.state == CpuState::Error
    }
}
