//! Memory map and memory controller (C4): an ordered list of
//! `(base, size, device)` ranges and a 2-slot transaction ring that
//! models either synchronous (through-mode) or one-cycle-delayed
//! (buffer-mode) completion.
//!
//! Grounded on `SimMips/memory.cc`'s `MemoryMap`/`McInst`/
//! `MemoryController` classes.

use crate::cp0::Cp0;
use crate::devices::{IsaBus, IsaIo, MieruIo};
use crate::mainmem::MainMemory;

/// Tagged dispatch over the fixed device set, mirroring the source's
/// `MMDevice` subclasses. Not a trait object: the source dispatches on
/// a `device_type` tag, and Rust's idiomatic equivalent is an enum
/// match rather than `dyn MMDevice`.
pub enum Device {
    MainMemory(MainMemory),
    IsaIo(IsaIo),
    IsaBus(IsaBus),
    MieruIo(MieruIo),
}

impl Device {
    pub fn step(&mut self, cp0: &mut Cp0, board_time_us: u64) {
        let _ = board_time_us;
        match self {
            Device::IsaIo(io) => io.step(cp0),
            Device::MainMemory(_) | Device::IsaBus(_) | Device::MieruIo(_) => {}
        }
    }

    fn read1b(&mut self, addr: u32, cp0: &mut Cp0, time_us: u64) -> u8 {
        match self {
            Device::MainMemory(m) => m.read1b(addr),
            Device::IsaIo(io) => io.read1b(addr, cp0),
            Device::IsaBus(_) => 0,
            Device::MieruIo(m) => m.read1b(addr, time_us),
        }
    }

    fn read2b(&mut self, addr: u32) -> Option<u16> {
        match self {
            Device::MainMemory(m) => Some(m.read2b(addr)),
            _ => None,
        }
    }

    fn read4b(&mut self, addr: u32, time_us: u64) -> u32 {
        match self {
            Device::MainMemory(m) => m.read4b(addr),
            Device::MieruIo(m) => m.read4b(addr, time_us),
            Device::IsaIo(_) | Device::IsaBus(_) => 0,
        }
    }

    fn read8b(&mut self, addr: u32) -> Option<u64> {
        match self {
            Device::MainMemory(m) => Some(m.read8b(addr)),
            _ => None,
        }
    }

    fn write1b(&mut self, addr: u32, v: u8, cp0: &mut Cp0) {
        match self {
            Device::MainMemory(m) => m.write1b(addr, v),
            Device::IsaIo(io) => io.write1b(addr, v, cp0),
            Device::IsaBus(_) => {}
            Device::MieruIo(m) => {
                if addr == crate::devices::MIERU_LCD {
                    m.write1b(v);
                }
            }
        }
    }

    fn write2b(&mut self, addr: u32, v: u16) -> bool {
        match self {
            Device::MainMemory(m) => {
                m.write2b(addr, v);
                true
            }
            _ => false,
        }
    }

    fn write4b(&mut self, addr: u32, v: u32) {
        match self {
            Device::MainMemory(m) => m.write4b(addr, v),
            Device::MieruIo(m) => m.write4b(addr, v),
            Device::IsaIo(_) | Device::IsaBus(_) => {}
        }
    }

    fn write8b(&mut self, addr: u32, v: u64) -> bool {
        match self {
            Device::MainMemory(m) => {
                m.write8b(addr, v);
                true
            }
            _ => false,
        }
    }
}

/// One mapped device range. Stored as a `Vec` in arrival order; the
/// source's linked list is searched linearly front-to-back and so is
/// this, preserving the "first match wins" overlap semantics.
pub struct MapEntry {
    pub base: u32,
    pub size: u32,
    pub device: Device,
}

#[derive(Default)]
pub struct MemoryMap {
    entries: Vec<MapEntry>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, base: u32, size: u32, device: Device) {
        self.entries.push(MapEntry { base, size, device });
    }

    fn find(&mut self, addr: u32) -> Option<&mut MapEntry> {
        self.entries
            .iter_mut()
            .find(|e| addr >= e.base && addr < e.base + e.size)
    }

    pub fn devices_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.entries.iter_mut().map(|e| &mut e.device)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McState {
    None,
    Pend,
    Finish,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McMode {
    Through,
    Buffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

#[derive(Clone, Copy)]
struct McInst {
    state: McState,
    op: Op,
    addr: u32,
    size: u8,
    wdata: u64,
    rdata: u64,
}

impl Default for McInst {
    fn default() -> Self {
        Self {
            state: McState::None,
            op: Op::Read,
            addr: 0,
            size: 0,
            wdata: 0,
            rdata: 0,
        }
    }
}

const NUM_MCINST: usize = 2;

/// Two-slot transaction ring sitting in front of [`MemoryMap`].
/// `enqueue` fills the head slot; `step` retires the tail slot.
/// Through-mode retires in the same call as `enqueue`; buffer-mode
/// retires on the following `step()`.
pub struct MemoryController {
    mode: McMode,
    ring: [McInst; NUM_MCINST],
    head: usize,
    tail: usize,
}

impl MemoryController {
    pub fn new(mode: McMode) -> Self {
        Self {
            mode,
            ring: [McInst::default(); NUM_MCINST],
            head: 0,
            tail: 0,
        }
    }

    fn full(&self) -> bool {
        (self.tail + NUM_MCINST - self.head) % NUM_MCINST == 1
    }

    pub fn enqueue_read(
        &mut self,
        map: &mut MemoryMap,
        cp0: &mut Cp0,
        time_us: u64,
        addr: u32,
        size: u8,
    ) -> bool {
        if self.full() {
            return false;
        }
        self.ring[self.head] = McInst {
            state: McState::Pend,
            op: Op::Read,
            addr,
            size,
            wdata: 0,
            rdata: 0,
        };
        self.head = (self.head + 1) % NUM_MCINST;
        if self.mode == McMode::Through {
            self.step(map, cp0, time_us);
        }
        true
    }

    pub fn enqueue_write(
        &mut self,
        map: &mut MemoryMap,
        cp0: &mut Cp0,
        time_us: u64,
        addr: u32,
        size: u8,
        data: u64,
    ) -> bool {
        if self.full() {
            return false;
        }
        self.ring[self.head] = McInst {
            state: McState::Pend,
            op: Op::Write,
            addr,
            size,
            wdata: data,
            rdata: 0,
        };
        self.head = (self.head + 1) % NUM_MCINST;
        if self.mode == McMode::Through {
            self.step(map, cp0, time_us);
        }
        true
    }

    /// Advances the tail slot one step: dispatches a pending
    /// transaction to the covering device, or leaves finished/failed/
    /// empty slots untouched.
    pub fn step(&mut self, map: &mut MemoryMap, cp0: &mut Cp0, time_us: u64) {
        let inst = &mut self.ring[self.tail];
        if inst.state != McState::Pend {
            return;
        }
        let addr = inst.addr;
        let size = inst.size;
        let Some(entry) = map.find(addr) else {
            tracing::error!(addr, "memory access out of mapped range");
            inst.state = McState::Failure;
            self.tail = (self.tail + 1) % NUM_MCINST;
            return;
        };
        let local = addr - entry.base;
        match inst.op {
            Op::Read => {
                inst.rdata = match size {
                    1 => entry.device.read1b(local, cp0, time_us) as u64,
                    2 => match entry.device.read2b(local) {
                        Some(v) => v as u64,
                        None => {
                            inst.state = McState::Failure;
                            self.tail = (self.tail + 1) % NUM_MCINST;
                            return;
                        }
                    },
                    4 => entry.device.read4b(local, time_us) as u64,
                    8 => match entry.device.read8b(local) {
                        Some(v) => v,
                        None => {
                            inst.state = McState::Failure;
                            self.tail = (self.tail + 1) % NUM_MCINST;
                            return;
                        }
                    },
                    _ => {
                        tracing::error!(size, "unsupported memory access size");
                        inst.state = McState::Failure;
                        self.tail = (self.tail + 1) % NUM_MCINST;
                        return;
                    }
                };
            }
            Op::Write => match size {
                1 => entry.device.write1b(local, inst.wdata as u8, cp0),
                2 => {
                    if !entry.device.write2b(local, inst.wdata as u16) {
                        inst.state = McState::Failure;
                        self.tail = (self.tail + 1) % NUM_MCINST;
                        return;
                    }
                }
                4 => entry.device.write4b(local, inst.wdata as u32),
                8 => {
                    if !entry.device.write8b(local, inst.wdata) {
                        inst.state = McState::Failure;
                        self.tail = (self.tail + 1) % NUM_MCINST;
                        return;
                    }
                }
                _ => {
                    tracing::error!(size, "unsupported memory access size");
                    inst.state = McState::Failure;
                    self.tail = (self.tail + 1) % NUM_MCINST;
                    return;
                }
            },
        }
        inst.state = McState::Finish;
        self.tail = (self.tail + 1) % NUM_MCINST;
    }

    /// Inspect the most recently retired slot (the one just before the
    /// current tail), used by `Mips::memreceive` to pick up completed
    /// load data or detect failure.
    pub fn last_result(&self) -> (McState, u64) {
        let idx = (self.tail + NUM_MCINST - 1) % NUM_MCINST;
        (self.ring[idx].state, self.ring[idx].rdata)
    }

    /// Number of ring slots currently in `Pend`, for the "at most one
    /// in-flight transaction" invariant.
    pub fn pending_count(&self) -> usize {
        self.ring.iter().filter(|inst| inst.state == McState::Pend).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mainmem::MainMemory;

    fn through_map() -> MemoryMap {
        let mut map = MemoryMap::new();
        map.add(0, 0x1000, Device::MainMemory(MainMemory::new(0x1000)));
        map
    }

    #[test]
    fn through_mode_never_leaves_a_pending_slot() {
        let mut map = through_map();
        let mut cp0 = Cp0::new();
        let mut mc = MemoryController::new(McMode::Through);
        assert!(mc.enqueue_read(&mut map, &mut cp0, 0, 0x10, 4));
        assert_eq!(mc.pending_count(), 0);
        let (state, _) = mc.last_result();
        assert_eq!(state, McState::Finish);
    }

    #[test]
    fn buffer_mode_holds_at_most_one_pending_slot_until_stepped() {
        let mut map = through_map();
        let mut cp0 = Cp0::new();
        let mut mc = MemoryController::new(McMode::Buffer);
        assert!(mc.enqueue_read(&mut map, &mut cp0, 0, 0x10, 4));
        assert!(mc.pending_count() <= 1);
        mc.step(&mut map, &mut cp0, 0);
        assert_eq!(mc.pending_count(), 0);
        let (state, _) = mc.last_result();
        assert_eq!(state, McState::Finish);
    }

    #[test]
    fn full_ring_rejects_a_third_enqueue() {
        let mut map = through_map();
        let mut cp0 = Cp0::new();
        let mut mc = MemoryController::new(McMode::Buffer);
        assert!(mc.enqueue_read(&mut map, &mut cp0, 0, 0x10, 4));
        assert!(mc.enqueue_read(&mut map, &mut cp0, 0, 0x14, 4));
        assert!(mc.pending_count() <= 1);
    }
}
