//! CP0 coprocessor + TLB (C3): 256 indexed registers, 16 TLB entries,
//! exception vectoring, and the Count/Compare timer interrupt.
//!
//! Grounded on the `MipsCp0`/`MipsTlbEntry` class declarations and the
//! CP0/Status/Cause/TLB bitfield constants in `SimMips/define.h`; the
//! original `cp0.cc` translation unit was not retained, so the
//! exception-vectoring and TLB-walk logic below is reconstructed from
//! those declarations and the architectural register layout directly.

pub const NCREG: usize = 256;
pub const TLB_ENTRY: usize = 16;

pub const CP0_INDEX: usize = 0;
pub const CP0_RANDOM: usize = 1;
pub const CP0_ENTRYLO0: usize = 2;
pub const CP0_ENTRYLO1: usize = 3;
pub const CP0_CONTEXT: usize = 4;
pub const CP0_PAGEMASK: usize = 5;
pub const CP0_WIRED: usize = 6;
pub const CP0_BADVADDR: usize = 8;
pub const CP0_COUNT: usize = 9;
pub const CP0_ENTRYHI: usize = 10;
pub const CP0_COMPARE: usize = 11;
pub const CP0_SR: usize = 12;
pub const CP0_CAUSE: usize = 13;
pub const CP0_EPC: usize = 14;
pub const CP0_PRID: usize = 15;
pub const CP0_CONFIG: usize = 16;
pub const CP0_CONFIG1: usize = 48;

const SR_EXL_SH: u32 = 1;
const SR_BEV_SH: u32 = 22;
const SR_EXL_MASK: u32 = 0x1;

const CAUSE_EXC_SH: u32 = 2;
const CAUSE_IP_SH: u32 = 8;
const CAUSE_CE_SH: u32 = 28;
const CAUSE_BD_SH: u32 = 31;
const CAUSE_EXC_MASK: u32 = 0x1f;
const CAUSE_CE_MASK: u32 = 0x3;

const TLB_VPAGE_SH: u32 = 13;

pub const KSEG0_MIN: u32 = 0x8000_0000;
pub const KSEG2_MIN: u32 = 0xc000_0000;
pub const UNMAP_MASK: u32 = 0x1fff_ffff;

/// Exception codes — architecturally defined values 0..=13 plus two
/// non-architectural flag bits the source ORs in to select the vector
/// (`EXC_TLBREFL`) or set `Cause.CE` (`EXC_CPU1`).
pub const EXC_INT: i32 = 0;
pub const EXC_MOD: i32 = 1;
pub const EXC_TLBL: i32 = 2;
pub const EXC_TLBS: i32 = 3;
pub const EXC_ADEL: i32 = 4;
pub const EXC_ADES: i32 = 5;
pub const EXC_IBE: i32 = 6;
pub const EXC_DBE: i32 = 7;
pub const EXC_SYSCALL: i32 = 8;
pub const EXC_BP: i32 = 9;
pub const EXC_RI: i32 = 10;
pub const EXC_CPU: i32 = 11;
pub const EXC_OV: i32 = 12;
pub const EXC_TRAP: i32 = 13;
pub const EXC_TLBREFL: i32 = 0x100;
pub const EXC_CPU1: i32 = 0x200;

/// Reset values applied when CP0 is present (§6 "Initial CP0 reset
/// values"), matching `board.cc`'s `SR_DEF`/`PAGEMASK_DEF`/etc.
pub const SR_DEF: u32 = 0x1000_0000;
pub const PAGEMASK_DEF: u32 = 0x0000_1fff;
pub const PRID_DEF: u32 = 0x0001_8001;
pub const CONFIG_DEF: u32 = 0x8000_0082;
pub const CONFIG1_DEF: u32 = 0x1ed9_6c80;

/// A single TLB entry: VPN2/ASID/page-mask key plus two (even/odd)
/// physical sub-pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlbEntry {
    pub vpn2: u32,
    pub asid: u32,
    pub pagemask: u32,
    pub pageshift: u32,
    pub global: bool,
    pub pfn: [u32; 2],
    pub valid: [bool; 2],
    pub dirty: [bool; 2],
    pub cache: [u32; 2],
}

/// Result of a successful TLB/KSEG0 translation.
pub type PhysAddr = u64;

/// The CP0 coprocessor: register file, TLB, and the free-running
/// Count/Random timer.
#[derive(Debug, Clone)]
pub struct Cp0 {
    r: [u32; NCREG],
    tlb: [TlbEntry; TLB_ENTRY],
    /// Alternates Count/Random updates every other `step()`, matching
    /// the source's "every other tick" cadence.
    tick_parity: bool,
}

impl Cp0 {
    /// Construct with the reset values from §6, applied by the caller
    /// (`board.cc` writes these only once CP0 is confirmed present).
    pub fn new() -> Self {
        let mut cp0 = Self {
            r: [0; NCREG],
            tlb: [TlbEntry::default(); TLB_ENTRY],
            tick_parity: false,
        };
        cp0.write_reg(CP0_SR, SR_DEF);
        cp0.write_reg(CP0_PAGEMASK, PAGEMASK_DEF);
        cp0.write_reg(CP0_PRID, PRID_DEF);
        cp0.write_reg(CP0_CONFIG, CONFIG_DEF);
        cp0.write_reg(CP0_CONFIG1, CONFIG1_DEF);
        cp0
    }

    pub fn read_reg(&self, idx: usize) -> u32 {
        self.r[idx % NCREG]
    }

    pub fn write_reg(&mut self, idx: usize, v: u32) {
        self.r[idx % NCREG] = v;
    }

    pub fn modify_reg(&mut self, idx: usize, clear_mask: u32, set_mask: u32) {
        let idx = idx % NCREG;
        self.r[idx] = (self.r[idx] & !clear_mask) | set_mask;
    }

    /// Translate a virtual address. `KSEG0`..`KSEG2` is unmapped (low 29
    /// bits are the physical address); everything else consults the TLB.
    pub fn translate(&self, vaddr: u32, is_write: bool) -> Result<PhysAddr, i32> {
        if (KSEG0_MIN..KSEG2_MIN).contains(&vaddr) {
            return Ok((vaddr & UNMAP_MASK) as PhysAddr);
        }

        let asid = self.read_reg(CP0_ENTRYHI) & 0xff;
        for entry in &self.tlb {
            let page_shift = if entry.pageshift == 0 { 12 } else { entry.pageshift };
            let vpn2 = vaddr >> (page_shift + 1);
            if vpn2 != entry.vpn2 {
                continue;
            }
            if !entry.global && entry.asid != asid {
                continue;
            }
            let odd = ((vaddr >> page_shift) & 1) as usize;
            if !entry.valid[odd] {
                let code = if is_write { EXC_TLBS } else { EXC_TLBL };
                return Err(code | EXC_TLBREFL);
            }
            if is_write && !entry.dirty[odd] {
                return Err(EXC_MOD);
            }
            let page_mask = (1u32 << page_shift) - 1;
            let paddr = (entry.pfn[odd] << page_shift) | (vaddr & page_mask);
            return Ok(paddr as PhysAddr);
        }
        let code = if is_write { EXC_TLBS } else { EXC_TLBL };
        Err(code | EXC_TLBREFL)
    }

    pub fn tlb_read(&self, index: usize) -> TlbEntry {
        self.tlb[index % TLB_ENTRY]
    }

    /// `TLBWI`/`TLBWR`: write the current EntryHi/EntryLo0/EntryLo1/
    /// PageMask fields into the TLB at `Index` (random=false) or
    /// `Random` (random=true).
    pub fn tlb_write(&mut self, random: bool) {
        let idx = if random {
            (self.read_reg(CP0_RANDOM) as usize) % TLB_ENTRY
        } else {
            (self.read_reg(CP0_INDEX) as usize) % TLB_ENTRY
        };
        let entryhi = self.read_reg(CP0_ENTRYHI);
        let entrylo0 = self.read_reg(CP0_ENTRYLO0);
        let entrylo1 = self.read_reg(CP0_ENTRYLO1);
        let pagemask = self.read_reg(CP0_PAGEMASK);

        let page_shift = 12 + (32 - (pagemask | 0x1fff).leading_zeros()).saturating_sub(13).min(19);
        let page_shift = page_shift.max(12);

        self.tlb[idx] = TlbEntry {
            vpn2: entryhi >> (page_shift + 1),
            asid: entryhi & 0xff,
            pagemask,
            pageshift: page_shift,
            global: (entrylo0 & 1) != 0 && (entrylo1 & 1) != 0,
            pfn: [(entrylo0 >> 6), (entrylo1 >> 6)],
            valid: [(entrylo0 & 2) != 0, (entrylo1 & 2) != 0],
            dirty: [(entrylo0 & 4) != 0, (entrylo1 & 4) != 0],
            cache: [(entrylo0 >> 3) & 0x7, (entrylo1 >> 3) & 0x7],
        };
    }

    /// `TLBP`: search for an entry matching EntryHi; on hit write its
    /// index to `Index`, on miss set `Index`'s sign bit.
    pub fn tlb_lookup(&mut self) {
        let entryhi = self.read_reg(CP0_ENTRYHI);
        let asid = entryhi & 0xff;
        for (i, entry) in self.tlb.iter().enumerate() {
            let page_shift = if entry.pageshift == 0 { 12 } else { entry.pageshift };
            let vpn2 = entryhi >> (page_shift + 1);
            if vpn2 == entry.vpn2 && (entry.global || entry.asid == asid) {
                self.write_reg(CP0_INDEX, i as u32);
                return;
            }
        }
        self.write_reg(CP0_INDEX, 0x8000_0000);
    }

    /// Deliver an architectural exception, returning the new PC. Caller
    /// assigns the returned value to `pc` and clears `delay_npc`.
    pub fn do_exception(&mut self, code: i32, pc: u32, badvaddr: u32, in_delay: bool) -> u32 {
        let sr = self.read_reg(CP0_SR);
        if sr & SR_EXL_MASK == 0 {
            let epc = if in_delay { pc.wrapping_sub(4) } else { pc };
            self.write_reg(CP0_EPC, epc);
            let mut cause = self.read_reg(CP0_CAUSE);
            cause = (cause & !(1 << CAUSE_BD_SH)) | ((in_delay as u32) << CAUSE_BD_SH);
            self.write_reg(CP0_CAUSE, cause);
        }
        self.write_reg(CP0_BADVADDR, badvaddr);

        let exc_code = (code & (CAUSE_EXC_MASK as i32)) as u32;
        let mut cause = self.read_reg(CP0_CAUSE);
        cause = (cause & !(CAUSE_EXC_MASK << CAUSE_EXC_SH)) | (exc_code << CAUSE_EXC_SH);
        if code & EXC_CPU1 != 0 {
            cause = (cause & !(CAUSE_CE_MASK << CAUSE_CE_SH)) | (1 << CAUSE_CE_SH);
        }
        self.write_reg(CP0_CAUSE, cause);

        self.modify_reg(CP0_SR, 0, SR_EXL_MASK);

        let bev = (self.read_reg(CP0_SR) >> SR_BEV_SH) & 1;
        let base: u32 = if bev != 0 { 0xbfc0_0200 } else { 0x8000_0000 };
        let offset: u32 = if code & EXC_TLBREFL != 0 { 0x000 } else { 0x180 };
        base.wrapping_add(offset)
    }

    pub fn set_interrupt(&mut self, line: u32) {
        let mut cause = self.read_reg(CP0_CAUSE);
        cause |= 1 << (CAUSE_IP_SH + line);
        self.write_reg(CP0_CAUSE, cause);
    }

    pub fn clear_interrupt(&mut self, line: u32) {
        let mut cause = self.read_reg(CP0_CAUSE);
        cause &= !(1 << (CAUSE_IP_SH + line));
        self.write_reg(CP0_CAUSE, cause);
    }

    /// `true` if an unmasked pending interrupt line exists and global
    /// interrupts are enabled (`Status.IE`, not `EXL`).
    pub fn check_interrupt(&self) -> bool {
        let sr = self.read_reg(CP0_SR);
        let cause = self.read_reg(CP0_CAUSE);
        let ie = sr & 1 != 0;
        let exl = sr & SR_EXL_MASK != 0;
        let im = (sr >> CAUSE_IP_SH) & 0xff;
        let ip = (cause >> CAUSE_IP_SH) & 0xff;
        ie && !exl && (im & ip) != 0
    }

    /// Advance Count (increments) and Random (decrements, wraps through
    /// `[Wired, TLB_ENTRY)`) — each on alternate ticks, and raise
    /// interrupt line 7 when Count == Compare.
    pub fn step(&mut self) {
        self.tick_parity = !self.tick_parity;
        if self.tick_parity {
            let count = self.read_reg(CP0_COUNT).wrapping_add(1);
            self.write_reg(CP0_COUNT, count);
            if count == self.read_reg(CP0_COMPARE) {
                self.set_interrupt(7);
            }
        } else {
            let wired = self.read_reg(CP0_WIRED) as i64;
            let mut random = self.read_reg(CP0_RANDOM) as i64 - 1;
            if random < wired {
                random = TLB_ENTRY as i64 - 1;
            }
            self.write_reg(CP0_RANDOM, random as u32);
        }
    }

    pub fn print(&self) -> String {
        format!(
            "SR={:08x} Cause={:08x} EPC={:08x} BadVAddr={:08x} Count={:08x} Compare={:08x}\n",
            self.read_reg(CP0_SR),
            self.read_reg(CP0_CAUSE),
            self.read_reg(CP0_EPC),
            self.read_reg(CP0_BADVADDR),
            self.read_reg(CP0_COUNT),
            self.read_reg(CP0_COMPARE),
        )
    }
}

impl Default for Cp0 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kseg0_is_unmapped() {
        let cp0 = Cp0::new();
        let paddr = cp0.translate(0x8000_1000, false).unwrap();
        assert_eq!(paddr, 0x1000);
    }

    #[test]
    fn empty_tlb_misses_mapped_region() {
        let cp0 = Cp0::new();
        let err = cp0.translate(0x0000_1000, false).unwrap_err();
        assert_eq!(err, EXC_TLBL | EXC_TLBREFL);
    }

    #[test]
    fn exception_sets_epc_and_vectors_by_bev() {
        let mut cp0 = Cp0::new();
        // SR_DEF (0x10000000) only sets bit 28 (CU0); bit 22 (BEV) is
        // clear, so a reset-state exception vectors through the
        // normal (non-bootstrap) base.
        let new_pc = cp0.do_exception(EXC_OV, 0x1000, 0, false);
        assert_eq!(cp0.read_reg(CP0_EPC), 0x1000);
        assert_eq!(new_pc, 0x8000_0000 + 0x180);
        assert_eq!((cp0.read_reg(CP0_CAUSE) >> CAUSE_EXC_SH) & CAUSE_EXC_MASK, EXC_OV as u32);
    }

    #[test]
    fn exception_vectors_through_bootstrap_base_when_bev_set() {
        let mut cp0 = Cp0::new();
        cp0.modify_reg(CP0_SR, 0, 1 << SR_BEV_SH);
        let new_pc = cp0.do_exception(EXC_OV, 0x1000, 0, false);
        assert_eq!(new_pc, 0xbfc0_0200 + 0x180);
    }

    #[test]
    fn exception_in_delay_slot_backs_up_epc() {
        let mut cp0 = Cp0::new();
        cp0.do_exception(EXC_RI, 0x2004, 0, true);
        assert_eq!(cp0.read_reg(CP0_EPC), 0x2000);
        assert_eq!((cp0.read_reg(CP0_CAUSE) >> CAUSE_BD_SH) & 1, 1);
    }

    #[test]
    fn tlb_refill_vector_uses_zero_offset() {
        let mut cp0 = Cp0::new();
        // BEV is clear at reset, so this vectors through the normal
        // base with the refill offset folded to zero.
        let new_pc = cp0.do_exception(EXC_TLBL | EXC_TLBREFL, 0x1000, 0x2000, false);
        assert_eq!(new_pc, 0x8000_0000);
    }

    #[test]
    fn count_compare_raises_interrupt_line_7() {
        let mut cp0 = Cp0::new();
        cp0.write_reg(CP0_COMPARE, 1);
        cp0.step(); // parity flip -> count tick (count becomes 1)
        assert_eq!(cp0.read_reg(CP0_COUNT), 1);
        assert_ne!(cp0.read_reg(CP0_CAUSE) & (1 << (CAUSE_IP_SH + 7)), 0);
    }
}
