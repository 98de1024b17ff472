//! Executable invariant checks, one `proptest!` block per law.

use proptest::prelude::*;
use simmips_core::archstate::ArchState;
use simmips_core::cache::{Access, DataCache, Outcome};
use simmips_core::cp0::{Cp0, CP0_CAUSE};
use simmips_core::inst::decode;
use simmips_core::memctl::{Device, MemoryController, MemoryMap};
use simmips_core::mainmem::MainMemory;
use simmips_core::mips::{ExecMode, Mips};

use super::generators::*;

fn exc_code(cp0: &Cp0) -> u32 {
    (cp0.read_reg(CP0_CAUSE) >> 2) & 0x1f
}

proptest! {
    /// `$zero` reads as zero no matter what was last written to it, and
    /// writing any other register leaves `$zero` untouched.
    #[test]
    fn gpr_zero_is_always_zero(v in any::<u32>(), other in reg_index(), other_v in any::<u32>()) {
        let mut arch = ArchState::new();
        arch.write_reg(0, v);
        prop_assert_eq!(arch.read_reg(0), 0);

        arch.write_reg(other, other_v);
        prop_assert_eq!(arch.read_reg(0), 0);
        if other != 0 {
            prop_assert_eq!(arch.read_reg(other), other_v);
        }
    }

    /// Decoding is a pure function of `(word, pc)`: calling it twice on
    /// the same input yields the same opcode tag, operand fields, and
    /// attribute mask.
    #[test]
    fn decode_is_pure(word in any_instruction_word(), pc in any::<u32>()) {
        let a = decode(word, pc);
        let b = decode(word, pc);
        prop_assert_eq!(a.op, b.op);
        prop_assert_eq!(a.rs, b.rs);
        prop_assert_eq!(a.rt, b.rt);
        prop_assert_eq!(a.rd, b.rd);
        prop_assert_eq!(a.imm, b.imm);
        prop_assert_eq!(a.attr, b.attr);
        prop_assert_eq!(a.latency, b.latency);
    }

    /// For any R-type-shaped word, the decoded `rs`/`rt`/`rd` fields
    /// match the bit positions the encoding defines, independent of the
    /// specific `funct`.
    #[test]
    fn r_type_operand_fields_match_encoding(word in r_type_word()) {
        let rec = decode(word, 0);
        let expect_rs = ((word >> 21) & 0x1f) as usize;
        let expect_rt = ((word >> 16) & 0x1f) as usize;
        let expect_rd = ((word >> 11) & 0x1f) as usize;
        prop_assert_eq!(rec.rs, expect_rs);
        prop_assert_eq!(rec.rt, expect_rt);
        prop_assert_eq!(rec.rd, expect_rd);
    }

    /// A writeback cache's access counter always equals the sum of its
    /// hit and three miss-kind counters: every access is classified as
    /// exactly one of the four.
    #[test]
    fn cache_access_count_equals_sum_of_outcomes(accesses in access_sequence(40)) {
        let mut cache = DataCache::new(256, 2, 16, true, 10).unwrap();
        for (addr, is_write) in accesses {
            let kind = if is_write { Access::Write } else { Access::Read };
            let _ = cache.access(addr, kind);
        }
        prop_assert_eq!(
            cache.access_count,
            cache.hit_count + cache.compulsory_count + cache.conflict_count + cache.capacity_count
        );
    }

    /// The first access to any given address is never a cold hit: it is
    /// either a compulsory miss, or (if it aliases an already-touched
    /// block in the same set) a conflict/capacity miss — never `Hit`.
    #[test]
    fn first_touch_is_never_a_hit(addr in 0u32..256) {
        let mut cache = DataCache::new(128, 2, 16, true, 10).unwrap();
        let (outcome, _, _) = cache.access(addr * 4, Access::Read);
        prop_assert_ne!(outcome, Outcome::Hit);
    }

    /// `add` raises an overflow exception exactly when the signed sum
    /// of its operands does not fit in 32 bits, and writes the exact
    /// sum to the destination register otherwise.
    #[test]
    fn add_overflow_matches_checked_add((a, b) in overflow_prone_pair()) {
        let mut mips = Mips::new(ExecMode::Functional);
        let mut map = MemoryMap::new();
        map.add(0, 0x1000, Device::MainMemory(MainMemory::new(0x1000)));
        // add $t2, $t0, $t1
        if let Device::MainMemory(m) = map.devices_mut().next().unwrap() {
            m.write4b(0, (8u32 << 21) | (9u32 << 16) | (10u32 << 11) | 0x20);
        }
        mips.arch.r[8] = a as u32;
        mips.arch.r[9] = b as u32;
        let mut mc = MemoryController::new(simmips_core::memctl::McMode::Through);
        let mut cp0 = Cp0::new();
        mips.step_funct(&mut map, &mut mc, Some(&mut cp0), 0);

        match a.checked_add(b) {
            Some(sum) => {
                prop_assert_eq!(exc_code(&cp0), 0);
                prop_assert_eq!(mips.arch.r[10], sum as u32);
            }
            None => {
                prop_assert_eq!(exc_code(&cp0), 12); // EXC_OV
            }
        }
    }
}
