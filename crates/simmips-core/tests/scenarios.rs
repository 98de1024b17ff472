//! Integration tests for the concrete scenarios named in the
//! architecture notes: simple arithmetic ending in a syscall halt, a
//! signed-add overflow exception, delay-slot `jal`/`jr` semantics, and
//! a TLB miss against an empty TLB. The load-use hazard bubble count
//! and the cache miss-classification sequence each have their own
//! dedicated tests next to the code they exercise (`pipeline.rs`,
//! `cache.rs`).

use simmips_core::archstate::REG_RA;
use simmips_core::cp0::CP0_EPC;
use simmips_core::memctl::Device;
use simmips_core::mips::{CpuState, ExecMode};
use simmips_core::Chip;

fn r_type(funct: u32, rs: u32, rt: u32, rd: u32) -> u32 {
    (rs << 21) | (rt << 16) | (rd << 11) | funct
}

fn i_type(opcode: u32, rs: u32, rt: u32, imm: u16) -> u32 {
    (opcode << 26) | (rs << 21) | (rt << 16) | imm as u32
}

fn write_word(chip: &mut Chip, addr: u32, word: u32) {
    if let Device::MainMemory(m) = chip.map.devices_mut().next().unwrap() {
        m.write4b(addr, word);
    }
}

fn read_word(chip: &mut Chip, addr: u32) -> u32 {
    if let Device::MainMemory(m) = chip.map.devices_mut().next().unwrap() {
        m.read4b(addr)
    } else {
        0
    }
}

/// `addiu $t0,$zero,5; addiu $t1,$zero,7; add $t2,$t0,$t1; syscall`
/// (with `$v0` preset to the exit syscall number) halts after exactly
/// four instructions with `$t2 == 12`.
#[test]
fn arithmetic_sequence_halts_via_syscall() {
    let mut chip = Chip::new(ExecMode::Functional, false, 0x10000);
    write_word(&mut chip, 0x0, i_type(0x09, 0, 8, 5)); // addiu $t0,$zero,5
    write_word(&mut chip, 0x4, i_type(0x09, 0, 9, 7)); // addiu $t1,$zero,7
    write_word(&mut chip, 0x8, r_type(0x20, 8, 9, 10)); // add $t2,$t0,$t1
    write_word(&mut chip, 0xc, r_type(0x0c, 0, 0, 0)); // syscall
    chip.mips.arch.r[2] = 4001; // $v0 = SYS_EXIT

    let mut cycles = 0u64;
    while chip.mips.running() && cycles < 100 {
        chip.step(cycles);
        cycles += 1;
    }

    assert_eq!(chip.mips.state, CpuState::Stop);
    assert_eq!(chip.mips.arch.r[10], 12);
    assert_eq!(chip.mips.inst_count, 4);
    assert!(cycles >= 4);
}

/// `lui $t0,0x7FFF; ori $t0,$t0,0xFFFF; addi $t0,$t0,1` with CP0
/// enabled raises an overflow exception on the `addi`: `EPC` points at
/// it and `Cause.ExcCode == 12` (`EXC_OV`).
#[test]
fn signed_add_overflow_raises_exception() {
    let mut chip = Chip::new(ExecMode::Functional, true, 0x10000);
    write_word(&mut chip, 0x0, i_type(0x0f, 0, 8, 0x7fff)); // lui $t0,0x7fff
    write_word(&mut chip, 0x4, i_type(0x0d, 8, 8, 0xffff)); // ori $t0,$t0,0xffff
    write_word(&mut chip, 0x8, i_type(0x08, 8, 8, 1)); // addi $t0,$t0,1

    chip.step(0);
    chip.step(1);
    chip.step(2);

    let cp0 = chip.cp0.as_ref().unwrap();
    assert_eq!(cp0.read_reg(CP0_EPC), 0x8);
    let exc_code = (cp0.read_reg(simmips_core::cp0::CP0_CAUSE) >> 2) & 0x1f;
    assert_eq!(exc_code, 12); // EXC_OV
}

/// `jal target; addiu $v0,$zero,1; ...; target: jr $ra; nop`. The
/// delay slot after `jal` executes before control transfers, and `$ra`
/// holds the address right after that delay slot.
#[test]
fn delay_slot_executes_before_branch_lands() {
    let mut chip = Chip::new(ExecMode::Functional, false, 0x10000);
    write_word(&mut chip, 0x0, (0x03u32 << 26) | (0x10 >> 2)); // jal 0x10
    write_word(&mut chip, 0x4, i_type(0x09, 0, 2, 1)); // addiu $v0,$zero,1 (delay slot)
    write_word(&mut chip, 0x10, r_type(0x08, 31, 0, 0)); // jr $ra
    write_word(&mut chip, 0x14, 0); // nop (delay slot)

    for cycle in 0..4u64 {
        chip.step(cycle);
    }

    assert_eq!(chip.mips.arch.r[REG_RA], 0x8);
    assert_eq!(chip.mips.arch.r[2], 1);
}

/// With CP0 enabled and an empty TLB, a load to a mapped (non-KSEG0)
/// address misses the TLB entirely: `EXC_TLBL` with the refill flag,
/// landing at the TLB-refill vector for the default (BEV=0) setting.
#[test]
fn tlb_miss_on_empty_tlb_vectors_to_refill_handler() {
    let mut chip = Chip::new(ExecMode::Functional, true, 0x10000);
    chip.mips.arch.pc = 0x8000_0000; // KSEG0: unmapped, vaddr & UNMAP_MASK == 0.
    write_word(&mut chip, 0x0, i_type(0x23, 0, 8, 0x1000)); // lw $t0, 0x1000($zero)

    chip.step(0);

    let cp0 = chip.cp0.as_ref().unwrap();
    assert_eq!(cp0.read_reg(CP0_EPC), 0x8000_0000);
    let exc_code = (cp0.read_reg(simmips_core::cp0::CP0_CAUSE) >> 2) & 0x1f;
    assert_eq!(exc_code, 2); // EXC_TLBL
    assert_eq!(chip.mips.arch.pc, 0x8000_0000); // BEV=0 refill vector
}

/// `swl $t1, 2($zero)` only overwrites the aligned word's bytes at and
/// below the addressed byte, merged against what was already there,
/// not the full word.
#[test]
fn swl_merges_into_aligned_word_instead_of_overwriting() {
    let mut chip = Chip::new(ExecMode::Functional, false, 0x10000);
    write_word(&mut chip, 0x100, 0xaabb_ccdd);
    write_word(&mut chip, 0x0, i_type(0x0f, 0, 9, 0x1122)); // lui $t1,0x1122
    write_word(&mut chip, 0x4, i_type(0x0d, 9, 9, 0x3344)); // ori $t1,$t1,0x3344
    write_word(&mut chip, 0x8, i_type(0x2a, 0, 9, 0x102)); // swl $t1,0x102($zero)

    for cycle in 0..3u64 {
        chip.step(cycle);
    }

    assert_eq!(read_word(&mut chip, 0x100), 0xaabb_1122);
}

/// `swr $t1, 2($zero)` merges the opposite half of the aligned word
/// from `swl`, leaving the high-addressed bytes untouched.
#[test]
fn swr_merges_into_aligned_word_instead_of_overwriting() {
    let mut chip = Chip::new(ExecMode::Functional, false, 0x10000);
    write_word(&mut chip, 0x100, 0xaabb_ccdd);
    write_word(&mut chip, 0x0, i_type(0x0f, 0, 9, 0x1122)); // lui $t1,0x1122
    write_word(&mut chip, 0x4, i_type(0x0d, 9, 9, 0x3344)); // ori $t1,$t1,0x3344
    write_word(&mut chip, 0x8, i_type(0x2e, 0, 9, 0x102)); // swr $t1,0x102($zero)

    for cycle in 0..3u64 {
        chip.step(cycle);
    }

    assert_eq!(read_word(&mut chip, 0x100), 0x2233_44dd);
}
