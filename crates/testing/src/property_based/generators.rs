//! Arbitrary-value strategies shared by the invariant checks.

use proptest::prelude::*;

/// Any 32-bit instruction word, including words that decode to
/// `Op::Undefined` — the decoder must be total.
pub fn any_instruction_word() -> impl Strategy<Value = u32> {
    any::<u32>()
}

/// An R-type-shaped word (`opcode == 0`) with a `funct` restricted to
/// the arithmetic/logical subset the decoder recognizes, so generated
/// words exercise real opcodes instead of mostly landing on
/// `Op::Undefined`.
pub fn r_type_word() -> impl Strategy<Value = u32> {
    let funct = prop_oneof![
        Just(0x20u32), // add
        Just(0x21),    // addu
        Just(0x22),    // sub
        Just(0x23),    // subu
        Just(0x24),    // and
        Just(0x25),    // or
        Just(0x26),    // xor
        Just(0x27),    // nor
        Just(0x2a),    // slt
        Just(0x2b),    // sltu
    ];
    (1usize..32, 1usize..32, 1usize..32, funct).prop_map(|(rs, rt, rd, funct)| {
        ((rs as u32) << 21) | ((rt as u32) << 16) | ((rd as u32) << 11) | funct
    })
}

/// A pair of signed 32-bit operands, biased towards values near the
/// `i32` boundary where overflow detection actually triggers.
pub fn overflow_prone_pair() -> impl Strategy<Value = (i32, i32)> {
    let near_boundary = prop_oneof![
        Just(i32::MAX),
        Just(i32::MAX - 1),
        Just(i32::MIN),
        Just(i32::MIN + 1),
        any::<i32>(),
    ];
    (near_boundary.clone(), near_boundary)
}

/// A register index in `0..32`, including `$zero`.
pub fn reg_index() -> impl Strategy<Value = usize> {
    0usize..32
}

/// A nonzero register value to write, so writes to `$zero` are
/// distinguishable from "never wrote anything".
pub fn nonzero_reg_value() -> impl Strategy<Value = u32> {
    (1u32..=u32::MAX)
}

/// A short sequence of cache accesses: each is a 4-byte-aligned address
/// within a small window (to force both hits and the three miss kinds)
/// paired with a read/write flag.
pub fn access_sequence(max_len: usize) -> impl Strategy<Value = Vec<(u32, bool)>> {
    prop::collection::vec((0u32..64, any::<bool>()), 0..max_len)
        .prop_map(|v| v.into_iter().map(|(a, is_write)| (a * 4, is_write)).collect())
}
