//! Fallible-initialization error types for the simulator's subsystems.
//!
//! Architectural failures (unknown opcode, branch to zero, fetch
//! failure) are not represented here: per the design, those are run
//! state (`CpuState::Error`), not `Result` errors, because the source
//! simulator treats them as data the run loop observes rather than
//! exceptions that unwind a call stack.

use thiserror::Error;

/// Errors raised while constructing a [`crate::cache::DataCache`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    #[error("cache size {size} is not a power of two")]
    SizeNotPowerOfTwo { size: u32 },
    #[error("cache way count {ways} is not a power of two")]
    WaysNotPowerOfTwo { ways: u32 },
    #[error("cache line size {line} is not a power of two")]
    LineNotPowerOfTwo { line: u32 },
    #[error("cache size {size} is not divisible by line*ways ({line}*{ways})")]
    SizeNotDivisible { size: u32, line: u32, ways: u32 },
}

/// Errors raised while loading a MIPS ELF executable.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("can't open file: {0}")]
    Io(#[from] std::io::Error),
    #[error("can't parse object file: {0}")]
    Parse(#[from] object::Error),
    #[error("inproper binary: not a MIPS executable")]
    WrongMachine,
    #[error("inproper binary: not an executable (ET_EXEC) object")]
    NotExecutable,
}

/// Errors raised while parsing a machine-setting file.
#[derive(Debug, Error)]
pub enum MachineSettingError {
    #[error("can't open file: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a machine setting file: {0}")]
    BadHeader(String),
    #[error("{file}:{line}: invalid syntax")]
    InvalidSyntax { file: String, line: usize },
    #[error("{file}:{line}: invalid register")]
    InvalidRegister { file: String, line: usize },
    #[error("{file}:{line}: unknown command")]
    UnknownCommand { file: String, line: usize },
}
