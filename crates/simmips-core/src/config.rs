//! Machine-setting-file parser: the `@map`/`@reg`/`@mem` directive
//! grammar that configures the memory map and initial register/memory
//! contents before a run.
//!
//! Grounded on `board.cc`'s `openmemfile`/`getlinehead`/
//! `setmemorymap`/`setinitialdata`. Uses `regex` for the per-directive
//! grammar rather than hand-rolled tokenizing, matching how the other
//! example repos in the pack parse line-oriented config formats.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::archstate::{self, reg_by_name};
use crate::error::MachineSettingError;

pub const MEM_HEADER: &str = "SimMips_Machine_Setting";
pub const HEAD_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    MainMemory,
    IsaIo,
    IsaBus,
    MieruIo,
}

#[derive(Debug, Clone)]
pub struct MapDirective {
    pub addr: u32,
    pub size: u32,
    pub device: DeviceKind,
}

#[derive(Debug, Clone)]
pub enum InitDirective {
    Reg { reg: usize, value: u32 },
    /// Raw bytes loaded from `path`, starting at `addr`; `path` is taken
    /// as given (relative to the process's current directory, matching
    /// the original `fopen(filename, "rb")` call).
    Mem { addr: u32, path: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct MachineSetting {
    pub maps: Vec<MapDirective>,
    pub inits: Vec<InitDirective>,
}

fn parse_number(tok: &str) -> Option<u32> {
    let tok = tok.trim();
    if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        tok.parse::<u32>().ok().or_else(|| tok.parse::<i32>().ok().map(|v| v as u32))
    }
}

pub fn parse_file(path: &Path) -> Result<MachineSetting, MachineSettingError> {
    let text = fs::read_to_string(path)?;
    parse_str(&text, &path.display().to_string())
}

pub fn parse_str(text: &str, file_name: &str) -> Result<MachineSetting, MachineSettingError> {
    let header_line = text.lines().next().unwrap_or("");
    if !header_line.trim_start_matches('#').trim().starts_with(MEM_HEADER) {
        return Err(MachineSettingError::BadHeader(header_line.to_string()));
    }

    let map_re = Regex::new(r"^@map\s+(\S+)\s+(\S+)\s+(\w+)\s*$").unwrap();
    let reg_re = Regex::new(r"^@reg\s+\$?([^\s=]+)=(\S+)\s*$").unwrap();
    let mem_re = Regex::new(r"^@mem\s+(\S+)\s+(\S+)\s*$").unwrap();

    let mut setting = MachineSetting::default();

    for (lineno, raw_line) in text.lines().enumerate().skip(1) {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = map_re.captures(line) {
            let addr = parse_number(&caps[1]).ok_or_else(|| invalid_syntax(file_name, lineno))?;
            let size = parse_number(&caps[2]).ok_or_else(|| invalid_syntax(file_name, lineno))?;
            let device = match caps[3].to_ascii_uppercase().as_str() {
                "MAIN_MEMORY" => DeviceKind::MainMemory,
                "ISA_IO" => DeviceKind::IsaIo,
                "ISA_BUS" => DeviceKind::IsaBus,
                "MIERU_IO" => DeviceKind::MieruIo,
                _ => return Err(unknown_command(file_name, lineno)),
            };
            setting.maps.push(MapDirective { addr, size, device });
        } else if let Some(caps) = reg_re.captures(line) {
            let token = &caps[1];
            let reg = token
                .parse::<usize>()
                .ok()
                .filter(|&i| i < archstate::REG_NAMES.len())
                .or_else(|| reg_by_name(token))
                .ok_or_else(|| invalid_register(file_name, lineno))?;
            let value = parse_number(&caps[2]).ok_or_else(|| invalid_syntax(file_name, lineno))?;
            setting.inits.push(InitDirective::Reg { reg, value });
        } else if let Some(caps) = mem_re.captures(line) {
            let addr = parse_number(&caps[1]).ok_or_else(|| invalid_syntax(file_name, lineno))?;
            setting.inits.push(InitDirective::Mem { addr, path: PathBuf::from(&caps[2]) });
        } else {
            return Err(unknown_command(file_name, lineno));
        }
    }

    Ok(setting)
}

fn invalid_syntax(file: &str, line: usize) -> MachineSettingError {
    MachineSettingError::InvalidSyntax { file: file.to_string(), line: line + 1 }
}

fn invalid_register(file: &str, line: usize) -> MachineSettingError {
    MachineSettingError::InvalidRegister { file: file.to_string(), line: line + 1 }
}

fn unknown_command(file: &str, line: usize) -> MachineSettingError {
    MachineSettingError::UnknownCommand { file: file.to_string(), line: line + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "SimMips_Machine_Setting\n\
@map 0x00000000 0x08000000 MAIN_MEMORY\n\
@map 0x1f800000 0x00000020 ISA_IO\n\
@reg $sp=0x07fffffc\n\
@mem 0x1000 boot.bin\n";

    #[test]
    fn parses_a_full_sample_file() {
        let setting = parse_str(SAMPLE, "sample").unwrap();
        assert_eq!(setting.maps.len(), 2);
        assert_eq!(setting.maps[0].device, DeviceKind::MainMemory);
        assert_eq!(setting.maps[1].device, DeviceKind::IsaIo);
        assert_eq!(setting.inits.len(), 2);
        match &setting.inits[1] {
            InitDirective::Mem { addr, path } => {
                assert_eq!(*addr, 0x1000);
                assert_eq!(path.to_str().unwrap(), "boot.bin");
            }
            other => panic!("expected a Mem directive, got {other:?}"),
        }
    }

    #[test]
    fn reg_directive_accepts_a_numeric_index() {
        let text = "SimMips_Machine_Setting\n@reg $3=0x2a\n";
        let setting = parse_str(text, "sample").unwrap();
        match setting.inits[0] {
            InitDirective::Reg { reg, value } => {
                assert_eq!(reg, 3);
                assert_eq!(value, 0x2a);
            }
            _ => panic!("expected a Reg directive"),
        }
    }

    #[test]
    fn rejects_missing_header() {
        let err = parse_str("@map 0 0 MAIN_MEMORY\n", "bad").unwrap_err();
        assert!(matches!(err, MachineSettingError::BadHeader(_)));
    }

    #[test]
    fn rejects_unknown_register_name() {
        let text = "SimMips_Machine_Setting\n@reg $bogus=1\n";
        let err = parse_str(text, "bad").unwrap_err();
        assert!(matches!(err, MachineSettingError::InvalidRegister { .. }));
    }
}
