//! ELF loader (C9): validates a MIPS32 big-endian `ET_EXEC` image and
//! yields its loadable segments plus entry point and `_gp` symbol.
//!
//! Grounded on the `SimLoader` class declaration in `define.h` and
//! `board.cc::siminit`'s load sequence (validate `EM_MIPS`/`ET_EXEC`,
//! set `pc = entry`, resolve `_gp`). Uses the `object` crate for
//! parsing rather than hand-rolled ELF header structs.

use object::{Object, ObjectSection, ObjectSymbol};

use crate::error::LoaderError;

pub struct Segment {
    pub vaddr: u32,
    pub data: Vec<u8>,
}

pub struct LoadedImage {
    pub entry: u32,
    pub segments: Vec<Segment>,
    pub gp: Option<u32>,
}

/// Parse `bytes` as a MIPS32 big-endian executable ELF, returning its
/// loadable section contents and entry point.
pub fn load(bytes: &[u8]) -> Result<LoadedImage, LoaderError> {
    let file = object::File::parse(bytes)?;

    if file.architecture() != object::Architecture::Mips && file.architecture() != object::Architecture::Mips64 {
        return Err(LoaderError::WrongMachine);
    }
    if file.kind() != object::ObjectKind::Executable {
        return Err(LoaderError::NotExecutable);
    }

    let entry = file.entry() as u32;
    let mut segments = Vec::new();
    for section in file.sections() {
        if section.address() == 0 {
            continue;
        }
        let Ok(data) = section.data() else { continue };
        if data.is_empty() {
            continue;
        }
        segments.push(Segment {
            vaddr: section.address() as u32,
            data: data.to_vec(),
        });
    }

    let gp = file
        .symbols()
        .find(|s| s.name() == Ok("_gp"))
        .map(|s| s.address() as u32);

    Ok(LoadedImage { entry, segments, gp })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_input() {
        let result = load(&[]);
        assert!(matches!(result, Err(LoaderError::Parse(_))));
    }
}
