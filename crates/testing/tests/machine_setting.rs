//! Exercises `config::parse_file` (the `fs::read_to_string` + `parse_str`
//! path) against a real temp file, since the in-crate unit tests only
//! cover `parse_str` directly.

use std::io::Write;

use simmips_core::config::{parse_file, DeviceKind};
use simmips_core::error::MachineSettingError;

fn write_setting(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn parses_a_setting_file_from_disk() {
    let file = write_setting(
        "SimMips_Machine_Setting\n\
         @map 0x00000000 0x00001000 MAIN_MEMORY\n\
         @reg $gp=0x00001800\n\
         @mem 0x100 boot.bin\n",
    );

    let setting = parse_file(file.path()).unwrap();
    assert_eq!(setting.maps.len(), 1);
    assert_eq!(setting.maps[0].device, DeviceKind::MainMemory);
    assert_eq!(setting.inits.len(), 2);
}

#[test]
fn missing_file_surfaces_as_an_error_not_a_panic() {
    let path = std::path::Path::new("/nonexistent/path/to/a/machine-setting-file");
    let err = parse_file(path).unwrap_err();
    assert!(matches!(err, MachineSettingError::Io(_)) || matches!(err, MachineSettingError::BadHeader(_)));
}
