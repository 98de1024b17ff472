//! `simmips`: functional and multicycle MIPS32 instruction-set
//! simulator CLI.
//!
//! Grounded on `board.cc`'s `usage()`/`checkarg()`/`atoi_postfix()`/
//! `siminit()`/`exec()`/`printresult()`. CLI parsing is done by hand
//! against `std::env::args()`, matching the source's own hand-rolled
//! `checkarg` loop rather than reaching for a declarative parser.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use simmips_core::cp0::{CONFIG1_DEF, CONFIG_DEF, PAGEMASK_DEF, PRID_DEF, SR_DEF};
use simmips_core::cp0::{CP0_CONFIG, CP0_CONFIG1, CP0_PAGEMASK, CP0_PRID, CP0_SR};
use simmips_core::loader;
use simmips_core::mips::ExecMode;
use simmips_core::Chip;

struct Args {
    debug_level: u32,
    max_cycle: u64,
    instruction_mix: bool,
    multicycle: bool,
    machine_setting: Option<PathBuf>,
    binfile: Option<PathBuf>,
}

fn usage() -> &'static str {
    "usage: simmips [-d<level>] [-e<num>[k|m|g]] [-i] [-m] [-M <file>] <binfile>\n\
     \n\
     -d<level>   debug verbosity (0-4)\n\
     -e<num>     max cycle count, with optional k/m/g suffix\n\
     -i          print instruction-mix statistics at exit\n\
     -m          run the multicycle interpreter instead of functional\n\
     -M <file>   machine-setting file (@map/@reg/@mem directives); an\n\
                 ISA_IO map entry installs CP0 + TLB"
}

/// Parses a trailing `k`/`K`/`m`/`M`/`g`/`G` cycle-count suffix,
/// matching `Board::atoi_postfix()`.
fn atoi_postfix(s: &str) -> Result<u64> {
    let (digits, mult) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1_000u64),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1_000_000u64),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1_000_000_000u64),
        _ => (s, 1u64),
    };
    let base: u64 = digits.parse().with_context(|| format!("invalid cycle count: {s}"))?;
    Ok(base * mult)
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        debug_level: 0,
        max_cycle: u64::MAX,
        instruction_mix: false,
        multicycle: false,
        machine_setting: None,
        binfile: None,
    };

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < argv.len() {
        let arg = &argv[i];
        if let Some(level) = arg.strip_prefix("-d") {
            args.debug_level = level.parse().context("invalid -d level")?;
        } else if let Some(count) = arg.strip_prefix("-e") {
            args.max_cycle = atoi_postfix(count)?;
        } else if arg == "-i" {
            args.instruction_mix = true;
        } else if arg == "-m" {
            args.multicycle = true;
        } else if arg == "-M" {
            i += 1;
            let file = argv.get(i).context("-M requires a file argument")?;
            args.machine_setting = Some(PathBuf::from(file));
        } else if arg == "-h" || arg == "--help" {
            println!("{}", usage());
            std::process::exit(0);
        } else if arg.starts_with('-') {
            bail!("invalid option: {arg}\n{}", usage());
        } else if args.binfile.is_some() {
            bail!("multiple binary files specified\n{}", usage());
        } else {
            args.binfile = Some(PathBuf::from(arg));
        }
        i += 1;
    }

    if args.binfile.is_none() {
        bail!("no binary file specified\n{}", usage());
    }
    Ok(args)
}

static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: i32) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

/// Installs the SIGINT handler, mirroring `sigint_handler`/
/// `recieve_int` in `board.cc`: the handler only flips a flag, and the
/// run loop polls it between cycles.
fn install_sigint_handler() -> Result<()> {
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGINT,
            nix::sys::signal::SigHandler::Handler(handle_sigint),
        )
        .context("installing SIGINT handler")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = parse_args()?;
    install_sigint_handler()?;

    let bytes = std::fs::read(args.binfile.as_ref().unwrap())
        .with_context(|| format!("reading {:?}", args.binfile.as_ref().unwrap()))?;
    let image = loader::load(&bytes).context("loading ELF image")?;

    let setting = args
        .machine_setting
        .as_ref()
        .map(|path| simmips_core::config::parse_file(path).context("parsing machine-setting file"))
        .transpose()?;
    let use_cp0 = setting
        .as_ref()
        .is_some_and(|s| s.maps.iter().any(|m| m.device == simmips_core::config::DeviceKind::IsaIo));

    let mode = if args.multicycle { ExecMode::Multicycle } else { ExecMode::Functional };
    let mut chip = Chip::new(mode, use_cp0, simmips_core::mainmem::DEFAULT_MEM_SIZE);
    chip.max_cycle = args.max_cycle;

    if let Some(setting) = &setting {
        apply_machine_setting(&mut chip, setting)?;
    }

    for seg in &image.segments {
        if let simmips_core::memctl::Device::MainMemory(mem) = chip.map.devices_mut().next().unwrap() {
            mem.write_bytes(seg.vaddr, &seg.data);
        }
    }
    chip.mips.arch.pc = image.entry;
    chip.mips.arch.r[simmips_core::archstate::REG_SP] = simmips_core::mainmem::DEFAULT_MEM_SIZE - 0x100;
    if !use_cp0 {
        chip.mips.arch.r[simmips_core::archstate::REG_T9] = chip.mips.arch.pc;
    }
    if let Some(gp) = image.gp {
        chip.mips.arch.r[simmips_core::archstate::REG_GP] = gp;
    }

    if use_cp0 {
        if let Some(cp0) = chip.cp0.as_mut() {
            cp0.write_reg(CP0_SR, SR_DEF);
            cp0.write_reg(CP0_PAGEMASK, PAGEMASK_DEF);
            cp0.write_reg(CP0_PRID, PRID_DEF);
            cp0.write_reg(CP0_CONFIG, CONFIG_DEF);
            cp0.write_reg(CP0_CONFIG1, CONFIG1_DEF);
        }
    }

    let start = Instant::now();
    let mut cycles = 0u64;
    while chip.mips.running() && !SIGINT_RECEIVED.load(Ordering::SeqCst) && chip.cycle < chip.max_cycle {
        let time_us = start.elapsed().as_micros() as u64;
        chip.step(time_us);
        cycles += 1;
    }

    print_result(&chip, cycles, start.elapsed(), args.debug_level);
    if args.instruction_mix {
        print_instruction_mix(&chip);
    }
    if chip.error() {
        bail!("simulation halted on an architectural error");
    }
    Ok(())
}

fn apply_machine_setting(chip: &mut Chip, setting: &simmips_core::config::MachineSetting) -> Result<()> {
    use simmips_core::config::{DeviceKind, InitDirective};
    for map in &setting.maps {
        match map.device {
            DeviceKind::MainMemory => {} // default-mapped at construction time.
            DeviceKind::IsaIo => chip.map_isa_io(map.addr, map.size),
            DeviceKind::IsaBus => chip.map_isa_bus(map.addr, map.size),
            DeviceKind::MieruIo => chip.map_mieru_io(map.addr, map.size, false),
        }
    }
    for init in &setting.inits {
        match init {
            InitDirective::Reg { reg, value } => chip.mips.arch.r[*reg] = *value,
            InitDirective::Mem { addr, path } => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("loading raw memory image {}", path.display()))?;
                if let simmips_core::memctl::Device::MainMemory(mem) = chip.map.devices_mut().next().unwrap() {
                    for (i, b) in bytes.iter().enumerate() {
                        mem.write1b(addr + i as u32, *b);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_result(chip: &Chip, cycles: u64, elapsed: std::time::Duration, debug_level: u32) {
    let secs = elapsed.as_secs_f64().max(1e-9);
    let mips = (chip.mips.inst_count as f64 / secs) / 1_000_000.0;
    println!(
        "cycles={cycles} instructions={} time={:.3}s mips={:.3}",
        chip.mips.inst_count,
        secs,
        mips
    );
    if debug_level >= 2 {
        println!("{}", chip.mips.arch.print());
        if let Some(cp0) = chip.cp0.as_ref() {
            println!("{}", cp0.print());
        }
    }
}

/// Prints the per-opcode execution counts gathered over the run,
/// sorted most-frequent first.
fn print_instruction_mix(chip: &Chip) {
    let mut counts: Vec<_> = chip.mips.op_histogram.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| format!("{:?}", a.0).cmp(&format!("{:?}", b.0))));
    println!("instruction mix:");
    for (op, count) in counts {
        println!("  {op:?}: {count}");
    }
}
