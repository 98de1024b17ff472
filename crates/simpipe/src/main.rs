//! `simpipe`: 5-stage pipelined MIPS32 instruction-set simulator CLI.
//!
//! Grounded on `board.cc`'s `usage()`/`checkarg()`/`siminit()`/`exec()`
//! for the shared option set and run loop, extended with the pipeline-
//! only options `pipe.h`'s `PipeLine` construction implies (forwarding
//! toggle, per-cycle stage trace, data-cache geometry). CLI parsing
//! stays hand-rolled against `std::env::args()`, matching `simmips`.

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use simmips_core::archstate::{REG_GP, REG_SP, REG_T9};
use simmips_core::cache::DataCache;
use simmips_core::cp0::{
    CONFIG1_DEF, CONFIG_DEF, CP0_CONFIG, CP0_CONFIG1, CP0_PAGEMASK, CP0_PRID, CP0_SR, PAGEMASK_DEF, PRID_DEF, SR_DEF,
};
use simmips_core::cp0::Cp0;
use simmips_core::loader;
use simmips_core::mainmem::DEFAULT_MEM_SIZE;
use simmips_core::memctl::{Device, MemoryController, MemoryMap};
use simmips_core::pipeline::{PipeLine, PIPE_DEPTH, STAGE_NAMES};

struct DCacheArgs {
    size_bytes: u32,
    ways: u32,
    line: u32,
    penalty: u32,
    writeback: bool,
}

struct Args {
    debug_level: u32,
    max_cycle: u64,
    instruction_mix: bool,
    machine_setting: Option<PathBuf>,
    binfile: Option<PathBuf>,
    forwarding: bool,
    trace_log: bool,
    dcache: Option<DCacheArgs>,
}

fn usage() -> &'static str {
    "usage: simpipe [-d<level>] [-e<num>[k|m|g]] [-i] [-M <file>] [-f0|-f1] [-l]\n\
     \x20\x20\x20\x20\x20\x20\x20[-dcache-size <KB>] [-dcache-way <N>] [-dcache-line <B>]\n\
     \x20\x20\x20\x20\x20\x20\x20[-dcache-penalty <cycles>] [-dcache-writeback <0|1>] <binfile>\n\
     \n\
     -d<level>          debug verbosity (0-3)\n\
     -e<num>             max cycle count, with optional k/m/g suffix\n\
     -i                  print instruction-mix statistics at exit\n\
     -m                  accepted and ignored (this binary is always pipelined)\n\
     -M <file>           machine-setting file (@map/@reg/@mem directives); an\n\
                         ISA_IO map entry installs CP0 + TLB\n\
     -f0 / -f1           disable/enable operand forwarding (default: enabled)\n\
     -l                  write pipe.log with per-cycle stage contents\n\
     -dcache-size <KB>   enable the data cache at this size\n\
     -dcache-way <N>     set associativity (default 1)\n\
     -dcache-line <B>    set line size in bytes (default 16)\n\
     -dcache-penalty <c> set miss penalty in cycles (default 10)\n\
     -dcache-writeback <0|1>  write-back (1) or write-through (0) (default 1)"
}

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
        machine_setting: None,
        binfile: None,
        forwarding: true,
        trace_log: false,
        dcache: None,
    };
    let mut dcache_size_kb: Option<u32> = None;
    let mut dcache_ways: u32 = 1;
    let mut dcache_line: u32 = 16;
    let mut dcache_penalty: u32 = 10;
    let mut dcache_writeback = true;
    let mut dcache_seen = false;

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < argv.len() {
        let arg = &argv[i];
        if arg == "-dcache-size" {
            i += 1;
            dcache_size_kb = Some(argv.get(i).context("-dcache-size requires a value")?.parse().context("invalid -dcache-size")?);
            dcache_seen = true;
        } else if arg == "-dcache-way" {
            i += 1;
            dcache_ways = argv.get(i).context("-dcache-way requires a value")?.parse().context("invalid -dcache-way")?;
            dcache_seen = true;
        } else if arg == "-dcache-line" {
            i += 1;
            dcache_line = argv.get(i).context("-dcache-line requires a value")?.parse().context("invalid -dcache-line")?;
            dcache_seen = true;
        } else if arg == "-dcache-penalty" {
            i += 1;
            dcache_penalty = argv.get(i).context("-dcache-penalty requires a value")?.parse().context("invalid -dcache-penalty")?;
            dcache_seen = true;
        } else if arg == "-dcache-writeback" {
            i += 1;
            let v: u32 = argv.get(i).context("-dcache-writeback requires a value")?.parse().context("invalid -dcache-writeback")?;
            dcache_writeback = v != 0;
            dcache_seen = true;
        } else if let Some(level) = arg.strip_prefix("-d") {
            args.debug_level = level.parse().context("invalid -d level")?;
        } else if let Some(count) = arg.strip_prefix("-e") {
            args.max_cycle = atoi_postfix(count)?;
        } else if arg == "-i" {
            args.instruction_mix = true;
        } else if arg == "-m" {
            // Accepted for command-line parity with `simmips`; this binary
            // is always the pipelined model, so there is nothing to flip.
        } else if arg == "-M" {
            i += 1;
            let file = argv.get(i).context("-M requires a file argument")?;
            args.machine_setting = Some(PathBuf::from(file));
        } else if arg == "-f0" {
            args.forwarding = false;
        } else if arg == "-f1" {
            args.forwarding = true;
        } else if arg == "-l" {
            args.trace_log = true;
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
    if dcache_seen {
        let size_kb = dcache_size_kb.unwrap_or(16);
        args.dcache = Some(DCacheArgs {
            size_bytes: size_kb * 1024,
            ways: dcache_ways,
            line: dcache_line,
            penalty: dcache_penalty,
            writeback: dcache_writeback,
        });
    }
    Ok(args)
}

static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: i32) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

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

    let dcache = args
        .dcache
        .as_ref()
        .map(|c| DataCache::new(c.size_bytes, c.ways, c.line, c.writeback, c.penalty))
        .transpose()
        .context("configuring data cache")?;

    let setting = args
        .machine_setting
        .as_ref()
        .map(|path| simmips_core::config::parse_file(path).context("parsing machine-setting file"))
        .transpose()?;
    let use_cp0 = setting
        .as_ref()
        .is_some_and(|s| s.maps.iter().any(|m| m.device == simmips_core::config::DeviceKind::IsaIo));

    let mut pipe = PipeLine::new(args.forwarding, dcache);
    let mut map = MemoryMap::new();
    map.add(0, DEFAULT_MEM_SIZE, Device::MainMemory(simmips_core::mainmem::MainMemory::new(DEFAULT_MEM_SIZE)));
    // `step_funct` (driven from the pipeline's Fetch stage) enqueues and
    // immediately reads back a transaction within one call, which only
    // resolves correctly in through-mode (buffer-mode defers retirement
    // to a later `step()`, which the single-instruction functional path
    // never makes).
    let mut mc = MemoryController::new(simmips_core::memctl::McMode::Through);
    let mut cp0 = use_cp0.then(Cp0::new);

    if let Some(setting) = &setting {
        apply_machine_setting(&mut pipe, &mut map, setting)?;
    }

    for seg in &image.segments {
        if let Device::MainMemory(mem) = map.devices_mut().next().unwrap() {
            mem.write_bytes(seg.vaddr, &seg.data);
        }
    }
    pipe.mips.arch.pc = image.entry;
    pipe.mips.arch.r[REG_SP] = DEFAULT_MEM_SIZE - 0x100;
    if !use_cp0 {
        pipe.mips.arch.r[REG_T9] = pipe.mips.arch.pc;
    }
    if let Some(gp) = image.gp {
        pipe.mips.arch.r[REG_GP] = gp;
    }
    if use_cp0 {
        if let Some(c) = cp0.as_mut() {
            c.write_reg(CP0_SR, SR_DEF);
            c.write_reg(CP0_PAGEMASK, PAGEMASK_DEF);
            c.write_reg(CP0_PRID, PRID_DEF);
            c.write_reg(CP0_CONFIG, CONFIG_DEF);
            c.write_reg(CP0_CONFIG1, CONFIG1_DEF);
        }
    }

    let mut trace = args
        .trace_log
        .then(|| File::create("pipe.log").context("creating pipe.log"))
        .transpose()?;

    let start = Instant::now();
    while !pipe.drained() && !SIGINT_RECEIVED.load(Ordering::SeqCst) && pipe.cycle < args.max_cycle {
        let time_us = start.elapsed().as_micros() as u64;
        pipe.step(&mut map, &mut mc, cp0.as_mut(), time_us);
        if let Some(f) = trace.as_mut() {
            write_trace_line(f, &pipe)?;
        }
    }

    print_result(&pipe, start.elapsed(), args.debug_level, cp0.as_ref());
    if args.instruction_mix {
        print_instruction_mix(&pipe);
    }
    if pipe.mips.state == simmips_core::mips::CpuState::Error {
        bail!("simulation halted on an architectural error");
    }
    Ok(())
}

fn write_trace_line(f: &mut File, pipe: &PipeLine) -> Result<()> {
    let mut line = format!("cycle {:>8}: ", pipe.cycle);
    for stage in 0..PIPE_DEPTH {
        let cell = match pipe.latch_inst(stage) {
            Some(ir) => format!("{}={:08x}", STAGE_NAMES[stage], ir.ir),
            None => format!("{}=----", STAGE_NAMES[stage]),
        };
        line.push_str(&cell);
        line.push(' ');
    }
    writeln!(f, "{}", line.trim_end())?;
    Ok(())
}

fn apply_machine_setting(pipe: &mut PipeLine, map: &mut MemoryMap, setting: &simmips_core::config::MachineSetting) -> Result<()> {
    use simmips_core::config::{DeviceKind, InitDirective};
    for m in &setting.maps {
        match m.device {
            DeviceKind::MainMemory => {}
            DeviceKind::IsaIo => map.add(m.addr, m.size, Device::IsaIo(simmips_core::devices::IsaIo::default())),
            DeviceKind::IsaBus => map.add(m.addr, m.size, Device::IsaBus(simmips_core::devices::IsaBus)),
            DeviceKind::MieruIo => map.add(m.addr, m.size, Device::MieruIo(simmips_core::devices::MieruIo::new(false))),
        }
    }
    for init in &setting.inits {
        match init {
            InitDirective::Reg { reg, value } => pipe.mips.arch.r[*reg] = *value,
            InitDirective::Mem { addr, path } => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("loading raw memory image {}", path.display()))?;
                if let Device::MainMemory(mem) = map.devices_mut().next().unwrap() {
                    for (i, b) in bytes.iter().enumerate() {
                        mem.write1b(addr + i as u32, *b);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_result(pipe: &PipeLine, elapsed: std::time::Duration, debug_level: u32, cp0: Option<&Cp0>) {
    let secs = elapsed.as_secs_f64().max(1e-9);
    let mips = (pipe.inst_count as f64 / secs) / 1_000_000.0;
    println!(
        "cycles={} instructions={} time={:.3}s mips={:.3} cpi={:.3}",
        pipe.cycle,
        pipe.inst_count,
        secs,
        mips,
        pipe.cycle as f64 / pipe.inst_count.max(1) as f64,
    );
    if debug_level >= 2 {
        println!("{}", pipe.arch().print());
        if let Some(cp0) = cp0 {
            println!("{}", cp0.print());
        }
    }
}

/// Prints the per-opcode execution counts gathered over the run,
/// sorted most-frequent first.
fn print_instruction_mix(pipe: &PipeLine) {
    let mut counts: Vec<_> = pipe.mips.op_histogram.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| format!("{:?}", a.0).cmp(&format!("{:?}", b.0))));
    println!("instruction mix:");
    for (op, count) in counts {
        println!("  {op:?}: {count}");
    }
}
