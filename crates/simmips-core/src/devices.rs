//! Memory-mapped devices (C10): the dual-8259-style interrupt
//! controller, a 16550-style serial port, the bare ISA-bus stub, and
//! the Mieru LCD/switch/keyboard panel.
//!
//! Grounded on `SimMips/device.cc`. The original used ncurses for the
//! Mieru panel; this port uses `crossterm`, which the pack's other
//! terminal-UI examples reach for in its place.

use crate::cp0::Cp0;

pub const PIC_PRI_ADDR: u32 = 0x20;
pub const PIC_SEC_ADDR: u32 = 0xa0;
pub const PIC_ADDR_RANGE: u32 = 2;
pub const SIO_PRI_ADDR: u32 = 0x3f8;
pub const SIO_ADDR_RANGE: u32 = 8;
pub const SIO_POLL_CYCLE: u64 = 0x100;

pub const MIERU_SW: u32 = 0x00;
pub const MIERU_LCD: u32 = 0x04;
pub const MIERU_SEG: u32 = 0x08;
pub const MIERU_CNT: u32 = 0x0c;
pub const MIERU_KB: u32 = 0x10;

/// Dual-channel 8259-equivalent PIC, driving CP0 interrupt line 2.
#[derive(Debug, Default, Clone)]
pub struct IntController {
    imr: [u8; 2],
    irr: [u8; 2],
    isr: [u8; 2],
    tobe_read: [u8; 2],
    init_mode: [u8; 2],
}

impl IntController {
    fn channel_of(addr: u32) -> Option<usize> {
        if (PIC_PRI_ADDR..PIC_PRI_ADDR + PIC_ADDR_RANGE).contains(&addr) {
            Some(0)
        } else if (PIC_SEC_ADDR..PIC_SEC_ADDR + PIC_ADDR_RANGE).contains(&addr) {
            Some(1)
        } else {
            None
        }
    }

    /// Recompute the cascaded ISR and raise/clear CP0 line 2.
    fn recalc_irq(&mut self, cp0: &mut Cp0) {
        // Channel 1 cascades into channel 0's IRQ2.
        if self.irr[1] & !self.imr[1] != 0 {
            self.irr[0] |= 1 << 2;
        } else {
            self.irr[0] &= !(1 << 2);
        }
        let mut any = false;
        for ch in 0..2 {
            let pending = self.irr[ch] & !self.imr[ch];
            if pending != 0 {
                self.isr[ch] = pending.trailing_zeros() as u8;
                any = true;
            }
        }
        if any {
            cp0.set_interrupt(2);
        } else {
            cp0.clear_interrupt(2);
        }
    }

    pub fn set_interrupt(&mut self, channel: usize, irq: u32, cp0: &mut Cp0) {
        self.irr[channel] |= 1 << irq;
        self.recalc_irq(cp0);
    }

    pub fn clear_interrupt(&mut self, channel: usize, irq: u32, cp0: &mut Cp0) {
        self.irr[channel] &= !(1 << irq);
        self.recalc_irq(cp0);
    }

    pub fn read1b(&mut self, addr: u32, cp0: &mut Cp0) -> Option<u8> {
        let ch = Self::channel_of(addr)?;
        let off = addr - if ch == 0 { PIC_PRI_ADDR } else { PIC_SEC_ADDR };
        let v = match off {
            0 => {
                if self.tobe_read[ch] == 1 {
                    self.irr[ch]
                } else {
                    self.isr[ch]
                }
            }
            1 => self.imr[ch],
            _ => 0,
        };
        self.recalc_irq(cp0);
        Some(v)
    }

    pub fn write1b(&mut self, addr: u32, data: u8, cp0: &mut Cp0) -> bool {
        let Some(ch) = Self::channel_of(addr) else { return false };
        let off = addr - if ch == 0 { PIC_PRI_ADDR } else { PIC_SEC_ADDR };
        match off {
            0 => {
                if data & 0x10 != 0 {
                    // ICW1: begin initialization sequence.
                    self.init_mode[ch] = 1;
                    self.imr[ch] = 0;
                } else if data & 0x08 != 0 {
                    // OCW3: select read register on next read.
                    self.tobe_read[ch] = data & 0x02;
                } else if data & 0x20 != 0 {
                    // OCW2: non-specific EOI, clear lowest pending bit.
                    if self.isr[ch] != 0 {
                        self.irr[ch] &= !(1 << self.isr[ch]);
                    }
                }
            }
            1 => {
                if self.init_mode[ch] != 0 {
                    self.init_mode[ch] = 0;
                } else {
                    self.imr[ch] = data;
                }
            }
            _ => {}
        }
        self.recalc_irq(cp0);
        true
    }
}

/// 16550-equivalent serial port, polling stdin every `SIO_POLL_CYCLE`
/// ticks for an available byte.
#[derive(Debug, Default, Clone)]
pub struct SerialIo {
    rbr: u8,
    ier: u8,
    lcr: u8,
    mcr: u8,
    scr: u8,
    divisor: u16,
    rx_ready: bool,
    tick: u64,
}

impl SerialIo {
    const DIV_BIT: u8 = 0x80;

    pub fn step(&mut self, cp0: &mut Cp0) {
        self.tick = self.tick.wrapping_add(1);
        if self.tick % SIO_POLL_CYCLE == 0 && !self.rx_ready {
            if let Some(byte) = poll_stdin_byte() {
                self.rbr = byte;
                self.rx_ready = true;
            }
        }
        self.recalc_irq(cp0);
    }

    fn recalc_irq(&self, cp0: &mut Cp0) {
        let rx_irq = self.ier & 0x1 != 0 && self.rx_ready;
        if rx_irq {
            cp0.set_interrupt(4);
        } else {
            cp0.clear_interrupt(4);
        }
    }

    pub fn read1b(&mut self, offset: u32) -> Option<u8> {
        let divisor_latch = self.lcr & Self::DIV_BIT != 0;
        let v = match offset {
            0 if divisor_latch => (self.divisor & 0xff) as u8,
            0 => {
                let b = self.rbr;
                self.rx_ready = false;
                b
            }
            1 if divisor_latch => (self.divisor >> 8) as u8,
            1 => self.ier,
            2 => 0x01, // IIR: no interrupt pending (simplified)
            3 => self.lcr,
            4 => self.mcr,
            5 => {
                // LSR: data-ready bit 0, transmit-empty bits 5/6 always set.
                0x60 | (self.rx_ready as u8)
            }
            6 => 0x00, // MSR
            7 => self.scr,
            _ => return None,
        };
        Some(v)
    }

    pub fn write1b(&mut self, offset: u32, data: u8) -> bool {
        let divisor_latch = self.lcr & Self::DIV_BIT != 0;
        match offset {
            0 if divisor_latch => self.divisor = (self.divisor & 0xff00) | data as u16,
            0 => print!("{}", data as char),
            1 if divisor_latch => self.divisor = (self.divisor & 0x00ff) | ((data as u16) << 8),
            1 => self.ier = data,
            3 => self.lcr = data,
            4 => self.mcr = data,
            7 => self.scr = data,
            _ => return false,
        }
        true
    }
}

fn poll_stdin_byte() -> Option<u8> {
    use crossterm::event::{self, Event, KeyCode};
    if event::poll(std::time::Duration::from_millis(0)).unwrap_or(false) {
        if let Ok(Event::Key(k)) = event::read() {
            if let KeyCode::Char(c) = k.code {
                return Some(c as u8);
            }
        }
    }
    None
}

/// Wraps the PIC and serial port behind one port range, mirroring
/// `IsaIO`'s dispatch-by-range in the source.
#[derive(Debug, Default, Clone)]
pub struct IsaIo {
    pub pic: IntController,
    pub sio: SerialIo,
}

impl IsaIo {
    pub fn step(&mut self, cp0: &mut Cp0) {
        self.sio.step(cp0);
    }

    pub fn read1b(&mut self, addr: u32, cp0: &mut Cp0) -> u8 {
        if let Some(v) = self.pic.read1b(addr, cp0) {
            return v;
        }
        if (SIO_PRI_ADDR..SIO_PRI_ADDR + SIO_ADDR_RANGE).contains(&addr) {
            if let Some(v) = self.sio.read1b(addr - SIO_PRI_ADDR) {
                return v;
            }
        }
        0
    }

    pub fn write1b(&mut self, addr: u32, data: u8, cp0: &mut Cp0) {
        if self.pic.write1b(addr, data, cp0) {
            return;
        }
        if (SIO_PRI_ADDR..SIO_PRI_ADDR + SIO_ADDR_RANGE).contains(&addr) {
            self.sio.write1b(addr - SIO_PRI_ADDR, data);
        }
    }
}

/// Bare ISA-bus stub: mapped but always reads zero and ignores writes.
/// Kept because the `@map ... ISA_BUS` machine-setting directive
/// exists in the source grammar even though nothing in the reference
/// program actually drives it.
#[derive(Debug, Default, Clone, Copy)]
pub struct IsaBus;

/// A single `\r`-terminated LCD command buffer.
#[derive(Debug, Default)]
struct LcdBuffer {
    buf: String,
}

/// The Mieru panel: switches, a 7-segment display, an LCD, and a
/// keyboard, all polled via fixed single-key bindings in the source.
#[derive(Debug, Default)]
pub struct MieruIo {
    lcd: LcdBuffer,
    debug_mode: bool,
}

impl MieruIo {
    pub fn new(debug_mode: bool) -> Self {
        Self {
            lcd: LcdBuffer::default(),
            debug_mode,
        }
    }

    pub fn read1b(&mut self, addr: u32, board_time_us: u64) -> u8 {
        match addr {
            MIERU_SW => self.poll_switches(),
            MIERU_LCD => 1, // LCD always reports ready.
            MIERU_KB => self.poll_keyboard(),
            _ => {
                let _ = board_time_us;
                0
            }
        }
    }

    pub fn read4b(&mut self, addr: u32, board_time_us: u64) -> u32 {
        if addr == MIERU_CNT {
            (board_time_us / 10) as u32
        } else {
            0
        }
    }

    fn poll_key(&self) -> Option<char> {
        if self.debug_mode {
            return None;
        }
        use crossterm::event::{self, Event, KeyCode};
        if event::poll(std::time::Duration::from_millis(0)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if let KeyCode::Char(c) = k.code {
                    return Some(c);
                }
            }
        }
        None
    }

    fn poll_switches(&mut self) -> u8 {
        match self.poll_key() {
            Some('z') => 4,
            Some('x') => 2,
            Some('c') => 1,
            _ => 0,
        }
    }

    fn poll_keyboard(&mut self) -> u8 {
        match self.poll_key() {
            Some('w') => 32,
            Some('s') => 16,
            Some('a') => 8,
            Some('d') => 4,
            Some('j') => 2,
            Some('k') => 1,
            _ => 0,
        }
    }

    /// Appends to the pending LCD command line; on `\r`, parses and
    /// executes `CS<hex>` (set color), `ER` (clear), `HP<x>,<y>`
    /// (cursor), `HW<text>` (print), `HR` (newline).
    pub fn write1b(&mut self, data: u8) {
        if data == b'\r' {
            self.execute_lcd_command(&self.lcd.buf.clone());
            self.lcd.buf.clear();
        } else {
            self.lcd.buf.push(data as char);
        }
    }

    fn execute_lcd_command(&self, cmd: &str) {
        use crossterm::{cursor, execute, style::Print, terminal::Clear, terminal::ClearType};
        use std::io::stdout;

        if self.debug_mode {
            return;
        }
        if let Some(rest) = cmd.strip_prefix("CS") {
            let _ = rest; // color code, unused in a plain terminal.
        } else if cmd == "ER" {
            let _ = execute!(stdout(), Clear(ClearType::All));
        } else if let Some(rest) = cmd.strip_prefix("HP") {
            if let Some((x, y)) = rest.split_once(',') {
                if let (Ok(x), Ok(y)) = (x.trim().parse::<u16>(), y.trim().parse::<u16>()) {
                    let _ = execute!(stdout(), cursor::MoveTo(x, y));
                }
            }
        } else if let Some(text) = cmd.strip_prefix("HW") {
            let _ = execute!(stdout(), Print(text));
        } else if cmd == "HR" {
            let _ = execute!(stdout(), Print("\n"));
        }
    }

    /// 7-segment display write: one bit per segment, per the fixed
    /// `x7seg`/`y7seg` coordinate tables in the source — rendered here
    /// as a plain textual readout rather than pixel coordinates.
    pub fn write4b(&self, addr: u32, value: u32) {
        if addr != MIERU_SEG {
            return;
        }
        tracing::debug!(value, "mieru 7-segment display updated");
    }
}
