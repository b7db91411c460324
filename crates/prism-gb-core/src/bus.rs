use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::host::Host;
use crate::joypad::Joypad;
use crate::ppu::Ppu;
use crate::serial::Serial;
use crate::snapshot::{SaveStateError, StateReader, StateWriter};
use crate::timer::Timer;

const WRAM_BANK_SIZE: usize = 0x1000;

/// Transfer mode for CGB VRAM DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaMode {
    /// General-purpose DMA (immediate)
    General,
    /// One 16-byte block per HBlank
    HBlank,
}

#[derive(Debug)]
struct VramDmaState {
    /// 16-bit source pointer, low nibble forced to zero.
    src: u16,
    /// Destination in VRAM: 0x8000 | (dst & 0x1FF0).
    dst: u16,
    /// Remaining 16-byte blocks.
    blocks: u8,
    mode: DmaMode,
    active: bool,
}

#[derive(Debug)]
struct OamDmaState {
    /// Source page; `src << 8 | offset` addresses the copied byte.
    source_page: u8,
    /// Next OAM slot, 0..160.
    offset: u8,
    /// One byte moves every four master cycles.
    prescaler: u8,
    active: bool,
}

pub struct Bus {
    pub wram: [[u8; WRAM_BANK_SIZE]; 8],
    pub wram_bank: usize,
    pub hram: [u8; 0x7F],
    pub cart: Option<Cartridge>,
    pub if_reg: u8,
    pub ie_reg: u8,
    /// Speed switch register: bit 0 = switch armed, bit 7 = current speed.
    pub key1: u8,
    cgb_mode: bool,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub joypad: Joypad,
    pub serial: Serial,
    pub host: Box<dyn Host>,
    oam_dma: OamDmaState,
    dma_reg: u8,
    vram_dma: VramDmaState,
    /// T-states of CPU stall accumulated by DMA, drained by the tick loop.
    pending_stall: u32,
    /// Accumulator gating the APU so it stays at native pitch when the
    /// emulation runs faster than 100 %.
    apu_throttle: u8,
}

impl Bus {
    pub fn new(cgb: bool, host: Box<dyn Host>) -> Self {
        Self {
            wram: [[0; WRAM_BANK_SIZE]; 8],
            wram_bank: 1,
            hram: [0; 0x7F],
            cart: None,
            if_reg: 0xE1,
            ie_reg: 0,
            key1: 0,
            cgb_mode: cgb,
            ppu: Ppu::new(cgb),
            apu: Apu::new(),
            timer: Timer::new(),
            joypad: Joypad::new(),
            serial: Serial::new(),
            host,
            oam_dma: OamDmaState {
                source_page: 0,
                offset: 0,
                prescaler: 0,
                active: false,
            },
            dma_reg: 0,
            vram_dma: VramDmaState {
                src: 0,
                dst: 0x8000,
                blocks: 0,
                mode: DmaMode::General,
                active: false,
            },
            pending_stall: 0,
            apu_throttle: 0,
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    pub fn is_cgb(&self) -> bool {
        self.cgb_mode
    }

    pub fn double_speed(&self) -> bool {
        self.key1 & 0x80 != 0
    }

    /// OR `mask` into IF. Peripherals only ever set bits; the CPU's interrupt
    /// service is the sole agent that clears them.
    pub fn set_irq(&mut self, mask: u8) {
        self.if_reg |= mask;
    }

    // ------------------------------------------------------------------
    // Address decoding
    // ------------------------------------------------------------------

    pub fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF)
            }
            0x8000..=0x9FFF => self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize],
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize],
            0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize],
            // Echo of 0xC000-0xDDFF.
            0xE000..=0xEFFF => self.wram[0][(addr - 0xE000) as usize],
            0xF000..=0xFDFF => self.wram[self.wram_bank][(addr - 0xF000) as usize],
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize],
            0xFEA0..=0xFEFF => {
                log::debug!(target: "bus", "prohibited read at {addr:#06X}");
                0xFF
            }
            0xFF00 => self.joypad.read(self.host.as_ref()),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.if_reg,
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF40..=0xFF45 | 0xFF47..=0xFF4B | 0xFF68..=0xFF6C => self.ppu.read_reg(addr),
            0xFF46 => self.dma_reg,
            0xFF4D => {
                if self.cgb_mode {
                    (self.key1 & 0x81) | 0x7E
                } else {
                    0xFF
                }
            }
            0xFF4F => {
                if self.cgb_mode {
                    self.ppu.vram_bank as u8 | 0xFE
                } else {
                    0xFF
                }
            }
            0xFF51..=0xFF54 => 0xFF,
            0xFF55 => {
                if !self.cgb_mode {
                    0xFF
                } else if self.vram_dma.active {
                    0x80 | (self.vram_dma.blocks - 1)
                } else {
                    0x00
                }
            }
            0xFF70 => {
                if self.cgb_mode {
                    self.wram_bank as u8 | 0xF8
                } else {
                    0xFF
                }
            }
            0xFF76 | 0xFF77 => {
                if self.cgb_mode {
                    self.apu.read_pcm(addr)
                } else {
                    0xFF
                }
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie_reg,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => {
                self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize] = val;
            }
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize] = val,
            0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize] = val,
            0xE000..=0xEFFF => self.wram[0][(addr - 0xE000) as usize] = val,
            0xF000..=0xFDFF => self.wram[self.wram_bank][(addr - 0xF000) as usize] = val,
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize] = val,
            0xFEA0..=0xFEFF => {
                log::debug!(target: "bus", "prohibited write at {addr:#06X} <- {val:#04X}");
            }
            0xFF00 => self.joypad.write(val),
            0xFF01 | 0xFF02 => self.serial.write(addr, val),
            0xFF04..=0xFF07 => self.timer.write(addr, val, &mut self.if_reg),
            0xFF0F => self.if_reg = (val & 0x1F) | (self.if_reg & 0xE0),
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF40 => {
                let lcd_was_on = self.ppu.lcd_enabled();
                self.ppu.write_reg(addr, val);
                if lcd_was_on && !self.ppu.lcd_enabled() {
                    // With the LCD off there are no more HBlanks to carry the
                    // transfer, so finish it now.
                    self.complete_active_hblank_dma();
                }
            }
            0xFF41..=0xFF45 | 0xFF47..=0xFF4B | 0xFF68..=0xFF6C => self.ppu.write_reg(addr, val),
            0xFF46 => self.start_oam_dma(val),
            0xFF4D => {
                if self.cgb_mode {
                    self.key1 = (self.key1 & 0x80) | (val & 0x01);
                }
            }
            0xFF4F => {
                if self.cgb_mode {
                    self.ppu.vram_bank = (val & 0x01) as usize;
                }
            }
            0xFF51 => {
                if self.cgb_mode && !self.vram_dma.active {
                    self.vram_dma.src = ((val as u16) << 8) | (self.vram_dma.src & 0x00F0);
                }
            }
            0xFF52 => {
                if self.cgb_mode && !self.vram_dma.active {
                    self.vram_dma.src = (self.vram_dma.src & 0xFF00) | (val & 0xF0) as u16;
                }
            }
            0xFF53 => {
                if self.cgb_mode && !self.vram_dma.active {
                    let raw = (((val & 0x1F) as u16) << 8) | (self.vram_dma.dst & 0x00F0);
                    self.vram_dma.dst = Self::sanitize_vram_dma_dest(raw);
                }
            }
            0xFF54 => {
                if self.cgb_mode && !self.vram_dma.active {
                    let raw = (self.vram_dma.dst & 0x1F00) | (val & 0xF0) as u16;
                    self.vram_dma.dst = Self::sanitize_vram_dma_dest(raw);
                }
            }
            0xFF55 => self.write_vram_dma_control(val),
            0xFF70 => {
                if self.cgb_mode {
                    let bank = (val & 0x07) as usize;
                    self.wram_bank = if bank == 0 { 1 } else { bank };
                }
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie_reg = val,
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // OAM DMA
    // ------------------------------------------------------------------

    fn start_oam_dma(&mut self, val: u8) {
        self.dma_reg = val;
        // Pages 0xE0..0xFF mirror WRAM, keeping the source within 0x00-0xDF.
        self.oam_dma.source_page = if val > 0xDF { val - 0x20 } else { val };
        self.oam_dma.offset = 0;
        self.oam_dma.prescaler = 0;
        self.oam_dma.active = true;
    }

    /// Advance the OAM DMA engine by one master cycle: one byte moves every
    /// four cycles until all 160 have been copied.
    pub fn oam_dma_tick(&mut self) {
        if !self.oam_dma.active {
            return;
        }
        self.oam_dma.prescaler += 1;
        if self.oam_dma.prescaler < 4 {
            return;
        }
        self.oam_dma.prescaler = 0;
        let src = ((self.oam_dma.source_page as u16) << 8) | self.oam_dma.offset as u16;
        let byte = self.read(src);
        self.ppu.oam[self.oam_dma.offset as usize] = byte;
        self.oam_dma.offset += 1;
        if self.oam_dma.offset as usize >= 0xA0 {
            self.oam_dma.active = false;
        }
    }

    pub fn oam_dma_active(&self) -> bool {
        self.oam_dma.active
    }

    // ------------------------------------------------------------------
    // VRAM DMA (general-purpose and HBlank)
    // ------------------------------------------------------------------

    #[inline]
    fn sanitize_vram_dma_dest(addr: u16) -> u16 {
        0x8000 | (addr & 0x1FF0)
    }

    fn write_vram_dma_control(&mut self, val: u8) {
        if !self.cgb_mode {
            return;
        }
        if self.vram_dma.active && val & 0x80 == 0 {
            // Clearing bit 7 mid-transfer cancels a running HBlank DMA.
            self.vram_dma.active = false;
            return;
        }
        let blocks = (val & 0x7F) + 1;
        self.vram_dma.blocks = blocks;
        if val & 0x80 == 0 {
            self.vram_dma.mode = DmaMode::General;
            self.run_general_dma();
        } else {
            self.vram_dma.mode = DmaMode::HBlank;
            self.vram_dma.active = true;
            // A transfer started outside of display time gets its first
            // block immediately.
            if !self.ppu.lcd_enabled() || self.ppu.in_hblank() {
                self.hblank_dma_transfer();
            }
        }
    }

    /// General-purpose DMA copies everything at once; the CPU is stalled for
    /// 8 T-states per block (16 in double speed).
    fn run_general_dma(&mut self) {
        let blocks = self.vram_dma.blocks;
        for _ in 0..blocks {
            self.copy_vram_dma_block();
        }
        self.vram_dma.blocks = 0;
        self.vram_dma.active = false;
        let per_block: u32 = if self.double_speed() { 16 } else { 8 };
        self.pending_stall += per_block * blocks as u32;
    }

    /// One 16-byte HBlank DMA block; invoked by the tick loop when the PPU
    /// reports a mode-0 entry. Stalls the CPU 32 master cycles (64 in double
    /// speed).
    pub fn hblank_dma_transfer(&mut self) {
        if !(self.vram_dma.active && self.vram_dma.mode == DmaMode::HBlank) {
            return;
        }
        self.copy_vram_dma_block();
        self.vram_dma.blocks -= 1;
        if self.vram_dma.blocks == 0 {
            self.vram_dma.active = false;
        }
        self.pending_stall += if self.double_speed() { 64 } else { 32 };
    }

    fn copy_vram_dma_block(&mut self) {
        for _ in 0..0x10 {
            let byte = self.read(self.vram_dma.src);
            let dst = self.vram_dma.dst;
            self.ppu.vram[self.ppu.vram_bank][(dst - 0x8000) as usize] = byte;
            self.vram_dma.src = self.vram_dma.src.wrapping_add(1);
            self.vram_dma.dst = 0x8000 | ((dst.wrapping_add(1)) & 0x1FFF);
        }
        self.vram_dma.dst = Self::sanitize_vram_dma_dest(self.vram_dma.dst);
    }

    fn complete_active_hblank_dma(&mut self) {
        while self.vram_dma.active && self.vram_dma.mode == DmaMode::HBlank {
            self.hblank_dma_transfer();
        }
    }

    /// CPU stall cycles produced by DMA since the last call.
    pub fn take_pending_stall(&mut self) -> u32 {
        std::mem::take(&mut self.pending_stall)
    }

    // ------------------------------------------------------------------
    // Tick fan-out helpers
    // ------------------------------------------------------------------

    /// Timer + OAM DMA share the CPU clock domain: they run twice per master
    /// tick in double-speed mode, exactly like the CPU.
    pub fn cpu_domain_tick(&mut self) {
        self.timer.step(1, &mut self.if_reg);
        self.oam_dma_tick();
    }

    /// One PPU dot; the PPU is not affected by double speed.
    pub fn ppu_dot(&mut self) {
        if self.ppu.step(1, &mut self.if_reg) {
            self.hblank_dma_transfer();
        }
    }

    /// APU clock, throttled so audio pitch stays native: each master tick
    /// adds 10 to the accumulator and the APU runs when it reaches `speed`.
    pub fn apu_throttled_tick(&mut self) {
        let speed = self
            .host
            .speed()
            .clamp(crate::host::SPEED_MIN, crate::host::SPEED_MAX);
        self.apu_throttle += 10;
        if self.apu_throttle >= speed {
            self.apu_throttle -= speed;
            let div = (self.timer.div >> 8) as u8;
            self.apu.tick(div, self.host.as_ref());
        }
    }

    /// STOP with an armed switch toggles the speed instead of halting.
    /// Returns `true` when the switch happened.
    pub fn stop_instr_callback(&mut self) -> bool {
        self.timer.reset_div(&mut self.if_reg);
        if self.key1 & 0x01 != 0 {
            self.key1 = (self.key1 ^ 0x80) & !0x01;
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    pub fn save_state(&self, w: &mut StateWriter) {
        for bank in &self.wram {
            w.put_bytes(bank);
        }
        w.put_u8(self.wram_bank as u8);
        w.put_bytes(&self.hram);
        w.put_u8(self.if_reg);
        w.put_u8(self.ie_reg);
        w.put_u8(self.key1);
        w.put_u8(self.oam_dma.source_page);
        w.put_u8(self.oam_dma.offset);
        w.put_u8(self.oam_dma.prescaler);
        w.put_bool(self.oam_dma.active);
        w.put_u8(self.dma_reg);
        w.put_u16(self.vram_dma.src);
        w.put_u16(self.vram_dma.dst);
        w.put_u8(self.vram_dma.blocks);
        w.put_bool(self.vram_dma.mode == DmaMode::HBlank);
        w.put_bool(self.vram_dma.active);
        w.put_u32(self.pending_stall);
        w.put_u8(self.apu_throttle);
        self.joypad.save_state(w);
        self.serial.save_state(w);
        if let Some(cart) = &self.cart {
            cart.save_state(w);
        }
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        for bank in &mut self.wram {
            r.get_bytes(bank)?;
        }
        let bank = (r.get_u8()? & 0x07) as usize;
        self.wram_bank = if bank == 0 { 1 } else { bank };
        r.get_bytes(&mut self.hram)?;
        self.if_reg = r.get_u8()?;
        self.ie_reg = r.get_u8()?;
        self.key1 = r.get_u8()? & 0x81;
        self.oam_dma.source_page = r.get_u8()?;
        self.oam_dma.offset = r.get_u8()?;
        self.oam_dma.prescaler = r.get_u8()?;
        self.oam_dma.active = r.get_bool()?;
        self.dma_reg = r.get_u8()?;
        self.vram_dma.src = r.get_u16()?;
        self.vram_dma.dst = Self::sanitize_vram_dma_dest(r.get_u16()?);
        self.vram_dma.blocks = r.get_u8()?;
        self.vram_dma.mode = if r.get_bool()? {
            DmaMode::HBlank
        } else {
            DmaMode::General
        };
        self.vram_dma.active = r.get_bool()?;
        self.pending_stall = r.get_u32()?;
        self.apu_throttle = r.get_u8()?;
        self.joypad.load_state(r)?;
        self.serial.load_state(r)?;
        if let Some(mut cart) = self.cart.take() {
            let res = cart.load_state(r);
            self.cart = Some(cart);
            res?;
        }
        Ok(())
    }
}
