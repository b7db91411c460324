use crate::bus::Bus;
use crate::cartridge::{Cartridge, LoadError};
use crate::cpu::Cpu;
use crate::host::{Host, NullHost};
use crate::ppu::FRAME_PIXELS;
use crate::snapshot::{SaveStateError, StateReader, StateWriter};

/// Snapshot section order; the host must return sections in this order.
const SECTION_TAGS: [&str; 5] = ["cpu", "bus", "ppu", "apu", "timer"];

/// The whole machine: CPU plus the bus that owns every peripheral. The tick
/// loop is a method of this struct, so cross-subsystem visibility is fixed by
/// call order instead of shared-memory tricks.
pub struct System {
    pub cpu: Cpu,
    pub bus: Bus,
}

impl System {
    pub fn new(host: Box<dyn Host>) -> Self {
        Self {
            cpu: Cpu::new(true),
            bus: Bus::new(true, host),
        }
    }

    /// Load a cartridge image and reset every subsystem into the mode (DMG or
    /// CGB) the cartridge header selects.
    pub fn load_cartridge(&mut self, data: Vec<u8>) -> Result<(), LoadError> {
        let cart = Cartridge::from_bytes(data)?;
        self.install(cart);
        Ok(())
    }

    pub fn load_cartridge_file<P: AsRef<std::path::Path>>(
        &mut self,
        path: P,
    ) -> Result<(), LoadError> {
        let cart = Cartridge::from_file(path)?;
        self.install(cart);
        Ok(())
    }

    fn install(&mut self, cart: Cartridge) {
        let cgb = cart.cgb;
        let host = std::mem::replace(&mut self.bus.host, Box::new(NullHost));
        self.cpu = Cpu::new(cgb);
        self.bus = Bus::new(cgb, host);
        self.bus.load_cart(cart);
    }

    /// Reset to the post-boot state, preserving the loaded cartridge.
    pub fn reset(&mut self) {
        if let Some(cart) = self.bus.cart.take() {
            self.install(cart);
        } else {
            let host = std::mem::replace(&mut self.bus.host, Box::new(NullHost));
            self.cpu = Cpu::new(true);
            self.bus = Bus::new(true, host);
        }
    }

    /// One master tick. The CPU clock domain (CPU, timer, OAM DMA) runs twice
    /// per tick in double-speed mode; the PPU always advances one dot; the
    /// APU is throttled to native pitch.
    pub fn tick(&mut self) {
        let iterations = if self.bus.double_speed() { 2 } else { 1 };
        for _ in 0..iterations {
            self.cpu.tick(&mut self.bus);
            self.bus.cpu_domain_tick();
            let stall = self.bus.take_pending_stall();
            if stall > 0 {
                self.cpu.stall(stall);
            }
        }
        self.bus.ppu_dot();
        let stall = self.bus.take_pending_stall();
        if stall > 0 {
            self.cpu.stall(stall);
        }
        self.bus.apu_throttled_tick();
    }

    /// Drive the machine until the CPU executes STOP without an armed speed
    /// switch (or the host drops the core).
    pub fn run(&mut self) {
        let start = self.bus.host.millis();
        while !self.cpu.stopped {
            self.tick();
        }
        let elapsed = self.bus.host.millis().wrapping_sub(start);
        log::info!(
            target: "system",
            "CPU stopped: {} cycles, {} frames, {} ms of host time",
            self.cpu.cycle_cnt,
            self.bus.ppu.frames(),
            elapsed
        );
    }

    /// Copy the completed frame (0xAABBGGRR per pixel, 160x144 row-major).
    pub fn get_video_data(&self, out: &mut [u32; FRAME_PIXELS]) {
        out.copy_from_slice(self.bus.ppu.ready_frame());
    }

    /// Drain the audio ring into the given per-side buffers, resetting its
    /// fill index. Returns the number of samples copied per side.
    pub fn get_audio_data(&mut self, out_left: &mut [u8], out_right: &mut [u8]) -> usize {
        self.bus.apu.ring.drain(out_left, out_right)
    }

    fn collect_sections(&self) -> [Vec<u8>; 5] {
        let serialize = |f: &dyn Fn(&mut StateWriter)| {
            let mut w = StateWriter::new();
            f(&mut w);
            w.into_bytes()
        };
        [
            serialize(&|w| self.cpu.save_state(w)),
            serialize(&|w| self.bus.save_state(w)),
            serialize(&|w| self.bus.ppu.save_state(w)),
            serialize(&|w| self.bus.apu.save_state(w)),
            serialize(&|w| self.bus.timer.save_state(w)),
        ]
    }

    /// Write all subsystem sections through the host's save callback, in the
    /// fixed order CPU, bus, PPU, APU, timer.
    pub fn write_save_file(&mut self) {
        let sections = self.collect_sections();
        for (bytes, tag) in sections.iter().zip(SECTION_TAGS) {
            self.bus.host.write_save(bytes, tag);
        }
    }

    /// Restore a snapshot previously produced by [`write_save_file`] on an
    /// identically-configured core. All sections are read from the host
    /// before any state is applied, so a short or unreadable file leaves the
    /// core untouched.
    ///
    /// [`write_save_file`]: System::write_save_file
    pub fn load_save_file(&mut self) -> Result<(), SaveStateError> {
        let mut buffers = self.collect_sections();
        for buf in &mut buffers {
            self.bus
                .host
                .read_save(buf)
                .map_err(|_| SaveStateError::Host)?;
        }
        self.cpu.load_state(&mut StateReader::new(&buffers[0]))?;
        self.bus.load_state(&mut StateReader::new(&buffers[1]))?;
        self.bus.ppu.load_state(&mut StateReader::new(&buffers[2]))?;
        self.bus.apu.load_state(&mut StateReader::new(&buffers[3]))?;
        self.bus
            .timer
            .load_state(&mut StateReader::new(&buffers[4]))?;
        Ok(())
    }
}
