use std::cell::{Cell, RefCell};
use std::rc::Rc;

use prism_gb_core::host::{Host, HostSaveError};
use prism_gb_core::system::System;

/// Shared, inspectable state behind a [`TestHost`].
#[derive(Default)]
pub struct HostState {
    pub buttons: Cell<u8>,
    pub speed: Cell<u8>,
    pub millis: Cell<u32>,
    /// Number of audio-drain handshakes the core requested.
    pub waits: Cell<u32>,
    pub save: RefCell<Vec<u8>>,
    pub read_pos: Cell<usize>,
}

/// Scriptable host: tests keep the `Rc<HostState>` and tweak it mid-run.
pub struct TestHost(pub Rc<HostState>);

impl Host for TestHost {
    fn buttons(&self) -> u8 {
        self.0.buttons.get()
    }

    fn wait_for_samples_consumed(&self) {
        self.0.waits.set(self.0.waits.get() + 1);
    }

    fn millis(&self) -> u32 {
        self.0.millis.get()
    }

    fn speed(&self) -> u8 {
        match self.0.speed.get() {
            0 => 10,
            s => s,
        }
    }

    fn write_save(&mut self, bytes: &[u8], _tag: &str) {
        self.0.save.borrow_mut().extend_from_slice(bytes);
    }

    fn read_save(&mut self, buf: &mut [u8]) -> Result<(), HostSaveError> {
        let save = self.0.save.borrow();
        let pos = self.0.read_pos.get();
        let end = pos + buf.len();
        if end > save.len() {
            return Err(HostSaveError);
        }
        buf.copy_from_slice(&save[pos..end]);
        self.0.read_pos.set(end);
        Ok(())
    }
}

#[allow(dead_code)]
pub fn test_host() -> (Rc<HostState>, Box<TestHost>) {
    let state = Rc::new(HostState::default());
    let host = Box::new(TestHost(Rc::clone(&state)));
    (state, host)
}

/// Synthetic cartridge image with a valid header checksum.
#[allow(dead_code)]
pub fn build_rom(cart_type: u8, ram_code: u8, cgb: bool, banks: usize) -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000 * banks.max(2)];
    rom[0x143] = if cgb { 0x80 } else { 0x00 };
    rom[0x147] = cart_type;
    rom[0x149] = ram_code;
    patch_header_checksum(&mut rom);
    rom
}

#[allow(dead_code)]
pub fn patch_header_checksum(rom: &mut [u8]) {
    rom[0x14D] = rom[0x134..=0x14C]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1));
}

/// CGB system with a plain MBC5 cartridge and an inspectable host.
#[allow(dead_code)]
pub fn make_system() -> (Rc<HostState>, System) {
    let (state, host) = test_host();
    let mut sys = System::new(host);
    sys.load_cartridge(build_rom(0x19, 0x03, true, 2)).unwrap();
    (state, sys)
}
