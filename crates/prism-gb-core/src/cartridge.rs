use std::{fs, io, path::Path};

use thiserror::Error;

use crate::snapshot::{SaveStateError, StateReader, StateWriter};

const HEADER_END: usize = 0x150;
const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not open cartridge image: {0}")]
    Io(#[from] io::Error),
    #[error("cartridge image is smaller than the header ({0} bytes)")]
    TooSmall(usize),
    #[error("header checksum mismatch (expected {expected:#04X}, computed {computed:#04X})")]
    HeaderChecksum { expected: u8, computed: u8 },
    #[error("unsupported cartridge type {0:#04X}")]
    UnsupportedCartridgeType(u8),
    #[error("unsupported RAM size code {0:#04X}")]
    UnsupportedRamSize(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
    NoMbc,
    Mbc5,
}

#[derive(Debug)]
enum MbcState {
    NoMbc,
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
    },
}

#[derive(Debug)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub mbc: MbcType,
    pub cgb: bool,
    pub title: String,
    cart_type: u8,
    mbc_state: MbcState,
}

impl Cartridge {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let data = fs::read(path)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, LoadError> {
        let header = Header::parse(&data)?;
        header.verify_checksum()?;

        let cart_type = header.cart_type();
        let mbc = match cart_type {
            0x00 => MbcType::NoMbc,
            0x19..=0x1E => MbcType::Mbc5,
            other => return Err(LoadError::UnsupportedCartridgeType(other)),
        };
        let ram_size = header.ram_size()?;
        let cgb = header.cgb_supported();
        let title = header.title();

        let mbc_state = match mbc {
            MbcType::NoMbc => MbcState::NoMbc,
            MbcType::Mbc5 => MbcState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
        };

        log::info!(
            target: "cartridge",
            "loaded \"{}\" ({:?}, CGB: {}, ROM {} KiB, RAM {} KiB)",
            title,
            mbc,
            if cgb { "yes" } else { "no" },
            data.len() / 1024,
            ram_size / 1024
        );

        Ok(Self {
            rom: data,
            ram: vec![0; ram_size],
            mbc,
            cgb,
            title,
            cart_type,
            mbc_state,
        })
    }

    pub fn read(&self, addr: u16) -> u8 {
        match (&self.mbc_state, addr) {
            (MbcState::NoMbc, 0x0000..=0x7FFF) => {
                self.rom.get(addr as usize).copied().unwrap_or(0xFF)
            }
            (MbcState::NoMbc, 0xA000..=0xBFFF) => {
                let idx = addr as usize - 0xA000;
                self.ram.get(idx).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc5 { .. }, 0x0000..=0x3FFF) => {
                self.rom.get(addr as usize).copied().unwrap_or(0xFF)
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                // MBC5 allows mapping bank 0 into the switchable window.
                let offset = (*rom_bank as usize) * ROM_BANK_SIZE + (addr as usize - 0x4000);
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            (
                MbcState::Mbc5 {
                    ram_enable,
                    ram_bank,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if !*ram_enable {
                    0xFF
                } else {
                    let idx = (*ram_bank as usize) * RAM_BANK_SIZE + addr as usize - 0xA000;
                    self.ram.get(idx).copied().unwrap_or(0xFF)
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match (&mut self.mbc_state, addr) {
            (MbcState::NoMbc, 0xA000..=0xBFFF) => {
                let idx = addr as usize - 0xA000;
                if let Some(b) = self.ram.get_mut(idx) {
                    *b = val;
                }
            }
            (MbcState::NoMbc, 0x0000..=0x7FFF) => {
                log::debug!(
                    target: "cartridge",
                    "MBC write ignored (ROM only): {addr:#06X} <- {val:#04X}"
                );
            }
            (MbcState::Mbc5 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x2000..=0x2FFF) => {
                *rom_bank = (*rom_bank & 0x100) | val as u16;
            }
            (MbcState::Mbc5 { rom_bank, .. }, 0x3000..=0x3FFF) => {
                *rom_bank = (*rom_bank & 0xFF) | (((val & 0x01) as u16) << 8);
            }
            (MbcState::Mbc5 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x0F;
            }
            (MbcState::Mbc5 { .. }, 0x6000..=0x7FFF) => {}
            (
                MbcState::Mbc5 {
                    ram_enable,
                    ram_bank,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if *ram_enable {
                    let idx = (*ram_bank as usize) * RAM_BANK_SIZE + addr as usize - 0xA000;
                    if let Some(b) = self.ram.get_mut(idx) {
                        *b = val;
                    }
                }
            }
            _ => {}
        }
    }

    pub fn cart_type(&self) -> u8 {
        self.cart_type
    }

    pub fn save_state(&self, w: &mut StateWriter) {
        match &self.mbc_state {
            MbcState::NoMbc => {
                w.put_u16(1);
                w.put_u8(0);
                w.put_bool(false);
            }
            MbcState::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enable,
            } => {
                w.put_u16(*rom_bank);
                w.put_u8(*ram_bank);
                w.put_bool(*ram_enable);
            }
        }
        w.put_bytes(&self.ram);
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), SaveStateError> {
        let rom_bank = r.get_u16()?;
        let ram_bank = r.get_u8()?;
        let ram_enable = r.get_bool()?;
        r.get_bytes(&mut self.ram)?;
        if let MbcState::Mbc5 {
            rom_bank: rb,
            ram_bank: eb,
            ram_enable: en,
        } = &mut self.mbc_state
        {
            *rb = rom_bank & 0x1FF;
            *eb = ram_bank & 0x0F;
            *en = ram_enable;
        }
        Ok(())
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, LoadError> {
        if data.len() < HEADER_END {
            return Err(LoadError::TooSmall(data.len()));
        }
        Ok(Self { data })
    }

    /// The checksum byte at 0x14D covers 0x134..=0x14C:
    /// `chk = sum of -(byte + 1) mod 256`.
    fn verify_checksum(&self) -> Result<(), LoadError> {
        let computed = self.data[0x134..=0x14C]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1));
        let expected = self.data[0x14D];
        if computed != expected {
            return Err(LoadError::HeaderChecksum { expected, computed });
        }
        Ok(())
    }

    fn title(&self) -> String {
        let mut slice = &self.data[0x134..0x143];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cgb_supported(&self) -> bool {
        self.data[0x143] & 0x80 != 0
    }

    fn cart_type(&self) -> u8 {
        self.data[0x147]
    }

    fn ram_size(&self) -> Result<usize, LoadError> {
        match self.data[0x149] {
            0x00 => Ok(0),
            0x02 => Ok(0x2000),  // 8 KiB
            0x03 => Ok(0x8000),  // 32 KiB (4 banks)
            0x04 => Ok(0x20000), // 128 KiB (16 banks)
            0x05 => Ok(0x10000), // 64 KiB (8 banks)
            other => Err(LoadError::UnsupportedRamSize(other)),
        }
    }
}
