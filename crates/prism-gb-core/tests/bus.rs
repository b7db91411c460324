mod common;

use common::{build_rom, make_system, test_host};
use prism_gb_core::host::{BUTTON_A, BUTTON_DOWN};
use prism_gb_core::system::System;

#[test]
fn wram_echo_and_bank_switch() {
    let (_, mut sys) = make_system();
    sys.bus.write(0xC000, 0xAA);
    assert_eq!(sys.bus.read(0xC000), 0xAA);
    sys.bus.write(0xE000, 0xBB);
    assert_eq!(sys.bus.read(0xC000), 0xBB);

    sys.bus.write(0xFF70, 0x02);
    sys.bus.write(0xD000, 0xCC);
    assert_eq!(sys.bus.read(0xD000), 0xCC);

    sys.bus.write(0xFF70, 0x03);
    assert_eq!(sys.bus.read(0xD000), 0x00);
    sys.bus.write(0xD000, 0xDD);
    assert_eq!(sys.bus.read(0xD000), 0xDD);

    sys.bus.write(0xFF70, 0x02);
    assert_eq!(sys.bus.read(0xD000), 0xCC);
    // Bank 0 is remapped to 1.
    sys.bus.write(0xFF70, 0x00);
    sys.bus.write(0xD000, 0xEE);
    assert_eq!(sys.bus.read(0xF000), 0xEE);
}

#[test]
fn vram_bank_switch() {
    let (_, mut sys) = make_system();
    sys.bus.write(0x8000, 0x11);
    assert_eq!(sys.bus.read(0x8000), 0x11);

    sys.bus.write(0xFF4F, 0x01);
    assert_eq!(sys.bus.read(0x8000), 0x00);
    sys.bus.write(0x8000, 0x22);
    assert_eq!(sys.bus.read(0x8000), 0x22);

    sys.bus.write(0xFF4F, 0x00);
    assert_eq!(sys.bus.read(0x8000), 0x11);
}

#[test]
fn prohibited_region_reads_ff_and_drops_writes() {
    let (_, mut sys) = make_system();
    sys.bus.write(0xFEA0, 0x55);
    assert_eq!(sys.bus.read(0xFEA0), 0xFF);
    assert_eq!(sys.bus.read(0xFEFF), 0xFF);
}

#[test]
fn if_register_keeps_upper_bits() {
    let (_, mut sys) = make_system();
    sys.bus.write(0xFF0F, 0x00);
    assert_eq!(sys.bus.read(0xFF0F) & 0xE0, 0xE0);
    sys.bus.set_irq(0x04);
    assert_eq!(sys.bus.read(0xFF0F) & 0x1F, 0x04);
}

#[test]
fn oam_dma_copies_one_byte_every_four_cycles() {
    let (_, mut sys) = make_system();
    for i in 0..0xA0u16 {
        sys.bus.write(0xC100 + i, i as u8 ^ 0x5A);
    }
    sys.bus.write(0xFF46, 0xC1);
    assert_eq!(sys.bus.read(0xFF46), 0xC1);
    assert!(sys.bus.oam_dma_active());

    // 160 bytes at one byte per four master cycles.
    for _ in 0..4 * 0xA0 {
        sys.bus.cpu_domain_tick();
    }
    assert!(!sys.bus.oam_dma_active());
    for i in 0..0xA0usize {
        assert_eq!(sys.bus.ppu.oam[i], (i as u8) ^ 0x5A, "OAM byte {i}");
    }
}

#[test]
fn oam_dma_source_above_0xdf_wraps_to_echo() {
    let (_, mut sys) = make_system();
    sys.bus.write(0xC200, 0x77);
    // Page 0xE2 mirrors 0xC2.
    sys.bus.write(0xFF46, 0xE2);
    for _ in 0..4 * 0xA0 {
        sys.bus.cpu_domain_tick();
    }
    assert_eq!(sys.bus.ppu.oam[0], 0x77);
}

#[test]
fn stop_with_armed_key1_switches_speed() {
    let (_, mut sys) = make_system();
    assert_eq!(sys.bus.read(0xFF4D) & 0x80, 0);

    sys.bus.write(0xFF4D, 0x01); // arm the switch
    sys.bus.write(0xC000, 0x10); // STOP
    sys.cpu.pc = 0xC000;
    sys.cpu.step(&mut sys.bus);
    assert!(!sys.cpu.stopped);
    assert!(sys.bus.double_speed());
    assert_eq!(sys.bus.read(0xFF4D), 0x80 | 0x7E);
    // The divider restarts on the switch.
    assert_eq!(sys.bus.read(0xFF04), 0);

    // STOP without an armed switch halts the machine.
    sys.bus.write(0xC002, 0x10);
    sys.cpu.step(&mut sys.bus);
    assert!(sys.cpu.stopped);
}

#[test]
fn double_speed_runs_cpu_domain_twice_per_ppu_dot() {
    let (_, mut sys) = make_system();
    sys.bus.write(0xFF4D, 0x01);
    sys.bus.write(0xC000, 0x10);
    sys.cpu.pc = 0xC000;
    sys.cpu.step(&mut sys.bus);
    assert!(sys.bus.double_speed());

    let div_start = sys.bus.timer.div;
    let cycles_start = sys.cpu.cycle_cnt;
    for _ in 0..456 {
        sys.tick();
    }
    // PPU advanced one scanline while the CPU clock domain saw 912 cycles.
    assert_eq!(sys.bus.ppu.ly(), 1);
    assert_eq!(sys.bus.timer.div.wrapping_sub(div_start), 912);
    assert_eq!(sys.cpu.cycle_cnt - cycles_start, 912);
}

#[test]
fn joypad_reads_host_snapshot() {
    let (state, mut sys) = make_system();
    state.buttons.set(BUTTON_A | BUTTON_DOWN);

    sys.bus.write(0xFF00, 0x10); // select the d-pad group
    assert_eq!(sys.bus.read(0xFF00) & 0x0F, 0x0F & !0x08);
    sys.bus.write(0xFF00, 0x20); // select the button group
    assert_eq!(sys.bus.read(0xFF00) & 0x0F, 0x0F & !0x01);
    sys.bus.write(0xFF00, 0x30);
    assert_eq!(sys.bus.read(0xFF00) & 0x0F, 0x0F);
}

#[test]
fn dmg_cartridge_selects_dmg_mode() {
    let (_, host) = test_host();
    let mut sys = System::new(host);
    sys.load_cartridge(build_rom(0x00, 0x00, false, 2)).unwrap();
    assert!(!sys.bus.is_cgb());
    assert_eq!(sys.cpu.a, 0x01);
    // CGB-only registers fall back to open bus.
    assert_eq!(sys.bus.read(0xFF4D), 0xFF);
    assert_eq!(sys.bus.read(0xFF4F), 0xFF);
    assert_eq!(sys.bus.read(0xFF70), 0xFF);
    assert_eq!(sys.bus.read(0xFF55), 0xFF);
    assert_eq!(sys.bus.read(0xFF76), 0xFF);
}

#[test]
fn cgb_cartridge_boots_with_a_11() {
    let (_, mut sys) = make_system();
    assert!(sys.bus.is_cgb());
    assert_eq!(sys.cpu.a, 0x11);
    assert_eq!(sys.cpu.pc, 0x0100);
    assert_eq!(sys.cpu.sp, 0xFFFE);
}

#[test]
fn mbc5_banking_through_the_bus() {
    let (_, host) = test_host();
    let mut rom = build_rom(0x19, 0x03, true, 4);
    for bank in 0..4 {
        rom[bank * 0x4000 + 0x200] = 0xB0 | bank as u8;
    }
    common::patch_header_checksum(&mut rom);
    let mut sys = System::new(host);
    sys.load_cartridge(rom).unwrap();

    assert_eq!(sys.bus.read(0x0200), 0xB0);
    assert_eq!(sys.bus.read(0x4200), 0xB1);
    sys.bus.write(0x2000, 0x02);
    assert_eq!(sys.bus.read(0x4200), 0xB2);

    // External RAM needs the 0x0A enable sequence.
    sys.bus.write(0xA000, 0x12);
    assert_eq!(sys.bus.read(0xA000), 0xFF);
    sys.bus.write(0x0000, 0x0A);
    sys.bus.write(0xA000, 0x12);
    assert_eq!(sys.bus.read(0xA000), 0x12);
    sys.bus.write(0x0000, 0x00);
    assert_eq!(sys.bus.read(0xA000), 0xFF);
}

#[test]
fn serial_registers_are_stubbed() {
    let (_, mut sys) = make_system();
    sys.bus.write(0xFF01, 0x42);
    assert_eq!(sys.bus.read(0xFF01), 0x42);
    sys.bus.write(0xFF02, 0x81);
    // No transfer ever completes; the control bits just read back masked.
    assert_eq!(sys.bus.read(0xFF02), 0x81 | 0x7C);
    for _ in 0..100_000 {
        sys.tick();
    }
    assert_eq!(sys.bus.if_reg & 0x08, 0);
}
