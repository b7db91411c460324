use thiserror::Error;

/// Joypad snapshot bits as delivered by [`Host::buttons`].
pub const BUTTON_A: u8 = 1 << 0;
pub const BUTTON_B: u8 = 1 << 1;
pub const BUTTON_SELECT: u8 = 1 << 2;
pub const BUTTON_START: u8 = 1 << 3;
pub const BUTTON_RIGHT: u8 = 1 << 4;
pub const BUTTON_LEFT: u8 = 1 << 5;
pub const BUTTON_UP: u8 = 1 << 6;
pub const BUTTON_DOWN: u8 = 1 << 7;

/// Speed bounds for [`Host::speed`], in units of 10 % (10 = 100 %, 20 = 200 %).
pub const SPEED_MIN: u8 = 10;
pub const SPEED_MAX: u8 = 20;

#[derive(Debug, Error)]
#[error("host failed to provide save data")]
pub struct HostSaveError;

/// Frontend callbacks consumed by the core.
///
/// All methods are invoked from the emulation thread. `buttons` must return a
/// buffered snapshot without blocking; `wait_for_samples_consumed` is the only
/// call that may block (until the frontend has drained the audio ring).
pub trait Host {
    /// Buffered joypad state; a set `BUTTON_*` bit means "pressed".
    fn buttons(&self) -> u8 {
        0
    }

    /// Called when the audio ring hits its high-water mark. Blocks until the
    /// frontend has pulled the samples via `System::get_audio_data`.
    fn wait_for_samples_consumed(&self) {}

    /// Monotonic millisecond clock, used for run statistics.
    fn millis(&self) -> u32 {
        0
    }

    /// Emulation speed in `[10, 20]` (100 %–200 % of the original clock).
    /// Out-of-range values are clamped by the core.
    fn speed(&self) -> u8 {
        SPEED_MIN
    }

    /// Append one tagged snapshot section to the save file.
    fn write_save(&mut self, _bytes: &[u8], _tag: &str) {}

    /// Fill `buf` with the next `buf.len()` bytes of the save file. Sections
    /// are requested in the same order they were written.
    fn read_save(&mut self, _buf: &mut [u8]) -> Result<(), HostSaveError> {
        Err(HostSaveError)
    }
}

/// Host that ignores all output and reports no input. Backs headless use and
/// unit tests.
#[derive(Default)]
pub struct NullHost;

impl Host for NullHost {}
