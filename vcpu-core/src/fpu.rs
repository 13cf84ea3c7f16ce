//! FPU/vector context switching around the hardware resume call.
//!
//! The resume syscall does not preserve the calling thread's FPU and vector
//! registers across the privileged transition, so the worker swaps the host
//! register file with the guest's before every entry and back after every
//! exit. The required call order is:
//!
//! `save_host` -> `load_guest` -> (resume) -> `save_guest` -> `restore_host`

use crate::state::cell::FpuCell;

/// One FXSAVE image. 512 bytes, 16-byte aligned as the instruction requires.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
pub struct FpuImage(pub [u8; 512]);

static_assertions::const_assert_eq!(core::mem::size_of::<FpuImage>(), 512);

impl FpuImage {
    pub const fn zeroed() -> Self {
        Self([0u8; 512])
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        fn fxsave(image: &mut FpuImage) {
            unsafe {
                core::arch::asm!(
                    "fxsave64 [{}]",
                    in(reg) image.0.as_mut_ptr(),
                    options(nostack),
                );
            }
        }

        fn fxrstor(image: &FpuImage) {
            unsafe {
                core::arch::asm!(
                    "fxrstor64 [{}]",
                    in(reg) image.0.as_ptr(),
                    options(nostack, readonly),
                );
            }
        }
    } else {
        fn fxsave(_image: &mut FpuImage) {}
        fn fxrstor(_image: &FpuImage) {}
    }
}

/// Swaps the worker thread's FPU register file with the guest's.
///
/// Keeps an internal copy of the guest image so that iterations where the
/// caller did not charge a new FPU blob re-load the state captured after the
/// previous exit. The initial copy is captured from the constructing thread,
/// which guarantees every image ever passed to FXRSTOR was produced by
/// FXSAVE.
pub struct FpuSwitch {
    guest: FpuImage,
}

impl FpuSwitch {
    pub fn new() -> Self {
        let mut guest = FpuImage::zeroed();
        fxsave(&mut guest);
        Self { guest }
    }

    /// Captures the host register file before entering the guest.
    pub fn save_host(&self) -> FpuImage {
        let mut host = FpuImage::zeroed();
        fxsave(&mut host);
        host
    }

    /// Loads the charged guest image if the caller provided one, otherwise
    /// the image cached from the previous exit.
    pub fn load_guest(&mut self, cell: &mut FpuCell) {
        if let Some(image) = cell.consume() {
            self.guest = *image;
        }
        fxrstor(&self.guest);
    }

    /// Captures the guest register file after an exit, into both the cache
    /// and the state cell (the read-in step always charges).
    pub fn save_guest(&mut self, cell: &mut FpuCell) {
        fxsave(&mut self.guest);
        cell.refresh(&self.guest);
    }

    /// Restores the host register file captured by `save_host`.
    pub fn restore_host(&self, host: &FpuImage) {
        fxrstor(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_swap_cycle_round_trips() {
        let mut switch = FpuSwitch::new();
        let mut cell = FpuCell::new();

        cell.charge_with(|buf| {
            buf[32] = 0xab; // first xmm byte, ignored by fxrstor validity checks
            buf.len()
        });

        let host = switch.save_host();
        switch.load_guest(&mut cell);
        assert!(!cell.charged(), "load consumes the charge");

        switch.save_guest(&mut cell);
        switch.restore_host(&host);

        assert!(cell.charged(), "read-in always charges");
    }

    #[test]
    fn uncharged_cell_loads_cached_image() {
        let mut switch = FpuSwitch::new();
        let mut cell = FpuCell::new();

        let host = switch.save_host();
        switch.load_guest(&mut cell);
        switch.save_guest(&mut cell);
        switch.restore_host(&host);
    }
}
