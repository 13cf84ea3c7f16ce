//! Register block codecs for the two hardware layouts.
//!
//! Each vendor backend translates between [`VcpuState`] and its hardware
//! block field by field. The vendor is picked once at construction; the
//! worker loop only ever talks to the [`RegisterCodec`] trait.

pub mod svm;
pub mod vmcb;
pub mod vmcs;
pub mod vmx;

use crate::kernel::{VcpuResource, Vendor};
use crate::state::VcpuState;

/// Sentinel exit reason: no exit has occurred yet.
pub const EXIT_STARTUP: u64 = 0xfe;

/// Sentinel exit reason: the guest was stopped by a pause request, not by
/// its own activity.
pub const EXIT_PAUSED: u64 = 0xff;

/// Interface version both codecs expect from the kernel.
pub const SW_API_VERSION: u64 = 2;

/// Field-by-field translation between the neutral state and one vendor's
/// hardware layout.
pub trait RegisterCodec: Send {
    /// One-time control setup before the first entry.
    fn setup(&mut self, hw: &mut dyn VcpuResource);

    /// Probes the raw hardware exit code after a resume call returned.
    fn exit_reason(&mut self, hw: &mut dyn VcpuResource) -> u64;

    /// The vendor's code for an exit forced by an external interrupt, i.e.
    /// the code a pause trigger produces.
    fn pause_exit(&self) -> u64;

    /// Pushes every charged field into the hardware block. Fields that are
    /// not charged are left untouched.
    fn write_state(&mut self, state: &mut VcpuState, hw: &mut dyn VcpuResource);

    /// Refreshes (and charges) every field this vendor exposes. `reason` is
    /// the already-finalized exit reason; it selects between the exit-time
    /// and the pending event-injection pair.
    fn read_state(&mut self, state: &mut VcpuState, hw: &mut dyn VcpuResource, reason: u64);
}

/// Selects the codec for a vendor tag. `Vendor::Unknown` is rejected before
/// this point by the builder.
pub fn codec_for(vendor: Vendor) -> Box<dyn RegisterCodec> {
    match vendor {
        Vendor::Vmx => Box::new(vmx::VmxCodec::new()),
        Vendor::Svm => Box::new(svm::SvmCodec::new()),
        Vendor::Unknown => unreachable!("builder rejects unknown vendors"),
    }
}

/// Current hardware timestamp counter.
pub(crate) fn read_tsc() -> u64 {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            #[allow(unused_unsafe)]
            unsafe { x86::time::rdtsc() }
        } else {
            0
        }
    }
}
