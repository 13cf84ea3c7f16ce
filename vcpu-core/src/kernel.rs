//! The raw kernel interface the core drives.
//!
//! The wire format of the hypervisor syscalls is not this library's
//! business: the kernel exposes the hardware block as an opaque,
//! field-addressed register blob plus the worker thread's general-purpose
//! register frame. The Intel codec addresses the blob with architectural
//! VMCS encodings, the AMD codec with VMCB byte offsets.

use snafu::Snafu;

/// Hardware vendor of the virtualization facility backing a vCPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vendor {
    Vmx,
    Svm,
    Unknown,
}

/// Outcome of the blocking resume syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeStatus {
    /// The call returned normally; the hardware exit code tells why.
    Exited,
    /// The kernel reported a failed interrupt delivery. Together with the
    /// vendor's external-interrupt exit code this identifies an exit forced
    /// by the pause line rather than by the guest.
    DeliveryFailed,
}

/// General-purpose registers kept in the worker thread's kernel state
/// rather than in the hardware block.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct GprFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

static_assertions::const_assert_eq!(core::mem::size_of::<GprFrame>(), 15 * 8);

/// Software info fields of the kernel interface. The bank sits far above
/// both the VMCS encoding space and the VMCB offset space so the ids can
/// never collide with an architectural field.
pub mod sw {
    /// Interface version the kernel implements.
    pub const FIELD_VERSION: u64 = 0xf000_0000;
    /// Feature bits (bit 0: nested paging available).
    pub const FIELD_FEATURES: u64 = 0xf000_0008;

    pub const FEATURE_NESTED_PAGING: u64 = 1 << 0;
}

/// One hardware vCPU resource, bound to its worker thread.
pub trait VcpuResource: Send {
    /// Reads one field of the hardware block.
    fn read(&mut self, field: u64) -> u64;

    /// Writes one field of the hardware block.
    fn write(&mut self, field: u64, value: u64);

    /// The auxiliary GPR frame shared with the kernel thread state.
    fn regs(&mut self) -> &mut GprFrame;

    /// Runs the guest until the next exit. Blocks; this is where all guest
    /// execution time is spent. Can be cut short by [`PauseLine::trigger`].
    fn resume(&mut self) -> ResumeStatus;
}

/// The interrupt line used to force a vCPU out of guest execution.
pub trait PauseLine: Send + Sync {
    /// Fire-and-forget; observed by an in-flight resume call as an
    /// early-abort condition.
    fn trigger(&self);

    /// Drains a pending trigger so the next resume is not bounced
    /// immediately.
    fn ack(&self);
}

/// Single-slot notification channel towards the owning VMM dispatch logic.
/// Posts coalesce while a notification is pending.
pub trait ExitSignal: Send + Sync {
    fn notify(&self);
}

/// Failures reported by the kernel when creating the hardware-side vCPU.
#[derive(Debug, Snafu)]
pub enum KernelError {
    #[snafu(display("kernel refused to create the vcpu (code {code})"))]
    CreateFailed { code: i64 },

    #[snafu(display("virtualization extensions are not available"))]
    Unsupported,
}
