//! Execution and state-synchronization core for hardware-assisted virtual
//! CPUs.
//!
//! The crate runs each guest vCPU on a dedicated worker thread and gives the
//! VMM a vendor-neutral view of the architectural state: a [`VcpuState`] of
//! dirty-tracked register cells, translated to the Intel VMCS or the AMD
//! VMCB layout by a per-vendor codec. The VMM steers a vCPU through
//! [`Vcpu::resume`] and [`Vcpu::with_state`] and learns about guest exits
//! through its [`ExitSignal`].

pub mod backend;
pub mod fpu;
pub mod kernel;
pub mod state;
pub mod sync;
pub mod vcpu;

pub use backend::{EXIT_PAUSED, EXIT_STARTUP};
pub use kernel::{ExitSignal, GprFrame, KernelError, PauseLine, ResumeStatus, VcpuResource, Vendor};
pub use state::{DescriptorTable, Segment, VcpuState};
pub use vcpu::{Vcpu, VcpuBuilder, VcpuError};
