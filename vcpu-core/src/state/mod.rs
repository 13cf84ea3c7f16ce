//! Vendor-neutral snapshot of one virtual CPU's architectural state.

pub mod cell;

use crate::backend::EXIT_STARTUP;
use cell::{Charge, FpuCell};

/// One segment descriptor as the VMM sees it.
///
/// `ar` uses the 16-bit packed access-rights layout (type, S, DPL, P in the
/// low byte; AVL, L, D/B, G, unusable above). The Intel codec translates
/// this to and from the 32-bit VMX-native layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Segment {
    pub sel: u16,
    pub ar: u16,
    pub limit: u32,
    pub base: u64,
}

/// A descriptor-table range (GDTR/IDTR).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorTable {
    pub limit: u32,
    pub base: u64,
}

/// The state exchanged between the VMM logic and the hardware layer.
///
/// Every field tracks independently whether the caller has written a new
/// value since the last hardware synchronization. One instance exists per
/// vCPU, owned by its worker thread and exposed to other threads only
/// through `Vcpu::with_state`.
pub struct VcpuState {
    pub rax: Charge<u64>,
    pub rbx: Charge<u64>,
    pub rcx: Charge<u64>,
    pub rdx: Charge<u64>,
    pub rbp: Charge<u64>,
    pub rsi: Charge<u64>,
    pub rdi: Charge<u64>,
    pub r8: Charge<u64>,
    pub r9: Charge<u64>,
    pub r10: Charge<u64>,
    pub r11: Charge<u64>,
    pub r12: Charge<u64>,
    pub r13: Charge<u64>,
    pub r14: Charge<u64>,
    pub r15: Charge<u64>,

    pub rip: Charge<u64>,
    /// Encoded length of the instruction at `rip`, as reported on exit.
    pub rip_len: Charge<u64>,
    pub rsp: Charge<u64>,
    pub rflags: Charge<u64>,

    pub cr0: Charge<u64>,
    pub cr2: Charge<u64>,
    pub cr3: Charge<u64>,
    pub cr4: Charge<u64>,
    /// Guest-visible CR0 value where bits are intercepted by the host.
    pub cr0_shadow: Charge<u64>,
    pub cr4_shadow: Charge<u64>,
    pub dr7: Charge<u64>,

    pub cs: Charge<Segment>,
    pub ss: Charge<Segment>,
    pub es: Charge<Segment>,
    pub ds: Charge<Segment>,
    pub fs: Charge<Segment>,
    pub gs: Charge<Segment>,
    pub ldtr: Charge<Segment>,
    pub tr: Charge<Segment>,

    pub gdtr: Charge<DescriptorTable>,
    pub idtr: Charge<DescriptorTable>,

    pub sysenter_cs: Charge<u64>,
    pub sysenter_sp: Charge<u64>,
    pub sysenter_ip: Charge<u64>,

    pub efer: Charge<u64>,
    pub star: Charge<u64>,
    pub lstar: Charge<u64>,
    pub cstar: Charge<u64>,
    pub fmask: Charge<u64>,
    pub kernel_gs_base: Charge<u64>,

    /// Exit qualification (Intel) / EXITINFO1 (AMD).
    pub qual_primary: Charge<u64>,
    /// Guest-physical address (Intel) / EXITINFO2 (AMD).
    pub qual_secondary: Charge<u64>,

    /// Event-injection information word. On read this holds either the
    /// event that accompanied the exit or the event still pending for the
    /// next entry, depending on the exit reason. On write it requests an
    /// injection on the next entry.
    pub inj_info: Charge<u32>,
    pub inj_error: Charge<u32>,

    /// Processor interruptibility state.
    pub intr_state: Charge<u32>,

    /// Vendor-specific control words (primary/secondary execution controls
    /// on Intel, intercept words on AMD). Used among other things to toggle
    /// the interrupt-window exit.
    pub ctrl_primary: Charge<u32>,
    pub ctrl_secondary: Charge<u32>,

    /// Current timestamp counter, refreshed on every read-in.
    pub tsc: Charge<u64>,
    /// Additive: every charged value is a delta accumulated onto the
    /// absolute offset programmed into hardware.
    pub tsc_offset: Charge<u64>,

    pub exit_reason: Charge<u64>,

    pub fpu: FpuCell,

    // Not supported by this kernel interface; charging them draws a one-time
    // diagnostic and is otherwise ignored.
    pub pdpte_0: Charge<u64>,
    pub pdpte_1: Charge<u64>,
    pub pdpte_2: Charge<u64>,
    pub pdpte_3: Charge<u64>,
    pub tpr: Charge<u32>,
    pub tpr_threshold: Charge<u32>,
}

impl VcpuState {
    pub fn new() -> Self {
        Self {
            rax: Charge::default(),
            rbx: Charge::default(),
            rcx: Charge::default(),
            rdx: Charge::default(),
            rbp: Charge::default(),
            rsi: Charge::default(),
            rdi: Charge::default(),
            r8: Charge::default(),
            r9: Charge::default(),
            r10: Charge::default(),
            r11: Charge::default(),
            r12: Charge::default(),
            r13: Charge::default(),
            r14: Charge::default(),
            r15: Charge::default(),
            rip: Charge::default(),
            rip_len: Charge::default(),
            rsp: Charge::default(),
            rflags: Charge::default(),
            cr0: Charge::default(),
            cr2: Charge::default(),
            cr3: Charge::default(),
            cr4: Charge::default(),
            cr0_shadow: Charge::default(),
            cr4_shadow: Charge::default(),
            dr7: Charge::default(),
            cs: Charge::default(),
            ss: Charge::default(),
            es: Charge::default(),
            ds: Charge::default(),
            fs: Charge::default(),
            gs: Charge::default(),
            ldtr: Charge::default(),
            tr: Charge::default(),
            gdtr: Charge::default(),
            idtr: Charge::default(),
            sysenter_cs: Charge::default(),
            sysenter_sp: Charge::default(),
            sysenter_ip: Charge::default(),
            efer: Charge::default(),
            star: Charge::default(),
            lstar: Charge::default(),
            cstar: Charge::default(),
            fmask: Charge::default(),
            kernel_gs_base: Charge::default(),
            qual_primary: Charge::default(),
            qual_secondary: Charge::default(),
            inj_info: Charge::default(),
            inj_error: Charge::default(),
            intr_state: Charge::default(),
            ctrl_primary: Charge::default(),
            ctrl_secondary: Charge::default(),
            tsc: Charge::default(),
            tsc_offset: Charge::default(),
            exit_reason: Charge::preset(EXIT_STARTUP),
            fpu: FpuCell::new(),
            pdpte_0: Charge::default(),
            pdpte_1: Charge::default(),
            pdpte_2: Charge::default(),
            pdpte_3: Charge::default(),
            tpr: Charge::default(),
            tpr_threshold: Charge::default(),
        }
    }
}

impl Default for VcpuState {
    fn default() -> Self {
        Self::new()
    }
}
