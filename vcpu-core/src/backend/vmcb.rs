//! VMCB layout used by the AMD codec.
//!
//! See `Appendix B - Layout of VMCB` in AMD64 Architecture Programmer's
//! Manual Volume 2: System Programming. The kernel addresses the hardware
//! block by VMCB byte offset, so the field ids of the AMD codec are derived
//! from these structs with `offset_of!`.

use bitfield::bitfield;
use bitflags::bitflags;
use core::mem::offset_of;
use static_assertions::const_assert_eq;

/// Control area of the VMCB, at offset zero within the VMCB page. Padded to
/// 1024 bytes; unused bytes are reserved and must be zero.
#[repr(C)]
pub struct ControlArea {
    pub intercept_cr_read: u16,   // +0x000
    pub intercept_cr_write: u16,  // +0x002
    pub intercept_dr_read: u16,   // +0x004
    pub intercept_dr_write: u16,  // +0x006
    pub intercept_exception: u32, // +0x008

    pub intercept_misc1: u32,                // +0x00c
    pub intercept_misc2: u32,                // +0x010
    pub reserved1: [u8; 0x03c - 0x014],      // +0x014
    pub pause_filter_threshold: u16,         // +0x03c
    pub pause_filter_count: u16,             // +0x03e
    pub iopm_base_pa: u64,                   // +0x040
    pub msrpm_base_pa: u64,                  // +0x048
    pub tsc_offset: u64,                     // +0x050
    pub guest_asid: u32,                     // +0x058
    pub tlb_control: u32,                    // +0x05c
    pub vintr: u64,                          // +0x060
    pub interrupt_shadow: u64,               // +0x068
    pub exit_code: u64,                      // +0x070
    pub exit_info1: u64,                     // +0x078
    pub exit_info2: u64,                     // +0x080
    pub exit_int_info: u64,                  // +0x088
    pub np_enable: u64,                      // +0x090
    pub avic_apic_bar: u64,                  // +0x098
    pub guest_pa_of_ghcb: u64,               // +0x0a0
    pub event_inj: u64,                      // +0x0a8
    pub ncr3: u64,                           // +0x0b0
    pub lbr_virtualization_enable: u64,      // +0x0b8
    pub vmcb_clean: u64,                     // +0x0c0
    pub nrip: u64,                           // +0x0c8
    pub num_of_bytes_fetched: u8,            // +0x0d0
    pub guest_instruction_bytes: [u8; 15],   // +0x0d1
    pub avic_apic_backing_page_pointer: u64, // +0x0e0
    pub reserved2: u64,                      // +0x0e8
    pub avic_logical_table_pointer: u64,     // +0x0f0
    pub avic_physical_table_pointer: u64,    // +0x0f8
    pub reserved3: u64,                      // +0x100
    pub vmcb_save_state_pointer: u64,        // +0x108
    pub reserved4: [u8; 0x400 - 0x110],      // +0x110
}

const_assert_eq!(core::mem::size_of::<ControlArea>(), 0x400);

/// State-save area of the VMCB. Field offsets in the manual are relative to
/// the save area, which starts at [`SAVE_BASE`] within the VMCB.
#[repr(C)]
pub struct SaveArea {
    pub es_selector: u16,
    pub es_attrib: u16,
    pub es_limit: u32,
    pub es_base: u64,

    pub cs_selector: u16,
    pub cs_attrib: u16,
    pub cs_limit: u32,
    pub cs_base: u64,

    pub ss_selector: u16,
    pub ss_attrib: u16,
    pub ss_limit: u32,
    pub ss_base: u64,

    pub ds_selector: u16,
    pub ds_attrib: u16,
    pub ds_limit: u32,
    pub ds_base: u64,

    pub fs_selector: u16,
    pub fs_attrib: u16,
    pub fs_limit: u32,
    pub fs_base: u64,

    pub gs_selector: u16,
    pub gs_attrib: u16,
    pub gs_limit: u32,
    pub gs_base: u64,

    pub gdtr_selector: u16,
    pub gdtr_attrib: u16,
    pub gdtr_limit: u32,
    pub gdtr_base: u64,

    pub ldtr_selector: u16,
    pub ldtr_attrib: u16,
    pub ldtr_limit: u32,
    pub ldtr_base: u64,

    pub idtr_selector: u16,
    pub idtr_attrib: u16,
    pub idtr_limit: u32,
    pub idtr_base: u64,

    pub tr_selector: u16,
    pub tr_attrib: u16,
    pub tr_limit: u32,
    pub tr_base: u64,

    pub reserved1: [u8; 43],
    pub cpl: u8,
    pub reserved2: u32,
    pub efer: u64,
    pub reserved3: [u8; 112],
    pub cr4: u64,
    pub cr3: u64,
    pub cr0: u64,
    pub dr7: u64,
    pub dr6: u64,
    pub rflags: u64,
    pub rip: u64,
    pub reserved4: [u8; 88],
    pub rsp: u64,
    pub reserved5: [u8; 24],
    pub rax: u64,
    pub star: u64,
    pub lstar: u64,
    pub cstar: u64,
    pub sf_mask: u64,
    pub kernel_gs_base: u64,
    pub sysenter_cs: u64,
    pub sysenter_esp: u64,
    pub sysenter_eip: u64,
    pub cr2: u64,
    pub reserved6: [u8; 32],
    pub gpat: u64,
    pub dbg_ctl: u64,
    pub br_from: u64,
    pub br_to: u64,
    pub last_excep_from: u64,
    pub last_excep_to: u64,
}

const_assert_eq!(core::mem::size_of::<SaveArea>(), 0x298);

/// Start of the save area within the VMCB.
pub const SAVE_BASE: u64 = 0x400;

macro_rules! ctrl_field {
    ($name:ident, $field:ident) => {
        pub const $name: u64 = offset_of!(ControlArea, $field) as u64;
    };
}

macro_rules! save_field {
    ($name:ident, $field:ident) => {
        pub const $name: u64 = SAVE_BASE + offset_of!(SaveArea, $field) as u64;
    };
}

ctrl_field!(INTERCEPT_CR_WRITE, intercept_cr_write);
ctrl_field!(INTERCEPT_EXCEPTION, intercept_exception);
ctrl_field!(INTERCEPT_MISC1, intercept_misc1);
ctrl_field!(INTERCEPT_MISC2, intercept_misc2);
ctrl_field!(TSC_OFFSET, tsc_offset);
ctrl_field!(GUEST_ASID, guest_asid);
ctrl_field!(VINTR, vintr);
ctrl_field!(INTERRUPT_SHADOW, interrupt_shadow);
ctrl_field!(EXIT_CODE, exit_code);
ctrl_field!(EXIT_INFO1, exit_info1);
ctrl_field!(EXIT_INFO2, exit_info2);
ctrl_field!(EXIT_INT_INFO, exit_int_info);
ctrl_field!(NP_ENABLE, np_enable);
ctrl_field!(EVENT_INJ, event_inj);
ctrl_field!(NRIP, nrip);

save_field!(ES_SELECTOR, es_selector);
save_field!(CS_SELECTOR, cs_selector);
save_field!(SS_SELECTOR, ss_selector);
save_field!(DS_SELECTOR, ds_selector);
save_field!(FS_SELECTOR, fs_selector);
save_field!(GS_SELECTOR, gs_selector);
save_field!(GDTR_SELECTOR, gdtr_selector);
save_field!(LDTR_SELECTOR, ldtr_selector);
save_field!(IDTR_SELECTOR, idtr_selector);
save_field!(TR_SELECTOR, tr_selector);
save_field!(EFER, efer);
save_field!(CR4, cr4);
save_field!(CR3, cr3);
save_field!(CR0, cr0);
save_field!(DR7, dr7);
save_field!(RFLAGS, rflags);
save_field!(RIP, rip);
save_field!(RSP, rsp);
save_field!(RAX, rax);
save_field!(STAR, star);
save_field!(LSTAR, lstar);
save_field!(CSTAR, cstar);
save_field!(SF_MASK, sf_mask);
save_field!(KERNEL_GS_BASE, kernel_gs_base);
save_field!(SYSENTER_CS, sysenter_cs);
save_field!(SYSENTER_ESP, sysenter_esp);
save_field!(SYSENTER_EIP, sysenter_eip);
save_field!(CR2, cr2);

// Pin the offsets the codec relies on against the manual's tables.
const_assert_eq!(TSC_OFFSET, 0x050);
const_assert_eq!(GUEST_ASID, 0x058);
const_assert_eq!(INTERRUPT_SHADOW, 0x068);
const_assert_eq!(EXIT_CODE, 0x070);
const_assert_eq!(EXIT_INT_INFO, 0x088);
const_assert_eq!(EVENT_INJ, 0x0a8);
const_assert_eq!(NRIP, 0x0c8);
const_assert_eq!(ES_SELECTOR, 0x400);
const_assert_eq!(CS_SELECTOR, 0x410);
const_assert_eq!(TR_SELECTOR, 0x490);
const_assert_eq!(EFER, 0x4d0);
const_assert_eq!(CR0, 0x558);
const_assert_eq!(RIP, 0x578);
const_assert_eq!(RSP, 0x5d8);
const_assert_eq!(RAX, 0x5f8);
const_assert_eq!(STAR, 0x600);
const_assert_eq!(SYSENTER_CS, 0x628);
const_assert_eq!(CR2, 0x640);

/// Offsets of the pieces of one segment record relative to its selector.
pub const SEG_ATTRIB: u64 = 2;
pub const SEG_LIMIT: u64 = 4;
pub const SEG_BASE: u64 = 8;

bitflags! {
    /// First word of instruction intercepts (VMCB offset 0x00c).
    pub struct InterceptMisc1: u32 {
        const INTERCEPT_INTR = 1 << 0;
        const INTERCEPT_NMI = 1 << 1;
        const INTERCEPT_VINTR = 1 << 4;
        const INTERCEPT_CPUID = 1 << 18;
        const INTERCEPT_HLT = 1 << 24;
        const INTERCEPT_IOIO_PROT = 1 << 27;
        const INTERCEPT_MSR_PROT = 1 << 28;
        const INTERCEPT_SHUTDOWN = 1 << 31;
    }
}

bitflags! {
    /// Second word of instruction intercepts (VMCB offset 0x010).
    pub struct InterceptMisc2: u32 {
        const INTERCEPT_VMRUN = 1 << 0;
        const INTERCEPT_VMCALL = 1 << 1;
        const INTERCEPT_VMLOAD = 1 << 2;
        const INTERCEPT_VMSAVE = 1 << 3;
        const INTERCEPT_STGI = 1 << 4;
        const INTERCEPT_CLGI = 1 << 5;
        const INTERCEPT_SKINIT = 1 << 6;
    }
}

bitflags! {
    /// Nested-paging enable word (VMCB offset 0x090).
    pub struct NpEnable: u64 {
        const NESTED_PAGING = 1 << 0;
    }
}

/// Exception vector bit for the exception intercept word.
pub const EXCEPTION_PF: u32 = 1 << 14;

/// Bit in the CR read/write intercept words selecting CR3.
pub const INTERCEPT_CR3: u16 = 1 << 3;

// Exit codes the codec distinguishes.
pub const VMEXIT_INTR: u64 = 0x60;

bitfield! {
    /// See `15.20 Event Injection`.
    ///
    /// The same layout describes EVENTINJ (pending injection, written before
    /// VMRUN) and EXITINTINFO (the event that was in flight when an exit was
    /// taken).
    pub struct EventInjection(u64);
    impl Debug;
    pub get_vector, set_vector: 7, 0;
    pub get_type, set_type: 10, 8;
    pub get_error_code_valid, set_error_code_valid: 11, 11;
    pub get_valid, set_valid: 31, 31;
    pub get_error_code, set_error_code: 63, 32;
}

impl EventInjection {
    /// Combines the 32-bit info word and error code of the neutral state
    /// into one EVENTINJ value.
    pub fn from_parts(info: u32, error: u32) -> Self {
        EventInjection((info as u64) | ((error as u64) << 32))
    }

    pub fn from_raw(raw: u64) -> Self {
        EventInjection(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// The 32-bit info word (vector, type, valid bits).
    pub fn info(&self) -> u32 {
        self.0 as u32
    }

    /// The error code half.
    pub fn error(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}
