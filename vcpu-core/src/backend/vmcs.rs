//! VMCS field encodings used by the Intel codec.
//!
//! Architectural encodings from the SDM field tables, plus the kernel's
//! software bank for state the VMCS does not hold (syscall MSRs and CR2 are
//! saved by the kernel next to the VMCS and exposed through the same
//! field-addressed interface).

// 16-bit guest-state fields.
pub const GUEST_ES_SEL: u64 = 0x0800;
pub const GUEST_CS_SEL: u64 = 0x0802;
pub const GUEST_SS_SEL: u64 = 0x0804;
pub const GUEST_DS_SEL: u64 = 0x0806;
pub const GUEST_FS_SEL: u64 = 0x0808;
pub const GUEST_GS_SEL: u64 = 0x080a;
pub const GUEST_LDTR_SEL: u64 = 0x080c;
pub const GUEST_TR_SEL: u64 = 0x080e;

// 64-bit control fields.
pub const TSC_OFFSET: u64 = 0x2010;

// 64-bit read-only data fields.
pub const GUEST_PHYS_ADDR: u64 = 0x2400;

// 64-bit guest-state fields.
pub const GUEST_EFER: u64 = 0x2806;

// 32-bit control fields.
pub const PIN_BASED_CTRLS: u64 = 0x4000;
pub const PRI_PROC_CTRLS: u64 = 0x4002;
pub const ENTRY_INT_INFO: u64 = 0x4016;
pub const ENTRY_EXC_ERROR: u64 = 0x4018;
pub const TPR_THRESHOLD: u64 = 0x401c;
pub const SEC_PROC_CTRLS: u64 = 0x401e;

// 32-bit read-only data fields.
pub const EXIT_REASON: u64 = 0x4402;
pub const EXIT_INT_INFO: u64 = 0x4404;
pub const EXIT_INT_ERROR: u64 = 0x4406;
pub const EXIT_INSTR_LEN: u64 = 0x440c;

// 32-bit guest-state fields.
pub const GUEST_ES_LIMIT: u64 = 0x4800;
pub const GUEST_CS_LIMIT: u64 = 0x4802;
pub const GUEST_SS_LIMIT: u64 = 0x4804;
pub const GUEST_DS_LIMIT: u64 = 0x4806;
pub const GUEST_FS_LIMIT: u64 = 0x4808;
pub const GUEST_GS_LIMIT: u64 = 0x480a;
pub const GUEST_LDTR_LIMIT: u64 = 0x480c;
pub const GUEST_TR_LIMIT: u64 = 0x480e;
pub const GUEST_GDTR_LIMIT: u64 = 0x4810;
pub const GUEST_IDTR_LIMIT: u64 = 0x4812;
pub const GUEST_ES_AR: u64 = 0x4814;
pub const GUEST_CS_AR: u64 = 0x4816;
pub const GUEST_SS_AR: u64 = 0x4818;
pub const GUEST_DS_AR: u64 = 0x481a;
pub const GUEST_FS_AR: u64 = 0x481c;
pub const GUEST_GS_AR: u64 = 0x481e;
pub const GUEST_LDTR_AR: u64 = 0x4820;
pub const GUEST_TR_AR: u64 = 0x4822;
pub const GUEST_INTR_STATE: u64 = 0x4824;
pub const GUEST_SYSENTER_CS: u64 = 0x482a;

// Natural-width control fields.
pub const CR0_READ_SHADOW: u64 = 0x6004;
pub const CR4_READ_SHADOW: u64 = 0x6006;

// Natural-width read-only data fields.
pub const EXIT_QUALIFICATION: u64 = 0x6400;

// Natural-width guest-state fields.
pub const GUEST_CR0: u64 = 0x6800;
pub const GUEST_CR3: u64 = 0x6802;
pub const GUEST_CR4: u64 = 0x6804;
pub const GUEST_ES_BASE: u64 = 0x6806;
pub const GUEST_CS_BASE: u64 = 0x6808;
pub const GUEST_SS_BASE: u64 = 0x680a;
pub const GUEST_DS_BASE: u64 = 0x680c;
pub const GUEST_FS_BASE: u64 = 0x680e;
pub const GUEST_GS_BASE: u64 = 0x6810;
pub const GUEST_LDTR_BASE: u64 = 0x6812;
pub const GUEST_TR_BASE: u64 = 0x6814;
pub const GUEST_GDTR_BASE: u64 = 0x6816;
pub const GUEST_IDTR_BASE: u64 = 0x6818;
pub const GUEST_DR7: u64 = 0x681a;
pub const GUEST_RSP: u64 = 0x681c;
pub const GUEST_RIP: u64 = 0x681e;
pub const GUEST_RFLAGS: u64 = 0x6820;
pub const GUEST_SYSENTER_ESP: u64 = 0x6824;
pub const GUEST_SYSENTER_EIP: u64 = 0x6826;

// Kernel software fields alongside the VMCS. Not architectural; the ids
// extend the 64-bit guest-state group past the defined encodings.
pub const SW_STAR: u64 = 0x2880;
pub const SW_LSTAR: u64 = 0x2882;
pub const SW_CSTAR: u64 = 0x2884;
pub const SW_FMASK: u64 = 0x2886;
pub const SW_KERNEL_GS_BASE: u64 = 0x2888;
pub const SW_CR2: u64 = 0x288a;
