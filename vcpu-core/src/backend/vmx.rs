//! Intel (VT-x) register block codec.

use bitflags::bitflags;

use super::vmcs;
use super::{read_tsc, RegisterCodec, EXIT_PAUSED, SW_API_VERSION};
use crate::kernel::{sw, VcpuResource};
use crate::state::cell::Charge;
use crate::state::{DescriptorTable, Segment, VcpuState};

/// Basic exit reason: external interrupt. A pause trigger that cuts a
/// resume call short reports this code.
pub const EXIT_EXTINT: u64 = 0x01;

/// Basic exit reason: VM entry failed due to invalid guest state. The
/// injection fields still hold the *pending* event in this case.
pub const EXIT_INVALID_GUEST_STATE: u64 = 0x21;

/// Software convention: bit in `inj_info` asking for an interrupt-window
/// exit (the architectural word reserves bits 12..30).
pub const INJ_WINDOW: u32 = 1 << 12;

bitflags! {
    /// Pin-based VM-execution controls.
    pub struct PinControls: u32 {
        const EXTINT_EXIT = 1 << 0;
        const NMI_EXIT    = 1 << 3;
    }
}

bitflags! {
    /// Primary processor-based VM-execution controls.
    pub struct PrimaryControls: u32 {
        const INTERRUPT_WINDOW  = 1 << 2;
        const HLT_EXIT          = 1 << 7;
        const SECONDARY_CONTROLS = 1 << 31;
    }
}

/// Packs the 32-bit VMX-native access-rights layout into the 16-bit layout
/// of [`Segment::ar`].
pub(crate) fn ar_pack(ar32: u32) -> u16 {
    (((ar32 & 0x1f000) >> 4) | (ar32 & 0xff)) as u16
}

/// Expands the 16-bit packed access rights into the VMX-native layout.
pub(crate) fn ar_unpack(ar16: u16) -> u32 {
    (((ar16 as u32) << 4) & 0x1f000) | (ar16 as u32 & 0xff)
}

/// Guest-visible value of a shadowed control register: intercepted bits
/// come from the shadow, pass-through bits from the raw register.
pub(crate) fn shadowed(raw: u64, shadow: u64, mask: u64) -> u64 {
    (raw & !mask) | (shadow & mask)
}

/// VMCS field ids making up one segment descriptor.
struct SegFields {
    sel: u64,
    ar: u64,
    limit: u64,
    base: u64,
}

const SEG_CS: SegFields = SegFields {
    sel: vmcs::GUEST_CS_SEL,
    ar: vmcs::GUEST_CS_AR,
    limit: vmcs::GUEST_CS_LIMIT,
    base: vmcs::GUEST_CS_BASE,
};
const SEG_SS: SegFields = SegFields {
    sel: vmcs::GUEST_SS_SEL,
    ar: vmcs::GUEST_SS_AR,
    limit: vmcs::GUEST_SS_LIMIT,
    base: vmcs::GUEST_SS_BASE,
};
const SEG_ES: SegFields = SegFields {
    sel: vmcs::GUEST_ES_SEL,
    ar: vmcs::GUEST_ES_AR,
    limit: vmcs::GUEST_ES_LIMIT,
    base: vmcs::GUEST_ES_BASE,
};
const SEG_DS: SegFields = SegFields {
    sel: vmcs::GUEST_DS_SEL,
    ar: vmcs::GUEST_DS_AR,
    limit: vmcs::GUEST_DS_LIMIT,
    base: vmcs::GUEST_DS_BASE,
};
const SEG_FS: SegFields = SegFields {
    sel: vmcs::GUEST_FS_SEL,
    ar: vmcs::GUEST_FS_AR,
    limit: vmcs::GUEST_FS_LIMIT,
    base: vmcs::GUEST_FS_BASE,
};
const SEG_GS: SegFields = SegFields {
    sel: vmcs::GUEST_GS_SEL,
    ar: vmcs::GUEST_GS_AR,
    limit: vmcs::GUEST_GS_LIMIT,
    base: vmcs::GUEST_GS_BASE,
};
const SEG_LDTR: SegFields = SegFields {
    sel: vmcs::GUEST_LDTR_SEL,
    ar: vmcs::GUEST_LDTR_AR,
    limit: vmcs::GUEST_LDTR_LIMIT,
    base: vmcs::GUEST_LDTR_BASE,
};
const SEG_TR: SegFields = SegFields {
    sel: vmcs::GUEST_TR_SEL,
    ar: vmcs::GUEST_TR_AR,
    limit: vmcs::GUEST_TR_LIMIT,
    base: vmcs::GUEST_TR_BASE,
};

pub struct VmxCodec {
    /// Absolute TSC offset programmed into hardware; `tsc_offset` charges
    /// are deltas accumulated onto it.
    tsc_total: u64,
    warned_unsupported: bool,
}

impl VmxCodec {
    /// CR0 bits the host intercepts; the guest sees the shadow for these.
    const CR0_MASK: u64 = 0x6000_0021;
    /// CR4: the VMXE bit is never guest-owned.
    const CR4_MASK: u64 = 0x0000_2000;

    pub fn new() -> Self {
        Self {
            tsc_total: 0,
            warned_unsupported: false,
        }
    }

    fn write_segment(hw: &mut dyn VcpuResource, cell: &mut Charge<Segment>, f: &SegFields) {
        if let Some(seg) = cell.consume() {
            hw.write(f.sel, seg.sel as u64);
            hw.write(f.ar, ar_unpack(seg.ar) as u64);
            hw.write(f.limit, seg.limit as u64);
            hw.write(f.base, seg.base);
        }
    }

    fn read_segment(hw: &mut dyn VcpuResource, cell: &mut Charge<Segment>, f: &SegFields) {
        cell.charge(Segment {
            sel: hw.read(f.sel) as u16,
            ar: ar_pack(hw.read(f.ar) as u32),
            limit: hw.read(f.limit) as u32,
            base: hw.read(f.base),
        });
    }

    /// Reconstructs the guest-visible value of a shadowed control register
    /// and pushes a corrected shadow back to hardware when it drifted.
    fn read_shadowed_cr(
        hw: &mut dyn VcpuResource,
        raw_field: u64,
        shadow_field: u64,
        mask: u64,
        cr: &mut Charge<u64>,
        cr_shadow: &mut Charge<u64>,
    ) {
        let visible = shadowed(hw.read(raw_field), hw.read(shadow_field), mask);
        if visible != cr_shadow.value() {
            hw.write(shadow_field, visible);
        }
        cr.charge(visible);
        cr_shadow.charge(visible);
    }

    fn consume_unsupported(&mut self, state: &mut VcpuState) {
        let mut touched = false;
        touched |= state.pdpte_0.consume().is_some();
        touched |= state.pdpte_1.consume().is_some();
        touched |= state.pdpte_2.consume().is_some();
        touched |= state.pdpte_3.consume().is_some();
        touched |= state.tpr.consume().is_some();
        touched |= state.tpr_threshold.consume().is_some();

        if touched && !self.warned_unsupported {
            log::warn!("PDPTE/TPR registers are not supported by this interface, request dropped");
            self.warned_unsupported = true;
        }
    }
}

impl RegisterCodec for VmxCodec {
    fn setup(&mut self, hw: &mut dyn VcpuResource) {
        let version = hw.read(sw::FIELD_VERSION);
        if version != SW_API_VERSION {
            log::warn!(
                "vcpu interface version mismatch (kernel {}, expected {}), continuing anyway",
                version,
                SW_API_VERSION
            );
        }

        hw.write(
            vmcs::PIN_BASED_CTRLS,
            (PinControls::EXTINT_EXIT | PinControls::NMI_EXIT).bits() as u64,
        );
        hw.write(
            vmcs::PRI_PROC_CTRLS,
            (PrimaryControls::HLT_EXIT | PrimaryControls::SECONDARY_CONTROLS).bits() as u64,
        );
        hw.write(vmcs::SEC_PROC_CTRLS, 0);
        hw.write(vmcs::TSC_OFFSET, self.tsc_total);
    }

    fn exit_reason(&mut self, hw: &mut dyn VcpuResource) -> u64 {
        // Basic exit reason; the upper half carries entry-failure flags.
        hw.read(vmcs::EXIT_REASON) & 0xffff
    }

    fn pause_exit(&self) -> u64 {
        EXIT_EXTINT
    }

    fn write_state(&mut self, state: &mut VcpuState, hw: &mut dyn VcpuResource) {
        {
            let regs = hw.regs();
            if let Some(v) = state.rax.consume() {
                regs.rax = v;
            }
            if let Some(v) = state.rbx.consume() {
                regs.rbx = v;
            }
            if let Some(v) = state.rcx.consume() {
                regs.rcx = v;
            }
            if let Some(v) = state.rdx.consume() {
                regs.rdx = v;
            }
            if let Some(v) = state.rbp.consume() {
                regs.rbp = v;
            }
            if let Some(v) = state.rsi.consume() {
                regs.rsi = v;
            }
            if let Some(v) = state.rdi.consume() {
                regs.rdi = v;
            }
            if let Some(v) = state.r8.consume() {
                regs.r8 = v;
            }
            if let Some(v) = state.r9.consume() {
                regs.r9 = v;
            }
            if let Some(v) = state.r10.consume() {
                regs.r10 = v;
            }
            if let Some(v) = state.r11.consume() {
                regs.r11 = v;
            }
            if let Some(v) = state.r12.consume() {
                regs.r12 = v;
            }
            if let Some(v) = state.r13.consume() {
                regs.r13 = v;
            }
            if let Some(v) = state.r14.consume() {
                regs.r14 = v;
            }
            if let Some(v) = state.r15.consume() {
                regs.r15 = v;
            }
        }

        if let Some(v) = state.rip.consume() {
            hw.write(vmcs::GUEST_RIP, v);
        }
        if let Some(v) = state.rsp.consume() {
            hw.write(vmcs::GUEST_RSP, v);
        }
        if let Some(v) = state.rflags.consume() {
            hw.write(vmcs::GUEST_RFLAGS, v);
        }

        if let Some(v) = state.cr0.consume() {
            hw.write(vmcs::GUEST_CR0, v);
        }
        if let Some(v) = state.cr2.consume() {
            hw.write(vmcs::SW_CR2, v);
        }
        if let Some(v) = state.cr3.consume() {
            hw.write(vmcs::GUEST_CR3, v);
        }
        if let Some(v) = state.cr4.consume() {
            hw.write(vmcs::GUEST_CR4, v);
        }
        if let Some(v) = state.cr0_shadow.consume() {
            hw.write(vmcs::CR0_READ_SHADOW, v);
        }
        if let Some(v) = state.cr4_shadow.consume() {
            hw.write(vmcs::CR4_READ_SHADOW, v);
        }
        if let Some(v) = state.dr7.consume() {
            hw.write(vmcs::GUEST_DR7, v);
        }

        Self::write_segment(hw, &mut state.cs, &SEG_CS);
        Self::write_segment(hw, &mut state.ss, &SEG_SS);
        Self::write_segment(hw, &mut state.es, &SEG_ES);
        Self::write_segment(hw, &mut state.ds, &SEG_DS);
        Self::write_segment(hw, &mut state.fs, &SEG_FS);
        Self::write_segment(hw, &mut state.gs, &SEG_GS);
        Self::write_segment(hw, &mut state.ldtr, &SEG_LDTR);
        Self::write_segment(hw, &mut state.tr, &SEG_TR);

        if let Some(t) = state.gdtr.consume() {
            hw.write(vmcs::GUEST_GDTR_LIMIT, t.limit as u64);
            hw.write(vmcs::GUEST_GDTR_BASE, t.base);
        }
        if let Some(t) = state.idtr.consume() {
            hw.write(vmcs::GUEST_IDTR_LIMIT, t.limit as u64);
            hw.write(vmcs::GUEST_IDTR_BASE, t.base);
        }

        if let Some(v) = state.sysenter_cs.consume() {
            hw.write(vmcs::GUEST_SYSENTER_CS, v);
        }
        if let Some(v) = state.sysenter_sp.consume() {
            hw.write(vmcs::GUEST_SYSENTER_ESP, v);
        }
        if let Some(v) = state.sysenter_ip.consume() {
            hw.write(vmcs::GUEST_SYSENTER_EIP, v);
        }

        if let Some(v) = state.efer.consume() {
            hw.write(vmcs::GUEST_EFER, v);
        }
        if let Some(v) = state.star.consume() {
            hw.write(vmcs::SW_STAR, v);
        }
        if let Some(v) = state.lstar.consume() {
            hw.write(vmcs::SW_LSTAR, v);
        }
        if let Some(v) = state.cstar.consume() {
            hw.write(vmcs::SW_CSTAR, v);
        }
        if let Some(v) = state.fmask.consume() {
            hw.write(vmcs::SW_FMASK, v);
        }
        if let Some(v) = state.kernel_gs_base.consume() {
            hw.write(vmcs::SW_KERNEL_GS_BASE, v);
        }

        if let Some(v) = state.intr_state.consume() {
            hw.write(vmcs::GUEST_INTR_STATE, v as u64);
        }

        // An interrupt-window request rides on the injection word but is
        // realized through the primary controls, so pushing inj_info may
        // charge ctrl_primary for the same cycle.
        if let Some(info) = state.inj_info.consume() {
            let mut ctrl = state.ctrl_primary.value();
            if info & INJ_WINDOW != 0 {
                ctrl |= PrimaryControls::INTERRUPT_WINDOW.bits();
            } else {
                ctrl &= !PrimaryControls::INTERRUPT_WINDOW.bits();
            }
            state.ctrl_primary.charge(ctrl);
            hw.write(vmcs::ENTRY_INT_INFO, (info & !INJ_WINDOW) as u64);
        }
        if let Some(e) = state.inj_error.consume() {
            hw.write(vmcs::ENTRY_EXC_ERROR, e as u64);
        }

        if let Some(c) = state.ctrl_primary.consume() {
            hw.write(vmcs::PRI_PROC_CTRLS, c as u64);
        }
        if let Some(c) = state.ctrl_secondary.consume() {
            hw.write(vmcs::SEC_PROC_CTRLS, c as u64);
        }

        if let Some(delta) = state.tsc_offset.consume() {
            self.tsc_total = self.tsc_total.wrapping_add(delta);
            hw.write(vmcs::TSC_OFFSET, self.tsc_total);
        }

        self.consume_unsupported(state);
    }

    fn read_state(&mut self, state: &mut VcpuState, hw: &mut dyn VcpuResource, reason: u64) {
        {
            let regs = *hw.regs();
            state.rax.charge(regs.rax);
            state.rbx.charge(regs.rbx);
            state.rcx.charge(regs.rcx);
            state.rdx.charge(regs.rdx);
            state.rbp.charge(regs.rbp);
            state.rsi.charge(regs.rsi);
            state.rdi.charge(regs.rdi);
            state.r8.charge(regs.r8);
            state.r9.charge(regs.r9);
            state.r10.charge(regs.r10);
            state.r11.charge(regs.r11);
            state.r12.charge(regs.r12);
            state.r13.charge(regs.r13);
            state.r14.charge(regs.r14);
            state.r15.charge(regs.r15);
        }

        state.rip.charge(hw.read(vmcs::GUEST_RIP));
        state.rip_len.charge(hw.read(vmcs::EXIT_INSTR_LEN));
        state.rsp.charge(hw.read(vmcs::GUEST_RSP));
        state.rflags.charge(hw.read(vmcs::GUEST_RFLAGS));

        Self::read_shadowed_cr(
            hw,
            vmcs::GUEST_CR0,
            vmcs::CR0_READ_SHADOW,
            Self::CR0_MASK,
            &mut state.cr0,
            &mut state.cr0_shadow,
        );
        Self::read_shadowed_cr(
            hw,
            vmcs::GUEST_CR4,
            vmcs::CR4_READ_SHADOW,
            Self::CR4_MASK,
            &mut state.cr4,
            &mut state.cr4_shadow,
        );
        state.cr2.charge(hw.read(vmcs::SW_CR2));
        state.cr3.charge(hw.read(vmcs::GUEST_CR3));
        state.dr7.charge(hw.read(vmcs::GUEST_DR7));

        Self::read_segment(hw, &mut state.cs, &SEG_CS);
        Self::read_segment(hw, &mut state.ss, &SEG_SS);
        Self::read_segment(hw, &mut state.es, &SEG_ES);
        Self::read_segment(hw, &mut state.ds, &SEG_DS);
        Self::read_segment(hw, &mut state.fs, &SEG_FS);
        Self::read_segment(hw, &mut state.gs, &SEG_GS);
        Self::read_segment(hw, &mut state.ldtr, &SEG_LDTR);
        Self::read_segment(hw, &mut state.tr, &SEG_TR);

        state.gdtr.charge(DescriptorTable {
            limit: hw.read(vmcs::GUEST_GDTR_LIMIT) as u32,
            base: hw.read(vmcs::GUEST_GDTR_BASE),
        });
        state.idtr.charge(DescriptorTable {
            limit: hw.read(vmcs::GUEST_IDTR_LIMIT) as u32,
            base: hw.read(vmcs::GUEST_IDTR_BASE),
        });

        state.sysenter_cs.charge(hw.read(vmcs::GUEST_SYSENTER_CS));
        state.sysenter_sp.charge(hw.read(vmcs::GUEST_SYSENTER_ESP));
        state.sysenter_ip.charge(hw.read(vmcs::GUEST_SYSENTER_EIP));

        state.efer.charge(hw.read(vmcs::GUEST_EFER));
        state.star.charge(hw.read(vmcs::SW_STAR));
        state.lstar.charge(hw.read(vmcs::SW_LSTAR));
        state.cstar.charge(hw.read(vmcs::SW_CSTAR));
        state.fmask.charge(hw.read(vmcs::SW_FMASK));
        state
            .kernel_gs_base
            .charge(hw.read(vmcs::SW_KERNEL_GS_BASE));

        state.qual_primary.charge(hw.read(vmcs::EXIT_QUALIFICATION));
        state.qual_secondary.charge(hw.read(vmcs::GUEST_PHYS_ADDR));

        // On an entry failure or a synthetic pause the event of interest is
        // the one still pending for the next entry; on a normal exit it is
        // the one that accompanied the exit.
        let (info, error) = if reason == EXIT_PAUSED || reason == EXIT_INVALID_GUEST_STATE {
            (
                hw.read(vmcs::ENTRY_INT_INFO),
                hw.read(vmcs::ENTRY_EXC_ERROR),
            )
        } else {
            (hw.read(vmcs::EXIT_INT_INFO), hw.read(vmcs::EXIT_INT_ERROR))
        };
        state.inj_info.charge(info as u32);
        state.inj_error.charge(error as u32);

        state.intr_state.charge(hw.read(vmcs::GUEST_INTR_STATE) as u32);
        state.ctrl_primary.charge(hw.read(vmcs::PRI_PROC_CTRLS) as u32);
        state
            .ctrl_secondary
            .charge(hw.read(vmcs::SEC_PROC_CTRLS) as u32);

        state.tsc.charge(read_tsc());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockHw;

    #[test]
    fn access_rights_round_trip() {
        // All legal 13-bit packed values survive unpack/pack.
        for ar in 0u16..=0x1fff {
            assert_eq!(ar_pack(ar_unpack(ar)), ar);
        }
    }

    #[test]
    fn shadow_mask_invariant() {
        for &(raw, shadow, mask) in &[
            (0xffff_ffffu64, 0x0u64, VmxCodec::CR0_MASK),
            (0x0, 0xffff_ffff, VmxCodec::CR0_MASK),
            (0x8005_0033, 0x6000_0020, VmxCodec::CR0_MASK),
            (0x12345, 0xfedcba, 0xff00),
        ] {
            let visible = shadowed(raw, shadow, mask);
            assert_eq!(visible & mask, shadow & mask);
            assert_eq!(visible & !mask, raw & !mask);
        }
    }

    #[test]
    fn charged_fields_round_trip() {
        let mut codec = VmxCodec::new();
        let mut hw = MockHw::default();
        let mut state = VcpuState::new();

        state.rax.charge(0x1122_3344_5566_7788);
        state.r15.charge(0xf15);
        state.rip.charge(0x40_0000);
        state.rflags.charge(0x202);
        state.cs.charge(Segment {
            sel: 0x08,
            ar: 0x0a9b,
            limit: 0xffff_ffff,
            base: 0,
        });
        state.gdtr.charge(DescriptorTable {
            limit: 0x57,
            base: 0x7000,
        });
        state.lstar.charge(0xffff_8000_0000_0000);
        // Shadowed registers round-trip when raw and shadow agree.
        state.cr0.charge(0x8005_0033);
        state.cr0_shadow.charge(0x8005_0033);

        codec.write_state(&mut state, &mut hw);
        assert!(!state.rax.charged(), "write-out consumes the charge");

        codec.read_state(&mut state, &mut hw, 0);

        assert_eq!(state.rax.value(), 0x1122_3344_5566_7788);
        assert_eq!(state.r15.value(), 0xf15);
        assert_eq!(state.rip.value(), 0x40_0000);
        assert_eq!(state.rflags.value(), 0x202);
        assert_eq!(
            state.cs.value(),
            Segment {
                sel: 0x08,
                ar: 0x0a9b,
                limit: 0xffff_ffff,
                base: 0,
            }
        );
        assert_eq!(
            state.gdtr.value(),
            DescriptorTable {
                limit: 0x57,
                base: 0x7000,
            }
        );
        assert_eq!(state.lstar.value(), 0xffff_8000_0000_0000);
        assert_eq!(state.cr0.value(), 0x8005_0033);
        assert!(state.rax.charged(), "read-in always charges");
        assert!(state.tsc.charged());
    }

    #[test]
    fn untouched_fields_are_preserved() {
        let mut codec = VmxCodec::new();
        let mut hw = MockHw::default()
            .with_field(vmcs::GUEST_RIP, 0xdead)
            .with_field(vmcs::GUEST_CR3, 0xc3000);

        let mut state = VcpuState::new();
        state.rsp.charge(0x9000);

        codec.write_state(&mut state, &mut hw);

        assert_eq!(hw.fields[&vmcs::GUEST_RIP], 0xdead);
        assert_eq!(hw.fields[&vmcs::GUEST_CR3], 0xc3000);
        assert_eq!(hw.fields[&vmcs::GUEST_RSP], 0x9000);
        assert!(!hw.written(vmcs::GUEST_RIP));
    }

    #[test]
    fn value_pushed_once_per_charge() {
        let mut codec = VmxCodec::new();
        let mut hw = MockHw::default();
        let mut state = VcpuState::new();

        state.rip.charge(0x1000);
        codec.write_state(&mut state, &mut hw);
        hw.writes.clear();

        codec.write_state(&mut state, &mut hw);
        assert!(
            !hw.written(vmcs::GUEST_RIP),
            "uncharged value must not be re-pushed"
        );
    }

    #[test]
    fn tsc_offset_accumulates() {
        let mut codec = VmxCodec::new();
        let mut hw = MockHw::default();
        let mut state = VcpuState::new();

        state.tsc_offset.charge(100);
        codec.write_state(&mut state, &mut hw);
        assert_eq!(hw.fields[&vmcs::TSC_OFFSET], 100);

        state.tsc_offset.charge(50);
        codec.write_state(&mut state, &mut hw);
        assert_eq!(hw.fields[&vmcs::TSC_OFFSET], 150);

        // A cycle without a new delta keeps the programmed offset.
        hw.writes.clear();
        codec.write_state(&mut state, &mut hw);
        assert!(!hw.written(vmcs::TSC_OFFSET));
        assert_eq!(hw.fields[&vmcs::TSC_OFFSET], 150);
    }

    #[test]
    fn unsupported_fields_are_dropped() {
        let mut codec = VmxCodec::new();
        let mut hw = MockHw::default();
        let mut state = VcpuState::new();

        for _ in 0..5 {
            state.pdpte_0.charge(0x1000);
            state.tpr.charge(0x10);
            codec.write_state(&mut state, &mut hw);
        }

        assert!(hw.writes.is_empty(), "unsupported charges reach no field");
        assert!(!state.pdpte_0.charged(), "the request is consumed");
    }

    #[test]
    fn interrupt_window_request_charges_primary_controls() {
        let mut codec = VmxCodec::new();
        let mut hw = MockHw::default();
        let mut state = VcpuState::new();

        state.inj_info.charge(INJ_WINDOW);
        codec.write_state(&mut state, &mut hw);

        let ctrl = hw.fields[&vmcs::PRI_PROC_CTRLS] as u32;
        assert_ne!(ctrl & PrimaryControls::INTERRUPT_WINDOW.bits(), 0);
        // The window bit itself never reaches the architectural word.
        assert_eq!(hw.fields[&vmcs::ENTRY_INT_INFO], 0);

        // Charging an injection without the window bit closes it again.
        state.inj_info.charge(0x8000_00ec);
        codec.write_state(&mut state, &mut hw);
        let ctrl = hw.fields[&vmcs::PRI_PROC_CTRLS] as u32;
        assert_eq!(ctrl & PrimaryControls::INTERRUPT_WINDOW.bits(), 0);
        assert_eq!(hw.fields[&vmcs::ENTRY_INT_INFO], 0x8000_00ec);
    }

    #[test]
    fn injection_pair_depends_on_exit_reason() {
        let mut codec = VmxCodec::new();
        let mut hw = MockHw::default()
            .with_field(vmcs::ENTRY_INT_INFO, 0x8000_00ef)
            .with_field(vmcs::EXIT_INT_INFO, 0x8000_000e);
        let mut state = VcpuState::new();

        codec.read_state(&mut state, &mut hw, 0x30);
        assert_eq!(state.inj_info.value(), 0x8000_000e, "exit-time pair");

        codec.read_state(&mut state, &mut hw, EXIT_INVALID_GUEST_STATE);
        assert_eq!(state.inj_info.value(), 0x8000_00ef, "pending pair");

        codec.read_state(&mut state, &mut hw, EXIT_PAUSED);
        assert_eq!(state.inj_info.value(), 0x8000_00ef, "pending pair");
    }

    #[test]
    fn drifted_shadow_is_written_back_on_read() {
        let mut codec = VmxCodec::new();
        let mut hw = MockHw::default()
            .with_field(vmcs::GUEST_CR0, 0x8005_0033)
            .with_field(vmcs::CR0_READ_SHADOW, 0x0000_0021);
        let mut state = VcpuState::new();

        codec.read_state(&mut state, &mut hw, 0x30);

        let visible = shadowed(0x8005_0033, 0x0000_0021, VmxCodec::CR0_MASK);
        assert_eq!(state.cr0.value(), visible);
        assert_eq!(hw.fields[&vmcs::CR0_READ_SHADOW], visible);
        assert!(hw.written(vmcs::CR0_READ_SHADOW));
    }
}
