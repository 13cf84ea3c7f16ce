//! AMD (SVM) register block codec.

use super::vmcb::{self, EventInjection, InterceptMisc1, InterceptMisc2, NpEnable};
use super::{read_tsc, RegisterCodec, EXIT_PAUSED, SW_API_VERSION};
use crate::kernel::{sw, VcpuResource};
use crate::state::cell::Charge;
use crate::state::{DescriptorTable, Segment, VcpuState};

/// Software convention: bit in `inj_info` asking for an interrupt-window
/// exit. Realized as a virtual interrupt plus the VINTR intercept.
pub const INJ_WINDOW: u32 = 1 << 12;

/// V_IRQ bit of the VINTR control word.
const VINTR_IRQ: u64 = 1 << 8;

pub struct SvmCodec {
    tsc_total: u64,
    warned_unsupported: bool,
}

impl SvmCodec {
    pub fn new() -> Self {
        Self {
            tsc_total: 0,
            warned_unsupported: false,
        }
    }

    fn write_segment(hw: &mut dyn VcpuResource, cell: &mut Charge<Segment>, sel_field: u64) {
        if let Some(seg) = cell.consume() {
            hw.write(sel_field, seg.sel as u64);
            hw.write(sel_field + vmcb::SEG_ATTRIB, seg.ar as u64);
            hw.write(sel_field + vmcb::SEG_LIMIT, seg.limit as u64);
            hw.write(sel_field + vmcb::SEG_BASE, seg.base);
        }
    }

    fn read_segment(hw: &mut dyn VcpuResource, cell: &mut Charge<Segment>, sel_field: u64) {
        cell.charge(Segment {
            sel: hw.read(sel_field) as u16,
            ar: hw.read(sel_field + vmcb::SEG_ATTRIB) as u16,
            limit: hw.read(sel_field + vmcb::SEG_LIMIT) as u32,
            base: hw.read(sel_field + vmcb::SEG_BASE),
        });
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

impl RegisterCodec for SvmCodec {
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
            vmcb::INTERCEPT_MISC1,
            (InterceptMisc1::INTERCEPT_INTR
                | InterceptMisc1::INTERCEPT_NMI
                | InterceptMisc1::INTERCEPT_HLT
                | InterceptMisc1::INTERCEPT_IOIO_PROT
                | InterceptMisc1::INTERCEPT_MSR_PROT
                | InterceptMisc1::INTERCEPT_SHUTDOWN)
                .bits() as u64,
        );
        hw.write(
            vmcb::INTERCEPT_MISC2,
            (InterceptMisc2::INTERCEPT_VMRUN
                | InterceptMisc2::INTERCEPT_VMCALL
                | InterceptMisc2::INTERCEPT_VMLOAD
                | InterceptMisc2::INTERCEPT_VMSAVE
                | InterceptMisc2::INTERCEPT_STGI
                | InterceptMisc2::INTERCEPT_CLGI
                | InterceptMisc2::INTERCEPT_SKINIT)
                .bits() as u64,
        );

        // Zero is reserved; every guest of one kernel shares one address
        // space id here.
        hw.write(vmcb::GUEST_ASID, 1);

        if hw.read(sw::FIELD_FEATURES) & sw::FEATURE_NESTED_PAGING != 0 {
            hw.write(vmcb::NP_ENABLE, NpEnable::NESTED_PAGING.bits());
        } else {
            // Shadow paging fallback: the VMM has to see guest page-table
            // switches and guest page faults.
            log::info!("nested paging unavailable, intercepting CR3 writes and #PF");
            hw.write(vmcb::INTERCEPT_CR_WRITE, vmcb::INTERCEPT_CR3 as u64);
            hw.write(vmcb::INTERCEPT_EXCEPTION, vmcb::EXCEPTION_PF as u64);
        }

        hw.write(vmcb::TSC_OFFSET, self.tsc_total);
    }

    fn exit_reason(&mut self, hw: &mut dyn VcpuResource) -> u64 {
        hw.read(vmcb::EXIT_CODE)
    }

    fn pause_exit(&self) -> u64 {
        vmcb::VMEXIT_INTR
    }

    fn write_state(&mut self, state: &mut VcpuState, hw: &mut dyn VcpuResource) {
        // rax lives in the save area, the other GPRs in the kernel frame.
        if let Some(v) = state.rax.consume() {
            hw.write(vmcb::RAX, v);
        }
        {
            let regs = hw.regs();
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
            hw.write(vmcb::RIP, v);
        }
        if let Some(v) = state.rsp.consume() {
            hw.write(vmcb::RSP, v);
        }
        if let Some(v) = state.rflags.consume() {
            hw.write(vmcb::RFLAGS, v);
        }

        if let Some(v) = state.cr0.consume() {
            hw.write(vmcb::CR0, v);
        }
        if let Some(v) = state.cr2.consume() {
            hw.write(vmcb::CR2, v);
        }
        if let Some(v) = state.cr3.consume() {
            hw.write(vmcb::CR3, v);
        }
        if let Some(v) = state.cr4.consume() {
            hw.write(vmcb::CR4, v);
        }
        // No read shadows on this hardware; the guest always sees the real
        // control registers.
        state.cr0_shadow.consume();
        state.cr4_shadow.consume();
        if let Some(v) = state.dr7.consume() {
            hw.write(vmcb::DR7, v);
        }

        Self::write_segment(hw, &mut state.cs, vmcb::CS_SELECTOR);
        Self::write_segment(hw, &mut state.ss, vmcb::SS_SELECTOR);
        Self::write_segment(hw, &mut state.es, vmcb::ES_SELECTOR);
        Self::write_segment(hw, &mut state.ds, vmcb::DS_SELECTOR);
        Self::write_segment(hw, &mut state.fs, vmcb::FS_SELECTOR);
        Self::write_segment(hw, &mut state.gs, vmcb::GS_SELECTOR);
        Self::write_segment(hw, &mut state.ldtr, vmcb::LDTR_SELECTOR);
        Self::write_segment(hw, &mut state.tr, vmcb::TR_SELECTOR);

        if let Some(t) = state.gdtr.consume() {
            hw.write(vmcb::GDTR_SELECTOR + vmcb::SEG_LIMIT, t.limit as u64);
            hw.write(vmcb::GDTR_SELECTOR + vmcb::SEG_BASE, t.base);
        }
        if let Some(t) = state.idtr.consume() {
            hw.write(vmcb::IDTR_SELECTOR + vmcb::SEG_LIMIT, t.limit as u64);
            hw.write(vmcb::IDTR_SELECTOR + vmcb::SEG_BASE, t.base);
        }

        if let Some(v) = state.sysenter_cs.consume() {
            hw.write(vmcb::SYSENTER_CS, v);
        }
        if let Some(v) = state.sysenter_sp.consume() {
            hw.write(vmcb::SYSENTER_ESP, v);
        }
        if let Some(v) = state.sysenter_ip.consume() {
            hw.write(vmcb::SYSENTER_EIP, v);
        }

        if let Some(v) = state.efer.consume() {
            hw.write(vmcb::EFER, v);
        }
        if let Some(v) = state.star.consume() {
            hw.write(vmcb::STAR, v);
        }
        if let Some(v) = state.lstar.consume() {
            hw.write(vmcb::LSTAR, v);
        }
        if let Some(v) = state.cstar.consume() {
            hw.write(vmcb::CSTAR, v);
        }
        if let Some(v) = state.fmask.consume() {
            hw.write(vmcb::SF_MASK, v);
        }
        if let Some(v) = state.kernel_gs_base.consume() {
            hw.write(vmcb::KERNEL_GS_BASE, v);
        }

        if let Some(v) = state.intr_state.consume() {
            hw.write(vmcb::INTERRUPT_SHADOW, (v & 1) as u64);
        }

        // A window request becomes a virtual interrupt plus the VINTR
        // intercept, so it may charge ctrl_primary for the same cycle.
        if let Some(info) = state.inj_info.consume() {
            let mut misc1 = state.ctrl_primary.value();
            if info & INJ_WINDOW != 0 {
                hw.write(vmcb::VINTR, VINTR_IRQ);
                misc1 |= InterceptMisc1::INTERCEPT_VINTR.bits();
            } else {
                hw.write(vmcb::VINTR, 0);
                misc1 &= !InterceptMisc1::INTERCEPT_VINTR.bits();
            }
            state.ctrl_primary.charge(misc1);

            let error = state.inj_error.value();
            let ev = EventInjection::from_parts(info & !INJ_WINDOW, error);
            hw.write(vmcb::EVENT_INJ, ev.raw());
        }
        state.inj_error.consume();

        if let Some(c) = state.ctrl_primary.consume() {
            hw.write(vmcb::INTERCEPT_MISC1, c as u64);
        }
        if let Some(c) = state.ctrl_secondary.consume() {
            hw.write(vmcb::INTERCEPT_MISC2, c as u64);
        }

        if let Some(delta) = state.tsc_offset.consume() {
            self.tsc_total = self.tsc_total.wrapping_add(delta);
            hw.write(vmcb::TSC_OFFSET, self.tsc_total);
        }

        self.consume_unsupported(state);
    }

    fn read_state(&mut self, state: &mut VcpuState, hw: &mut dyn VcpuResource, reason: u64) {
        state.rax.charge(hw.read(vmcb::RAX));
        {
            let regs = *hw.regs();
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

        let rip = hw.read(vmcb::RIP);
        state.rip.charge(rip);
        // The next-rip field is zero when the hardware could not provide it.
        let nrip = hw.read(vmcb::NRIP);
        state
            .rip_len
            .charge(if nrip > rip { nrip - rip } else { 0 });
        state.rsp.charge(hw.read(vmcb::RSP));
        state.rflags.charge(hw.read(vmcb::RFLAGS));

        let cr0 = hw.read(vmcb::CR0);
        let cr4 = hw.read(vmcb::CR4);
        state.cr0.charge(cr0);
        state.cr0_shadow.charge(cr0);
        state.cr2.charge(hw.read(vmcb::CR2));
        state.cr3.charge(hw.read(vmcb::CR3));
        state.cr4.charge(cr4);
        state.cr4_shadow.charge(cr4);
        state.dr7.charge(hw.read(vmcb::DR7));

        Self::read_segment(hw, &mut state.cs, vmcb::CS_SELECTOR);
        Self::read_segment(hw, &mut state.ss, vmcb::SS_SELECTOR);
        Self::read_segment(hw, &mut state.es, vmcb::ES_SELECTOR);
        Self::read_segment(hw, &mut state.ds, vmcb::DS_SELECTOR);
        Self::read_segment(hw, &mut state.fs, vmcb::FS_SELECTOR);
        Self::read_segment(hw, &mut state.gs, vmcb::GS_SELECTOR);
        Self::read_segment(hw, &mut state.ldtr, vmcb::LDTR_SELECTOR);
        Self::read_segment(hw, &mut state.tr, vmcb::TR_SELECTOR);

        state.gdtr.charge(DescriptorTable {
            limit: hw.read(vmcb::GDTR_SELECTOR + vmcb::SEG_LIMIT) as u32,
            base: hw.read(vmcb::GDTR_SELECTOR + vmcb::SEG_BASE),
        });
        state.idtr.charge(DescriptorTable {
            limit: hw.read(vmcb::IDTR_SELECTOR + vmcb::SEG_LIMIT) as u32,
            base: hw.read(vmcb::IDTR_SELECTOR + vmcb::SEG_BASE),
        });

        state.sysenter_cs.charge(hw.read(vmcb::SYSENTER_CS));
        state.sysenter_sp.charge(hw.read(vmcb::SYSENTER_ESP));
        state.sysenter_ip.charge(hw.read(vmcb::SYSENTER_EIP));

        state.efer.charge(hw.read(vmcb::EFER));
        state.star.charge(hw.read(vmcb::STAR));
        state.lstar.charge(hw.read(vmcb::LSTAR));
        state.cstar.charge(hw.read(vmcb::CSTAR));
        state.fmask.charge(hw.read(vmcb::SF_MASK));
        state.kernel_gs_base.charge(hw.read(vmcb::KERNEL_GS_BASE));

        state.qual_primary.charge(hw.read(vmcb::EXIT_INFO1));
        state.qual_secondary.charge(hw.read(vmcb::EXIT_INFO2));

        // A pause never retired the pending injection, so report EVENTINJ;
        // on a real exit EXITINTINFO holds the event that was in flight.
        let ev = if reason == EXIT_PAUSED {
            EventInjection::from_raw(hw.read(vmcb::EVENT_INJ))
        } else {
            EventInjection::from_raw(hw.read(vmcb::EXIT_INT_INFO))
        };
        state.inj_info.charge(ev.info());
        state.inj_error.charge(ev.error());

        state
            .intr_state
            .charge((hw.read(vmcb::INTERRUPT_SHADOW) & 1) as u32);
        state
            .ctrl_primary
            .charge(hw.read(vmcb::INTERCEPT_MISC1) as u32);
        state
            .ctrl_secondary
            .charge(hw.read(vmcb::INTERCEPT_MISC2) as u32);

        state.tsc.charge(read_tsc());
    }
}
