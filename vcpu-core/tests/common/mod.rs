//! A scriptable stand-in for the kernel side of one vCPU.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use vcpu_core::backend::{vmcs, vmx};
use vcpu_core::{ExitSignal, GprFrame, PauseLine, ResumeStatus, VcpuResource};

struct Inner {
    fields: HashMap<u64, u64>,
    /// Exits the fake guest will take, as (raw exit code, delivery failed).
    script: VecDeque<(u64, bool)>,
    pause_pending: bool,
    resumes: usize,
}

/// Shared between the [`MockVcpu`] handed to the worker and the test body.
pub struct MockKernel {
    inner: Mutex<Inner>,
    cond: Condvar,
    /// Set around every `with_state` callback; the resume call asserts it is
    /// clear, proving handler and guest never overlap.
    pub handler_active: AtomicBool,
}

impl MockKernel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                fields: HashMap::new(),
                script: VecDeque::new(),
                pause_pending: false,
                resumes: 0,
            }),
            cond: Condvar::new(),
            handler_active: AtomicBool::new(false),
        }
    }

    pub fn push_exit(&self, code: u64, delivery_failed: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.script.push_back((code, delivery_failed));
        self.cond.notify_all();
    }

    pub fn set_field(&self, field: u64, value: u64) {
        self.inner.lock().unwrap().fields.insert(field, value);
    }

    pub fn field(&self, field: u64) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .fields
            .get(&field)
            .copied()
            .unwrap_or(0)
    }

    pub fn resumes(&self) -> usize {
        self.inner.lock().unwrap().resumes
    }
}

/// The per-vCPU resource; resume blocks until the script or a pause trigger
/// provides an exit, like the real syscall does.
pub struct MockVcpu {
    kernel: Arc<MockKernel>,
    regs: GprFrame,
}

impl MockVcpu {
    pub fn new(kernel: Arc<MockKernel>) -> Self {
        Self {
            kernel,
            regs: GprFrame::default(),
        }
    }
}

impl VcpuResource for MockVcpu {
    fn read(&mut self, field: u64) -> u64 {
        self.kernel
            .inner
            .lock()
            .unwrap()
            .fields
            .get(&field)
            .copied()
            .unwrap_or(0)
    }

    fn write(&mut self, field: u64, value: u64) {
        self.kernel.inner.lock().unwrap().fields.insert(field, value);
    }

    fn regs(&mut self) -> &mut GprFrame {
        &mut self.regs
    }

    fn resume(&mut self) -> ResumeStatus {
        assert!(
            !self.kernel.handler_active.load(Ordering::SeqCst),
            "guest entered while a state handler was running"
        );

        let mut inner = self.kernel.inner.lock().unwrap();
        inner.resumes += 1;
        loop {
            if let Some((code, delivery_failed)) = inner.script.pop_front() {
                inner.fields.insert(vmcs::EXIT_REASON, code);
                return if delivery_failed {
                    ResumeStatus::DeliveryFailed
                } else {
                    ResumeStatus::Exited
                };
            }
            if inner.pause_pending {
                inner.pause_pending = false;
                inner.fields.insert(vmcs::EXIT_REASON, vmx::EXIT_EXTINT);
                return ResumeStatus::DeliveryFailed;
            }
            inner = self.kernel.cond.wait(inner).unwrap();
        }
    }
}

pub struct MockPauseLine(pub Arc<MockKernel>);

impl PauseLine for MockPauseLine {
    fn trigger(&self) {
        self.0.inner.lock().unwrap().pause_pending = true;
        self.0.cond.notify_all();
    }

    fn ack(&self) {
        self.0.inner.lock().unwrap().pause_pending = false;
    }
}

/// Kernel whose guest leaves resume only once the pause line has fired, and
/// then with a genuine exit code: the trigger always arrives just too late
/// to cut the entry short.
pub struct CollidingKernel {
    triggered: Mutex<bool>,
    cond: Condvar,
    resumes: AtomicUsize,
}

impl CollidingKernel {
    pub fn new() -> Self {
        Self {
            triggered: Mutex::new(false),
            cond: Condvar::new(),
            resumes: AtomicUsize::new(0),
        }
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

pub struct CollidingVcpu {
    kernel: Arc<CollidingKernel>,
    regs: GprFrame,
}

impl CollidingVcpu {
    pub fn new(kernel: Arc<CollidingKernel>) -> Self {
        Self {
            kernel,
            regs: GprFrame::default(),
        }
    }
}

impl VcpuResource for CollidingVcpu {
    fn read(&mut self, field: u64) -> u64 {
        if field == vmcs::EXIT_REASON {
            0x1e
        } else {
            0
        }
    }

    fn write(&mut self, _field: u64, _value: u64) {}

    fn regs(&mut self) -> &mut GprFrame {
        &mut self.regs
    }

    fn resume(&mut self) -> ResumeStatus {
        self.kernel.resumes.fetch_add(1, Ordering::SeqCst);
        let mut triggered = self.kernel.triggered.lock().unwrap();
        while !*triggered {
            triggered = self.kernel.cond.wait(triggered).unwrap();
        }
        *triggered = false;
        ResumeStatus::Exited
    }
}

pub struct CollidingPauseLine(pub Arc<CollidingKernel>);

impl PauseLine for CollidingPauseLine {
    fn trigger(&self) {
        *self.0.triggered.lock().unwrap() = true;
        self.0.cond.notify_all();
    }

    fn ack(&self) {
        *self.0.triggered.lock().unwrap() = false;
    }
}

/// Single-slot exit notification; posts coalesce while one is pending.
pub struct SignalSlot {
    pending: Mutex<bool>,
    cond: Condvar,
    posts: AtomicUsize,
}

impl SignalSlot {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
            posts: AtomicUsize::new(0),
        }
    }

    /// Total notify calls, including coalesced ones.
    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    /// Waits for and consumes one pending notification.
    pub fn wait(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap();
        let (mut pending, result) = self
            .cond
            .wait_timeout_while(pending, timeout, |p| !*p)
            .unwrap();
        if result.timed_out() {
            return false;
        }
        *pending = false;
        true
    }
}

impl ExitSignal for SignalSlot {
    fn notify(&self) {
        self.posts.fetch_add(1, Ordering::SeqCst);
        *self.pending.lock().unwrap() = true;
        self.cond.notify_all();
    }
}
