//! Worker thread and remote-control facade of one virtual CPU.
//!
//! Every vCPU owns a dedicated worker thread that performs the blocking
//! resume syscall and the state transfers around it. Other threads steer
//! the worker exclusively through [`Vcpu::resume`] and [`Vcpu::with_state`];
//! the neutral state itself is handed across threads by a strict rendezvous
//! protocol, never by shared mutation.
//!
//! The protocol uses three semaphores: `wakeup` gets the parked worker going,
//! `state_ready` publishes one synchronized exit round to exactly one
//! consumer, and `handler_done` holds the worker until that round has been
//! processed. A round is either *genuine* (the guest exited on its own, the
//! exit signal is notified) or a *pause* round (synthesized for a
//! `with_state` caller, no notification).

use std::cell::UnsafeCell;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use snafu::{OptionExt, ResultExt, Snafu};

use crate::backend::{self, EXIT_PAUSED};
use crate::fpu::FpuSwitch;
use crate::kernel::{ExitSignal, KernelError, PauseLine, ResumeStatus, VcpuResource, Vendor};
use crate::state::VcpuState;
use crate::sync::Semaphore;

/// What the worker is asked to do next, and what it is doing now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    None,
    Pause,
    Run,
    Terminate,
}

/// Where the current exit round stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncPhase {
    /// No synchronized exit is outstanding.
    Idle,
    /// The worker published a genuine exit and waits in `handler_done`.
    ExitReady,
}

/// Bookkeeping shared between the worker and the facade, always accessed
/// under one mutex.
#[derive(Debug)]
struct Gate {
    requested: RunState,
    current: RunState,
    phase: SyncPhase,
    pause_waiters: u32,
}

/// What the worker latched for this iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Latched {
    Idle,
    Run,
    Pause,
    Terminate,
}

impl Gate {
    fn new() -> Self {
        Self {
            requested: RunState::None,
            current: RunState::None,
            phase: SyncPhase::Idle,
            pause_waiters: 0,
        }
    }

    /// Records a run request unless a stronger one is pending. Returns
    /// whether the worker is parked and needs a wakeup.
    fn request_run(&mut self) -> bool {
        if self.requested != RunState::None {
            return false;
        }
        self.requested = RunState::Run;
        self.current == RunState::None
    }

    /// Records a pause request (overriding a pending run) and registers the
    /// caller as a waiter. Returns whether the worker needs a wakeup.
    fn request_pause(&mut self) -> bool {
        if self.requested != RunState::Terminate {
            self.requested = RunState::Pause;
        }
        self.pause_waiters += 1;
        self.current == RunState::None
    }

    /// Consumes the pending request at the top of a worker iteration.
    fn latch(&mut self) -> Latched {
        match self.requested {
            RunState::Terminate => {
                self.current = RunState::Terminate;
                Latched::Terminate
            }
            RunState::Run => {
                self.requested = RunState::None;
                self.current = RunState::Run;
                Latched::Run
            }
            RunState::Pause => {
                self.requested = RunState::None;
                self.current = RunState::Pause;
                Latched::Pause
            }
            RunState::None => {
                self.current = RunState::None;
                Latched::Idle
            }
        }
    }
}

struct Shared {
    gate: Mutex<Gate>,
    /// Serializes `with_state` callers; at most one exit round is in flight.
    facade: Mutex<()>,
    wakeup: Semaphore,
    state_ready: Semaphore,
    handler_done: Semaphore,
    alive: Semaphore,
    /// Owned by whichever side the rendezvous protocol currently designates:
    /// the worker between latch and round delivery, the consumer of a round
    /// between `state_ready` and `handler_done`/resume.
    state: UnsafeCell<VcpuState>,
    resource: Mutex<Option<Box<dyn VcpuResource>>>,
    pause: Arc<dyn PauseLine>,
    exit_signal: Arc<dyn ExitSignal>,
}

// The UnsafeCell is only ever dereferenced by the protocol owner, see above.
unsafe impl Sync for Shared {}

impl Shared {
    fn new(pause: Arc<dyn PauseLine>, exit_signal: Arc<dyn ExitSignal>) -> Self {
        Self {
            gate: Mutex::new(Gate::new()),
            facade: Mutex::new(()),
            wakeup: Semaphore::new(),
            state_ready: Semaphore::new(),
            handler_done: Semaphore::new(),
            alive: Semaphore::new(),
            state: UnsafeCell::new(VcpuState::new()),
            resource: Mutex::new(None),
            pause,
            exit_signal,
        }
    }
}

/// Construction failures of [`VcpuBuilder::spawn`].
#[derive(Debug, Snafu)]
pub enum VcpuError {
    #[snafu(display("hardware vendor could not be identified"))]
    UnknownVendor,

    #[snafu(display("builder is missing the {what}"))]
    Incomplete { what: &'static str },

    #[snafu(display("kernel refused the vcpu: {source}"))]
    Create { source: KernelError },

    #[snafu(display("could not spawn the worker thread: {source}"))]
    Spawn { source: io::Error },
}

/// Assembles a [`Vcpu`] and spawns its worker thread.
pub struct VcpuBuilder {
    vendor: Option<Vendor>,
    id: u32,
    exit_signal: Option<Arc<dyn ExitSignal>>,
    pause: Option<Arc<dyn PauseLine>>,
}

impl VcpuBuilder {
    pub fn new() -> Self {
        Self {
            vendor: None,
            id: 0,
            exit_signal: None,
            pause: None,
        }
    }

    pub fn vendor(mut self, vendor: Vendor) -> Self {
        self.vendor = Some(vendor);
        self
    }

    pub fn id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn exit_signal(mut self, signal: Arc<dyn ExitSignal>) -> Self {
        self.exit_signal = Some(signal);
        self
    }

    pub fn pause_line(mut self, pause: Arc<dyn PauseLine>) -> Self {
        self.pause = Some(pause);
        self
    }

    /// Spawns the worker and creates the kernel resource via `factory` on
    /// the calling thread. On failure the worker is joined before returning.
    pub fn spawn<F>(self, factory: F) -> Result<Vcpu, VcpuError>
    where
        F: FnOnce() -> Result<Box<dyn VcpuResource>, KernelError>,
    {
        let vendor = self.vendor.context(IncompleteSnafu { what: "vendor" })?;
        if vendor == Vendor::Unknown {
            return UnknownVendorSnafu.fail();
        }
        let exit_signal = self
            .exit_signal
            .context(IncompleteSnafu { what: "exit signal" })?;
        let pause = self.pause.context(IncompleteSnafu { what: "pause line" })?;

        let shared = Arc::new(Shared::new(pause, exit_signal));
        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("vcpu-{}", self.id))
                .spawn(move || worker_loop(vendor, shared))
                .context(SpawnSnafu)?
        };
        shared.alive.down();

        match factory() {
            Ok(hw) => {
                *shared.resource.lock().unwrap() = Some(hw);
                shared.wakeup.up();
                Ok(Vcpu {
                    shared,
                    worker: Some(worker),
                })
            }
            Err(source) => {
                // Resource stays empty; the released worker bails out.
                shared.wakeup.up();
                let _ = worker.join();
                Err(VcpuError::Create { source })
            }
        }
    }
}

impl Default for VcpuBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle through which the VMM steers one virtual CPU.
pub struct Vcpu {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Vcpu {
    /// Lets the guest (continue to) run. Idempotent; a pending pause or
    /// terminate request takes precedence.
    pub fn resume(&self) {
        let wake = self.shared.gate.lock().unwrap().request_run();
        if wake {
            self.shared.wakeup.up();
        }
    }

    /// Runs `f` on the synchronized state of the vCPU.
    ///
    /// If a guest exit is already waiting to be handled, `f` handles it.
    /// Otherwise the guest is paused first, and `f` observes a round whose
    /// exit reason is [`EXIT_PAUSED`] unless the pause collided with a
    /// genuine exit. The vCPU keeps running afterwards iff `f` returns true.
    pub fn with_state<F>(&self, f: F)
    where
        F: FnOnce(&mut VcpuState) -> bool,
    {
        let _serial = self.shared.facade.lock().unwrap();

        let ready = self.shared.gate.lock().unwrap().phase == SyncPhase::ExitReady;
        if ready {
            self.handle_round(f);
            return;
        }

        // Force a pause round.
        let wake = self.shared.gate.lock().unwrap().request_pause();
        self.shared.pause.trigger();
        if wake {
            self.shared.wakeup.up();
        }

        self.shared.state_ready.down();

        let wants_run = f(unsafe { &mut *self.shared.state.get() });

        let mut gate = self.shared.gate.lock().unwrap();
        gate.pause_waiters -= 1;
        if gate.requested == RunState::Pause {
            gate.requested = RunState::None;
        }
        // The pause may have collided with a genuine exit; then this round
        // was that exit and the pending notification will draw the
        // dispatcher in later, against a fresh pause round.
        gate.phase = SyncPhase::Idle;
        if wants_run {
            gate.request_run();
        }
        drop(gate);

        // The worker waits in handler_done for every delivered round.
        self.shared.handler_done.up();
    }

    /// Consumes the published exit round: callback, then release the worker.
    fn handle_round<F>(&self, f: F)
    where
        F: FnOnce(&mut VcpuState) -> bool,
    {
        self.shared.state_ready.down();

        let wants_run = f(unsafe { &mut *self.shared.state.get() });

        let mut gate = self.shared.gate.lock().unwrap();
        gate.phase = SyncPhase::Idle;
        if wants_run {
            gate.request_run();
        }
        drop(gate);

        self.shared.handler_done.up();
    }
}

impl Drop for Vcpu {
    fn drop(&mut self) {
        self.shared.gate.lock().unwrap().requested = RunState::Terminate;
        // Unblock the worker wherever it currently waits. The permits are
        // posted unconditionally: a worker that published an exit right as
        // the terminate request landed parks in handler_done, and an unused
        // permit or an unconsumed round is discarded with the vcpu.
        self.shared.pause.trigger();
        self.shared.wakeup.up();
        self.shared.handler_done.up();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(vendor: Vendor, shared: Arc<Shared>) {
    shared.alive.up();
    shared.wakeup.down();

    let mut hw = match shared.resource.lock().unwrap().take() {
        Some(hw) => hw,
        // Construction failed after the thread was spawned.
        None => return,
    };

    let mut codec = backend::codec_for(vendor);
    codec.setup(hw.as_mut());
    let mut fpu = FpuSwitch::new();
    log::debug!("vcpu worker started ({vendor:?})");

    loop {
        let latched = shared.gate.lock().unwrap().latch();
        match latched {
            Latched::Terminate => {
                log::debug!("vcpu worker terminating");
                return;
            }
            Latched::Idle => {
                shared.wakeup.down();
                continue;
            }
            Latched::Pause => {
                // Synthetic round: the guest was not running, the state is
                // already synchronized.
                shared.pause.ack();
                let state = unsafe { &mut *shared.state.get() };
                state.exit_reason.charge(EXIT_PAUSED);
                if shared.gate.lock().unwrap().pause_waiters > 0 {
                    shared.state_ready.up();
                    shared.handler_done.down();
                }
                continue;
            }
            Latched::Run => {}
        }

        let state = unsafe { &mut *shared.state.get() };
        codec.write_state(state, hw.as_mut());

        let host = fpu.save_host();
        fpu.load_guest(&mut state.fpu);
        let status = hw.resume();
        fpu.save_guest(&mut state.fpu);
        fpu.restore_host(&host);

        let raw = codec.exit_reason(hw.as_mut());
        let mut reason = raw;
        {
            let mut gate = self_gate(&shared);
            gate.current = RunState::Pause;
            if status == ResumeStatus::DeliveryFailed && raw == codec.pause_exit() {
                reason = EXIT_PAUSED;
                if gate.requested == RunState::Pause {
                    gate.requested = RunState::None;
                }
            }
        }
        if reason == EXIT_PAUSED {
            shared.pause.ack();
        }

        codec.read_state(state, hw.as_mut(), reason);
        state.exit_reason.charge(reason);
        log::trace!("guest exit, reason {reason:#x}");

        if reason == EXIT_PAUSED {
            let mut gate = self_gate(&shared);
            if gate.pause_waiters > 0 {
                drop(gate);
                shared.state_ready.up();
                shared.handler_done.down();
            } else if gate.requested == RunState::None {
                // Nobody asked for this round; keep the guest going.
                gate.requested = RunState::Run;
            }
            continue;
        }

        {
            let mut gate = self_gate(&shared);
            if gate.requested == RunState::Terminate {
                // Teardown raced this exit; nobody is left to consume it.
                continue;
            }
            gate.phase = SyncPhase::ExitReady;
        }
        shared.state_ready.up();
        shared.exit_signal.notify();
        shared.handler_done.down();
    }
}

fn self_gate(shared: &Shared) -> std::sync::MutexGuard<'_, Gate> {
    shared.gate.lock().unwrap()
}
