//! Simulated bxCAN controller and drain timer for host tests

#![allow(dead_code)]

use canbroker::core::fugit::HertzU32;
use canbroker::core::{Dependencies, Register, Registers, MAILBOXES};
use canbroker::manager::PeriodicTimer;
use canbroker::message::{CanFrame, DataLengthRegister, IdentifierRegister, MailboxFrame};
use canbroker::registry::{DeviceRegistry, Handle, PeripheralId};
use canbroker::Error;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

pub const CLOCK: HertzU32 = HertzU32::from_raw(42_000_000);

const MCR_INRQ: u32 = 1 << 0;
const MCR_SLEEP: u32 = 1 << 1;
const MCR_RESET: u32 = 1 << 15;
const MCR_RESET_VALUE: u32 = 0x0001_0002;
const BTR_RESET_VALUE: u32 = 0x0123_0000;
const TXRQ: u32 = 1 << 0;
const RFOM: u32 = 1 << 5;
const FIFO_DEPTH: usize = 3;
const FILTER_BANKS: usize = 28;

pub fn can1_handle() -> Handle {
    Handle::new(0x4000_6400 as *const ()).unwrap()
}

pub fn can2_handle() -> Handle {
    Handle::new(0x4000_6800 as *const ()).unwrap()
}

/// Registry with both controllers registered.
pub fn registry() -> DeviceRegistry {
    let registry = DeviceRegistry::new();
    registry.set_handle(PeripheralId::CAN_1, can1_handle()).unwrap();
    registry.set_handle(PeripheralId::CAN_2, can2_handle()).unwrap();
    registry
}

/// Register state of one simulated controller
pub struct Sim {
    pub mcr: u32,
    pub ier: u32,
    pub esr: u32,
    pub btr: u32,
    pub fmr: u32,
    pub fm1r: u32,
    pub fs1r: u32,
    pub ffa1r: u32,
    pub fa1r: u32,
    pub banks: [[u32; 2]; FILTER_BANKS],
    staged: [MailboxFrame; MAILBOXES],
    occupied: [bool; MAILBOXES],
    rqcp: [bool; MAILBOXES],
    rx: [VecDeque<MailboxFrame>; 2],
    /// Frames that got a transmit request, in order
    pub transmitted: Vec<CanFrame>,
    /// The controller never acknowledges initialization mode
    pub init_stuck: bool,
    /// The controller never acknowledges leaving initialization mode
    pub leave_stuck: bool,
    /// Interrupt enable writes are ignored
    pub ier_stuck: bool,
    /// Writes to the timing register, i.e. initializations
    pub btr_writes: usize,
    /// Writes that enabled interrupt sources, i.e. starts
    pub ier_enables: usize,
}

impl Sim {
    fn reset(&mut self) {
        self.mcr = MCR_RESET_VALUE;
        self.ier = 0;
        self.btr = BTR_RESET_VALUE;
        self.occupied = [false; MAILBOXES];
        self.rqcp = [false; MAILBOXES];
    }

    fn in_init(&self) -> bool {
        self.mcr & MCR_INRQ != 0 && !self.init_stuck
    }

    fn msr(&self) -> u32 {
        let inak = (self.in_init() || self.leave_stuck) as u32;
        let slak = (self.mcr & MCR_SLEEP != 0 && self.mcr & MCR_INRQ == 0) as u32;
        slak << 1 | inak
    }

    fn tsr(&self) -> u32 {
        (0..MAILBOXES).fold(0, |w, n| {
            let tme = (!self.occupied[n] as u32) << (26 + n);
            let rqcp = (self.rqcp[n] as u32) << (8 * n);
            w | tme | rqcp
        })
    }

    fn rx_head(&self, fifo: usize) -> MailboxFrame {
        self.rx[fifo].front().copied().unwrap_or_default()
    }
}

/// Simulated controller. Clones share the same state, so a test keeps one
/// clone to inspect what the transport did with the other.
#[derive(Clone)]
pub struct SimCan {
    clock: HertzU32,
    sim: Arc<Mutex<Sim>>,
    btr_gate: Arc<Gate>,
}

impl SimCan {
    pub fn new() -> Self {
        Self::with_clock(CLOCK)
    }

    pub fn with_clock(clock: HertzU32) -> Self {
        let mut sim = Sim {
            mcr: 0,
            ier: 0,
            esr: 0,
            btr: 0,
            fmr: 0,
            fm1r: 0,
            fs1r: 0,
            ffa1r: 0,
            fa1r: 0,
            banks: [[0; 2]; FILTER_BANKS],
            staged: [MailboxFrame::default(); MAILBOXES],
            occupied: [false; MAILBOXES],
            rqcp: [false; MAILBOXES],
            rx: [VecDeque::new(), VecDeque::new()],
            transmitted: Vec::new(),
            init_stuck: false,
            leave_stuck: false,
            ier_stuck: false,
            btr_writes: 0,
            ier_enables: 0,
        };
        sim.reset();
        Self {
            clock,
            sim: Arc::new(Mutex::new(sim)),
            btr_gate: Arc::default(),
        }
    }

    /// Gate that holds writes to the timing register, i.e. initializations.
    pub fn btr_gate(&self) -> &Gate {
        &self.btr_gate
    }

    pub fn sim(&self) -> MutexGuard<'_, Sim> {
        self.sim.lock().unwrap()
    }

    /// Finishes every pending transmission.
    pub fn complete_all(&self) {
        let mut sim = self.sim();
        for n in 0..MAILBOXES {
            if sim.occupied[n] {
                sim.occupied[n] = false;
                sim.rqcp[n] = true;
            }
        }
    }

    /// Keeps mailbox `n` busy with a frame nobody submitted.
    pub fn occupy(&self, n: usize) {
        self.sim().occupied[n] = true;
    }

    pub fn free_mailboxes(&self) -> usize {
        self.sim().occupied.iter().filter(|busy| !**busy).count()
    }

    /// Delivers `frame` into receive FIFO `fifo`.
    pub fn inject(&self, fifo: usize, frame: &CanFrame) {
        self.sim().rx[fifo].push_back(MailboxFrame::from(frame));
    }

    pub fn rx_pending(&self, fifo: usize) -> usize {
        self.sim().rx[fifo].len()
    }

    pub fn transmitted(&self) -> Vec<CanFrame> {
        self.sim().transmitted.clone()
    }
}

impl Registers for SimCan {
    fn read(&self, reg: Register) -> u32 {
        let sim = self.sim();
        match reg {
            Register::Mcr => sim.mcr,
            Register::Msr => sim.msr(),
            Register::Tsr => sim.tsr(),
            Register::Rfr(f) => sim.rx[f].len().min(FIFO_DEPTH) as u32,
            Register::Ier => sim.ier,
            Register::Esr => sim.esr,
            Register::Btr => sim.btr,
            Register::Tir(n) => sim.staged[n].id.0,
            Register::Tdtr(n) => sim.staged[n].length.0,
            Register::Tdlr(n) => sim.staged[n].data_low,
            Register::Tdhr(n) => sim.staged[n].data_high,
            Register::Rir(f) => sim.rx_head(f).id.0,
            Register::Rdtr(f) => sim.rx_head(f).length.0,
            Register::Rdlr(f) => sim.rx_head(f).data_low,
            Register::Rdhr(f) => sim.rx_head(f).data_high,
            Register::Fmr => sim.fmr,
            Register::Fm1r => sim.fm1r,
            Register::Fs1r => sim.fs1r,
            Register::Ffa1r => sim.ffa1r,
            Register::Fa1r => sim.fa1r,
            Register::Fr1(b) => sim.banks[b][0],
            Register::Fr2(b) => sim.banks[b][1],
        }
    }

    fn write(&self, reg: Register, value: u32) {
        if reg == Register::Btr {
            self.btr_gate.pass();
        }
        let mut sim = self.sim();
        match reg {
            Register::Mcr if value & MCR_RESET != 0 => sim.reset(),
            Register::Mcr => sim.mcr = value,
            Register::Msr | Register::Esr => {}
            Register::Tsr => {
                for n in 0..MAILBOXES {
                    if value & 1 << (8 * n) != 0 {
                        sim.rqcp[n] = false;
                    }
                }
            }
            Register::Rfr(f) => {
                if value & RFOM != 0 {
                    sim.rx[f].pop_front();
                }
            }
            Register::Ier => {
                if value & !sim.ier != 0 {
                    sim.ier_enables += 1;
                }
                if !sim.ier_stuck {
                    sim.ier = value;
                }
            }
            Register::Btr => {
                sim.btr_writes += 1;
                if sim.in_init() {
                    sim.btr = value;
                }
            }
            Register::Tir(n) => {
                sim.staged[n].id = IdentifierRegister(value & !TXRQ);
                if value & TXRQ != 0 && !sim.occupied[n] {
                    sim.occupied[n] = true;
                    let frame = sim.staged[n].decode();
                    sim.transmitted.push(frame);
                }
            }
            Register::Tdtr(n) => sim.staged[n].length = DataLengthRegister(value),
            Register::Tdlr(n) => sim.staged[n].data_low = value,
            Register::Tdhr(n) => sim.staged[n].data_high = value,
            Register::Rir(_) | Register::Rdtr(_) | Register::Rdlr(_) | Register::Rdhr(_) => {}
            Register::Fmr => sim.fmr = value,
            Register::Fm1r => sim.fm1r = value,
            Register::Fs1r => sim.fs1r = value,
            Register::Ffa1r => sim.ffa1r = value,
            Register::Fa1r => sim.fa1r = value,
            Register::Fr1(b) => sim.banks[b][0] = value,
            Register::Fr2(b) => sim.banks[b][1] = value,
        }
    }
}

unsafe impl Dependencies for SimCan {
    fn can_clock(&self) -> HertzU32 {
        self.clock
    }
}

/// Blocks the threads passing it while armed.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    armed: bool,
    waiting: usize,
}

impl Gate {
    pub fn arm(&self) {
        self.state.lock().unwrap().armed = true;
    }

    pub fn release(&self) {
        self.state.lock().unwrap().armed = false;
        self.changed.notify_all();
    }

    /// Returns once a thread is held at the gate.
    pub fn wait_until_blocked(&self) {
        let state = self.state.lock().unwrap();
        let _state = self.changed.wait_while(state, |s| s.waiting == 0).unwrap();
    }

    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiting += 1;
        self.changed.notify_all();
        state = self.changed.wait_while(state, |s| s.armed).unwrap();
        state.waiting -= 1;
    }
}

/// Drain timer recording the rates it was started with.
#[derive(Clone)]
pub struct SimTimer {
    id: PeripheralId,
    inner: Arc<Mutex<TimerState>>,
}

#[derive(Default)]
struct TimerState {
    starts: Vec<HertzU32>,
    fail: bool,
}

impl SimTimer {
    pub fn new() -> Self {
        Self {
            id: PeripheralId::TIMER_6,
            inner: Arc::default(),
        }
    }

    pub fn starts(&self) -> Vec<HertzU32> {
        self.inner.lock().unwrap().starts.clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.inner.lock().unwrap().fail = fail;
    }
}

impl PeriodicTimer for SimTimer {
    fn peripheral(&self) -> PeripheralId {
        self.id
    }

    fn start(&self, rate: HertzU32) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail {
            return Err(Error::HardwareError);
        }
        inner.starts.push(rate);
        Ok(())
    }
}
