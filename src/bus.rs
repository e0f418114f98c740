//! Transport over one bxCAN controller

use crate::config::{BitTiming, Baud, BusConfig, Mode};
use crate::core::{Dependencies, Register, Registers};
use crate::filter::{FilterBankConfig, FilterMode, FilterWords, Scale};
use crate::interrupt::InterruptSet;
use crate::mask::{masked, MaskGuard};
use crate::message::CanFrame;
use crate::reg::{Btr, Esr, Fmr, Mcr, Msr};
use crate::registry::{DeviceRegistry, Handle, PeripheralId};
use crate::rx_fifo::{Fifo, RxFifo};
use crate::tx_buffers::{MailboxSet, Mailboxes};
use crate::Error;
use core::cell::Cell;
use core::fmt::{self, Debug};
use critical_section::Mutex;
use fugit::HertzU32;

/// Polls of the status register before a mode change counts as timed out
const HANDSHAKE_POLLS: u32 = 100_000;

/// One of the two physical controllers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bus {
    /// First controller, owner of the filter banks
    Can1,
    /// Second controller
    Can2,
}

impl Bus {
    /// Both controllers, in index order
    pub const ALL: [Bus; 2] = [Bus::Can1, Bus::Can2];

    /// Position of the controller in per-bus tables.
    pub fn index(self) -> usize {
        match self {
            Bus::Can1 => 0,
            Bus::Can2 => 1,
        }
    }

    /// Registry identity of the controller.
    pub fn peripheral(self) -> PeripheralId {
        match self {
            Bus::Can1 => PeripheralId::CAN_1,
            Bus::Can2 => PeripheralId::CAN_2,
        }
    }
}

impl TryFrom<u8> for Bus {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self, Error> {
        match index {
            0 => Ok(Bus::Can1),
            1 => Ok(Bus::Can2),
            _ => Err(Error::InvalidParam),
        }
    }
}

impl TryFrom<PeripheralId> for Bus {
    type Error = Error;

    fn try_from(id: PeripheralId) -> Result<Self, Error> {
        Bus::ALL
            .into_iter()
            .find(|bus| bus.peripheral() == id)
            .ok_or(Error::InvalidParam)
    }
}

/// Printable ESR field
pub struct ErrorCounters(pub Esr);

impl ErrorCounters {
    /// Receive error counter in bits 23:16, transmit error counter in bits
    /// 7:0.
    pub fn packed(&self) -> u32 {
        u32::from(self.0.rec()) << 16 | u32::from(self.0.tec())
    }
}

impl From<Esr> for ErrorCounters {
    fn from(value: Esr) -> Self {
        Self(value)
    }
}

impl Debug for ErrorCounters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        let esr = &self.0;

        f.debug_struct("ErrorCounters")
            .field("rec", &esr.rec())
            .field("tec", &esr.tec())
            .field("lec", &esr.lec())
            .field("boff", &esr.boff())
            .field("epvf", &esr.epvf())
            .field("ewgf", &esr.ewgf())
            .finish()
    }
}

/// Configuration a controller is running with
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanInfo {
    /// Requested bus configuration
    pub config: BusConfig,
    /// Timing programmed for it
    pub timing: BitTiming,
    /// Bit rate the timing yields at the current peripheral clock
    pub actual_bitrate: HertzU32,
    /// Sample point in per mille of the bit time
    pub sample_point_permille: u32,
}

#[derive(Copy, Clone)]
struct State {
    handle: Option<Handle>,
    config: Option<BusConfig>,
    timing: Option<BitTiming>,
    started: bool,
}

impl State {
    const RESET: State = State {
        handle: None,
        config: None,
        timing: None,
        started: false,
    };
}

/// Interrupt sources enabled while the controller runs
fn running_interrupts() -> InterruptSet {
    let mut set = InterruptSet::empty();
    set.set_fmpie0(true);
    set.set_fmpie1(true);
    set.set_tmeie(true);
    set
}

/// Transport over one controller
///
/// Owns the controller through a [`DeviceRegistry`] lease taken in
/// [`Can::init`]. Every method takes `&self`; register sequences that must
/// not interleave run with interrupts masked.
///
/// Configuring and activating are separate steps: [`Can::init`] leaves the
/// controller in initialization mode and [`Can::start`] puts it on the bus.
pub struct Can<'a, R> {
    bus: Bus,
    regs: R,
    registry: &'a DeviceRegistry,
    state: Mutex<Cell<State>>,
}

impl<'a, R: Registers + Dependencies> Can<'a, R> {
    /// Transport for `bus` driving the controller behind `regs`.
    pub fn new(bus: Bus, regs: R, registry: &'a DeviceRegistry) -> Self {
        Self {
            bus,
            regs,
            registry,
            state: Mutex::new(Cell::new(State::RESET)),
        }
    }

    /// Controller this transport drives.
    pub fn bus(&self) -> Bus {
        self.bus
    }

    fn state(&self) -> State {
        masked(|cs| self.state.borrow(cs).get())
    }

    fn update(&self, f: impl FnOnce(&mut State)) {
        masked(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            f(&mut state);
            cell.set(state);
        })
    }

    /// Hardware handle of the controller, once initialized.
    pub fn handle(&self) -> Result<Handle, Error> {
        self.state().handle.ok_or(Error::NullHandle)
    }

    /// Claims the controller and programs it for `config`.
    ///
    /// The timing comes from the verified table; clocks or rates without an
    /// entry are [`Error::UnsupportedConfig`]. On success the controller
    /// accepts every frame into FIFO 0 and waits in initialization mode for
    /// [`Can::start`]. On failure the lease is released again.
    pub fn init(&self, config: BusConfig) -> Result<(), Error> {
        let timing = BitTiming::lookup(self.regs.can_clock(), config.baud)?;
        let id = self.bus.peripheral();
        let handle = self.registry.handle(id)?;
        self.registry.start_device(id)?;

        if let Err(e) = self.program(config.mode, timing) {
            warn!("can: {} rejected configuration: {}", self.bus, e);
            let _ = self.registry.stop_device(id);
            return Err(e);
        }

        let accept_all = FilterBankConfig::accept_all(self.bus.filter_banks().start, Fifo::Fifo0);
        if let Err(e) = self.write_filter(&accept_all) {
            warn!("can: {} default filter failed: {}", self.bus, e);
            self.reset();
            let _ = self.registry.stop_device(id);
            return Err(e);
        }

        self.update(|state| {
            *state = State {
                handle: Some(handle),
                config: Some(config),
                timing: Some(timing),
                started: false,
            }
        });
        debug!(
            "can: {} configured, prescaler {} bs1 {} bs2 {}",
            self.bus,
            timing.prescaler,
            timing.phase_seg_1,
            timing.phase_seg_2
        );
        Ok(())
    }

    fn program(&self, mode: Mode, timing: BitTiming) -> Result<(), Error> {
        self.regs.modify(Register::Mcr, |w| {
            let mut mcr = Mcr(w);
            mcr.set_sleep(false);
            mcr.set_inrq(true);
            mcr.0
        });
        self.wait_for(|msr| msr.inak() && !msr.slak())?;

        let mut mcr = Mcr(self.regs.read(Register::Mcr));
        mcr.set_ttcm(false);
        mcr.set_abom(false);
        mcr.set_awum(false);
        mcr.set_nart(true);
        mcr.set_rflm(false);
        mcr.set_txfp(false);
        self.regs.write(Register::Mcr, mcr.0);

        let mut btr = Btr(0);
        btr.set_brp(timing.prescaler - 1);
        btr.set_ts1(timing.phase_seg_1 - 1);
        btr.set_ts2(timing.phase_seg_2 - 1);
        btr.set_sjw(timing.sjw - 1);
        btr.set_lbkm(mode.loopback());
        btr.set_silm(mode.silent());
        self.regs.write(Register::Btr, btr.0);
        // The timing register only takes writes in initialization mode.
        if self.regs.read(Register::Btr) != btr.0 {
            return Err(Error::HardwareError);
        }
        Ok(())
    }

    fn wait_for(&self, done: impl Fn(Msr) -> bool) -> Result<(), Error> {
        for _ in 0..HANDSHAKE_POLLS {
            if done(Msr(self.regs.read(Register::Msr))) {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    fn enter_init(&self) -> Result<(), Error> {
        self.regs.modify(Register::Mcr, |w| {
            let mut mcr = Mcr(w);
            mcr.set_inrq(true);
            mcr.0
        });
        self.wait_for(|msr| msr.inak())
    }

    fn reset(&self) {
        let mut mcr = Mcr(0);
        mcr.set_reset(true);
        self.regs.write(Register::Mcr, mcr.0);
    }

    /// Puts the controller on the bus and enables the FIFO 0, FIFO 1 and
    /// mailbox-empty interrupts.
    ///
    /// If the controller does not leave initialization mode, or the
    /// interrupts do not stick, the interrupts are disabled again and the
    /// controller returns to initialization mode before the error is
    /// reported.
    pub fn start(&self) -> Result<(), Error> {
        self.handle()?;
        self.regs.modify(Register::Mcr, |w| {
            let mut mcr = Mcr(w);
            mcr.set_inrq(false);
            mcr.0
        });
        if let Err(e) = self.wait_for(|msr| !msr.inak()) {
            warn!("can: {} did not leave init mode", self.bus);
            let _ = self.enter_init();
            return Err(e);
        }

        let wanted = running_interrupts();
        self.regs.modify(Register::Ier, |w| w | wanted.0);
        let missing = wanted.difference(self.enabled_interrupts());
        if !missing.is_empty() {
            for interrupt in missing.iter() {
                error!("can: {} interrupt {} did not enable", self.bus, interrupt);
            }
            self.regs.modify(Register::Ier, |w| w & !wanted.0);
            let _ = self.enter_init();
            return Err(Error::HardwareError);
        }
        self.update(|state| state.started = true);
        info!("can: {} started", self.bus);
        Ok(())
    }

    /// Disables the running interrupts and takes the controller off the bus.
    ///
    /// The controller counts as stopped once its interrupts are off, even if
    /// it does not acknowledge initialization mode in time.
    pub fn stop(&self) -> Result<(), Error> {
        self.handle()?;
        self.regs.modify(Register::Ier, |w| w & !running_interrupts().0);
        self.update(|state| state.started = false);
        self.enter_init()
    }

    /// Interrupt sources currently enabled on the controller.
    pub fn enabled_interrupts(&self) -> InterruptSet {
        InterruptSet(self.regs.read(Register::Ier))
    }

    /// Stops and resets the controller and gives up the registry lease.
    pub fn deinit(&self) -> Result<(), Error> {
        self.handle()?;
        if let Err(e) = self.stop() {
            warn!("can: {} did not stop cleanly: {}", self.bus, e);
        }
        self.reset();
        self.update(|state| *state = State::RESET);
        self.registry.stop_device(self.bus.peripheral())
    }

    /// Returns `true` between a successful [`Can::start`] and the next
    /// [`Can::stop`].
    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// Configured bus speed.
    pub fn baud_rate(&self) -> Option<Baud> {
        self.state().config.map(|c| c.baud)
    }

    /// Configured operating mode.
    pub fn mode(&self) -> Option<Mode> {
        self.state().config.map(|c| c.mode)
    }

    /// Configuration and derived timing figures.
    pub fn info(&self) -> Result<CanInfo, Error> {
        let state = self.state();
        let (config, timing) = state.config.zip(state.timing).ok_or(Error::NullHandle)?;
        Ok(CanInfo {
            config,
            timing,
            actual_bitrate: timing.bitrate(self.regs.can_clock()),
            sample_point_permille: timing.sample_point_permille(),
        })
    }

    /// Sends a data frame with an 11-bit identifier.
    pub fn send_std_data(&self, id: u32, data: &[u8]) -> Result<(), Error> {
        self.send_message(&CanFrame::new_standard(id, data)?)
    }

    /// Sends a data frame with a 29-bit identifier.
    pub fn send_ext_data(&self, id: u32, data: &[u8]) -> Result<(), Error> {
        self.send_message(&CanFrame::new_extended(id, data)?)
    }

    /// Sends a remote frame requesting `dlc` bytes.
    pub fn send_remote_frame(&self, id: u32, extended: bool, dlc: u8) -> Result<(), Error> {
        self.send_message(&CanFrame::new_remote_frame(id, extended, dlc)?)
    }

    /// Hands `frame` to a free mailbox.
    ///
    /// Fails with [`Error::DeviceBusy`] if all mailboxes are pending; there is
    /// no internal retry.
    pub fn send_message(&self, frame: &CanFrame) -> Result<(), Error> {
        self.handle()?;
        let _guard = MaskGuard::acquire();
        match self.mailboxes().transmit(frame) {
            Ok(_) => Ok(()),
            Err(nb::Error::WouldBlock) => Err(Error::DeviceBusy),
            Err(nb::Error::Other(never)) => match never {},
        }
    }

    /// Transmit mailboxes of the controller.
    pub fn mailboxes(&self) -> Mailboxes<'_, R> {
        Mailboxes::new(&self.regs)
    }

    /// Receive FIFO `fifo` of the controller.
    pub fn rx_fifo(&self, fifo: Fifo) -> RxFifo<'_, R> {
        RxFifo::new(&self.regs, fifo)
    }

    /// Takes the oldest frame out of `fifo`.
    pub fn receive_from(&self, fifo: Fifo) -> Option<CanFrame> {
        self.rx_fifo(fifo).receive().ok()
    }

    /// Clears the request-completed flags and returns the mailboxes they
    /// were set for.
    pub fn acknowledge_tx_complete(&self) -> MailboxSet {
        let mailboxes = self.mailboxes();
        let done = mailboxes.completed();
        mailboxes.acknowledge(done);
        done
    }

    /// Programs one filter bank.
    pub fn config_filter(&self, filter: &FilterBankConfig) -> Result<(), Error> {
        self.handle()?;
        self.write_filter(filter)
    }

    /// Routes standard frames matching `id` under `mask` to `fifo`.
    pub fn config_filter_std_id(
        &self,
        id: u32,
        mask: u32,
        fifo: Fifo,
        bank: u8,
    ) -> Result<(), Error> {
        self.config_filter(&FilterBankConfig::standard(bank, id, mask, fifo))
    }

    /// Routes extended frames matching `id` under `mask` to `fifo`.
    pub fn config_filter_ext_id(
        &self,
        id: u32,
        mask: u32,
        fifo: Fifo,
        bank: u8,
    ) -> Result<(), Error> {
        self.config_filter(&FilterBankConfig::extended(bank, id, mask, fifo))
    }

    /// Routes every frame to `fifo` through the first bank of this
    /// controller.
    pub fn config_filter_accept_all(&self, fifo: Fifo) -> Result<(), Error> {
        self.config_filter(&FilterBankConfig::accept_all(self.bus.filter_banks().start, fifo))
    }

    fn write_filter(&self, filter: &FilterBankConfig) -> Result<(), Error> {
        filter.check(self.bus)?;
        let words = FilterWords::from(filter);
        let bit = filter.bank_bit();
        let bank = usize::from(filter.bank);
        let set = |reg: Register, on: bool| {
            self.regs.modify(reg, |w| if on { w | bit } else { w & !bit })
        };

        // The filter block is shared with the other controller.
        let _guard = MaskGuard::acquire();
        let mut fmr = Fmr(self.regs.read(Register::Fmr));
        fmr.set_finit(true);
        fmr.set_can2sb(Bus::Can2.filter_banks().start);
        self.regs.write(Register::Fmr, fmr.0);

        set(Register::Fa1r, false);
        set(Register::Fs1r, filter.scale == Scale::Single32);
        self.regs.write(Register::Fr1(bank), words.fr1);
        self.regs.write(Register::Fr2(bank), words.fr2);
        set(Register::Fm1r, filter.mode == FilterMode::IdList);
        set(Register::Ffa1r, filter.fifo == Fifo::Fifo1);
        set(Register::Fa1r, filter.active);

        fmr.set_finit(false);
        self.regs.write(Register::Fmr, fmr.0);
        trace!("can: {} filter bank {} written", self.bus, filter.bank);
        Ok(())
    }

    /// Live error counters and flags.
    pub fn error_counters(&self) -> ErrorCounters {
        ErrorCounters(Esr(self.regs.read(Register::Esr)))
    }

    /// Receive and transmit error counters, packed as
    /// [`ErrorCounters::packed`].
    pub fn error_count(&self) -> u32 {
        self.error_counters().packed()
    }

    /// Returns `true` if either error counter passed 127.
    pub fn is_error_passive(&self) -> bool {
        self.error_counters().0.epvf()
    }

    /// Returns `true` if the controller left the bus after too many errors.
    pub fn is_bus_off(&self) -> bool {
        self.error_counters().0.boff()
    }

    /// Number of mailboxes that can take a frame right now.
    pub fn free_tx_mailboxes(&self) -> usize {
        self.mailboxes().free().len()
    }
}

impl<'a, R: Registers + Dependencies> embedded_can::nb::Can for Can<'a, R> {
    type Frame = CanFrame;
    type Error = Error;

    fn transmit(&mut self, frame: &CanFrame) -> nb::Result<Option<CanFrame>, Error> {
        match self.send_message(frame) {
            Ok(()) => Ok(None),
            Err(Error::DeviceBusy) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn receive(&mut self) -> nb::Result<CanFrame, Error> {
        self.receive_from(Fifo::Fifo0)
            .or_else(|| self.receive_from(Fifo::Fifo1))
            .ok_or(nb::Error::WouldBlock)
    }
}
