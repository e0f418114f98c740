//! Shared bus arbitration and fan-out
//!
//! [`CanManager`] lets independently written modules share the two
//! controllers. Each module first declares the configuration it needs with
//! [`CanManager::ask_resource`], then calls [`CanManager::start_resource`];
//! the first start brings the controller up and later ones are no-ops.
//! Inbound frames are fanned out to every subscriber of their identifier;
//! outbound frames go through a bounded queue that a periodic timer drains
//! into the hardware mailboxes.
//!
//! There is one manager per node. Construct it once at startup and hand it
//! out by reference; every method takes `&self` and may be called from tasks
//! and interrupt handlers alike.

pub mod subscription;

pub use subscription::{Handler, Matches, RxHandler, Subscription, SubscriptionTable};

use crate::bus::{Bus, Can};
use crate::config::BusConfig;
use crate::core::{Dependencies, Registers, MAILBOXES};
use crate::mask::{masked, MaskGuard};
use crate::message::CanFrame;
use crate::registry::{DeviceRegistry, Handle, PeripheralId};
use crate::ring::RingBuffer;
use crate::rx_fifo::{Fifo, FIFO_DEPTH};
use crate::tx_buffers::MailboxSet;
use crate::Error;
use core::cell::{Cell, RefCell};
use critical_section::Mutex;
use embedded_can::Frame;
use fugit::HertzU32;
use generic_array::typenum::consts::U12;

/// Frames each bus can hold before [`CanManager::send_message`] reports
/// backpressure
pub type QueueCapacity = U12;

/// Rate of the queue drain
pub const DRAIN_RATE: HertzU32 = HertzU32::from_raw(1_000);

/// Largest identifier a subscription may name
const MAX_ID: u32 = 0x1FFF_FFFF;

/// Hardware timer ticking [`CanManager::process_send_queue`].
///
/// The manager claims the timer's registry slot before starting it. Wiring
/// the timer interrupt to [`CanManager::process_send_queue`] is up to the
/// board support code.
pub trait PeriodicTimer {
    /// Registry identity of the timer.
    fn peripheral(&self) -> PeripheralId;

    /// Starts ticking at `rate`.
    fn start(&self, rate: HertzU32) -> Result<(), Error>;
}

/// Lifecycle of one bus, as seen by consumers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// Nobody asked for the bus
    Unrequested,
    /// A configuration is recorded but the controller is not running yet
    Requested,
    /// The controller is on the bus; there is no way back
    Running,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting,
    Running,
}

struct BusSlot<'a> {
    lease: Option<BusConfig>,
    phase: Phase,
    subscriptions: SubscriptionTable<'a>,
    queue: RingBuffer<CanFrame, QueueCapacity>,
}

impl<'a> BusSlot<'a> {
    fn new() -> Self {
        Self {
            lease: None,
            phase: Phase::Idle,
            subscriptions: SubscriptionTable::new(),
            queue: RingBuffer::new(),
        }
    }

    fn state(&self) -> BusState {
        match (self.lease, self.phase) {
            (None, _) => BusState::Unrequested,
            (Some(_), Phase::Running) => BusState::Running,
            (Some(_), _) => BusState::Requested,
        }
    }
}

enum Claim {
    Mine(BusConfig),
    Running,
    Starting,
}

/// Arbitration service for both controllers
pub struct CanManager<'a, R, T> {
    registry: &'a DeviceRegistry,
    can: [Can<'a, R>; 2],
    timer: T,
    buses: Mutex<RefCell<[BusSlot<'a>; 2]>>,
    timer_started: Mutex<Cell<bool>>,
}

impl<'a, R: Registers + Dependencies, T: PeriodicTimer> CanManager<'a, R, T> {
    /// Manager over the controllers behind `can1` and `can2`, draining its
    /// queues from `timer`.
    ///
    /// Nothing is touched until the first [`CanManager::start_resource`].
    pub fn new(registry: &'a DeviceRegistry, can1: R, can2: R, timer: T) -> Self {
        Self {
            registry,
            can: [
                Can::new(Bus::Can1, can1, registry),
                Can::new(Bus::Can2, can2, registry),
            ],
            timer,
            buses: Mutex::new(RefCell::new([BusSlot::new(), BusSlot::new()])),
            timer_started: Mutex::new(Cell::new(false)),
        }
    }

    fn with_bus<U>(&self, bus: Bus, f: impl FnOnce(&mut BusSlot<'a>) -> U) -> U {
        let guard = MaskGuard::acquire();
        let mut buses = self.buses.borrow_ref_mut(guard.token());
        f(&mut buses[bus.index()])
    }

    /// Records the configuration a consumer needs on `bus`.
    ///
    /// The first caller decides. Later callers must ask for the same
    /// configuration; anything else is [`Error::InvalidParam`] and leaves
    /// the recorded one in place.
    pub fn ask_resource(&self, bus: Bus, config: BusConfig) -> Result<(), Error> {
        let result = self.with_bus(bus, |slot| match slot.lease {
            None => {
                slot.lease = Some(config);
                Ok(())
            }
            Some(lease) if lease == config => Ok(()),
            Some(_) => Err(Error::InvalidParam),
        });
        if result.is_err() {
            warn!("manager: conflicting configuration asked for {}", bus);
        }
        result
    }

    /// Brings `bus` up with the recorded configuration.
    ///
    /// Exactly one caller initializes the controller; everybody else returns
    /// right away. A bus that was never asked for is
    /// [`Error::InvalidOperation`]. If the controller rejects the
    /// configuration the bus falls back to requested with an empty queue, so
    /// the same call can be retried, and [`Error::InvalidOperation`] is
    /// reported as well.
    ///
    /// The first bus to come up also starts the shared drain timer. If that
    /// fails the bus stays running, [`Error::InvalidOperation`] is reported
    /// and the next call retries the timer.
    pub fn start_resource(&self, bus: Bus) -> Result<(), Error> {
        let claim = self.with_bus(bus, |slot| match (slot.lease, slot.phase) {
            (None, _) => Err(Error::InvalidOperation),
            (Some(_), Phase::Running) => Ok(Claim::Running),
            (Some(_), Phase::Starting) => Ok(Claim::Starting),
            (Some(config), Phase::Idle) => {
                slot.phase = Phase::Starting;
                Ok(Claim::Mine(config))
            }
        })?;

        match claim {
            Claim::Starting => return Ok(()),
            Claim::Running => {}
            Claim::Mine(config) => {
                if let Err(e) = self.bring_up(bus, config) {
                    error!("manager: {} failed to start: {}", bus, e);
                    self.with_bus(bus, |slot| {
                        slot.phase = Phase::Idle;
                        slot.queue.clear();
                    });
                    return Err(Error::InvalidOperation);
                }
                self.with_bus(bus, |slot| slot.phase = Phase::Running);
                info!("manager: {} running", bus);
            }
        }
        self.start_timer()
    }

    fn bring_up(&self, bus: Bus, config: BusConfig) -> Result<(), Error> {
        let can = self.transport(bus);
        can.init(config)?;
        if let Err(e) = can.start() {
            let _ = can.deinit();
            return Err(e);
        }
        Ok(())
    }

    fn start_timer(&self) -> Result<(), Error> {
        let claimed = masked(|cs| !self.timer_started.borrow(cs).replace(true));
        if !claimed {
            return Ok(());
        }
        let id = self.timer.peripheral();
        let result = self.registry.start_device(id).and_then(|()| {
            self.timer.start(DRAIN_RATE).map_err(|e| {
                let _ = self.registry.stop_device(id);
                e
            })
        });
        if let Err(e) = result {
            error!("manager: drain timer failed to start: {}", e);
            masked(|cs| self.timer_started.borrow(cs).set(false));
            return Err(Error::InvalidOperation);
        }
        Ok(())
    }

    /// Delivers frames with identifier `id` on `bus` to `handler`.
    ///
    /// Several handlers may share an identifier. Fails with
    /// [`Error::ResourceBusy`] once the bus has
    /// [`SubscriptionCapacity`](subscription::SubscriptionCapacity)
    /// subscribers.
    pub fn subscribe(&self, bus: Bus, id: u32, handler: Handler<'a>) -> Result<(), Error> {
        if id > MAX_ID {
            return Err(Error::InvalidParam);
        }
        self.with_bus(bus, |slot| slot.subscriptions.insert(Subscription { id, handler }))
    }

    /// Removes the subscription of `handler` to `id`.
    ///
    /// A dispatch already in progress may still deliver one more frame to
    /// `handler` after this returns.
    pub fn unsubscribe(&self, bus: Bus, id: u32, handler: Handler<'a>) -> Result<(), Error> {
        self.with_bus(bus, |slot| slot.subscriptions.remove(Subscription { id, handler }))
    }

    /// Queues `frame` for transmission on `bus`.
    ///
    /// A bus that is running or being started takes frames. Frames queued
    /// during start are sent once it is running, or dropped if the start
    /// fails. A full queue is [`Error::ResourceBusy`]; the caller decides
    /// whether to retry.
    pub fn send_message(&self, bus: Bus, frame: &CanFrame) -> Result<(), Error> {
        self.with_bus(bus, |slot| {
            if !matches!(slot.phase, Phase::Starting | Phase::Running) {
                return Err(Error::InvalidOperation);
            }
            slot.queue.push(*frame).map_err(|_| Error::ResourceBusy)
        })
    }

    /// Hands `frame` to every subscriber of its identifier on `bus`.
    ///
    /// Handlers run after the mask is released. Returns how many handlers
    /// were called.
    pub fn dispatch(&self, bus: Bus, frame: &CanFrame) -> usize {
        let id = frame.raw_id();
        let matches = self.with_bus(bus, |slot| slot.subscriptions.matching(id));
        for handler in matches.iter() {
            handler.call(id, frame.data());
        }
        matches.len()
    }

    fn bus_for(&self, handle: Handle) -> Result<Bus, Error> {
        let id = self.registry.find_id_by_handle(handle)?;
        Bus::try_from(id)
    }

    /// Receive interrupt entry for the controller behind `handle`.
    ///
    /// Empties `fifo` and dispatches each frame. Returns the number of
    /// frames read.
    pub fn on_rx_pending(&self, handle: Handle, fifo: Fifo) -> Result<usize, Error> {
        let bus = self.bus_for(handle).map_err(|e| {
            warn!("manager: rx interrupt from unknown handle");
            e
        })?;
        let can = self.transport(bus);
        let mut received = 0;
        while received < FIFO_DEPTH {
            let Some(frame) = can.receive_from(fifo) else {
                break;
            };
            if self.dispatch(bus, &frame) == 0 {
                trace!("manager: no subscriber for {:x} on {}", frame.raw_id(), bus);
            }
            received += 1;
        }
        Ok(received)
    }

    /// Mailbox-empty interrupt entry for the controller behind `handle`.
    ///
    /// Clears the completion flags and returns the mailboxes they were set
    /// for.
    pub fn on_tx_complete(&self, handle: Handle) -> Result<MailboxSet, Error> {
        let bus = self.bus_for(handle)?;
        Ok(self.transport(bus).acknowledge_tx_complete())
    }

    /// Moves queued frames into free mailboxes. Meant to run from the drain
    /// timer's interrupt.
    ///
    /// At most one frame per mailbox is submitted per bus and call. A frame
    /// the controller refuses is dropped.
    pub fn process_send_queue(&self) {
        for bus in Bus::ALL {
            let can = self.transport(bus);
            for _ in 0..MAILBOXES {
                if can.free_tx_mailboxes() == 0 {
                    break;
                }
                let next = self.with_bus(bus, |slot| match slot.phase {
                    Phase::Running => slot.queue.pop(),
                    _ => None,
                });
                let Some(frame) = next else {
                    break;
                };
                if let Err(e) = can.send_message(&frame) {
                    warn!("manager: dropped frame {:x} on {}: {}", frame.raw_id(), bus, e);
                }
            }
        }
    }

    /// Lifecycle state of `bus`.
    pub fn state(&self, bus: Bus) -> BusState {
        self.with_bus(bus, |slot| slot.state())
    }

    /// Configuration recorded for `bus`.
    pub fn lease(&self, bus: Bus) -> Option<BusConfig> {
        self.with_bus(bus, |slot| slot.lease)
    }

    /// Frames waiting in the queue of `bus`.
    pub fn pending(&self, bus: Bus) -> usize {
        self.with_bus(bus, |slot| slot.queue.len())
    }

    /// Number of subscriptions on `bus`.
    pub fn subscribers(&self, bus: Bus) -> usize {
        self.with_bus(bus, |slot| slot.subscriptions.len())
    }

    /// Transport driving `bus`, for health queries and filter setup.
    pub fn transport(&self, bus: Bus) -> &Can<'a, R> {
        &self.can[bus.index()]
    }
}
