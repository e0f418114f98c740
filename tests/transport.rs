mod common;

use canbroker::bus::{Bus, Can};
use canbroker::config::{Baud, BusConfig, Mode};
use canbroker::core::fugit::HertzU32;
use canbroker::embedded_can::nb::Can as _;
use canbroker::filter::FilterBankConfig;
use canbroker::message::CanFrame;
use canbroker::reg::{Btr, Mcr};
use canbroker::registry::{DeviceRegistry, DeviceStatus, PeripheralId};
use canbroker::rx_fifo::Fifo;
use canbroker::Error;
use common::{registry, SimCan};

fn configured(registry: &DeviceRegistry, bus: Bus) -> (Can<'_, SimCan>, SimCan) {
    let sim = SimCan::new();
    let can = Can::new(bus, sim.clone(), registry);
    can.init(BusConfig::new(Baud::K500)).unwrap();
    (can, sim)
}

fn running(registry: &DeviceRegistry, bus: Bus) -> (Can<'_, SimCan>, SimCan) {
    let (can, sim) = configured(registry, bus);
    can.start().unwrap();
    (can, sim)
}

#[test]
fn init_programs_timing_and_stays_in_init_mode() {
    let registry = registry();
    let (can, sim) = configured(&registry, Bus::Can1);

    let btr = Btr(sim.sim().btr);
    assert_eq!(btr.brp(), 3);
    assert_eq!(btr.ts1(), 14);
    assert_eq!(btr.ts2(), 4);
    assert_eq!(btr.sjw(), 0);
    assert!(!btr.lbkm() && !btr.silm());

    let mcr = Mcr(sim.sim().mcr);
    assert!(mcr.inrq());
    assert!(mcr.nart());
    assert!(!can.is_started());
    assert_eq!(registry.status(PeripheralId::CAN_1), DeviceStatus::InUse);
    assert_eq!(can.baud_rate(), Some(Baud::K500));
    assert_eq!(can.mode(), Some(Mode::Normal));
}

#[test]
fn init_installs_accept_all_filter_on_fifo0() {
    let registry = registry();
    let (_can, sim) = configured(&registry, Bus::Can1);
    let sim = sim.sim();
    assert_eq!(sim.fa1r & 1, 1);
    assert_eq!(sim.ffa1r & 1, 0);
    assert_eq!(sim.banks[0], [0, 0]);
    assert_eq!(sim.fmr & 1, 0, "filters left in init mode");
}

#[test]
fn loopback_mode_sets_btr_flag() {
    let registry = registry();
    let sim = SimCan::new();
    let can = Can::new(Bus::Can1, sim.clone(), &registry);
    let config = BusConfig {
        baud: Baud::M1,
        mode: Mode::SilentLoopback,
    };
    can.init(config).unwrap();
    let btr = Btr(sim.sim().btr);
    assert!(btr.lbkm() && btr.silm());
    assert_eq!(btr.brp(), 1);
}

#[test]
fn unsupported_clock_leaves_device_free() {
    let registry = registry();
    let can = Can::new(
        Bus::Can1,
        SimCan::with_clock(HertzU32::MHz(48)),
        &registry,
    );
    assert_eq!(
        can.init(BusConfig::new(Baud::K250)),
        Err(Error::UnsupportedConfig)
    );
    assert_eq!(registry.status(PeripheralId::CAN_1), DeviceStatus::Free);
}

#[test]
fn init_without_registered_handle_fails() {
    let registry = DeviceRegistry::new();
    let can = Can::new(Bus::Can2, SimCan::new(), &registry);
    assert_eq!(can.init(BusConfig::new(Baud::K125)), Err(Error::NullHandle));
    assert_eq!(can.start(), Err(Error::NullHandle));
}

#[test]
fn second_init_is_already_in_use() {
    let registry = registry();
    let (can, _sim) = configured(&registry, Bus::Can1);
    assert_eq!(can.init(BusConfig::new(Baud::K500)), Err(Error::AlreadyInUse));
}

#[test]
fn unacknowledged_init_mode_times_out_and_releases() {
    let registry = registry();
    let sim = SimCan::new();
    sim.sim().init_stuck = true;
    let can = Can::new(Bus::Can1, sim, &registry);
    assert_eq!(can.init(BusConfig::new(Baud::K500)), Err(Error::Timeout));
    assert_eq!(registry.status(PeripheralId::CAN_1), DeviceStatus::Free);
    assert_eq!(can.handle(), Err(Error::NullHandle));
}

#[test]
fn start_enables_rx_and_tx_interrupts() {
    let registry = registry();
    let (can, sim) = running(&registry, Bus::Can1);
    assert!(can.is_started());
    let sim = sim.sim();
    assert_eq!(sim.ier & 0b1_0011, 0b1_0011);
    assert!(!Mcr(sim.mcr).inrq());
}

#[test]
fn start_rolls_back_when_interrupts_do_not_stick() {
    let registry = registry();
    let (can, sim) = configured(&registry, Bus::Can1);
    sim.sim().ier_stuck = true;
    assert_eq!(can.start(), Err(Error::HardwareError));
    assert!(!can.is_started());
    assert!(Mcr(sim.sim().mcr).inrq(), "controller back in init mode");
}

#[test]
fn stop_disables_interrupts() {
    let registry = registry();
    let (can, sim) = running(&registry, Bus::Can1);
    can.stop().unwrap();
    assert!(!can.is_started());
    assert_eq!(sim.sim().ier, 0);
    can.start().unwrap();
    assert!(can.is_started());
}

#[test]
fn start_times_out_back_in_init_mode() {
    let registry = registry();
    let (can, sim) = configured(&registry, Bus::Can1);
    sim.sim().leave_stuck = true;
    assert_eq!(can.start(), Err(Error::Timeout));
    assert!(!can.is_started());
    assert!(Mcr(sim.sim().mcr).inrq(), "controller back in init mode");
    assert_eq!(sim.sim().ier, 0);

    sim.sim().leave_stuck = false;
    can.start().unwrap();
    assert!(can.is_started());
}

#[test]
fn stop_timeout_still_disables_interrupts() {
    let registry = registry();
    let (can, sim) = running(&registry, Bus::Can1);
    sim.sim().init_stuck = true;
    assert_eq!(can.stop(), Err(Error::Timeout));
    assert!(!can.is_started());
    assert_eq!(sim.sim().ier, 0);
    can.deinit().unwrap();
    assert_eq!(registry.status(PeripheralId::CAN_1), DeviceStatus::Free);
}

#[test]
fn deinit_releases_the_lease() {
    let registry = registry();
    let (can, _sim) = running(&registry, Bus::Can1);
    can.deinit().unwrap();
    assert_eq!(registry.status(PeripheralId::CAN_1), DeviceStatus::Free);
    assert_eq!(can.send_std_data(0x10, &[]), Err(Error::NullHandle));
    can.init(BusConfig::new(Baud::K250)).unwrap();
}

#[test]
fn mailboxes_fill_up_then_report_busy() {
    let registry = registry();
    let (can, sim) = running(&registry, Bus::Can1);
    assert_eq!(can.free_tx_mailboxes(), 3);

    can.send_std_data(0x123, &[1, 2, 3]).unwrap();
    can.send_ext_data(0x1ABC_DEF0, &[9; 8]).unwrap();
    can.send_remote_frame(0x55, false, 4).unwrap();
    assert_eq!(can.free_tx_mailboxes(), 0);
    assert_eq!(can.send_std_data(0x124, &[]), Err(Error::DeviceBusy));

    let sent = sim.transmitted();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0], CanFrame::new_standard(0x123, &[1, 2, 3]).unwrap());
    assert_eq!(sent[1], CanFrame::new_extended(0x1ABC_DEF0, &[9; 8]).unwrap());
    assert_eq!(sent[2], CanFrame::new_remote_frame(0x55, false, 4).unwrap());

    sim.complete_all();
    let done = can.acknowledge_tx_complete();
    assert_eq!(done.len(), 3);
    assert!(can.acknowledge_tx_complete().is_empty());
    assert_eq!(can.free_tx_mailboxes(), 3);
}

#[test]
fn malformed_frames_are_rejected() {
    let registry = registry();
    let (can, sim) = running(&registry, Bus::Can1);
    assert_eq!(can.send_std_data(0x800, &[]), Err(Error::InvalidParam));
    assert_eq!(can.send_ext_data(0x2000_0000, &[]), Err(Error::InvalidParam));
    assert_eq!(can.send_std_data(0x1, &[0; 9]), Err(Error::InvalidParam));
    assert_eq!(can.send_remote_frame(0x1, true, 9), Err(Error::InvalidParam));
    assert!(sim.transmitted().is_empty());
}

#[test]
fn nb_transmit_would_block_when_full() {
    let registry = registry();
    let (mut can, sim) = running(&registry, Bus::Can1);
    for n in 0..3 {
        sim.occupy(n);
    }
    let frame = CanFrame::new_standard(0x1, &[]).unwrap();
    assert!(matches!(can.transmit(&frame), Err(nb::Error::WouldBlock)));
    assert!(matches!(can.receive(), Err(nb::Error::WouldBlock)));
}

#[test]
fn received_frames_come_out_in_order() {
    let registry = registry();
    let (can, sim) = running(&registry, Bus::Can1);
    let first = CanFrame::new_standard(0x11, &[0xAA]).unwrap();
    let second = CanFrame::new_extended(0x1234_5678, &[1, 2, 3, 4, 5]).unwrap();
    sim.inject(1, &first);
    sim.inject(1, &second);

    assert_eq!(can.rx_fifo(Fifo::Fifo1).len(), 2);
    assert_eq!(can.receive_from(Fifo::Fifo0), None);
    assert_eq!(can.receive_from(Fifo::Fifo1), Some(first));
    assert_eq!(can.receive_from(Fifo::Fifo1), Some(second));
    assert_eq!(can.receive_from(Fifo::Fifo1), None);
    assert_eq!(sim.rx_pending(1), 0);
}

#[cfg(not(feature = "single-can"))]
#[test]
fn filters_are_written_to_own_banks_only() {
    let registry = registry();
    let (can1, sim1) = configured(&registry, Bus::Can1);
    let (can2, sim2) = configured(&registry, Bus::Can2);

    can1.config_filter_std_id(0x123, 0x7FF, Fifo::Fifo1, 3).unwrap();
    {
        let sim = sim1.sim();
        assert_eq!(sim.banks[3], [0x123 << 21, 0x7FF << 21]);
        assert_ne!(sim.ffa1r & 1 << 3, 0);
        assert_ne!(sim.fa1r & 1 << 3, 0);
        assert_ne!(sim.fs1r & 1 << 3, 0);
        assert_eq!(sim.fm1r & 1 << 3, 0);
    }

    can2.config_filter_ext_id(0x1ABC_DEF0, 0x1FFF_FFFF, Fifo::Fifo0, 20)
        .unwrap();
    assert_eq!(
        sim2.sim().banks[20],
        [0x1ABC_DEF0 << 3 | 1 << 2, 0x1FFF_FFFF << 3 | 1 << 2]
    );

    assert_eq!(
        can1.config_filter_std_id(0x800, 0x7FF, Fifo::Fifo0, 1),
        Err(Error::InvalidParam)
    );
    assert_eq!(
        can2.config_filter(&FilterBankConfig::accept_all(28, Fifo::Fifo0)),
        Err(Error::InvalidParam)
    );
}

#[cfg(not(feature = "single-can"))]
#[test]
fn filter_partition_splits_at_bank_14() {
    let registry = registry();
    let (can1, _sim1) = configured(&registry, Bus::Can1);
    let (can2, _sim2) = configured(&registry, Bus::Can2);
    assert_eq!(
        can1.config_filter_std_id(0x1, 0x7FF, Fifo::Fifo0, 14),
        Err(Error::InvalidParam)
    );
    assert_eq!(
        can2.config_filter_std_id(0x1, 0x7FF, Fifo::Fifo0, 13),
        Err(Error::InvalidParam)
    );
    can1.config_filter_std_id(0x1, 0x7FF, Fifo::Fifo0, 13).unwrap();
    can2.config_filter_std_id(0x1, 0x7FF, Fifo::Fifo0, 14).unwrap();
    can2.config_filter_accept_all(Fifo::Fifo1).unwrap();
}

#[test]
fn health_reads_live_error_status() {
    let registry = registry();
    let (can, sim) = running(&registry, Bus::Can1);
    assert_eq!(can.error_count(), 0);
    assert!(!can.is_error_passive());
    assert!(!can.is_bus_off());

    // REC 0x90, TEC 0x81, error passive
    sim.sim().esr = 0x9081_0002;
    assert_eq!(can.error_count(), 0x0090_0081);
    assert!(can.is_error_passive());
    assert!(!can.is_bus_off());

    sim.sim().esr = 0x00FF_0004;
    assert!(can.is_bus_off());
}

#[test]
fn info_reports_exact_bitrate() {
    let registry = registry();
    let (can, _sim) = configured(&registry, Bus::Can1);
    let info = can.info().unwrap();
    assert_eq!(info.actual_bitrate, HertzU32::kHz(500));
    assert_eq!(info.sample_point_permille, 761);
    assert_eq!(info.timing.prescaler, 4);
    assert_eq!(info.config, BusConfig::new(Baud::K500));
}
