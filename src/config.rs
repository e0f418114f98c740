//! Bus configuration and bit timing

use crate::Error;
use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Nominal bus speeds with a verified timing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Baud {
    /// 125 kbit/s
    K125,
    /// 250 kbit/s
    K250,
    /// 500 kbit/s
    K500,
    /// 1 Mbit/s
    M1,
}

impl Baud {
    /// Bus speed as a rate.
    pub const fn rate(self) -> HertzU32 {
        match self {
            Baud::K125 => HertzU32::kHz(125),
            Baud::K250 => HertzU32::kHz(250),
            Baud::K500 => HertzU32::kHz(500),
            Baud::M1 => HertzU32::MHz(1),
        }
    }
}

impl From<Baud> for HertzU32 {
    fn from(baud: Baud) -> Self {
        baud.rate()
    }
}

impl TryFrom<HertzU32> for Baud {
    type Error = Error;

    fn try_from(rate: HertzU32) -> Result<Self, Error> {
        match rate.to_Hz() {
            125_000 => Ok(Baud::K125),
            250_000 => Ok(Baud::K250),
            500_000 => Ok(Baud::K500),
            1_000_000 => Ok(Baud::M1),
            _ => Err(Error::InvalidParam),
        }
    }
}

/// Operating mode of a controller
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Regular bus participant
    #[default]
    Normal,
    /// Transmitted frames are looped back internally and also sent
    Loopback,
    /// Receive only; the controller never drives the bus
    Silent,
    /// Loopback without touching the bus, for self test
    SilentLoopback,
}

impl Mode {
    /// LBKM bit of the timing register.
    pub fn loopback(self) -> bool {
        matches!(self, Mode::Loopback | Mode::SilentLoopback)
    }

    /// SILM bit of the timing register.
    pub fn silent(self) -> bool {
        matches!(self, Mode::Silent | Mode::SilentLoopback)
    }
}

/// Configuration a bus is brought up with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// Nominal bus speed
    pub baud: Baud,
    /// Operating mode
    pub mode: Mode,
}

impl BusConfig {
    /// Configuration for `baud` in [`Mode::Normal`].
    pub fn new(baud: Baud) -> Self {
        Self {
            baud,
            mode: Mode::default(),
        }
    }
}

/// Bit-timing parameters. The bit time is determined by
/// - the time quantum `t_q`, which is the peripheral clock divided by
///   `prescaler`
/// - the number of time quanta in a bit time, `1 + phase_seg_1 + phase_seg_2`
///
/// The sample point sits between the two phase segments.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    /// Peripheral clock divider
    pub prescaler: u16,
    /// Propagation time and phase time before sample point
    pub phase_seg_1: u8,
    /// Time after sample point
    pub phase_seg_2: u8,
    /// Synchronization jump width
    pub sjw: u8,
}

/// Ranges the timing register accepts, in time quanta.
pub(crate) struct BitTimingRanges {
    pub(crate) prescaler: RangeInclusive<u32>,
    pub(crate) phase_seg_1: RangeInclusive<u32>,
    pub(crate) phase_seg_2: RangeInclusive<u32>,
    pub(crate) sjw: RangeInclusive<u32>,
}

pub(crate) const BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    prescaler: 1..=1024,
    phase_seg_1: 1..=16,
    phase_seg_2: 1..=8,
    sjw: 1..=4,
};

struct TimingEntry {
    can_clock: u32,
    baud: Baud,
    timing: BitTiming,
}

const fn entry(
    can_clock: u32,
    baud: Baud,
    prescaler: u16,
    phase_seg_1: u8,
    phase_seg_2: u8,
) -> TimingEntry {
    TimingEntry {
        can_clock,
        baud,
        timing: BitTiming {
            prescaler,
            phase_seg_1,
            phase_seg_2,
            sjw: 1,
        },
    }
}

// 42 MHz: 21 tq per bit, sample point 76.2 %.
// 45 MHz: 15 tq per bit, sample point 73.3 %.
const TIMING_TABLE: [TimingEntry; 8] = [
    entry(42_000_000, Baud::M1, 2, 15, 5),
    entry(42_000_000, Baud::K500, 4, 15, 5),
    entry(42_000_000, Baud::K250, 8, 15, 5),
    entry(42_000_000, Baud::K125, 16, 15, 5),
    entry(45_000_000, Baud::M1, 3, 10, 4),
    entry(45_000_000, Baud::K500, 6, 10, 4),
    entry(45_000_000, Baud::K250, 12, 10, 4),
    entry(45_000_000, Baud::K125, 24, 10, 4),
];

impl BitTiming {
    /// Looks up the verified timing for `baud` at peripheral clock
    /// `can_clock`.
    ///
    /// Only tabulated combinations are supported; anything else is
    /// [`Error::UnsupportedConfig`].
    pub fn lookup(can_clock: HertzU32, baud: Baud) -> Result<Self, Error> {
        TIMING_TABLE
            .iter()
            .find(|e| e.can_clock == can_clock.to_Hz() && e.baud == baud)
            .map(|e| e.timing)
            .filter(|t| t.fits(&BIT_TIMING_RANGES))
            .ok_or(Error::UnsupportedConfig)
    }

    /// Length of one bit in time quanta.
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.phase_seg_1) + u32::from(self.phase_seg_2)
    }

    /// Bit rate these parameters yield at `can_clock`.
    pub fn bitrate(&self, can_clock: HertzU32) -> HertzU32 {
        let divider = u32::from(self.prescaler) * self.time_quanta_per_bit();
        HertzU32::from_raw(can_clock.to_Hz() / divider.max(1))
    }

    /// Sample point in per mille of the bit time.
    pub fn sample_point_permille(&self) -> u32 {
        (1 + u32::from(self.phase_seg_1)) * 1000 / self.time_quanta_per_bit()
    }

    pub(crate) fn fits(&self, valid: &BitTimingRanges) -> bool {
        valid.prescaler.contains(&self.prescaler.into())
            && valid.phase_seg_1.contains(&self.phase_seg_1.into())
            && valid.phase_seg_2.contains(&self.phase_seg_2.into())
            && valid.sjw.contains(&self.sjw.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const BAUDS: [Baud; 4] = [Baud::K125, Baud::K250, Baud::K500, Baud::M1];

    #[test]
    fn table_reproduces_baud_exactly() {
        for entry in TIMING_TABLE.iter() {
            let t = entry.timing;
            let divider = u32::from(t.prescaler) * t.time_quanta_per_bit();
            assert_eq!(entry.can_clock % divider, 0);
            assert_eq!(entry.can_clock / divider, entry.baud.rate().to_Hz());
        }
    }

    #[test]
    fn table_sample_points_are_in_target_window() {
        for entry in TIMING_TABLE.iter() {
            let sp = entry.timing.sample_point_permille();
            assert!((730..=765).contains(&sp), "sample point {}", sp);
        }
    }

    #[test]
    fn table_fits_timing_register() {
        for entry in TIMING_TABLE.iter() {
            assert!(entry.timing.fits(&BIT_TIMING_RANGES));
        }
    }

    #[test]
    fn every_baud_is_tabulated_for_known_clocks() {
        for clock in [HertzU32::MHz(42), HertzU32::MHz(45)] {
            for baud in BAUDS {
                let timing = BitTiming::lookup(clock, baud).unwrap();
                assert_eq!(timing.bitrate(clock).to_Hz(), baud.rate().to_Hz());
            }
        }
    }

    #[test]
    fn unknown_clock_is_unsupported() {
        assert_eq!(
            BitTiming::lookup(HertzU32::MHz(48), Baud::K500),
            Err(Error::UnsupportedConfig)
        );
    }

    #[test]
    fn rates_convert_to_baud() {
        assert_eq!(Baud::try_from(HertzU32::kHz(500)), Ok(Baud::K500));
        assert_eq!(Baud::try_from(HertzU32::kHz(800)), Err(Error::InvalidParam));
    }

    #[test]
    fn mode_bits() {
        assert!(!Mode::Normal.loopback() && !Mode::Normal.silent());
        assert!(Mode::SilentLoopback.loopback() && Mode::SilentLoopback.silent());
        assert!(Mode::Silent.silent() && !Mode::Silent.loopback());
    }
}
