//! Handling of messages/frames

use crate::Error;
use bitfield::bitfield;
use core::cmp::min;
use embedded_can::{ExtendedId, Frame, Id, StandardId};

/// Largest classic CAN payload
pub const MAX_DATA_LEN: usize = 8;

/// Classic CAN 2.0B frame
///
/// A plain value: copied into queues and handed to subscribers by reference.
/// Payload bytes past the length are always zero, so two frames compare equal
/// exactly when their visible content does.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    remote: bool,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl Default for CanFrame {
    fn default() -> Self {
        Self {
            id: Id::Standard(StandardId::ZERO),
            remote: false,
            len: 0,
            data: [0; MAX_DATA_LEN],
        }
    }
}

impl CanFrame {
    /// Data frame with an 11-bit identifier.
    pub fn new_standard(id: u32, data: &[u8]) -> Result<Self, Error> {
        Self::new_data(standard_id(id)?, data)
    }

    /// Data frame with a 29-bit identifier.
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self, Error> {
        Self::new_data(extended_id(id)?, data)
    }

    /// Remote frame requesting `dlc` bytes.
    pub fn new_remote_frame(id: u32, extended: bool, dlc: u8) -> Result<Self, Error> {
        let id = if extended {
            extended_id(id)?
        } else {
            standard_id(id)?
        };
        if usize::from(dlc) > MAX_DATA_LEN {
            return Err(Error::InvalidParam);
        }
        Ok(Self {
            id,
            remote: true,
            len: dlc,
            data: [0; MAX_DATA_LEN],
        })
    }

    fn new_data(id: Id, data: &[u8]) -> Result<Self, Error> {
        if data.len() > MAX_DATA_LEN {
            return Err(Error::InvalidParam);
        }
        let mut frame = Self {
            id,
            remote: false,
            len: data.len() as u8,
            data: [0; MAX_DATA_LEN],
        };
        frame.data[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    /// Identifier as a plain number, 11 or 29 significant bits.
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => id.as_raw().into(),
            Id::Extended(id) => id.as_raw(),
        }
    }
}

fn standard_id(id: u32) -> Result<Id, Error> {
    u16::try_from(id)
        .ok()
        .and_then(StandardId::new)
        .map(Id::Standard)
        .ok_or(Error::InvalidParam)
}

fn extended_id(id: u32) -> Result<Id, Error> {
    ExtendedId::new(id)
        .map(Id::Extended)
        .ok_or(Error::InvalidParam)
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::new_data(id.into(), data).ok()
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DATA_LEN {
            return None;
        }
        Some(Self {
            id: id.into(),
            remote: true,
            len: dlc as u8,
            data: [0; MAX_DATA_LEN],
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len.into()
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..usize::from(self.len)]
        }
    }
}

bitfield! {
    /// Identifier word of a transmit mailbox or receive FIFO output
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct IdentifierRegister(u32);
    impl Debug;
    /// Standard identifier
    pub u16, stid, set_stid: 31, 21;
    /// Extended identifier
    pub u32, exid, set_exid: 31, 3;
    /// Identifier extension
    pub ide, set_ide: 2;
    /// Remote transmission request
    pub rtr, set_rtr: 1;
    /// Transmit request, mailboxes only
    pub txrq, set_txrq: 0;
}

bitfield! {
    /// Length and time stamp word of a transmit mailbox or receive FIFO
    /// output
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct DataLengthRegister(u32);
    impl Debug;
    /// Capture time of the start of frame
    pub u16, time, _: 31, 16;
    /// Index of the matching filter, receive FIFOs only
    pub u8, fmi, _: 15, 8;
    /// Data length code
    pub u8, dlc, set_dlc: 3, 0;
}

/// Frame in the four-word layout shared by transmit mailboxes and receive
/// FIFO outputs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxFrame {
    /// TIxR / RIxR
    pub id: IdentifierRegister,
    /// TDTxR / RDTxR
    pub length: DataLengthRegister,
    /// Bytes 0..4, little endian
    pub data_low: u32,
    /// Bytes 4..8, little endian
    pub data_high: u32,
}

impl MailboxFrame {
    /// Frame held in these words. Length codes above 8 mean 8 bytes.
    pub fn decode(&self) -> CanFrame {
        let id = if self.id.ide() {
            // The field is 29 bits wide
            Id::Extended(unsafe { ExtendedId::new_unchecked(self.id.exid()) })
        } else {
            // The field is 11 bits wide
            Id::Standard(unsafe { StandardId::new_unchecked(self.id.stid()) })
        };
        let len = min(self.length.dlc(), MAX_DATA_LEN as u8);
        let remote = self.id.rtr();
        let mut data = [0; MAX_DATA_LEN];
        if !remote {
            data[..4].copy_from_slice(&self.data_low.to_le_bytes());
            data[4..].copy_from_slice(&self.data_high.to_le_bytes());
            data[usize::from(len)..].fill(0);
        }
        CanFrame {
            id,
            remote,
            len,
            data,
        }
    }
}

impl From<&CanFrame> for MailboxFrame {
    fn from(frame: &CanFrame) -> Self {
        let mut id = IdentifierRegister(0);
        match frame.id {
            Id::Standard(sid) => id.set_stid(sid.as_raw()),
            Id::Extended(eid) => {
                id.set_exid(eid.as_raw());
                id.set_ide(true);
            }
        }
        id.set_rtr(frame.remote);
        let mut length = DataLengthRegister(0);
        length.set_dlc(frame.len);
        let [b0, b1, b2, b3, b4, b5, b6, b7] = frame.data;
        MailboxFrame {
            id,
            length,
            data_low: u32::from_le_bytes([b0, b1, b2, b3]),
            data_high: u32::from_le_bytes([b4, b5, b6, b7]),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn standard_frame_survives_mailbox() {
        let frame = CanFrame::new_standard(0x123, &[1, 2, 3]).unwrap();
        let words = MailboxFrame::from(&frame);
        assert_eq!(words.id.0, 0x123 << 21);
        assert_eq!(words.length.0, 3);
        assert_eq!(words.data_low, 0x0003_0201);
        assert_eq!(words.data_high, 0);
        assert_eq!(words.decode(), frame);
    }

    #[test]
    fn extended_frame_survives_mailbox() {
        let frame = CanFrame::new_extended(0x1ABC_DEF0, &[9; 8]).unwrap();
        let words = MailboxFrame::from(&frame);
        assert_eq!(words.id.0, 0x1ABC_DEF0 << 3 | 0b100);
        assert_eq!(words.decode(), frame);
        assert!(words.decode().is_extended());
        assert_eq!(words.decode().raw_id(), 0x1ABC_DEF0);
    }

    #[test]
    fn remote_frame_keeps_requested_length() {
        let frame = CanFrame::new_remote_frame(0x7FF, false, 6).unwrap();
        let words = MailboxFrame::from(&frame);
        assert!(words.id.rtr());
        let decoded = words.decode();
        assert!(decoded.is_remote_frame());
        assert_eq!(decoded.dlc(), 6);
        assert_eq!(decoded.data(), &[] as &[u8]);
    }

    #[test]
    fn rejects_out_of_range_ids_and_lengths() {
        assert_eq!(CanFrame::new_standard(0x800, &[]), Err(Error::InvalidParam));
        assert_eq!(
            CanFrame::new_extended(0x2000_0000, &[]),
            Err(Error::InvalidParam)
        );
        assert_eq!(
            CanFrame::new_standard(0x1, &[0; 9]),
            Err(Error::InvalidParam)
        );
        assert_eq!(
            CanFrame::new_remote_frame(0x1, true, 9),
            Err(Error::InvalidParam)
        );
    }

    #[test]
    fn decode_clamps_length_code_and_hides_stale_bytes() {
        let mut words = MailboxFrame {
            data_low: 0x4433_2211,
            data_high: 0x8877_6655,
            ..Default::default()
        };
        words.id.set_stid(0x11);
        words.length.set_dlc(2);
        assert_eq!(words.decode().data(), &[0x11, 0x22]);
        assert_eq!(words.decode(), CanFrame::new_standard(0x11, &[0x11, 0x22]).unwrap());

        words.length.set_dlc(15);
        assert_eq!(words.decode().dlc(), 8);
    }
}
