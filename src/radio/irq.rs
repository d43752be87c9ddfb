//! # IRQ Flag Handling
//!
//! Decoding of REG_IRQ_FLAGS into the events the dispatcher fans out.
//! Flags are write-one-to-clear on the chip.

use bitflags::bitflags;

bitflags! {
    /// Contents of REG_IRQ_FLAGS (0x12)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u8 {
        const CAD_DETECTED = 0x01;
        const FHSS_CHANGE_CHANNEL = 0x02;
        const CAD_DONE = 0x04;
        const TX_DONE = 0x08;
        const VALID_HEADER = 0x10;
        const PAYLOAD_CRC_ERROR = 0x20;
        const RX_DONE = 0x40;
        const RX_TIMEOUT = 0x80;
    }
}

/// Event classes delivered by one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEvent {
    /// RX done with a valid CRC (or CRC disabled)
    PacketReceived,
    /// RX done with a payload CRC error; the frame is dropped
    CrcError,
    /// CAD finished; `detected` reports channel activity
    CadDone { detected: bool },
    TxDone,
    /// RX single timed out without a preamble
    Timeout,
}

impl IrqFlags {
    /// True if at least one flag maps to an event
    pub fn is_actionable(self) -> bool {
        self.intersects(Self::CAD_DONE | Self::RX_DONE | Self::TX_DONE | Self::RX_TIMEOUT)
    }

    /// Classify every relevant bit once, in dispatch order.
    pub fn classify(self) -> Vec<IrqEvent> {
        let mut events = Vec::with_capacity(2);

        if self.contains(Self::CAD_DONE) {
            events.push(IrqEvent::CadDone {
                detected: self.contains(Self::CAD_DETECTED),
            });
        }

        if self.contains(Self::RX_DONE) {
            if self.contains(Self::PAYLOAD_CRC_ERROR) {
                events.push(IrqEvent::CrcError);
            } else {
                events.push(IrqEvent::PacketReceived);
            }
        }

        if self.contains(Self::TX_DONE) {
            events.push(IrqEvent::TxDone);
        }

        if self.contains(Self::RX_TIMEOUT) {
            events.push(IrqEvent::Timeout);
        }

        events
    }
}
