//! CAN 2.0B frame type and the controller's split identifier register layout.
//!
//! The MCP2515 spreads an identifier over four registers (SIDH, SIDL, EID8,
//! EID0); standard identifiers occupy an 11-bit field across the first two,
//! extended identifiers additionally set the EXIDE/IDE flag and carry their
//! low 18 bits in the remaining bit positions. The layout is fixed by the
//! chip's register map and must be reproduced bit-exactly.

/// Largest valid 11-bit standard identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Largest valid 29-bit extended identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

pub(crate) const FLAG_IDE: u8 = 0x08;
pub(crate) const FLAG_SRR: u8 = 0x10;
pub(crate) const FLAG_RTR: u8 = 0x40;
pub(crate) const FLAG_EXIDE: u8 = 0x08;

/// A single CAN frame; exactly one transmit and one receive frame exist at a
/// time, there is no queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub extended: bool,
    pub rtr: bool,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl CanFrame {
    pub(crate) fn new(id: u32, extended: bool, rtr: bool) -> Self {
        Self {
            id,
            extended,
            rtr,
            dlc: 0,
            data: [0; 8],
        }
    }

    /// Payload length in bytes. Remote-request frames carry no payload
    /// regardless of their DLC.
    pub fn len(&self) -> usize {
        if self.rtr {
            0
        } else {
            usize::from(self.dlc).min(8)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len()]
    }
}

/// Encode an identifier into `[SIDH, SIDL, EID8, EID0]`.
pub(crate) fn encode_id(id: u32, extended: bool) -> [u8; 4] {
    if extended {
        [
            (id >> 21) as u8,
            ((((id >> 18) & 0x07) << 5) as u8) | FLAG_EXIDE | (((id >> 16) & 0x03) as u8),
            (id >> 8) as u8,
            id as u8,
        ]
    } else {
        [(id >> 3) as u8, (id << 5) as u8, 0x00, 0x00]
    }
}

/// Decode `[SIDH, SIDL, EID8, EID0]` back into an identifier; the IDE flag in
/// SIDL selects the extended layout.
pub(crate) fn decode_id(sidh: u8, sidl: u8, eid8: u8, eid0: u8) -> (u32, bool) {
    let id_a = ((u32::from(sidh) << 3) & 0x7F8) | ((u32::from(sidl) >> 5) & 0x07);
    if sidl & FLAG_IDE != 0 {
        let id_b =
            ((u32::from(sidl) & 0x03) << 16) | (u32::from(eid8) << 8) | u32::from(eid0);
        ((id_a << 18) | id_b, true)
    } else {
        (id_a, false)
    }
}
