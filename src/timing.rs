//! Bit-timing configuration for the CAN physical layer.
//!
//! The CNF values are crystal- and chip-specific constants taken from the
//! controller's datasheet; lookup is exact-match only, nothing is derived by
//! formula.

struct BitTiming {
    clock: u32,
    baud_rate: u32,
    cnf: [u8; 3],
}

#[rustfmt::skip]
const BIT_TIMINGS: [BitTiming; 26] = [
    BitTiming { clock:  8_000_000, baud_rate: 1_000_000, cnf: [0x00, 0x80, 0x00] },
    BitTiming { clock:  8_000_000, baud_rate:   666_666, cnf: [0xC0, 0xB8, 0x01] },
    BitTiming { clock:  8_000_000, baud_rate:   500_000, cnf: [0x00, 0x90, 0x02] },
    BitTiming { clock:  8_000_000, baud_rate:   250_000, cnf: [0x00, 0xB1, 0x05] },
    BitTiming { clock:  8_000_000, baud_rate:   200_000, cnf: [0x00, 0xB4, 0x06] },
    BitTiming { clock:  8_000_000, baud_rate:   125_000, cnf: [0x01, 0xB1, 0x05] },
    BitTiming { clock:  8_000_000, baud_rate:   100_000, cnf: [0x01, 0xB4, 0x06] },
    BitTiming { clock:  8_000_000, baud_rate:    80_000, cnf: [0x01, 0xBF, 0x07] },
    BitTiming { clock:  8_000_000, baud_rate:    50_000, cnf: [0x03, 0xB4, 0x06] },
    BitTiming { clock:  8_000_000, baud_rate:    40_000, cnf: [0x03, 0xBF, 0x07] },
    BitTiming { clock:  8_000_000, baud_rate:    20_000, cnf: [0x07, 0xBF, 0x07] },
    BitTiming { clock:  8_000_000, baud_rate:    10_000, cnf: [0x0F, 0xBF, 0x07] },
    BitTiming { clock:  8_000_000, baud_rate:     5_000, cnf: [0x1F, 0xBF, 0x07] },
    BitTiming { clock: 16_000_000, baud_rate: 1_000_000, cnf: [0x00, 0xD0, 0x82] },
    BitTiming { clock: 16_000_000, baud_rate:   666_666, cnf: [0xC0, 0xF8, 0x81] },
    BitTiming { clock: 16_000_000, baud_rate:   500_000, cnf: [0x00, 0xF0, 0x86] },
    BitTiming { clock: 16_000_000, baud_rate:   250_000, cnf: [0x41, 0xF1, 0x85] },
    BitTiming { clock: 16_000_000, baud_rate:   200_000, cnf: [0x01, 0xFA, 0x87] },
    BitTiming { clock: 16_000_000, baud_rate:   125_000, cnf: [0x03, 0xF0, 0x86] },
    BitTiming { clock: 16_000_000, baud_rate:   100_000, cnf: [0x03, 0xFA, 0x87] },
    BitTiming { clock: 16_000_000, baud_rate:    80_000, cnf: [0x03, 0xFF, 0x87] },
    BitTiming { clock: 16_000_000, baud_rate:    50_000, cnf: [0x07, 0xFA, 0x87] },
    BitTiming { clock: 16_000_000, baud_rate:    40_000, cnf: [0x07, 0xFF, 0x87] },
    BitTiming { clock: 16_000_000, baud_rate:    20_000, cnf: [0x0F, 0xFF, 0x87] },
    BitTiming { clock: 16_000_000, baud_rate:    10_000, cnf: [0x1F, 0xFF, 0x87] },
    BitTiming { clock: 16_000_000, baud_rate:     5_000, cnf: [0x3F, 0xFF, 0x87] },
];

/// Look up `[CNF1, CNF2, CNF3]` for an oscillator/bit-rate pair.
pub(crate) fn lookup(clock: u32, baud_rate: u32) -> Option<[u8; 3]> {
    BIT_TIMINGS
        .iter()
        .find(|entry| entry.clock == clock && entry.baud_rate == baud_rate)
        .map(|entry| entry.cnf)
}
