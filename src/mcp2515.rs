//! MCP2515 stand-alone CAN 2.0B controller behind the shared bus.
//!
//! The controller is driven entirely through the register instructions of its
//! serial interface; there is no real interrupt service routine, the INT
//! line is sampled from `tick` and the receive buffers are drained there.
//! A single transmit buffer is used and transmission is blocking.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_time::duration::Milliseconds;

use crate::bus::{BusConfig, Transport};
use crate::chip_select::ChipSelect;
use crate::device::Device;
use crate::frame::{self, CanFrame, MAX_EXTENDED_ID, MAX_STANDARD_ID};
use crate::interrupt::Interrupt;
use crate::timing;

const INS_WRITE: u8 = 0x02;
const INS_READ: u8 = 0x03;
const INS_BIT_MODIFY: u8 = 0x05;
const INS_RESET: u8 = 0xC0;

pub(crate) mod reg {
    pub(crate) const BFPCTRL: u8 = 0x0C;
    pub(crate) const TXRTSCTRL: u8 = 0x0D;
    pub(crate) const CANCTRL: u8 = 0x0F;
    pub(crate) const CNF3: u8 = 0x28;
    pub(crate) const CNF2: u8 = 0x29;
    pub(crate) const CNF1: u8 = 0x2A;
    pub(crate) const CANINTE: u8 = 0x2B;
    pub(crate) const CANINTF: u8 = 0x2C;

    pub(crate) fn rxf_sidh(n: u8) -> u8 {
        n * 0x04
    }
    pub(crate) fn rxm_sidh(n: u8) -> u8 {
        0x20 + n * 0x04
    }
    pub(crate) fn txb_ctrl(n: u8) -> u8 {
        0x30 + n * 0x10
    }
    pub(crate) fn txb_sidh(n: u8) -> u8 {
        0x31 + n * 0x10
    }
    pub(crate) fn txb_dlc(n: u8) -> u8 {
        0x35 + n * 0x10
    }
    pub(crate) fn txb_d0(n: u8) -> u8 {
        0x36 + n * 0x10
    }
    pub(crate) fn rxb_ctrl(n: u8) -> u8 {
        0x60 + n * 0x10
    }
    pub(crate) fn rxb_sidh(n: u8) -> u8 {
        0x61 + n * 0x10
    }
    pub(crate) fn rxb_dlc(n: u8) -> u8 {
        0x65 + n * 0x10
    }
    pub(crate) fn rxb_d0(n: u8) -> u8 {
        0x66 + n * 0x10
    }
}

const MODE_NORMAL: u8 = 0x00;
const MODE_SLEEP: u8 = 0x01;
const MODE_LOOPBACK: u8 = 0x40;
const MODE_LISTEN_ONLY: u8 = 0x60;
const MODE_CONFIG: u8 = 0x80;

/// CANCTRL abort-request bit.
const ABAT: u8 = 0x10;

const TXB_TXREQ: u8 = 0x08;
const TXB_TXERR: u8 = 0x10;
/// ABTF | MLOA | TXERR.
const TXB_ERROR_MASK: u8 = 0x70;

/// RXM bits of RXBnCTRL: standard-only filtering, extended-only filtering,
/// both set = accept all.
const FLAG_RXM0: u8 = 0x20;
const FLAG_RXM1: u8 = 0x40;

/// The one transmit buffer this driver uses.
const TX_BUF: u8 = 0;

fn flag_rx_ie(n: u8) -> u8 {
    0x01 << n
}

fn flag_rx_if(n: u8) -> u8 {
    0x01 << n
}

fn flag_tx_if(n: u8) -> u8 {
    0x04 << n
}

/// Reset settle time after the reset instruction.
const RESET_SETTLE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanError {
    /// A mode transition failed read-back verification, or the oscillator /
    /// bit-rate pair has no timing table entry. The controller may be left
    /// partially configured; re-issue `begin`.
    Configuration,
    /// Caller-supplied identifier outside the valid range.
    Range,
    /// Error or abort flags observed after a transmit attempt, or no packet
    /// was staged.
    Transmit,
    /// A wait budget was exhausted while polling a status bit.
    Timeout,
    /// The transport reported a failure.
    Bus,
}

pub struct Mcp2515<CS, INT, D, F>
where
    CS: OutputPin,
    INT: InputPin,
    D: DelayMs<u32>,
    F: FnMut(u32, &[u8]),
{
    cs: ChipSelect<CS>,
    irq: Interrupt<INT>,
    config: BusConfig,
    delay: D,
    on_receive: Option<F>,
    tx: Option<CanFrame>,
    last_tick: Milliseconds,
}

impl<CS, INT, D, F> Mcp2515<CS, INT, D, F>
where
    CS: OutputPin,
    INT: InputPin,
    D: DelayMs<u32>,
    F: FnMut(u32, &[u8]),
{
    pub fn new(cs_pin: CS, int_pin: INT, spi_prescaler: u32, delay: D) -> Self {
        Self {
            cs: ChipSelect::new(cs_pin),
            irq: Interrupt::new(int_pin),
            config: BusConfig::new(spi_prescaler),
            delay,
            on_receive: None,
            tx: None,
            last_tick: Milliseconds(0u32),
        }
    }

    /// Reset the controller and bring it up in normal mode at the requested
    /// bit rate. `on_receive` is invoked synchronously from `tick`, once per
    /// decoded frame.
    ///
    /// Fails with [`CanError::Configuration`] when the oscillator / bit-rate
    /// pair has no table entry or a mode transition does not verify. Nothing
    /// is rolled back on failure.
    pub fn begin<T: Transport>(
        &mut self,
        bus: &mut T,
        clock: u32,
        baud_rate: u32,
        on_receive: F,
    ) -> Result<(), CanError> {
        self.tx = None;
        self.on_receive = Some(on_receive);

        self.reset(bus)?;
        self.enter_mode(bus, MODE_CONFIG)?;

        let cnf = timing::lookup(clock, baud_rate).ok_or(CanError::Configuration)?;
        self.write_register(bus, reg::CNF1, cnf[0])?;
        self.write_register(bus, reg::CNF2, cnf[1])?;
        self.write_register(bus, reg::CNF3, cnf[2])?;

        self.write_register(bus, reg::CANINTE, flag_rx_ie(1) | flag_rx_ie(0))?;
        self.write_register(bus, reg::BFPCTRL, 0x00)?;
        self.write_register(bus, reg::TXRTSCTRL, 0x00)?;
        self.write_register(bus, reg::rxb_ctrl(0), FLAG_RXM1 | FLAG_RXM0)?;
        self.write_register(bus, reg::rxb_ctrl(1), FLAG_RXM1 | FLAG_RXM0)?;

        self.enter_mode(bus, MODE_NORMAL)?;

        log::info!("mcp2515 up at {} bit/s", baud_rate);
        Ok(())
    }

    /// Stage a standard-id transmit frame, discarding any unfinished one.
    pub fn begin_packet(&mut self, id: u32, rtr: bool) -> Result<(), CanError> {
        if id > MAX_STANDARD_ID {
            return Err(CanError::Range);
        }
        self.tx = Some(CanFrame::new(id, false, rtr));
        Ok(())
    }

    /// Stage an extended-id transmit frame, discarding any unfinished one.
    pub fn begin_extended_packet(&mut self, id: u32, rtr: bool) -> Result<(), CanError> {
        if id > MAX_EXTENDED_ID {
            return Err(CanError::Range);
        }
        self.tx = Some(CanFrame::new(id, true, rtr));
        Ok(())
    }

    /// Append payload bytes to the staged frame, truncating to the remaining
    /// 8-byte capacity. Returns the number of bytes accepted; 0 when no frame
    /// is staged.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let tx = match self.tx.as_mut() {
            Some(tx) => tx,
            None => return 0,
        };
        let offset = usize::from(tx.dlc);
        let accepted = data.len().min(8 - offset);
        tx.data[offset..offset + accepted].copy_from_slice(&data[..accepted]);
        tx.dlc += accepted as u8;
        accepted
    }

    /// Load the staged frame into the transmit buffer, request transmission
    /// and block until it resolves.
    ///
    /// `timeout` bounds the poll loop; 1 ms is burned per status read. An
    /// error flag during the wait triggers a one-shot abort request and the
    /// frame counts as failed. There is no automatic retry.
    pub fn end_packet<T: Transport>(
        &mut self,
        bus: &mut T,
        timeout: Milliseconds,
    ) -> Result<(), CanError> {
        let tx = self.tx.take().ok_or(CanError::Transmit)?;

        let id_regs = frame::encode_id(tx.id, tx.extended);
        for (i, value) in id_regs.iter().enumerate() {
            self.write_register(bus, reg::txb_sidh(TX_BUF) + i as u8, *value)?;
        }

        if tx.rtr {
            self.write_register(bus, reg::txb_dlc(TX_BUF), frame::FLAG_RTR | tx.dlc)?;
        } else {
            self.write_register(bus, reg::txb_dlc(TX_BUF), tx.dlc)?;
            for (i, byte) in tx.data[..tx.len()].iter().enumerate() {
                self.write_register(bus, reg::txb_d0(TX_BUF) + i as u8, *byte)?;
            }
        }

        self.write_register(bus, reg::txb_ctrl(TX_BUF), TXB_TXREQ)?;

        let mut remaining = timeout.0;
        let mut aborted = false;
        loop {
            let ctrl = self.read_register(bus, reg::txb_ctrl(TX_BUF))?;
            if ctrl & TXB_TXREQ == 0 {
                break;
            }
            if ctrl & TXB_TXERR != 0 && !aborted {
                aborted = true;
                self.modify_register(bus, reg::CANCTRL, ABAT, ABAT)?;
            }
            if remaining == 0 {
                return Err(CanError::Timeout);
            }
            remaining -= 1;
            self.delay.delay_ms(1);
        }
        if aborted {
            self.modify_register(bus, reg::CANCTRL, ABAT, 0x00)?;
        }

        self.modify_register(bus, reg::CANINTF, flag_tx_if(TX_BUF), 0x00)?;

        if self.read_register(bus, reg::txb_ctrl(TX_BUF))? & TXB_ERROR_MASK != 0 {
            return Err(CanError::Transmit);
        }
        Ok(())
    }

    /// Decode the next pending received frame, clearing only that buffer's
    /// interrupt flag. Buffer 0 is checked before buffer 1: fixed priority,
    /// not fair. `None` when neither buffer has data.
    pub fn parse_packet<T: Transport>(&mut self, bus: &mut T) -> Result<Option<CanFrame>, CanError> {
        let intf = self.read_register(bus, reg::CANINTF)?;
        let n = if intf & flag_rx_if(0) != 0 {
            0
        } else if intf & flag_rx_if(1) != 0 {
            1
        } else {
            return Ok(None);
        };

        let sidh = self.read_register(bus, reg::rxb_sidh(n))?;
        let sidl = self.read_register(bus, reg::rxb_sidh(n) + 1)?;
        let eid8 = self.read_register(bus, reg::rxb_sidh(n) + 2)?;
        let eid0 = self.read_register(bus, reg::rxb_sidh(n) + 3)?;
        let (id, extended) = frame::decode_id(sidh, sidl, eid8, eid0);

        let dlc_reg = self.read_register(bus, reg::rxb_dlc(n))?;
        let rtr = if extended {
            dlc_reg & frame::FLAG_RTR != 0
        } else {
            sidl & frame::FLAG_SRR != 0
        };

        let mut rx = CanFrame::new(id, extended, rtr);
        rx.dlc = dlc_reg & 0x0F;
        for i in 0..rx.len() {
            rx.data[i] = self.read_register(bus, reg::rxb_d0(n) + i as u8)?;
        }

        self.modify_register(bus, reg::CANINTF, flag_rx_if(n), 0x00)?;
        Ok(Some(rx))
    }

    /// Program one coarse standard-id acceptance filter into every mask and
    /// filter slot.
    ///
    /// On a failed mode transition the filter state is left inconsistent;
    /// the caller must re-issue `begin` or retry.
    pub fn filter<T: Transport>(&mut self, bus: &mut T, id: u16, mask: u16) -> Result<(), CanError> {
        let id = u32::from(id & 0x7FF);
        let mask = u32::from(mask & 0x7FF);

        self.enter_mode(bus, MODE_CONFIG)?;
        for n in 0..2 {
            self.write_register(bus, reg::rxb_ctrl(n), FLAG_RXM0)?;
            self.write_id_registers(bus, reg::rxm_sidh(n), mask, false)?;
        }
        for n in 0..6 {
            self.write_id_registers(bus, reg::rxf_sidh(n), id, false)?;
        }
        self.enter_mode(bus, MODE_NORMAL)
    }

    /// Extended-id variant of [`Mcp2515::filter`].
    pub fn filter_extended<T: Transport>(
        &mut self,
        bus: &mut T,
        id: u32,
        mask: u32,
    ) -> Result<(), CanError> {
        let id = id & MAX_EXTENDED_ID;
        let mask = mask & MAX_EXTENDED_ID;

        self.enter_mode(bus, MODE_CONFIG)?;
        for n in 0..2 {
            self.write_register(bus, reg::rxb_ctrl(n), FLAG_RXM1)?;
            self.write_id_registers(bus, reg::rxm_sidh(n), mask, true)?;
        }
        for n in 0..6 {
            self.write_id_registers(bus, reg::rxf_sidh(n), id, true)?;
        }
        self.enter_mode(bus, MODE_NORMAL)
    }

    pub fn listen_only<T: Transport>(&mut self, bus: &mut T) -> Result<(), CanError> {
        self.enter_mode(bus, MODE_LISTEN_ONLY)
    }

    pub fn loopback<T: Transport>(&mut self, bus: &mut T) -> Result<(), CanError> {
        self.enter_mode(bus, MODE_LOOPBACK)
    }

    pub fn sleep<T: Transport>(&mut self, bus: &mut T) -> Result<(), CanError> {
        self.enter_mode(bus, MODE_SLEEP)
    }

    pub fn wake<T: Transport>(&mut self, bus: &mut T) -> Result<(), CanError> {
        self.enter_mode(bus, MODE_NORMAL)
    }

    fn reset<T: Transport>(&mut self, bus: &mut T) -> Result<(), CanError> {
        {
            let mut selected = self.cs.select(bus, &self.config);
            selected.transmit(&[INS_RESET]).map_err(|_| CanError::Bus)?;
        }
        self.delay.delay_ms(RESET_SETTLE);
        Ok(())
    }

    /// Request an operating mode and verify it by reading the control
    /// register back.
    fn enter_mode<T: Transport>(&mut self, bus: &mut T, mode: u8) -> Result<(), CanError> {
        self.write_register(bus, reg::CANCTRL, mode)?;
        if self.read_register(bus, reg::CANCTRL)? != mode {
            return Err(CanError::Configuration);
        }
        Ok(())
    }

    fn write_id_registers<T: Transport>(
        &mut self,
        bus: &mut T,
        base: u8,
        id: u32,
        extended: bool,
    ) -> Result<(), CanError> {
        let id_regs = frame::encode_id(id, extended);
        for (i, value) in id_regs.iter().enumerate() {
            self.write_register(bus, base + i as u8, *value)?;
        }
        Ok(())
    }

    fn read_register<T: Transport>(&mut self, bus: &mut T, address: u8) -> Result<u8, CanError> {
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[INS_READ, address])
            .map_err(|_| CanError::Bus)?;
        let mut value = [0u8; 1];
        selected.receive(&mut value).map_err(|_| CanError::Bus)?;
        Ok(value[0])
    }

    fn write_register<T: Transport>(
        &mut self,
        bus: &mut T,
        address: u8,
        value: u8,
    ) -> Result<(), CanError> {
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[INS_WRITE, address, value])
            .map_err(|_| CanError::Bus)
    }

    fn modify_register<T: Transport>(
        &mut self,
        bus: &mut T,
        address: u8,
        mask: u8,
        value: u8,
    ) -> Result<(), CanError> {
        let mut selected = self.cs.select(bus, &self.config);
        selected
            .transmit(&[INS_BIT_MODIFY, address, mask, value])
            .map_err(|_| CanError::Bus)
    }
}

impl<T, CS, INT, D, F> Device<T> for Mcp2515<CS, INT, D, F>
where
    T: Transport,
    CS: OutputPin,
    INT: InputPin,
    D: DelayMs<u32>,
    F: FnMut(u32, &[u8]),
{
    fn init(&mut self, _bus: &mut T) {
        // The interrupt input is configured by the platform HAL; the
        // controller itself is brought up by `begin`.
    }

    fn tick(&mut self, bus: &mut T, now: Milliseconds) {
        if now == self.last_tick {
            return;
        }
        self.last_tick = now;

        if !self.irq.is_asserted() {
            return;
        }
        match self.read_register(bus, reg::CANINTF) {
            // pin level without a pending flag: stale, not an error
            Ok(0) => return,
            Ok(_) => {}
            Err(_) => {
                log::warn!("mcp2515 interrupt poll failed");
                return;
            }
        }

        loop {
            match self.parse_packet(bus) {
                Ok(Some(rx)) => {
                    if let Some(on_receive) = self.on_receive.as_mut() {
                        on_receive(rx.id, rx.data());
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    log::warn!("mcp2515 receive drain failed");
                    break;
                }
            }
        }
    }

    fn deselect(&mut self) {
        self.cs.deselect();
    }
}
