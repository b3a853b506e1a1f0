//! The optional slave helper: map contiguous address ranges to user get/set
//! closures and get a ready-made [`crate::server::SlaveCallback`] in return,
//! instead of hand-writing a dispatcher callback.

use tracing::trace;

use crate::errors::ExceptionCode;
use crate::server::{HandlerResult, SlaveCallback, SlaveInfo};

struct BitRange<'a> {
    start: u16,
    end: u16,
    get: Box<dyn FnMut(u16) -> bool + 'a>,
    set: Box<dyn FnMut(u16, bool) + 'a>,
}

struct RegisterRange<'a> {
    start: u16,
    end: u16,
    get: Box<dyn FnMut(u16) -> u16 + 'a>,
    set: Box<dyn FnMut(u16, u16) + 'a>,
}

fn contains(start: u16, end: u16, addr: u16) -> bool {
    addr >= start && addr <= end
}

/// A register/coil map-backed device. Address ranges are inclusive and may
/// be registered in any order; the first range containing a requested
/// address wins, so overlapping registrations are a caller bug, not
/// something this type detects.
///
/// An address that falls outside every registered range is silently
/// skipped rather than rejected: reads leave the corresponding output slot
/// untouched and writes are no-ops, matching the ground-truth slave util's
/// `map == NULL -> continue` behaviour rather than raising
/// `ILLEGAL_DATA_ADDRESS` (see DESIGN.md).
#[derive(Default)]
pub struct SlaveDevice<'a> {
    coils: Vec<BitRange<'a>>,
    discrete_inputs: Vec<BitRange<'a>>,
    holding_registers: Vec<RegisterRange<'a>>,
    input_registers: Vec<RegisterRange<'a>>,
    addr_check: Option<Box<dyn FnMut(u8, u16, u16) -> Result<(), ExceptionCode> + 'a>>,
    special_function: Option<Box<dyn FnMut(&SlaveInfo, &mut [u8]) -> HandlerResult + 'a>>,
    done: Option<Box<dyn FnMut(u8, u16, Result<(), ExceptionCode>) + 'a>>,
}

impl<'a> SlaveDevice<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_coils(
        &mut self,
        start: u16,
        end: u16,
        get: impl FnMut(u16) -> bool + 'a,
        set: impl FnMut(u16, bool) + 'a,
    ) {
        self.coils.push(BitRange {
            start,
            end,
            get: Box::new(get),
            set: Box::new(set),
        });
    }

    pub fn add_discrete_inputs(&mut self, start: u16, end: u16, get: impl FnMut(u16) -> bool + 'a) {
        self.discrete_inputs.push(BitRange {
            start,
            end,
            get: Box::new(get),
            set: Box::new(|_, _| {}),
        });
    }

    pub fn add_holding_registers(
        &mut self,
        start: u16,
        end: u16,
        get: impl FnMut(u16) -> u16 + 'a,
        set: impl FnMut(u16, u16) + 'a,
    ) {
        self.holding_registers.push(RegisterRange {
            start,
            end,
            get: Box::new(get),
            set: Box::new(set),
        });
    }

    pub fn add_input_registers(&mut self, start: u16, end: u16, get: impl FnMut(u16) -> u16 + 'a) {
        self.input_registers.push(RegisterRange {
            start,
            end,
            get: Box::new(get),
            set: Box::new(|_, _| {}),
        });
    }

    /// Run before every standard function's dispatch; returning `Err` short
    /// circuits the request with that exception (or, for
    /// [`ExceptionCode::Unknown`], a silent drop) before any map is touched.
    pub fn set_addr_check(&mut self, hook: impl FnMut(u8, u16, u16) -> Result<(), ExceptionCode> + 'a) {
        self.addr_check = Some(Box::new(hook));
    }

    /// Handle function codes outside the standard set. Without one
    /// registered, `raw` falls back to `ILLEGAL_FUNCTION`.
    pub fn set_special_function(&mut self, hook: impl FnMut(&SlaveInfo, &mut [u8]) -> HandlerResult + 'a) {
        self.special_function = Some(Box::new(hook));
    }

    /// Run after every standard function's dispatch, success or failure.
    pub fn set_done(&mut self, hook: impl FnMut(u8, u16, Result<(), ExceptionCode>) + 'a) {
        self.done = Some(Box::new(hook));
    }

    fn check_addr(&mut self, function: u8, address: u16, nb: u16) -> Result<(), ExceptionCode> {
        match self.addr_check.as_mut() {
            Some(hook) => hook(function, address, nb),
            None => Ok(()),
        }
    }

    fn run_done(&mut self, function: u8, address: u16, result: Result<(), ExceptionCode>) -> Result<(), ExceptionCode> {
        trace!(function, address, ?result, "slave map dispatch done");
        if let Some(hook) = self.done.as_mut() {
            hook(function, address, result);
        }
        result
    }

    fn find_bit<'b>(ranges: &'b mut [BitRange<'a>], addr: u16) -> Option<&'b mut BitRange<'a>> {
        ranges.iter_mut().find(|r| contains(r.start, r.end, addr))
    }

    fn find_register<'b>(ranges: &'b mut [RegisterRange<'a>], addr: u16) -> Option<&'b mut RegisterRange<'a>> {
        ranges.iter_mut().find(|r| contains(r.start, r.end, addr))
    }
}

impl<'a> SlaveCallback for SlaveDevice<'a> {
    fn read_bits(&mut self, function: u8, address: u16, dest: &mut [bool]) -> Result<(), ExceptionCode> {
        let nb = dest.len() as u16;
        trace!(function, address, nb, "slave map dispatch enter");
        let result = self.check_addr(function, address, nb).map(|()| {
            let ranges = if function == crate::consts::function::READ_COILS {
                &mut self.coils
            } else {
                &mut self.discrete_inputs
            };
            for (i, slot) in dest.iter_mut().enumerate() {
                let addr = address.wrapping_add(i as u16);
                if let Some(range) = Self::find_bit(&mut *ranges, addr) {
                    *slot = (range.get)(addr);
                }
            }
        });
        self.run_done(function, address, result)
    }

    fn read_registers(&mut self, function: u8, address: u16, dest: &mut [u16]) -> Result<(), ExceptionCode> {
        let nb = dest.len() as u16;
        trace!(function, address, nb, "slave map dispatch enter");
        let result = self.check_addr(function, address, nb).map(|()| {
            let ranges = if function == crate::consts::function::READ_HOLDING_REGISTERS {
                &mut self.holding_registers
            } else {
                &mut self.input_registers
            };
            for (i, slot) in dest.iter_mut().enumerate() {
                let addr = address.wrapping_add(i as u16);
                if let Some(range) = Self::find_register(&mut *ranges, addr) {
                    *slot = (range.get)(addr);
                }
            }
        });
        self.run_done(function, address, result)
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), ExceptionCode> {
        let function = crate::consts::function::WRITE_SINGLE_COIL;
        trace!(function, address, nb = 1, "slave map dispatch enter");
        let result = self.check_addr(function, address, 1).map(|()| {
            if let Some(range) = Self::find_bit(&mut self.coils, address) {
                (range.set)(address, value);
            }
        });
        self.run_done(function, address, result)
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        let function = crate::consts::function::WRITE_SINGLE_REGISTER;
        trace!(function, address, nb = 1, "slave map dispatch enter");
        let result = self.check_addr(function, address, 1).map(|()| {
            if let Some(range) = Self::find_register(&mut self.holding_registers, address) {
                (range.set)(address, value);
            }
        });
        self.run_done(function, address, result)
    }

    fn write_multiple_coils(&mut self, address: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        let function = crate::consts::function::WRITE_MULTIPLE_COILS;
        let nb = values.len() as u16;
        trace!(function, address, nb, "slave map dispatch enter");
        let result = self.check_addr(function, address, nb).map(|()| {
            for (i, &value) in values.iter().enumerate() {
                let addr = address.wrapping_add(i as u16);
                if let Some(range) = Self::find_bit(&mut self.coils, addr) {
                    (range.set)(addr, value);
                }
            }
        });
        self.run_done(function, address, result)
    }

    fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let function = crate::consts::function::WRITE_MULTIPLE_REGISTERS;
        let nb = values.len() as u16;
        trace!(function, address, nb, "slave map dispatch enter");
        let result = self.check_addr(function, address, nb).map(|()| {
            for (i, &value) in values.iter().enumerate() {
                let addr = address.wrapping_add(i as u16);
                if let Some(range) = Self::find_register(&mut self.holding_registers, addr) {
                    (range.set)(addr, value);
                }
            }
        });
        self.run_done(function, address, result)
    }

    fn mask_write_register(&mut self, address: u16, and_mask: u16, or_mask: u16) -> Result<(), ExceptionCode> {
        let function = crate::consts::function::MASK_WRITE_REGISTER;
        trace!(function, address, nb = 1, "slave map dispatch enter");
        let result = self.check_addr(function, address, 1).map(|()| {
            if let Some(range) = Self::find_register(&mut self.holding_registers, address) {
                let current = (range.get)(address);
                let next = (current & and_mask) | (or_mask & !and_mask);
                (range.set)(address, next);
            }
        });
        self.run_done(function, address, result)
    }

    fn read_write_multiple_registers(
        &mut self,
        read_address: u16,
        write_address: u16,
        write_values: &[u16],
        dest: &mut [u16],
    ) -> Result<(), ExceptionCode> {
        let function = crate::consts::function::READ_WRITE_MULTIPLE_REGISTERS;
        let nb = dest.len() as u16;
        trace!(function, read_address, write_address, nb, "slave map dispatch enter");
        let result = self.check_addr(function, read_address, nb).map(|()| {
            // Write first, then read, per the ground-truth write_read_registers ordering.
            for (i, &value) in write_values.iter().enumerate() {
                let addr = write_address.wrapping_add(i as u16);
                if let Some(range) = Self::find_register(&mut self.holding_registers, addr) {
                    (range.set)(addr, value);
                }
            }
            for (i, slot) in dest.iter_mut().enumerate() {
                let addr = read_address.wrapping_add(i as u16);
                if let Some(range) = Self::find_register(&mut self.holding_registers, addr) {
                    *slot = (range.get)(addr);
                }
            }
        });
        self.run_done(function, read_address, result)
    }

    fn raw(&mut self, info: &SlaveInfo, send_buf: &mut [u8]) -> HandlerResult {
        match self.special_function.as_mut() {
            Some(hook) => hook(info, send_buf),
            None => HandlerResult::Exception(ExceptionCode::IllegalFunction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RtuBackend;
    use crate::length::NoExtensions;
    use crate::server::ModbusServer;

    #[test]
    fn holding_register_round_trips_through_backing_cell() {
        let store = std::cell::RefCell::new([0u16; 4]);
        let mut device = SlaveDevice::new();
        device.add_holding_registers(
            0,
            3,
            |addr| store.borrow()[addr as usize],
            |addr, value| store.borrow_mut()[addr as usize] = value,
        );

        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(1);
        let mut send_buf = [0u8; 64];

        // Write single register 2 <- 0x00AB.
        let mut write_req = vec![0x01, 0x06, 0x00, 0x02, 0x00, 0xAB];
        let crc = crate::backend::crc16(&write_req);
        write_req.extend_from_slice(&crc.to_le_bytes());
        let result = server
            .slave_handle(&NoExtensions, &write_req, write_req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert!(result.response_length > 0);
        assert_eq!(store.borrow()[2], 0x00AB);

        // Read it back.
        let mut read_req = vec![0x01, 0x03, 0x00, 0x02, 0x00, 0x01];
        let crc = crate::backend::crc16(&read_req);
        read_req.extend_from_slice(&crc.to_le_bytes());
        server
            .slave_handle(&NoExtensions, &read_req, read_req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert_eq!(&send_buf[2..5], &[0x02, 0x00, 0xAB]);
    }

    #[test]
    fn unmapped_address_is_skipped_and_reports_success_with_default_value() {
        let mut device = SlaveDevice::new();
        device.add_holding_registers(0, 1, |_| 0, |_, _| {});

        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(1);
        let mut send_buf = [0u8; 64];

        // Address 0x0A is outside the registered 0..=1 range: the ground-truth
        // util silently skips it rather than raising an exception.
        let mut req = vec![0x01, 0x03, 0x00, 0x0A, 0x00, 0x01];
        let crc = crate::backend::crc16(&req);
        req.extend_from_slice(&crc.to_le_bytes());
        let result = server
            .slave_handle(&NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert_eq!(send_buf[1], 0x03);
        assert_eq!(&send_buf[2..5], &[0x02, 0x00, 0x00]);
        assert!(result.response_length > 0);
    }

    #[test]
    fn addr_check_hook_rejects_before_any_map_is_touched() {
        let mut device = SlaveDevice::new();
        device.add_holding_registers(0, 10, |_| 0, |_, _| {});
        device.set_addr_check(|_function, address, _nb| {
            if address >= 5 {
                Err(ExceptionCode::IllegalDataAddress)
            } else {
                Ok(())
            }
        });

        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(1);
        let mut send_buf = [0u8; 64];

        let mut req = vec![0x01, 0x03, 0x00, 0x05, 0x00, 0x01];
        let crc = crate::backend::crc16(&req);
        req.extend_from_slice(&crc.to_le_bytes());
        server
            .slave_handle(&NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert_eq!(send_buf[1], 0x03 | 0x80);
        assert_eq!(send_buf[2], ExceptionCode::IllegalDataAddress.to_wire_code());
    }

    #[test]
    fn done_hook_observes_every_dispatch_outcome() {
        let log = std::cell::RefCell::new(Vec::new());
        let mut device = SlaveDevice::new();
        device.add_holding_registers(0, 1, |_| 0, |_, _| {});
        device.set_done(|function, address, result| {
            log.borrow_mut().push((function, address, result.is_ok()));
        });

        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(1);
        let mut send_buf = [0u8; 64];

        let mut req = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let crc = crate::backend::crc16(&req);
        req.extend_from_slice(&crc.to_le_bytes());
        server
            .slave_handle(&NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
            .unwrap();

        assert_eq!(log.borrow().as_slice(), [(0x03, 0x00, true)]);
    }

    #[test]
    fn special_function_hook_handles_non_standard_function_codes() {
        let mut device = SlaveDevice::new();
        device.set_special_function(|info, send_buf| {
            send_buf[info.send_index] = 0xAB;
            HandlerResult::Ok(1)
        });

        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(1);
        let mut send_buf = [0u8; 64];

        let mut req = vec![0x01, 0x41];
        let crc = crate::backend::crc16(&req);
        req.extend_from_slice(&crc.to_le_bytes());
        let result = server
            .slave_handle(&NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert_eq!(send_buf[1], 0x41);
        assert_eq!(send_buf[2], 0xAB);
        assert!(result.response_length > 0);
    }
}
