//! The server dispatcher: parse an indication, validate it, hand a typed
//! view to a user-supplied [`SlaveCallback`], and format the normal or
//! exception response.

use crate::backend::{Backend, Direction, Sft};
use crate::bits;
use crate::consts::{
    function, DEFAULT_VERSION_STRING, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS,
    MAX_WRITE_REGISTERS, MAX_WR_READ_REGISTERS, MAX_WR_WRITE_REGISTERS,
};
use crate::errors::{ExceptionCode, FrameError, ServerError};
use crate::frame;
use crate::length::MetaLengthHooks;

/// Everything a raw/user-defined function code callback needs: which slave
/// and transaction this indication belongs to, a read-only view of the
/// request payload, and where in `send_buf` to start writing a response.
pub struct SlaveInfo<'a> {
    pub sft: Sft,
    pub address: Option<u16>,
    pub nb: u16,
    pub buf: &'a [u8],
    pub send_index: usize,
}

/// The outcome a [`SlaveCallback`] reports back to the dispatcher.
pub enum HandlerResult {
    /// Success; `len` bytes were written at `info.send_index`.
    Ok(usize),
    /// Reject the request with a standard Modbus exception.
    Exception(ExceptionCode),
    /// The request is well-formed but not meant for us; send no reply at all
    /// (distinct from a broadcast no-reply, which still happens on success).
    Drop,
}

/// User-implemented data access for the standard Modbus function codes.
/// Every method defaults to [`ExceptionCode::IllegalFunction`] so a minimal
/// implementor only needs to override what it actually serves;
/// [`crate::slave::SlaveDevice`] implements the full set atop address-range
/// maps.
pub trait SlaveCallback {
    fn read_bits(&mut self, _function: u8, _address: u16, _dest: &mut [bool]) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    fn read_registers(&mut self, _function: u8, _address: u16, _dest: &mut [u16]) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    fn write_single_coil(&mut self, _address: u16, _value: bool) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    fn write_single_register(&mut self, _address: u16, _value: u16) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    fn write_multiple_coils(&mut self, _address: u16, _values: &[bool]) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    fn write_multiple_registers(&mut self, _address: u16, _values: &[u16]) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    fn mask_write_register(&mut self, _address: u16, _and_mask: u16, _or_mask: u16) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_write_multiple_registers(
        &mut self,
        _read_address: u16,
        _write_address: u16,
        _write_values: &[u16],
        _dest: &mut [u16],
    ) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Identifier byte and device-defined trailing data for Report Slave ID.
    /// `dest` has room for up to `MAX_PDU_LENGTH - 2` bytes; return how many
    /// were written. The default reports an empty identity string.
    fn report_slave_id(&mut self, _dest: &mut [u8]) -> usize {
        0
    }

    /// Any function code outside the canonical set.
    fn raw(&mut self, info: &SlaveInfo, _send_buf: &mut [u8]) -> HandlerResult {
        let _ = info;
        HandlerResult::Exception(ExceptionCode::IllegalFunction)
    }
}

/// What happened after a frame was parsed, validated, and dispatched.
pub struct ServerResponse {
    /// Bytes of `req` the indication actually consumed (the dirty-byte
    /// scenario: callers with more buffered bytes advance by this much).
    pub frame_length: usize,
    /// Bytes written into `send_buf`. Zero means "no reply": broadcast,
    /// a strict address mismatch, or an explicit [`HandlerResult::Drop`].
    pub response_length: usize,
}

enum Disposition {
    Normal(usize),
    Exception(ExceptionCode),
    Drop,
}

fn address_range_valid(address: u16, nb: u16) -> bool {
    address as u32 + nb as u32 <= 0x1_0000
}

/// A Modbus server bound to one backend (RTU or TCP).
pub struct ModbusServer<B: Backend> {
    backend: B,
}

impl ModbusServer<crate::backend::RtuBackend> {
    pub fn rtu() -> Self {
        Self {
            backend: crate::backend::RtuBackend::new(),
        }
    }
}

impl ModbusServer<crate::backend::TcpBackend> {
    pub fn tcp() -> Self {
        Self {
            backend: crate::backend::TcpBackend::new(),
        }
    }
}

impl<B: Backend> ModbusServer<B> {
    pub fn set_slave(&mut self, slave: u8) {
        self.backend.set_slave(slave);
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Parse, validate, and dispatch one indication from `req[..msg_length]`,
    /// writing any reply into `send_buf`. `strict` enables the configured-
    /// slave-or-broadcast address filter; set it false for a sniffing/
    /// promiscuous listener.
    pub fn slave_handle<C: SlaveCallback>(
        &mut self,
        hooks: &impl MetaLengthHooks,
        req: &[u8],
        msg_length: usize,
        strict: bool,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Result<ServerResponse, ServerError> {
        if send_buf.len() < B::MAX_ADU_LENGTH {
            return Err(ServerError::Frame(FrameError::buffer_too_small(B::MAX_ADU_LENGTH, send_buf.len())));
        }

        let frame_length = frame::validate(&self.backend, req, msg_length, Direction::Indication, hooks)?;
        let req = &req[..frame_length];
        let offset = B::HEADER_LENGTH;
        let slave = req[offset - 1];
        let function = req[offset];
        let tid = self.backend.prepare_response_tid(req);

        if strict {
            if let Some(configured) = self.backend.slave() {
                if slave != configured && slave != crate::consts::BROADCAST_ADDRESS {
                    return Ok(ServerResponse {
                        frame_length,
                        response_length: 0,
                    });
                }
            }
        }

        let sft = Sft { slave, function, tid };
        let disposition = self.dispatch(function, req, offset, &sft, callback, send_buf);

        let response_length = match disposition {
            Disposition::Drop => 0,
            // Mirrors HandlerResult::Drop: a callback asking for the internal
            // drop sentinel never gets a wire exception for it.
            Disposition::Exception(ExceptionCode::Unknown) => 0,
            Disposition::Normal(payload_len) => {
                if self.backend.is_broadcast(slave) {
                    0
                } else {
                    let header_len = self.backend.build_response_basis(&sft, send_buf);
                    let len = header_len + payload_len;
                    self.backend.send_msg_pre(send_buf, len)
                }
            }
            Disposition::Exception(code) => {
                if self.backend.is_broadcast(slave) {
                    0
                } else {
                    let exc_sft = Sft {
                        function: function | function::EXCEPTION_BIT,
                        ..sft
                    };
                    let header_len = self.backend.build_response_basis(&exc_sft, send_buf);
                    send_buf[header_len] = code.to_wire_code();
                    let len = header_len + 1;
                    self.backend.send_msg_pre(send_buf, len)
                }
            }
        };

        Ok(ServerResponse {
            frame_length,
            response_length,
        })
    }

    fn dispatch<C: SlaveCallback>(
        &self,
        function: u8,
        req: &[u8],
        offset: usize,
        sft: &Sft,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        match function {
            function::READ_COILS | function::READ_DISCRETE_INPUTS => {
                self.dispatch_read_bits(function, req, offset, callback, send_buf)
            }
            function::READ_HOLDING_REGISTERS | function::READ_INPUT_REGISTERS => {
                self.dispatch_read_registers(function, req, offset, callback, send_buf)
            }
            function::WRITE_SINGLE_COIL => self.dispatch_write_single_coil(req, offset, callback, send_buf),
            function::WRITE_SINGLE_REGISTER => self.dispatch_write_single_register(req, offset, callback, send_buf),
            function::WRITE_MULTIPLE_COILS => self.dispatch_write_multiple_coils(req, offset, callback, send_buf),
            function::WRITE_MULTIPLE_REGISTERS => self.dispatch_write_multiple_registers(req, offset, callback, send_buf),
            function::MASK_WRITE_REGISTER => self.dispatch_mask_write_register(req, offset, callback, send_buf),
            function::READ_WRITE_MULTIPLE_REGISTERS => {
                self.dispatch_read_write_multiple_registers(req, offset, callback, send_buf)
            }
            function::READ_EXCEPTION_STATUS => Disposition::Exception(ExceptionCode::IllegalFunction),
            function::REPORT_SLAVE_ID => self.dispatch_report_slave_id(offset, callback, send_buf),
            other => {
                let nb = (req.len() - offset - 1) as u16;
                let info = SlaveInfo {
                    sft: *sft,
                    address: None,
                    nb,
                    buf: &req[offset + 1..],
                    send_index: offset + 1,
                };
                let _ = other;
                match callback.raw(&info, send_buf) {
                    HandlerResult::Ok(len) => Disposition::Normal(len),
                    HandlerResult::Exception(code) => Disposition::Exception(code),
                    HandlerResult::Drop => Disposition::Drop,
                }
            }
        }
    }

    fn dispatch_read_bits<C: SlaveCallback>(
        &self,
        function: u8,
        req: &[u8],
        offset: usize,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        let address = u16::from_be_bytes([req[offset + 1], req[offset + 2]]);
        let nb = u16::from_be_bytes([req[offset + 3], req[offset + 4]]);
        if nb < 1 || nb > MAX_READ_BITS || !address_range_valid(address, nb) {
            return Disposition::Exception(ExceptionCode::IllegalDataAddress);
        }
        let mut scratch = [false; MAX_READ_BITS as usize];
        match callback.read_bits(function, address, &mut scratch[..nb as usize]) {
            Ok(()) => {
                let byte_count = (nb as usize).div_ceil(8);
                send_buf[offset + 1] = byte_count as u8;
                bits::pack(&scratch[..nb as usize], &mut send_buf[offset + 2..offset + 2 + byte_count]);
                Disposition::Normal(1 + byte_count)
            }
            Err(code) => Disposition::Exception(code),
        }
    }

    fn dispatch_read_registers<C: SlaveCallback>(
        &self,
        function: u8,
        req: &[u8],
        offset: usize,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        let address = u16::from_be_bytes([req[offset + 1], req[offset + 2]]);
        let nb = u16::from_be_bytes([req[offset + 3], req[offset + 4]]);
        if nb < 1 || nb > MAX_READ_REGISTERS || !address_range_valid(address, nb) {
            return Disposition::Exception(ExceptionCode::IllegalDataAddress);
        }
        let mut scratch = [0u16; MAX_READ_REGISTERS as usize];
        match callback.read_registers(function, address, &mut scratch[..nb as usize]) {
            Ok(()) => {
                let byte_count = nb as usize * 2;
                send_buf[offset + 1] = byte_count as u8;
                for (i, reg) in scratch[..nb as usize].iter().enumerate() {
                    send_buf[offset + 2 + i * 2..offset + 4 + i * 2].copy_from_slice(&reg.to_be_bytes());
                }
                Disposition::Normal(1 + byte_count)
            }
            Err(code) => Disposition::Exception(code),
        }
    }

    fn dispatch_write_single_coil<C: SlaveCallback>(
        &self,
        req: &[u8],
        offset: usize,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        let address = u16::from_be_bytes([req[offset + 1], req[offset + 2]]);
        let raw_value = u16::from_be_bytes([req[offset + 3], req[offset + 4]]);
        if raw_value != 0x0000 && raw_value != 0xFF00 {
            return Disposition::Exception(ExceptionCode::IllegalDataValue);
        }
        match callback.write_single_coil(address, raw_value == 0xFF00) {
            Ok(()) => {
                send_buf[offset + 1..offset + 5].copy_from_slice(&req[offset + 1..offset + 5]);
                Disposition::Normal(4)
            }
            Err(code) => Disposition::Exception(code),
        }
    }

    fn dispatch_write_single_register<C: SlaveCallback>(
        &self,
        req: &[u8],
        offset: usize,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        let address = u16::from_be_bytes([req[offset + 1], req[offset + 2]]);
        let value = u16::from_be_bytes([req[offset + 3], req[offset + 4]]);
        match callback.write_single_register(address, value) {
            Ok(()) => {
                send_buf[offset + 1..offset + 5].copy_from_slice(&req[offset + 1..offset + 5]);
                Disposition::Normal(4)
            }
            Err(code) => Disposition::Exception(code),
        }
    }

    fn dispatch_write_multiple_coils<C: SlaveCallback>(
        &self,
        req: &[u8],
        offset: usize,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        let address = u16::from_be_bytes([req[offset + 1], req[offset + 2]]);
        let nb = u16::from_be_bytes([req[offset + 3], req[offset + 4]]);
        let byte_count = req[offset + 5] as usize;
        if nb < 1 || nb > MAX_WRITE_BITS || !address_range_valid(address, nb) || byte_count != (nb as usize).div_ceil(8) {
            return Disposition::Exception(ExceptionCode::IllegalDataValue);
        }
        let mut scratch = [false; MAX_WRITE_BITS as usize];
        bits::unpack(&req[offset + 6..offset + 6 + byte_count], nb as usize, &mut scratch[..nb as usize]);
        match callback.write_multiple_coils(address, &scratch[..nb as usize]) {
            Ok(()) => {
                send_buf[offset + 1..offset + 5].copy_from_slice(&req[offset + 1..offset + 5]);
                Disposition::Normal(4)
            }
            Err(code) => Disposition::Exception(code),
        }
    }

    fn dispatch_write_multiple_registers<C: SlaveCallback>(
        &self,
        req: &[u8],
        offset: usize,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        let address = u16::from_be_bytes([req[offset + 1], req[offset + 2]]);
        let nb = u16::from_be_bytes([req[offset + 3], req[offset + 4]]);
        let byte_count = req[offset + 5] as usize;
        if nb < 1 || nb > MAX_WRITE_REGISTERS || !address_range_valid(address, nb) || byte_count != nb as usize * 2 {
            return Disposition::Exception(ExceptionCode::IllegalDataValue);
        }
        let mut scratch = [0u16; MAX_WRITE_REGISTERS as usize];
        for i in 0..nb as usize {
            scratch[i] = u16::from_be_bytes([req[offset + 6 + i * 2], req[offset + 7 + i * 2]]);
        }
        match callback.write_multiple_registers(address, &scratch[..nb as usize]) {
            Ok(()) => {
                send_buf[offset + 1..offset + 5].copy_from_slice(&req[offset + 1..offset + 5]);
                Disposition::Normal(4)
            }
            Err(code) => Disposition::Exception(code),
        }
    }

    fn dispatch_mask_write_register<C: SlaveCallback>(
        &self,
        req: &[u8],
        offset: usize,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        let address = u16::from_be_bytes([req[offset + 1], req[offset + 2]]);
        let and_mask = u16::from_be_bytes([req[offset + 3], req[offset + 4]]);
        let or_mask = u16::from_be_bytes([req[offset + 5], req[offset + 6]]);
        match callback.mask_write_register(address, and_mask, or_mask) {
            Ok(()) => {
                send_buf[offset + 1..offset + 7].copy_from_slice(&req[offset + 1..offset + 7]);
                Disposition::Normal(6)
            }
            Err(code) => Disposition::Exception(code),
        }
    }

    fn dispatch_read_write_multiple_registers<C: SlaveCallback>(
        &self,
        req: &[u8],
        offset: usize,
        callback: &mut C,
        send_buf: &mut [u8],
    ) -> Disposition {
        let read_address = u16::from_be_bytes([req[offset + 1], req[offset + 2]]);
        let read_nb = u16::from_be_bytes([req[offset + 3], req[offset + 4]]);
        let write_address = u16::from_be_bytes([req[offset + 5], req[offset + 6]]);
        let write_nb = u16::from_be_bytes([req[offset + 7], req[offset + 8]]);
        let byte_count = req[offset + 9] as usize;
        if read_nb < 1
            || read_nb > MAX_WR_READ_REGISTERS
            || write_nb < 1
            || write_nb > MAX_WR_WRITE_REGISTERS
            || !address_range_valid(read_address, read_nb)
            || !address_range_valid(write_address, write_nb)
            || byte_count != write_nb as usize * 2
        {
            return Disposition::Exception(ExceptionCode::IllegalDataValue);
        }
        let mut write_scratch = [0u16; MAX_WR_WRITE_REGISTERS as usize];
        for i in 0..write_nb as usize {
            write_scratch[i] = u16::from_be_bytes([req[offset + 10 + i * 2], req[offset + 11 + i * 2]]);
        }
        let mut read_scratch = [0u16; MAX_WR_READ_REGISTERS as usize];
        match callback.read_write_multiple_registers(
            read_address,
            write_address,
            &write_scratch[..write_nb as usize],
            &mut read_scratch[..read_nb as usize],
        ) {
            Ok(()) => {
                let out_byte_count = read_nb as usize * 2;
                send_buf[offset + 1] = out_byte_count as u8;
                for (i, reg) in read_scratch[..read_nb as usize].iter().enumerate() {
                    send_buf[offset + 2 + i * 2..offset + 4 + i * 2].copy_from_slice(&reg.to_be_bytes());
                }
                Disposition::Normal(1 + out_byte_count)
            }
            Err(code) => Disposition::Exception(code),
        }
    }

    fn dispatch_report_slave_id<C: SlaveCallback>(&self, offset: usize, callback: &mut C, send_buf: &mut [u8]) -> Disposition {
        // Payload: bc(1), slave-id(1), run-indicator(1)=0xFF, data(bc-2). The
        // version string is always present; a callback may append its own
        // device-defined bytes after it.
        let slave_id = self.backend.slave().unwrap_or(0xFF);
        let data_start = offset + 4;
        let version_len = DEFAULT_VERSION_STRING.len();
        send_buf[data_start..data_start + version_len].copy_from_slice(DEFAULT_VERSION_STRING.as_bytes());
        let extra = callback.report_slave_id(&mut send_buf[data_start + version_len..]);
        let data_len = version_len + extra;

        send_buf[offset + 1] = (2 + data_len) as u8;
        send_buf[offset + 2] = slave_id;
        send_buf[offset + 3] = 0xFF;
        Disposition::Normal(2 + data_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RtuBackend;

    struct EchoDevice {
        registers: [u16; 16],
    }

    impl SlaveCallback for EchoDevice {
        fn read_registers(&mut self, _function: u8, address: u16, dest: &mut [u16]) -> Result<(), ExceptionCode> {
            for (i, slot) in dest.iter_mut().enumerate() {
                *slot = self.registers[address as usize + i];
            }
            Ok(())
        }

        fn write_multiple_coils(&mut self, _address: u16, _values: &[bool]) -> Result<(), ExceptionCode> {
            Ok(())
        }
    }

    #[test]
    fn broadcast_write_produces_no_reply() {
        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(5);
        let mut device = EchoDevice { registers: [0; 16] };
        let mut send_buf = [0u8; 256];

        // slave=0 (broadcast), fc 15, addr 0, nb 1, bc 1, bits 0x01
        let mut req = vec![0x00, 0x0F, 0x00, 0x00, 0x00, 0x01, 0x01, 0x01];
        let crc = crate::backend::crc16(&req);
        req.extend_from_slice(&crc.to_le_bytes());

        let result = server
            .slave_handle(&crate::length::NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert_eq!(result.response_length, 0);
    }

    #[test]
    fn strict_mode_ignores_frames_for_another_slave() {
        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(5);
        let mut device = EchoDevice { registers: [0; 16] };
        let mut send_buf = [0u8; 256];

        let mut req = vec![0x09, 0x03, 0x00, 0x00, 0x00, 0x01];
        let crc = crate::backend::crc16(&req);
        req.extend_from_slice(&crc.to_le_bytes());

        let result = server
            .slave_handle(&crate::length::NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert_eq!(result.response_length, 0);
    }

    #[test]
    fn out_of_range_address_yields_illegal_data_address_exception() {
        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(5);
        let mut device = EchoDevice { registers: [0; 16] };
        let mut send_buf = [0u8; 256];

        // addr=0xFFFF, nb=2 overflows 16-bit address space.
        let mut req = vec![0x05, 0x03, 0xFF, 0xFF, 0x00, 0x02];
        let crc = crate::backend::crc16(&req);
        req.extend_from_slice(&crc.to_le_bytes());

        let result = server
            .slave_handle(&crate::length::NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert_eq!(result.response_length, 5); // slave, fc|0x80, code, crc(2)
        assert_eq!(send_buf[1], function::READ_HOLDING_REGISTERS | function::EXCEPTION_BIT);
        assert_eq!(send_buf[2], ExceptionCode::IllegalDataAddress.to_wire_code());
    }

    #[test]
    fn dirty_byte_buffer_reports_consumed_frame_length() {
        let mut server = ModbusServer::<RtuBackend>::rtu();
        server.set_slave(5);
        let mut device = EchoDevice { registers: [0x1234; 16] };
        let mut send_buf = [0u8; 256];

        let mut req = vec![0x05, 0x03, 0x00, 0x00, 0x00, 0x01];
        let crc = crate::backend::crc16(&req);
        req.extend_from_slice(&crc.to_le_bytes());
        let clean_len = req.len();
        req.extend_from_slice(&[0xAA, 0xBB]);

        let result = server
            .slave_handle(&crate::length::NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
            .unwrap();
        assert_eq!(result.frame_length, clean_len);
    }

    proptest::proptest! {
        #[test]
        fn address_plus_quantity_overflow_always_yields_illegal_data_address(
            address in 0xFF00u16..=0xFFFFu16,
            nb in 2u16..=125u16,
        ) {
            proptest::prop_assume!(address as u32 + nb as u32 > 0x1_0000);

            let mut server = ModbusServer::<RtuBackend>::rtu();
            server.set_slave(5);
            let mut device = EchoDevice { registers: [0; 16] };
            let mut send_buf = [0u8; 256];

            let mut req = vec![0x05, 0x03, (address >> 8) as u8, (address & 0xFF) as u8, (nb >> 8) as u8, (nb & 0xFF) as u8];
            let crc = crate::backend::crc16(&req);
            req.extend_from_slice(&crc.to_le_bytes());

            let result = server
                .slave_handle(&crate::length::NoExtensions, &req, req.len(), true, &mut device, &mut send_buf)
                .unwrap();
            proptest::prop_assert_eq!(send_buf[1], function::READ_HOLDING_REGISTERS | function::EXCEPTION_BIT);
            proptest::prop_assert_eq!(send_buf[2], ExceptionCode::IllegalDataAddress.to_wire_code());
            proptest::prop_assert_eq!(result.response_length, 5);
        }
    }
}
