//! The PowerSupply boundary: limits, the abstract contract, and two
//! concrete serial transports (SCPI text, Modbus RTU), per spec section 6.

use std::io::{Read, Write};
use std::time::Duration;

use crc::{Crc, CRC_16_MODBUS};
use log::warn;
use regex::Regex;

use crate::error::PowerSupplyError;

/// Voltage/current/power operating bounds enforced on every setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub voltage: (f64, f64),
    pub current: (f64, f64),
    pub power: (f64, f64),
}

impl Limits {
    pub fn new(voltage: (f64, f64), current: (f64, f64), power: (f64, f64)) -> Self {
        Self {
            voltage,
            current,
            power,
        }
    }

    pub fn clamp_power(&self, p: f64) -> f64 {
        p.clamp(self.power.0, self.power.1)
    }

    pub fn clamp_voltage(&self, v: f64) -> f64 {
        v.clamp(self.voltage.0, self.voltage.1)
    }

    pub fn clamp_current(&self, a: f64) -> f64 {
        a.clamp(self.current.0, self.current.1)
    }
}

/// The abstract boundary to a programmable DC power supply (spec section 6).
pub trait PowerSupply {
    fn set_voltage(&mut self, v: f64, max_current: Option<f64>) -> Result<(), PowerSupplyError>;
    fn set_current(&mut self, a: f64, max_voltage: Option<f64>) -> Result<(), PowerSupplyError>;
    /// Drives toward power `p` by solving for current at the last known
    /// resistance; transports without a direct power mode approximate this.
    fn set_power(&mut self, p: f64) -> Result<(), PowerSupplyError>;
    fn poll(&mut self) -> Result<(f64, f64), PowerSupplyError>;
    fn on(&mut self, enabled: bool) -> Result<(), PowerSupplyError>;
    fn limits(&self) -> Limits;
    fn minimum_measurable_current(&self) -> f64;
}

/// Abstracts the serial byte stream so transports are testable without real
/// hardware (grounded on the co2-sensor device driver's `Device` trait,
/// which wraps `serialport` behind a small execute-style boundary).
pub trait SerialTransport: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> std::io::Result<()>;
}

impl SerialTransport for Box<dyn serialport::SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

/// An in-memory transport for tests: a queue of canned responses keyed to
/// each write, so `ScpiPowerSupply`/`ModbusRtuPowerSupply` can be exercised
/// without real hardware.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    pub written: Vec<u8>,
    responses: std::collections::VecDeque<u8>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&mut self, bytes: &[u8]) {
        self.responses.extend(bytes.iter().copied());
    }
}

impl Read for LoopbackTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.responses.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        Ok(n)
    }
}

impl Write for LoopbackTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SerialTransport for LoopbackTransport {
    fn set_timeout(&mut self, _timeout: Duration) -> std::io::Result<()> {
        Ok(())
    }
}

/// Configurable printf-style SCPI command templates, per device (spec
/// section 6: "identify, voltage-set, current-set, voltage-query,
/// current-query, output-query, on-off").
#[derive(Debug, Clone)]
pub struct ScpiCommandSet {
    pub identify: String,
    pub identify_pattern: String,
    pub voltage_set: String,
    pub current_set: String,
    pub voltage_query: String,
    pub current_query: String,
    pub output_query: String,
    pub output_on: String,
    pub output_off: String,
    pub max_command_length: Option<usize>,
}

impl ScpiCommandSet {
    pub fn generic() -> Self {
        Self {
            identify: "*IDN?\n".to_string(),
            identify_pattern: ".*".to_string(),
            voltage_set: "VOLT {:.3}\n".to_string(),
            current_set: "CURR {:.3}\n".to_string(),
            voltage_query: "MEAS:VOLT?\n".to_string(),
            current_query: "MEAS:CURR?\n".to_string(),
            output_query: "OUTP?\n".to_string(),
            output_on: "OUTP 1\n".to_string(),
            output_off: "OUTP 0\n".to_string(),
            max_command_length: None,
        }
    }

    fn format_value(template: &str, value: f64) -> String {
        // Printf-style `{:.N}` placeholder; the only substitution these
        // command sets need.
        if let Some(start) = template.find('{') {
            if let Some(end) = template[start..].find('}') {
                let spec = &template[start + 1..start + end];
                let precision = spec
                    .rsplit('.')
                    .next()
                    .and_then(|p| p.parse::<usize>().ok())
                    .unwrap_or(3);
                let formatted = format!("{:.*}", precision, value);
                return format!(
                    "{}{}{}",
                    &template[..start],
                    formatted,
                    &template[start + end + 1..]
                );
            }
        }
        template.to_string()
    }
}

/// SCPI-over-serial power supply transport.
pub struct ScpiPowerSupply<T: SerialTransport> {
    transport: T,
    commands: ScpiCommandSet,
    limits: Limits,
    minimum_measurable_current: f64,
    response_timeout: Duration,
    last_resistance: f64,
}

impl<T: SerialTransport> ScpiPowerSupply<T> {
    pub fn open(
        mut transport: T,
        commands: ScpiCommandSet,
        limits: Limits,
        minimum_measurable_current: f64,
        response_timeout: Duration,
    ) -> Result<Self, PowerSupplyError> {
        transport
            .set_timeout(response_timeout)
            .map_err(|e| PowerSupplyError::Transport(e.to_string()))?;

        let mut supply = Self {
            transport,
            commands,
            limits,
            minimum_measurable_current,
            response_timeout,
            last_resistance: 1.0,
        };
        supply.identify()?;
        Ok(supply)
    }

    fn identify(&mut self) -> Result<(), PowerSupplyError> {
        let idn = self.query(&self.commands.identify.clone())?;
        let re = Regex::new(&self.commands.identify_pattern)
            .map_err(|e| PowerSupplyError::Malformed(format!("bad identity pattern: {e}")))?;
        if !re.is_match(&idn) {
            return Err(PowerSupplyError::IdentityMismatch {
                expected: self.commands.identify_pattern.clone(),
                actual: idn,
            });
        }
        Ok(())
    }

    fn write_command(&mut self, cmd: &str) -> Result<(), PowerSupplyError> {
        if let Some(max_len) = self.commands.max_command_length {
            if cmd.len() > max_len {
                return Err(PowerSupplyError::Malformed(format!(
                    "command {} exceeds max length {}",
                    cmd.len(),
                    max_len
                )));
            }
        }
        self.transport
            .write_all(cmd.as_bytes())
            .map_err(|e| PowerSupplyError::Transport(e.to_string()))
    }

    fn query(&mut self, cmd: &str) -> Result<String, PowerSupplyError> {
        self.write_command(cmd)?;
        let mut buf = [0u8; 256];
        let n = self
            .transport
            .read(&mut buf)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    PowerSupplyError::Timeout(self.response_timeout)
                }
                _ => PowerSupplyError::Transport(e.to_string()),
            })?;
        String::from_utf8(buf[..n].to_vec())
            .map(|s| s.trim().to_string())
            .map_err(|e| PowerSupplyError::Malformed(e.to_string()))
    }

    fn query_f64(&mut self, cmd: &str) -> Result<f64, PowerSupplyError> {
        let raw = self.query(cmd)?;
        raw.parse::<f64>()
            .map_err(|_| PowerSupplyError::Malformed(raw))
    }
}

impl<T: SerialTransport> PowerSupply for ScpiPowerSupply<T> {
    fn set_voltage(&mut self, v: f64, max_current: Option<f64>) -> Result<(), PowerSupplyError> {
        let v = self.limits.clamp_voltage(v);
        let cmd = ScpiCommandSet::format_value(&self.commands.voltage_set, v);
        self.write_command(&cmd)?;
        if let Some(a) = max_current {
            let a = self.limits.clamp_current(a);
            let cmd = ScpiCommandSet::format_value(&self.commands.current_set, a);
            self.write_command(&cmd)?;
        }
        Ok(())
    }

    fn set_current(&mut self, a: f64, max_voltage: Option<f64>) -> Result<(), PowerSupplyError> {
        let a = self.limits.clamp_current(a);
        let cmd = ScpiCommandSet::format_value(&self.commands.current_set, a);
        self.write_command(&cmd)?;
        if let Some(v) = max_voltage {
            let v = self.limits.clamp_voltage(v);
            let cmd = ScpiCommandSet::format_value(&self.commands.voltage_set, v);
            self.write_command(&cmd)?;
        }
        Ok(())
    }

    fn set_power(&mut self, p: f64) -> Result<(), PowerSupplyError> {
        let p = self.limits.clamp_power(p);
        let r = self.last_resistance.max(1e-6);
        let v = (p * r).sqrt();
        self.set_voltage(v, Some(v / r))
    }

    fn poll(&mut self) -> Result<(f64, f64), PowerSupplyError> {
        let v = self.query_f64(&self.commands.voltage_query.clone())?;
        let a = self.query_f64(&self.commands.current_query.clone())?;
        if a >= self.minimum_measurable_current {
            self.last_resistance = v / a;
        }
        Ok((v, a))
    }

    fn on(&mut self, enabled: bool) -> Result<(), PowerSupplyError> {
        let cmd = if enabled {
            self.commands.output_on.clone()
        } else {
            self.commands.output_off.clone()
        };
        self.write_command(&cmd)
    }

    fn limits(&self) -> Limits {
        self.limits
    }

    fn minimum_measurable_current(&self) -> f64 {
        self.minimum_measurable_current
    }
}

/// Minimal Modbus RTU transport: enough register read/write framing with
/// CRC16 to satisfy the `PowerSupply` contract. Full register-map coverage
/// is a detail for the concrete device, not load-bearing for the control
/// loop.
pub struct ModbusRtuPowerSupply<T: SerialTransport> {
    transport: T,
    unit_id: u8,
    voltage_register: u16,
    current_register: u16,
    output_register: u16,
    limits: Limits,
    minimum_measurable_current: f64,
    response_timeout: Duration,
    last_resistance: f64,
}

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

impl<T: SerialTransport> ModbusRtuPowerSupply<T> {
    pub fn new(
        transport: T,
        unit_id: u8,
        voltage_register: u16,
        current_register: u16,
        output_register: u16,
        limits: Limits,
        minimum_measurable_current: f64,
        response_timeout: Duration,
    ) -> Result<Self, PowerSupplyError> {
        let mut transport = transport;
        transport
            .set_timeout(response_timeout)
            .map_err(|e| PowerSupplyError::Transport(e.to_string()))?;
        Ok(Self {
            transport,
            unit_id,
            voltage_register,
            current_register,
            output_register,
            limits,
            minimum_measurable_current,
            response_timeout,
            last_resistance: 1.0,
        })
    }

    fn frame_write_register(&self, register: u16, value: u16) -> Vec<u8> {
        let mut frame = vec![self.unit_id, 0x06];
        frame.extend_from_slice(&register.to_be_bytes());
        frame.extend_from_slice(&value.to_be_bytes());
        let crc = MODBUS_CRC.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn frame_read_register(&self, register: u16, count: u16) -> Vec<u8> {
        let mut frame = vec![self.unit_id, 0x03];
        frame.extend_from_slice(&register.to_be_bytes());
        frame.extend_from_slice(&count.to_be_bytes());
        let crc = MODBUS_CRC.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn transact(&mut self, frame: &[u8], expect_len: usize) -> Result<Vec<u8>, PowerSupplyError> {
        self.transport
            .write_all(frame)
            .map_err(|e| PowerSupplyError::Transport(e.to_string()))?;
        let mut buf = vec![0u8; expect_len];
        self.transport.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                PowerSupplyError::Timeout(self.response_timeout)
            }
            _ => PowerSupplyError::Transport(e.to_string()),
        })?;
        let (data, crc_bytes) = buf.split_at(buf.len() - 2);
        let expected_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        if MODBUS_CRC.checksum(data) != expected_crc {
            return Err(PowerSupplyError::Malformed("bad CRC16".to_string()));
        }
        Ok(buf)
    }

    fn write_register(&mut self, register: u16, value: u16) -> Result<(), PowerSupplyError> {
        let frame = self.frame_write_register(register, value);
        self.transact(&frame, 8)?;
        Ok(())
    }

    fn read_register(&mut self, register: u16) -> Result<u16, PowerSupplyError> {
        let frame = self.frame_read_register(register, 1);
        let resp = self.transact(&frame, 7)?;
        Ok(u16::from_be_bytes([resp[3], resp[4]]))
    }
}

/// Millivolts/milliamps per register count, the common Modbus power-supply
/// convention this minimal driver assumes.
const MODBUS_SCALE: f64 = 1000.0;

impl<T: SerialTransport> PowerSupply for ModbusRtuPowerSupply<T> {
    fn set_voltage(&mut self, v: f64, _max_current: Option<f64>) -> Result<(), PowerSupplyError> {
        let v = self.limits.clamp_voltage(v);
        self.write_register(self.voltage_register, (v * MODBUS_SCALE) as u16)
    }

    fn set_current(&mut self, a: f64, _max_voltage: Option<f64>) -> Result<(), PowerSupplyError> {
        let a = self.limits.clamp_current(a);
        self.write_register(self.current_register, (a * MODBUS_SCALE) as u16)
    }

    fn set_power(&mut self, p: f64) -> Result<(), PowerSupplyError> {
        let p = self.limits.clamp_power(p);
        let r = self.last_resistance.max(1e-6);
        let v = (p * r).sqrt();
        self.set_voltage(v, None)
    }

    fn poll(&mut self) -> Result<(f64, f64), PowerSupplyError> {
        let v = self.read_register(self.voltage_register)? as f64 / MODBUS_SCALE;
        let a = self.read_register(self.current_register)? as f64 / MODBUS_SCALE;
        if a >= self.minimum_measurable_current {
            self.last_resistance = v / a;
        }
        Ok((v, a))
    }

    fn on(&mut self, enabled: bool) -> Result<(), PowerSupplyError> {
        self.write_register(self.output_register, enabled as u16)
    }

    fn limits(&self) -> Limits {
        self.limits
    }

    fn minimum_measurable_current(&self) -> f64 {
        self.minimum_measurable_current
    }
}

/// In-memory `PowerSupply` for tests and the demo binary: first-order
/// thermal simulation `V=sqrt(P*R), I=V/R`, matching spec section 8's
/// end-to-end scenario description.
#[derive(Debug, Clone)]
pub struct MockPowerSupply {
    pub resistance: f64,
    pub limits: Limits,
    pub minimum_measurable_current: f64,
    pub enabled: bool,
    pub applied_power: f64,
    pub off_calls: Vec<bool>,
    /// Test hook: the next N calls to `poll()` fail with a transport error
    /// instead of returning a reading.
    pub fail_next_polls: u32,
}

impl MockPowerSupply {
    pub fn new(resistance: f64, limits: Limits, minimum_measurable_current: f64) -> Self {
        Self {
            resistance,
            limits,
            minimum_measurable_current,
            enabled: false,
            applied_power: 0.0,
            off_calls: Vec::new(),
            fail_next_polls: 0,
        }
    }
}

impl PowerSupply for MockPowerSupply {
    fn set_voltage(&mut self, v: f64, _max_current: Option<f64>) -> Result<(), PowerSupplyError> {
        let v = self.limits.clamp_voltage(v);
        self.applied_power = v * v / self.resistance.max(1e-9);
        Ok(())
    }

    fn set_current(&mut self, a: f64, _max_voltage: Option<f64>) -> Result<(), PowerSupplyError> {
        let a = self.limits.clamp_current(a);
        self.applied_power = a * a * self.resistance;
        Ok(())
    }

    fn set_power(&mut self, p: f64) -> Result<(), PowerSupplyError> {
        self.applied_power = self.limits.clamp_power(p);
        Ok(())
    }

    fn poll(&mut self) -> Result<(f64, f64), PowerSupplyError> {
        if self.fail_next_polls > 0 {
            self.fail_next_polls -= 1;
            return Err(PowerSupplyError::Transport("simulated poll failure".to_string()));
        }
        if !self.enabled {
            return Ok((0.0, 0.0));
        }
        let v = (self.applied_power * self.resistance).sqrt();
        let i = if self.resistance > 1e-9 { v / self.resistance } else { 0.0 };
        if i < self.minimum_measurable_current {
            warn!("mock supply current {i:.4} below minimum measurable");
        }
        Ok((v, i))
    }

    fn on(&mut self, enabled: bool) -> Result<(), PowerSupplyError> {
        self.enabled = enabled;
        self.off_calls.push(enabled);
        if !enabled {
            self.applied_power = 0.0;
        }
        Ok(())
    }

    fn limits(&self) -> Limits {
        self.limits
    }

    fn minimum_measurable_current(&self) -> f64 {
        self.minimum_measurable_current
    }
}
