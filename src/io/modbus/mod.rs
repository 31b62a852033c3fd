use super::{Input, Kind, TriggerSource};
use crate::comm::{tcp::TcpComm, Communicator};
use crate::config::ModbusConfig;
use crate::error::{EResult, Error};
use log::{debug, info};
use rmodbus::{client::ModbusRequest, guess_response_frame_len, ModbusProto};
use std::sync::Arc;
use std::time::Instant;
pub use regs::{Coil, CoilAddress, Span};
pub use types::Coils;

mod regs;
mod types;

pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_UNIT: u8 = 1;

// MBAP header: transaction id, protocol id, length
const HEADER_LEN: usize = 6;
const UNIT_ID_POS: usize = 6;

/// Modbus TCP client for the "read coils" function
pub struct CoilReader {
    comm: Communicator,
    unit: u8,
}

impl CoilReader {
    pub fn new(comm: Communicator, unit: u8) -> Self {
        Self { comm, unit }
    }
    #[inline]
    pub fn unit(&self) -> u8 {
        self.unit
    }
    /// Reads `number` coils starting at `offset`
    ///
    /// Transport failures and timeouts are [`Error::Connection`], malformed
    /// responses and unit id mismatches are [`Error::Protocol`]. The
    /// connection is dropped after any failure and reopened on the next call.
    /// The whole exchange, connecting included, is bounded by one
    /// communicator timeout.
    pub fn read_coils(&self, offset: u16, number: u16) -> EResult<Coils> {
        let mut mreq = ModbusRequest::new(self.unit, ModbusProto::TcpUdp);
        let mut request = Vec::new();
        mreq.generate_get_coils(offset, number, &mut request)?;
        let response = {
            let _lock = self.comm.lock();
            let deadline = Instant::now() + self.comm.timeout();
            self.comm.write(&request, deadline)?;
            let mut buf = [0u8; HEADER_LEN];
            self.comm.read_exact(&mut buf, deadline)?;
            let mut response = buf.to_vec();
            let len = match guess_response_frame_len(&buf, ModbusProto::TcpUdp) {
                Ok(v) => usize::from(v),
                Err(e) => {
                    // the rest of the frame is unknown, the stream can not be reused
                    self.comm.reconnect();
                    return Err(e.into());
                }
            };
            if len > HEADER_LEN {
                let mut rest = vec![0u8; len - HEADER_LEN];
                self.comm.read_exact(&mut rest, deadline)?;
                response.extend(rest);
            }
            response
        };
        match response.get(UNIT_ID_POS) {
            Some(unit) if *unit == self.unit => {}
            Some(unit) => {
                self.comm.reconnect();
                return Err(Error::protocol(format!(
                    "unit id mismatch: expected {}, got {}",
                    self.unit, unit
                )));
            }
            None => {
                self.comm.reconnect();
                return Err(Error::protocol("response frame too short"));
            }
        }
        let mut data = Vec::new();
        if let Err(e) = mreq.parse_bool(&response, &mut data) {
            self.comm.reconnect();
            return Err(e.into());
        }
        let number = usize::from(number);
        if data.len() < number {
            self.comm.reconnect();
            return Err(Error::protocol(format!(
                "expected {} coils, got {}",
                number,
                data.len()
            )));
        }
        data.truncate(number);
        Ok(Coils(data))
    }
    pub fn disconnect(&self) {
        self.comm.reconnect();
    }
}

/// Coil trigger source: polls the configured coils of a remote device
pub struct CoilSource {
    reader: CoilReader,
    inputs: Vec<Input>,
    span: Span,
    indexes: Vec<usize>,
}

pub(crate) fn format_path(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl CoilSource {
    pub fn create(config: &ModbusConfig) -> EResult<Self> {
        let path = format_path(&config.host, config.port);
        info!(
            "modbus source {}, unit {}, timeout {:?}",
            path, config.unit, config.timeout
        );
        let comm: Communicator = Arc::new(TcpComm::create(&path, config.timeout));
        Self::with_comm(comm, config.unit, config.inputs()?)
    }
    pub fn with_comm(comm: Communicator, unit: u8, inputs: Vec<Input>) -> EResult<Self> {
        let addresses: Vec<u16> = inputs.iter().map(|i| i.address).collect();
        let span = Span::covering(&addresses)?;
        let indexes = addresses.iter().map(|a| span.index_of(*a)).collect();
        debug!(
            "coil span c{}-c{}",
            span.offset,
            u32::from(span.offset) + u32::from(span.number) - 1
        );
        Ok(Self {
            reader: CoilReader::new(comm, unit),
            inputs,
            span,
            indexes,
        })
    }
    #[inline]
    pub fn reader(&self) -> &CoilReader {
        &self.reader
    }
}

impl TriggerSource for CoilSource {
    fn kind(&self) -> Kind {
        Kind::Modbus
    }
    fn inputs(&self) -> &[Input] {
        &self.inputs
    }
    fn read(&mut self) -> EResult<Vec<bool>> {
        self.reader
            .read_coils(self.span.offset, self.span.number)?
            .pick(&self.indexes)
    }
    fn close(&mut self) {
        self.reader.disconnect();
        info!("modbus connection closed");
    }
}
