//! Binary command-frame adapter.
//!
//! Motor controllers such as the Standa 8SMC4 do not speak SCPI. Each request
//! is a 4-character ASCII command code followed by little-endian packed
//! arguments, and each response is a fixed-length packed payload. This adapter
//! keeps the text-level [`Transport`] contract by translating a textual query
//! like `"move 1000"` into a frame, and rendering the decoded response fields as
//! comma-separated text (`"1000"`, `"200,256"`).
//!
//! `write` sends a frame and discards its payload; `read` has nothing to return
//! on a request/response protocol and yields an empty string. All real work
//! happens in `query`.

use super::{Transport, DEFAULT_TIMEOUT};
use crate::error::TransportError;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Byte stream a frame adapter talks over.
pub trait ByteStream: Read + Write + Send {}

impl<T: Read + Write + Send> ByteStream for T {}

/// Opens a byte stream for an address.
pub type StreamOpener =
    Box<dyn FnMut(&str, Duration) -> std::io::Result<Box<dyn ByteStream>> + Send>;

/// Packed field inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    /// Little-endian signed 32-bit integer
    I32,
    /// Little-endian unsigned 32-bit integer
    U32,
    /// Single unsigned byte
    U8,
}

impl FrameField {
    /// Encoded size in bytes.
    pub fn size(self) -> usize {
        match self {
            FrameField::I32 | FrameField::U32 => 4,
            FrameField::U8 => 1,
        }
    }

    fn pack(self, value: i64, out: &mut Vec<u8>) -> Result<(), TransportError> {
        let out_of_range =
            || TransportError::InvalidCommand(format!("value {value} does not fit field {self:?}"));
        match self {
            FrameField::I32 => {
                let v = i32::try_from(value).map_err(|_| out_of_range())?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            FrameField::U32 => {
                let v = u32::try_from(value).map_err(|_| out_of_range())?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            FrameField::U8 => {
                let v = u8::try_from(value).map_err(|_| out_of_range())?;
                out.push(v);
            }
        }
        Ok(())
    }

    /// Reads one field from the front of `bytes`. `None` if too short.
    fn unpack(self, bytes: &[u8]) -> Option<i64> {
        match self {
            FrameField::I32 => {
                let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
                Some(i64::from(i32::from_le_bytes(raw)))
            }
            FrameField::U32 => {
                let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
                Some(i64::from(u32::from_le_bytes(raw)))
            }
            FrameField::U8 => bytes.first().map(|b| i64::from(*b)),
        }
    }
}

/// Layout of one command in the controller's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCommand {
    /// Four ASCII characters sent as the frame header.
    pub code: &'static str,
    /// Arguments packed after the header.
    pub request: &'static [FrameField],
    /// Fields of the fixed-length response.
    pub response: &'static [FrameField],
}

impl FrameCommand {
    fn response_len(&self) -> usize {
        self.response.iter().map(|f| f.size()).sum()
    }
}

/// Transport speaking a fixed command table of binary frames.
pub struct FrameAdapter {
    commands: Vec<FrameCommand>,
    timeout: Duration,
    opener: StreamOpener,
    stream: Option<Box<dyn ByteStream>>,
    address: Option<String>,
}

impl FrameAdapter {
    /// Create an adapter for `commands`, reaching the controller over TCP.
    pub fn new(commands: &[FrameCommand]) -> Self {
        Self::with_opener(commands, Box::new(open_tcp))
    }

    /// Create an adapter with a custom stream opener (serial bridge, test double).
    pub fn with_opener(commands: &[FrameCommand], opener: StreamOpener) -> Self {
        Self {
            commands: commands.to_vec(),
            timeout: DEFAULT_TIMEOUT,
            opener,
            stream: None,
            address: None,
        }
    }

    /// Set read/connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn lookup(&self, code: &str) -> Result<FrameCommand, TransportError> {
        self.commands
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .copied()
            .ok_or_else(|| TransportError::InvalidCommand(format!("unknown frame command '{code}'")))
    }

    /// Packs a textual command (`"move 1000"`) into a frame.
    pub fn encode(&self, command: &str) -> Result<(FrameCommand, Vec<u8>), TransportError> {
        let mut tokens = command.split_whitespace();
        let code = tokens
            .next()
            .ok_or_else(|| TransportError::InvalidCommand("empty frame command".to_string()))?;
        let spec = self.lookup(code)?;

        let args: Vec<&str> = tokens.flat_map(|t| t.split(',')).filter(|t| !t.is_empty()).collect();
        if args.len() != spec.request.len() {
            return Err(TransportError::InvalidCommand(format!(
                "'{}' takes {} argument(s), got {}",
                spec.code,
                spec.request.len(),
                args.len()
            )));
        }

        let mut frame = spec.code.as_bytes().to_vec();
        for (field, raw) in spec.request.iter().zip(args) {
            let value = raw.parse::<i64>().map_err(|_| {
                TransportError::InvalidCommand(format!("argument '{raw}' is not an integer"))
            })?;
            field.pack(value, &mut frame)?;
        }
        Ok((spec, frame))
    }

    /// Renders a fixed-length payload as comma-separated decimal fields.
    pub fn decode(spec: &FrameCommand, payload: &[u8]) -> Result<String, TransportError> {
        let expected = spec.response_len();
        if payload.len() != expected {
            return Err(TransportError::Protocol(format!(
                "'{}' response is {} byte(s), expected {}",
                spec.code,
                payload.len(),
                expected
            )));
        }
        let mut rest = payload;
        let mut fields = Vec::with_capacity(spec.response.len());
        for field in spec.response {
            let value = field.unpack(rest).ok_or_else(|| {
                TransportError::Protocol(format!("'{}' response truncated", spec.code))
            })?;
            fields.push(value.to_string());
            rest = &rest[field.size()..];
        }
        Ok(fields.join(","))
    }

    fn exchange(&mut self, command: &str) -> Result<String, TransportError> {
        let (spec, frame) = self.encode(command)?;
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        stream.write_all(&frame)?;
        stream.flush()?;

        let mut payload = vec![0u8; spec.response_len()];
        if !payload.is_empty() {
            stream.read_exact(&mut payload).map_err(|e| match e.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout(timeout),
                _ => TransportError::Io(e),
            })?;
        }
        Self::decode(&spec, &payload)
    }
}

fn open_tcp(address: &str, timeout: Duration) -> std::io::Result<Box<dyn ByteStream>> {
    let addr = address.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(ErrorKind::NotFound, "address did not resolve")
    })?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(Box::new(stream))
}

impl Transport for FrameAdapter {
    fn connect(&mut self, address: &str) -> Result<bool, TransportError> {
        self.disconnect();
        let stream = (self.opener)(address, self.timeout)
            .map_err(|e| TransportError::connect_failed(address, e))?;
        debug!("Frame session opened to {}", address);
        self.stream = Some(stream);
        self.address = Some(address.to_string());
        Ok(true)
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("Frame session to {:?} closed", self.address);
        }
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.exchange(command).map(|_| ())
    }

    fn read(&mut self) -> Result<String, TransportError> {
        Ok(String::new())
    }

    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.exchange(command)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn adapter_type(&self) -> &str {
        "frame"
    }

    fn info(&self) -> String {
        format!(
            "FrameAdapter({}, {} commands)",
            self.address.as_deref().unwrap_or("unconnected"),
            self.commands.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    const TABLE: &[FrameCommand] = &[
        FrameCommand {
            code: "gpos",
            request: &[],
            response: &[FrameField::I32],
        },
        FrameCommand {
            code: "move",
            request: &[FrameField::I32],
            response: &[],
        },
        FrameCommand {
            code: "geng",
            request: &[],
            response: &[FrameField::U32, FrameField::U32],
        },
    ];

    /// In-memory controller: canned reply bytes in, captured request bytes out.
    struct Loopback {
        reply: Cursor<Vec<u8>>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn adapter_with_reply(reply: Vec<u8>) -> (FrameAdapter, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&sent);
        let mut reply = Some(reply);
        let opener: StreamOpener = Box::new(move |_, _| {
            Ok(Box::new(Loopback {
                reply: Cursor::new(reply.take().unwrap_or_default()),
                sent: Arc::clone(&captured),
            }) as Box<dyn ByteStream>)
        });
        (FrameAdapter::with_opener(TABLE, opener), sent)
    }

    #[test]
    fn test_encodes_arguments_little_endian() {
        let (adapter, _) = adapter_with_reply(vec![]);
        let (_, frame) = adapter.encode("move -2").unwrap();
        assert_eq!(&frame[..4], b"move");
        assert_eq!(&frame[4..], &(-2i32).to_le_bytes());
    }

    #[test]
    fn test_rejects_wrong_arity_and_unknown_codes() {
        let (adapter, _) = adapter_with_reply(vec![]);
        assert!(matches!(adapter.encode("move"), Err(TransportError::InvalidCommand(_))));
        assert!(matches!(adapter.encode("zzzz 1"), Err(TransportError::InvalidCommand(_))));
        assert!(matches!(adapter.encode("move abc"), Err(TransportError::InvalidCommand(_))));
        assert!(matches!(
            adapter.encode("move 9999999999"),
            Err(TransportError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_query_decodes_fixed_length_response() {
        let mut reply = 200u32.to_le_bytes().to_vec();
        reply.extend_from_slice(&256u32.to_le_bytes());
        let (mut adapter, sent) = adapter_with_reply(reply);

        adapter.connect("controller:1820").unwrap();
        assert_eq!(adapter.query("geng").unwrap(), "200,256");
        assert_eq!(sent.lock().unwrap().as_slice(), b"geng");
    }

    #[test]
    fn test_write_sends_frame_and_read_is_empty() {
        let (mut adapter, sent) = adapter_with_reply(vec![]);
        adapter.connect("controller:1820").unwrap();
        adapter.write("move 1000").unwrap();
        assert_eq!(adapter.read().unwrap(), "");

        let mut expected = b"move".to_vec();
        expected.extend_from_slice(&1000i32.to_le_bytes());
        assert_eq!(*sent.lock().unwrap(), expected);
    }

    #[test]
    fn test_decode_checks_payload_length() {
        let geng = TABLE[2];
        let mut payload = 200u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&256u32.to_le_bytes());
        assert_eq!(FrameAdapter::decode(&geng, &payload).unwrap(), "200,256");

        assert!(matches!(
            FrameAdapter::decode(&geng, &payload[..5]),
            Err(TransportError::Protocol(_))
        ));
        assert!(FrameAdapter::decode(&geng, &[]).is_err());
        assert_eq!(FrameAdapter::decode(&TABLE[1], &[]).unwrap(), "");
    }

    #[test]
    fn test_query_before_connect_fails() {
        let (mut adapter, _) = adapter_with_reply(vec![]);
        assert!(matches!(adapter.query("gpos"), Err(TransportError::NotConnected)));
    }

    #[test]
    fn test_short_response_is_an_error() {
        let (mut adapter, _) = adapter_with_reply(vec![0x01, 0x02]);
        adapter.connect("controller:1820").unwrap();
        assert!(adapter.query("gpos").is_err());
    }
}
