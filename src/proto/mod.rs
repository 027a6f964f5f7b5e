//! Link protocol definitions and parsing.
//!
//! This module contains type-safe representations of every frame exchanged
//! over the host/controller link: requests sent by the host, responses sent
//! by the controller, and unsolicited events. Parsing and serialization are
//! implemented here and in the per-role submodules, independent of the
//! dispatch machinery in [`link`](crate::link).
//!
//! A frame is a 5-byte header followed by a little-endian payload. Requests
//! carry a nonzero request id which the controller echoes in the matching
//! response frame; event frames carry request id 0.

pub mod client;
pub mod server;

use embedded_io_async::{Read, Write};

use crate::codec::{self, Decode, Encode, FixedSize};
use crate::cursor::{ReadCursor, WriteCursor};
use crate::types::uuid::Uuid;
use crate::Error;

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 5;

/// Link MTU (maximum frame size including header).
pub const MTU: usize = 1024;

/// Maximum payload size for a frame (MTU minus header).
pub const MAX_DATA_SIZE: usize = MTU - HEADER_SIZE;

/// Maximum length of an attribute value carried in an owned event.
pub const MAX_VALUE_LEN: usize = 512;

/// Frame opcode.
///
/// Requests use opcodes 0x01-0x7F; a response frame reuses the opcode of the
/// request it answers. Events use 0x80-0xFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct Opcode(pub u8);

impl Opcode {
    /// Check if this is an event opcode (0x80-0xFF).
    pub const fn is_event(&self) -> bool {
        self.0 >= 0x80
    }
}

/// Link opcodes.
pub mod opcodes {
    use super::Opcode;

    // Requests (0x01-0x7F)
    pub const REGISTER_SERVICE: Opcode = Opcode(0x01);
    pub const SET_VALUE: Opcode = Opcode(0x02);
    pub const GET_VALUE: Opcode = Opcode(0x03);
    pub const SERVICE_CHANGED: Opcode = Opcode(0x04);
    pub const SEND_NOTIFICATION: Opcode = Opcode(0x05);
    pub const SEND_INDICATION: Opcode = Opcode(0x06);
    pub const DISCOVER: Opcode = Opcode(0x07);
    pub const READ: Opcode = Opcode(0x08);
    pub const WRITE: Opcode = Opcode(0x09);

    // Events (0x80-0xFF)
    pub const EVENT_WRITE: Opcode = Opcode(0x80);
    pub const EVENT_VALUE: Opcode = Opcode(0x81);
    pub const EVENT_TIMEOUT: Opcode = Opcode(0x82);
}

/// Correlation id carried by request and response frames.
///
/// Event frames carry [`RequestId::NONE`]; requests never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct RequestId(pub u16);

impl RequestId {
    /// The absent id, used on event frames.
    pub const NONE: RequestId = RequestId(0);
}

/// Generic operation status carried by every response.
///
/// Zero is success; any other value is a controller-defined failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);

    pub const fn is_success(&self) -> bool {
        self.0 == 0
    }

    pub fn to_result(self) -> Result<(), Error> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::Status(self))
        }
    }
}

impl FixedSize for Status {
    const SIZE: usize = 4;
}

impl Encode for Status {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        dest.copy_from_slice(&self.0.to_le_bytes()[..]);
        Ok(())
    }
}

impl Decode<'_> for Status {
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        if src.len() < 4 {
            return Err(codec::Error::InsufficientSpace);
        }
        Ok(Status(i32::from_le_bytes([src[0], src[1], src[2], src[3]])))
    }
}

/// Notification versus indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ValueKind {
    /// Unacknowledged value push.
    Notification = 0x01,
    /// Acknowledged value push.
    Indication = 0x02,
}

impl TryFrom<u8> for ValueKind {
    type Error = codec::Error;
    fn try_from(val: u8) -> Result<Self, codec::Error> {
        match val {
            0x01 => Ok(Self::Notification),
            0x02 => Ok(Self::Indication),
            _ => Err(codec::Error::InvalidValue),
        }
    }
}

impl FixedSize for ValueKind {
    const SIZE: usize = 1;
}

impl Encode for ValueKind {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        dest[0] = *self as u8;
        Ok(())
    }
}

impl Decode<'_> for ValueKind {
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        u8::decode(src)?.try_into()
    }
}

/// Frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHeader {
    /// Frame opcode.
    pub opcode: Opcode,
    /// Correlation id ([`RequestId::NONE`] on events).
    pub request_id: RequestId,
    /// Payload length (little-endian).
    pub data_len: u16,
}

impl FrameHeader {
    pub const fn new(opcode: Opcode, request_id: RequestId, data_len: u16) -> Self {
        Self {
            opcode,
            request_id,
            data_len,
        }
    }

    /// Read a 5-byte frame header from the reader.
    pub async fn read<R: Read>(mut reader: R) -> Result<Self, Error> {
        let mut buf = [0; HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(crate::from_read_exact_error)?;

        Ok(Self {
            opcode: Opcode(buf[0]),
            request_id: RequestId(u16::from_le_bytes([buf[1], buf[2]])),
            data_len: u16::from_le_bytes([buf[3], buf[4]]),
        })
    }

    /// Serialize this header as 5 bytes and write to the writer.
    pub async fn write<W: Write>(&self, mut writer: W) -> Result<(), W::Error> {
        let mut buf = [0; HEADER_SIZE];
        self.encode(&mut buf).ok();
        writer.write_all(&buf).await
    }
}

impl FixedSize for FrameHeader {
    const SIZE: usize = HEADER_SIZE;
}

impl Encode for FrameHeader {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        dest[0] = self.opcode.0;
        dest[1..3].copy_from_slice(&self.request_id.0.to_le_bytes());
        dest[3..5].copy_from_slice(&self.data_len.to_le_bytes());
        Ok(())
    }
}

impl Decode<'_> for FrameHeader {
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        if src.len() < HEADER_SIZE {
            return Err(codec::Error::InsufficientSpace);
        }
        Ok(Self {
            opcode: Opcode(src[0]),
            request_id: RequestId(u16::from_le_bytes([src[1], src[2]])),
            data_len: u16::from_le_bytes([src[3], src[4]]),
        })
    }
}

/// A frame with header and payload buffer.
pub struct Frame {
    /// The frame header.
    pub header: FrameHeader,
    /// Payload buffer (only the first `header.data_len` bytes are valid).
    data: [u8; MAX_DATA_SIZE],
}

impl Frame {
    /// Create a new empty frame.
    pub const fn new() -> Self {
        Self {
            header: FrameHeader::new(Opcode(0), RequestId::NONE, 0),
            data: [0u8; MAX_DATA_SIZE],
        }
    }

    /// Read a frame from the reader.
    pub async fn read<R: Read>(&mut self, mut reader: R) -> Result<(), Error> {
        self.header = FrameHeader::read(&mut reader).await?;
        let len = self.header.data_len as usize;
        if len > MAX_DATA_SIZE {
            return Err(Error::Codec(codec::Error::InsufficientSpace));
        }
        if len > 0 {
            reader
                .read_exact(&mut self.data[..len])
                .await
                .map_err(crate::from_read_exact_error)?;
        }
        Ok(())
    }

    /// Get the frame payload.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.header.data_len as usize]
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a UUID as a 1-byte length prefix followed by the UUID bytes.
pub(crate) fn write_uuid(w: &mut WriteCursor<'_>, uuid: &Uuid) -> Result<(), codec::Error> {
    w.write(uuid.as_raw().len() as u8)?;
    w.append(uuid.as_raw())
}

/// Write an optional UUID; absent is encoded as a zero length prefix.
pub(crate) fn write_opt_uuid(w: &mut WriteCursor<'_>, uuid: Option<&Uuid>) -> Result<(), codec::Error> {
    match uuid {
        Some(uuid) => write_uuid(w, uuid),
        None => w.write(0u8),
    }
}

/// Read a UUID from a 1-byte length prefix followed by that many bytes.
pub(crate) fn read_uuid<'d>(r: &mut ReadCursor<'d>) -> Result<Uuid, codec::Error> {
    read_opt_uuid(r)?.ok_or(codec::Error::InvalidValue)
}

/// Read an optional UUID; a zero length prefix means absent.
pub(crate) fn read_opt_uuid<'d>(r: &mut ReadCursor<'d>) -> Result<Option<Uuid>, codec::Error> {
    let len = r.read::<u8>()? as usize;
    if len == 0 {
        return Ok(None);
    }
    Uuid::try_from(r.slice(len)?).map(Some)
}

pub(crate) fn uuid_size(uuid: &Uuid) -> usize {
    1 + uuid.as_raw().len()
}

/// A parsed request frame payload.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request<'a> {
    /// Register a service's attribute table with the controller.
    RegisterService(server::RegisterServiceReq<'a>),
    /// Set a local attribute value.
    SetValue(server::SetValueReq<'a>),
    /// Get a local attribute value.
    GetValue(server::GetValueReq),
    /// Send a service-changed indication.
    ServiceChanged(server::ServiceChangedReq),
    /// Push a value to a peer as a notification or indication.
    Notify(server::NotifyReq<'a>),
    /// Discover attributes on a remote server.
    Discover(client::DiscoverReq),
    /// Read a remote attribute.
    Read(client::ReadReq),
    /// Write a remote attribute.
    Write(client::WriteReq<'a>),
}

impl<'a> Request<'a> {
    /// The opcode this request is carried under.
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::RegisterService(_) => opcodes::REGISTER_SERVICE,
            Request::SetValue(_) => opcodes::SET_VALUE,
            Request::GetValue(_) => opcodes::GET_VALUE,
            Request::ServiceChanged(_) => opcodes::SERVICE_CHANGED,
            Request::Notify(req) => match req.kind {
                ValueKind::Notification => opcodes::SEND_NOTIFICATION,
                ValueKind::Indication => opcodes::SEND_INDICATION,
            },
            Request::Discover(_) => opcodes::DISCOVER,
            Request::Read(_) => opcodes::READ,
            Request::Write(_) => opcodes::WRITE,
        }
    }

    /// Serialize the request payload.
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        match self {
            Request::RegisterService(req) => req.encode(w),
            Request::SetValue(req) => req.encode(w),
            Request::GetValue(req) => req.encode(w),
            Request::ServiceChanged(req) => req.encode(w),
            Request::Notify(req) => req.encode(w),
            Request::Discover(req) => req.encode(w),
            Request::Read(req) => req.encode(w),
            Request::Write(req) => req.encode(w),
        }
    }

    /// Parse a request payload for the given opcode.
    pub fn parse(opcode: Opcode, payload: &'a [u8]) -> Result<Self, codec::Error> {
        match opcode {
            opcodes::REGISTER_SERVICE => server::RegisterServiceReq::parse(payload).map(Request::RegisterService),
            opcodes::SET_VALUE => server::SetValueReq::parse(payload).map(Request::SetValue),
            opcodes::GET_VALUE => server::GetValueReq::parse(payload).map(Request::GetValue),
            opcodes::SERVICE_CHANGED => server::ServiceChangedReq::parse(payload).map(Request::ServiceChanged),
            opcodes::SEND_NOTIFICATION => {
                server::NotifyReq::parse(ValueKind::Notification, payload).map(Request::Notify)
            }
            opcodes::SEND_INDICATION => server::NotifyReq::parse(ValueKind::Indication, payload).map(Request::Notify),
            opcodes::DISCOVER => client::DiscoverReq::parse(payload).map(Request::Discover),
            opcodes::READ => client::ReadReq::parse(payload).map(Request::Read),
            opcodes::WRITE => client::WriteReq::parse(payload).map(Request::Write),
            _ => Err(codec::Error::InvalidValue),
        }
    }
}

/// A parsed response frame payload.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response<'a> {
    RegisterService(server::RegisterServiceRsp<'a>),
    SetValue(server::SetValueRsp),
    GetValue(server::GetValueRsp<'a>),
    ServiceChanged(server::ServiceChangedRsp),
    Notify(server::NotifyRsp),
    Discover(client::DiscoverRsp<'a>),
    Read(client::ReadRsp<'a>),
    Write(client::WriteRsp),
}

impl<'a> Response<'a> {
    /// The opcode this response is carried under (its request's opcode).
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::RegisterService(_) => opcodes::REGISTER_SERVICE,
            Response::SetValue(_) => opcodes::SET_VALUE,
            Response::GetValue(_) => opcodes::GET_VALUE,
            Response::ServiceChanged(_) => opcodes::SERVICE_CHANGED,
            Response::Notify(rsp) => match rsp.kind {
                ValueKind::Notification => opcodes::SEND_NOTIFICATION,
                ValueKind::Indication => opcodes::SEND_INDICATION,
            },
            Response::Discover(_) => opcodes::DISCOVER,
            Response::Read(_) => opcodes::READ,
            Response::Write(_) => opcodes::WRITE,
        }
    }

    /// Serialize the response payload.
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        match self {
            Response::RegisterService(rsp) => rsp.encode(w),
            Response::SetValue(rsp) => rsp.encode(w),
            Response::GetValue(rsp) => rsp.encode(w),
            Response::ServiceChanged(rsp) => rsp.encode(w),
            Response::Notify(rsp) => rsp.encode(w),
            Response::Discover(rsp) => rsp.encode(w),
            Response::Read(rsp) => rsp.encode(w),
            Response::Write(rsp) => rsp.encode(w),
        }
    }

    /// Parse a response payload for the given opcode.
    pub fn parse(opcode: Opcode, payload: &'a [u8]) -> Result<Self, codec::Error> {
        match opcode {
            opcodes::REGISTER_SERVICE => server::RegisterServiceRsp::parse(payload).map(Response::RegisterService),
            opcodes::SET_VALUE => server::SetValueRsp::parse(payload).map(Response::SetValue),
            opcodes::GET_VALUE => server::GetValueRsp::parse(payload).map(Response::GetValue),
            opcodes::SERVICE_CHANGED => server::ServiceChangedRsp::parse(payload).map(Response::ServiceChanged),
            opcodes::SEND_NOTIFICATION | opcodes::SEND_INDICATION => {
                server::NotifyRsp::parse(payload).map(Response::Notify)
            }
            opcodes::DISCOVER => client::DiscoverRsp::parse(payload).map(Response::Discover),
            opcodes::READ => client::ReadRsp::parse(payload).map(Response::Read),
            opcodes::WRITE => client::WriteRsp::parse(payload).map(Response::Write),
            _ => Err(codec::Error::InvalidValue),
        }
    }
}

/// A parsed event frame payload.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event<'a> {
    /// A peer wrote to an attribute in the host's table.
    Write(server::WriteEvt<'a>),
    /// A notification or indication arrived from a peer.
    Value(client::ValueEvt<'a>),
    /// An ATT protocol timeout occurred on a connection.
    Timeout(client::TimeoutEvt),
}

impl<'a> Event<'a> {
    /// The opcode this event is carried under.
    pub fn opcode(&self) -> Opcode {
        match self {
            Event::Write(_) => opcodes::EVENT_WRITE,
            Event::Value(_) => opcodes::EVENT_VALUE,
            Event::Timeout(_) => opcodes::EVENT_TIMEOUT,
        }
    }

    /// Serialize the event payload.
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        match self {
            Event::Write(evt) => evt.encode(w),
            Event::Value(evt) => evt.encode(w),
            Event::Timeout(evt) => evt.encode(w),
        }
    }

    /// Parse an event payload for the given opcode.
    pub fn parse(opcode: Opcode, payload: &'a [u8]) -> Result<Self, codec::Error> {
        match opcode {
            opcodes::EVENT_WRITE => server::WriteEvt::parse(payload).map(Event::Write),
            opcodes::EVENT_VALUE => client::ValueEvt::parse(payload).map(Event::Value),
            opcodes::EVENT_TIMEOUT => client::TimeoutEvt::parse(payload).map(Event::Timeout),
            _ => Err(codec::Error::InvalidValue),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_executor::block_on;

    use super::*;

    #[test]
    fn header_parse() {
        let mut buf = [0x07, 0x34, 0x12, 0x04, 0x00].as_slice();
        let header = block_on(FrameHeader::read(&mut buf)).unwrap();

        assert_eq!(header.opcode, opcodes::DISCOVER);
        assert_eq!(header.request_id, RequestId(0x1234));
        assert_eq!(header.data_len, 4);
    }

    #[test]
    fn header_serialize() {
        let header = FrameHeader::new(opcodes::READ, RequestId(0x0001), 6);

        let mut buf = [0u8; HEADER_SIZE];
        block_on(header.write(&mut buf.as_mut_slice())).unwrap();

        assert_eq!(buf, [0x08, 0x01, 0x00, 0x06, 0x00]);
    }

    #[test]
    fn header_roundtrip() {
        let original = FrameHeader::new(opcodes::EVENT_VALUE, RequestId::NONE, 256);

        let mut buf = [0u8; HEADER_SIZE];
        block_on(original.write(&mut buf.as_mut_slice())).unwrap();

        let parsed = block_on(FrameHeader::read(&mut buf.as_slice())).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn frame_read() {
        let mut bytes = [0x08, 0x02, 0x00, 0x03, 0x00, 0xAA, 0xBB, 0xCC].as_slice();
        let mut frame = Frame::new();
        block_on(frame.read(&mut bytes)).unwrap();

        assert_eq!(frame.header.opcode, opcodes::READ);
        assert_eq!(frame.header.request_id, RequestId(2));
        assert_eq!(frame.data(), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn frame_read_oversize_rejected() {
        // data_len = 0xFFFF exceeds MAX_DATA_SIZE
        let mut bytes = [0x08, 0x02, 0x00, 0xFF, 0xFF].as_slice();
        let mut frame = Frame::new();
        assert!(block_on(frame.read(&mut bytes)).is_err());
    }

    #[test]
    fn opcode_classification() {
        assert!(!opcodes::REGISTER_SERVICE.is_event());
        assert!(!opcodes::WRITE.is_event());
        assert!(opcodes::EVENT_WRITE.is_event());
        assert!(opcodes::EVENT_TIMEOUT.is_event());
    }

    #[test]
    fn status_values() {
        assert!(Status::SUCCESS.is_success());
        assert!(!Status(-5).is_success());
        assert!(Status::SUCCESS.to_result().is_ok());
        assert!(Status(-5).to_result().is_err());
    }

    #[test]
    fn status_codec() {
        let mut buf = [0u8; 4];
        let mut w = WriteCursor::new(&mut buf);
        w.write(Status(-2)).unwrap();
        assert_eq!(buf, [0xFE, 0xFF, 0xFF, 0xFF]);

        let mut r = ReadCursor::new(&buf);
        let status: Status = r.read().unwrap();
        assert_eq!(status, Status(-2));
    }

    #[test]
    fn value_kind_wire_values() {
        assert_eq!(ValueKind::try_from(0x01), Ok(ValueKind::Notification));
        assert_eq!(ValueKind::try_from(0x02), Ok(ValueKind::Indication));
        // 0 is the absent marker, never a valid kind
        assert_eq!(ValueKind::try_from(0x00), Err(codec::Error::InvalidValue));
    }

    #[test]
    fn opt_uuid_roundtrip() {
        let mut buf = [0u8; 32];
        let mut w = WriteCursor::new(&mut buf);
        write_opt_uuid(&mut w, Some(&Uuid::new_short(0x2803))).unwrap();
        write_opt_uuid(&mut w, None).unwrap();
        let len = w.len();
        assert_eq!(&buf[..len], &[0x02, 0x03, 0x28, 0x00]);

        let mut r = ReadCursor::new(&buf[..len]);
        assert_eq!(read_opt_uuid(&mut r).unwrap(), Some(Uuid::new_short(0x2803)));
        assert_eq!(read_opt_uuid(&mut r).unwrap(), None);
    }

    #[test]
    fn uuid_required_rejects_absent() {
        let mut r = ReadCursor::new(&[0x00]);
        assert_eq!(read_uuid(&mut r), Err(codec::Error::InvalidValue));
    }

    #[test]
    fn request_envelope_roundtrip() {
        let req = Request::Read(client::ReadReq {
            conn: crate::types::ConnHandle(1),
            handle: 0x0042,
            offset: 2,
        });
        assert_eq!(req.opcode(), opcodes::READ);

        let mut buf = [0u8; 16];
        let mut w = WriteCursor::new(&mut buf);
        req.encode(&mut w).unwrap();
        let len = w.len();

        match Request::parse(opcodes::READ, &buf[..len]).unwrap() {
            Request::Read(parsed) => {
                assert_eq!(parsed.handle, 0x0042);
                assert_eq!(parsed.offset, 2);
            }
            other => panic!("wrong request: {:?}", other),
        }
    }

    #[test]
    fn notify_opcode_follows_kind() {
        let mut req = server::NotifyReq {
            kind: ValueKind::Notification,
            conn: crate::types::ConnHandle(1),
            handle: 1,
            offset: 0,
            value: &[],
        };
        assert_eq!(Request::Notify(req.clone()).opcode(), opcodes::SEND_NOTIFICATION);
        req.kind = ValueKind::Indication;
        assert_eq!(Request::Notify(req).opcode(), opcodes::SEND_INDICATION);
    }

    #[test]
    fn unknown_opcodes_rejected() {
        assert!(Request::parse(Opcode(0x7F), &[]).is_err());
        assert!(Response::parse(Opcode(0x7F), &[]).is_err());
        assert!(Event::parse(Opcode(0xFF), &[]).is_err());
    }
}
