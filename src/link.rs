//! Link front end: request submission, response correlation and event
//! delivery.
//!
//! The [`Link`] owns the write half of the transport and the pending
//! request table. [`Link::run`] must be polled with the read half; it
//! routes response frames to their waiting requests and queues event
//! frames for [`Link::next_event`]. Requests resolve out of order with
//! respect to each other, so any number of operations may be in flight
//! concurrently up to the `REQS` capacity.
//!
//! No retry or timeout policy is imposed here; callers that need one wrap
//! the operation futures themselves.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embedded_io::Error as _;
use embedded_io_async::{Read, Write};
use heapless::Vec;

use crate::codec;
use crate::cursor::WriteCursor;
use crate::pending::{PendingRequests, RawResponse};
use crate::proto::client::{DiscoverKind, Discovered, ReadReq, WriteReq};
use crate::proto::server::{AttrDef, GetValueReq, NotifyReq, RegisterServiceReq, ServiceChangedReq, SetValueReq, WriteOp};
use crate::proto::{Event, Frame, FrameHeader, Request, RequestId, Response, ValueKind, HEADER_SIZE, MAX_VALUE_LEN, MTU};
use crate::types::uuid::Uuid;
use crate::types::{ConnHandle, HandleRange};
use crate::Error;

/// An event received from the controller, detached from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A peer wrote to an attribute in the host's table.
    Write {
        conn: ConnHandle,
        handle: u16,
        offset: u16,
        op: WriteOp,
        value: Vec<u8, MAX_VALUE_LEN>,
    },
    /// A notification or indication arrived from a peer.
    Value {
        conn: ConnHandle,
        handle: u16,
        kind: ValueKind,
        value: Vec<u8, MAX_VALUE_LEN>,
    },
    /// An ATT protocol timeout occurred on a connection.
    Timeout { conn: ConnHandle, reason: u16 },
}

#[cfg(feature = "defmt")]
impl defmt::Format for LinkEvent {
    fn format(&self, f: defmt::Formatter) {
        match self {
            LinkEvent::Write {
                conn,
                handle,
                offset,
                op,
                value,
            } => defmt::write!(
                f,
                "Write {{ conn: {}, handle: {=u16:#x}, offset: {=u16}, op: {}, len: {=usize} }}",
                conn,
                handle,
                offset,
                op,
                value.len()
            ),
            LinkEvent::Value {
                conn,
                handle,
                kind,
                value,
            } => defmt::write!(
                f,
                "Value {{ conn: {}, handle: {=u16:#x}, kind: {}, len: {=usize} }}",
                conn,
                handle,
                kind,
                value.len()
            ),
            LinkEvent::Timeout { conn, reason } => {
                defmt::write!(f, "Timeout {{ conn: {}, reason: {=u16:#x} }}", conn, reason)
            }
        }
    }
}

impl LinkEvent {
    fn from_wire(event: &Event<'_>) -> Result<Self, Error> {
        Ok(match event {
            Event::Write(evt) => LinkEvent::Write {
                conn: evt.conn,
                handle: evt.handle,
                offset: evt.offset,
                op: evt.op,
                value: Vec::from_slice(evt.value).map_err(|_| Error::InsufficientSpace)?,
            },
            Event::Value(evt) => LinkEvent::Value {
                conn: evt.conn,
                handle: evt.handle,
                kind: evt.kind,
                value: Vec::from_slice(evt.value).map_err(|_| Error::InsufficientSpace)?,
            },
            Event::Timeout(evt) => LinkEvent::Timeout {
                conn: evt.conn,
                reason: evt.reason,
            },
        })
    }
}

/// Host side of the GATT link.
///
/// `REQS` bounds the number of requests in flight, `EVENTS` the number of
/// queued controller events. When the event queue is full the dispatch loop
/// back-pressures the transport.
pub struct Link<M, W, const REQS: usize, const EVENTS: usize>
where
    M: RawMutex,
    W: Write,
{
    writer: Mutex<M, W>,
    pending: PendingRequests<M, REQS>,
    events: Channel<M, LinkEvent, EVENTS>,
}

impl<M, W, const REQS: usize, const EVENTS: usize> Link<M, W, REQS, EVENTS>
where
    M: RawMutex,
    W: Write,
{
    /// Create a link writing requests to the given transport half.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            pending: PendingRequests::new(),
            events: Channel::new(),
        }
    }

    /// Dispatch loop. Reads frames from the controller and routes them.
    ///
    /// Malformed or unmatched frames are logged and dropped; transport
    /// errors terminate the loop.
    pub async fn run<R: Read>(&self, mut reader: R) -> Result<(), Error> {
        let mut frame = Frame::new();
        loop {
            frame.read(&mut reader).await?;
            if let Err(e) = self.process(&frame).await {
                warn!("[link] dropping frame {}: {:?}", frame.header.opcode.0, e);
            }
        }
    }

    async fn process(&self, frame: &Frame) -> Result<(), Error> {
        let header = frame.header;
        if header.opcode.is_event() {
            if header.request_id != RequestId::NONE {
                return Err(Error::Codec(codec::Error::InvalidValue));
            }
            let event = Event::parse(header.opcode, frame.data())?;
            self.events.send(LinkEvent::from_wire(&event)?).await;
            Ok(())
        } else {
            if header.request_id == RequestId::NONE {
                return Err(Error::Codec(codec::Error::InvalidValue));
            }
            self.pending.complete(header.request_id, header.opcode, frame.data())
        }
    }

    /// Wait for the next controller event.
    pub async fn next_event(&self) -> LinkEvent {
        self.events.receive().await
    }

    async fn send_frame(&self, id: RequestId, req: &Request<'_>) -> Result<(), Error> {
        let mut buf = [0u8; MTU];
        let mut w = WriteCursor::new(&mut buf);
        let (mut header, mut body) = w.split(HEADER_SIZE)?;
        req.encode(&mut body)?;
        header.write(FrameHeader::new(req.opcode(), id, body.len() as u16))?;
        let len = HEADER_SIZE + body.len();

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&buf[..len])
            .await
            .map_err(|e| Error::Transport(e.kind()))?;
        writer.flush().await.map_err(|e| Error::Transport(e.kind()))
    }

    /// Submit a request and wait for the response frame echoing its id.
    async fn request(&self, req: Request<'_>) -> Result<RawResponse, Error> {
        let id = self.pending.allocate()?;
        if let Err(e) = self.send_frame(id, &req).await {
            self.pending.cancel(id);
            return Err(e);
        }
        let rsp = self.pending.wait(id).await;
        if rsp.opcode != req.opcode() {
            return Err(Error::UnexpectedResponse);
        }
        Ok(rsp)
    }

    /// Register a service's attribute table with the controller, returning
    /// the assigned handle per attribute in table order.
    pub async fn register_service<const ATTRS: usize>(
        &self,
        service_idx: u8,
        attrs: &[AttrDef<'_>],
    ) -> Result<Vec<u16, ATTRS>, Error> {
        let count = attrs.len() as u8;
        let raw = self
            .request(Request::RegisterService(RegisterServiceReq::new(service_idx, attrs)))
            .await?;
        let rsp = match Response::parse(raw.opcode, &raw.data)? {
            Response::RegisterService(rsp) => rsp,
            _ => return Err(Error::UnexpectedResponse),
        };
        rsp.status.to_result()?;
        if rsp.service_idx != service_idx || rsp.attr_count != count {
            return Err(Error::UnexpectedResponse);
        }
        let mut handles = Vec::new();
        for handle in rsp.handles.iter() {
            handles.push(handle).map_err(|_| Error::InsufficientSpace)?;
        }
        Ok(handles)
    }

    /// Set a local attribute value.
    pub async fn set_attribute_value(&self, handle: u16, offset: u16, value: &[u8]) -> Result<(), Error> {
        let raw = self
            .request(Request::SetValue(SetValueReq { handle, offset, value }))
            .await?;
        let rsp = match Response::parse(raw.opcode, &raw.data)? {
            Response::SetValue(rsp) => rsp,
            _ => return Err(Error::UnexpectedResponse),
        };
        rsp.status.to_result()?;
        if rsp.handle != handle {
            return Err(Error::UnexpectedResponse);
        }
        Ok(())
    }

    /// Get a local attribute value.
    ///
    /// The number of bytes copied into the provided buffer is returned.
    pub async fn get_attribute_value(&self, handle: u16, dest: &mut [u8]) -> Result<usize, Error> {
        let raw = self.request(Request::GetValue(GetValueReq { handle })).await?;
        let rsp = match Response::parse(raw.opcode, &raw.data)? {
            Response::GetValue(rsp) => rsp,
            _ => return Err(Error::UnexpectedResponse),
        };
        rsp.status.to_result()?;
        if rsp.handle != handle {
            return Err(Error::UnexpectedResponse);
        }
        let to_copy = rsp.value.len().min(dest.len());
        dest[..to_copy].copy_from_slice(&rsp.value[..to_copy]);
        Ok(to_copy)
    }

    /// Send a service-changed indication for a handle range.
    pub async fn send_service_changed(&self, conn: ConnHandle, range: HandleRange) -> Result<(), Error> {
        let raw = self
            .request(Request::ServiceChanged(ServiceChangedReq { conn, range }))
            .await?;
        let rsp = match Response::parse(raw.opcode, &raw.data)? {
            Response::ServiceChanged(rsp) => rsp,
            _ => return Err(Error::UnexpectedResponse),
        };
        rsp.status.to_result()?;
        if rsp.conn != conn {
            return Err(Error::UnexpectedResponse);
        }
        Ok(())
    }

    /// Push a value to a peer as an unacknowledged notification.
    ///
    /// An empty value sends the currently stored attribute value.
    pub async fn notify(&self, conn: ConnHandle, handle: u16, offset: u16, value: &[u8]) -> Result<(), Error> {
        self.send_value_push(ValueKind::Notification, conn, handle, offset, value)
            .await
    }

    /// Push a value to a peer as an acknowledged indication.
    ///
    /// An empty value sends the currently stored attribute value.
    pub async fn indicate(&self, conn: ConnHandle, handle: u16, offset: u16, value: &[u8]) -> Result<(), Error> {
        self.send_value_push(ValueKind::Indication, conn, handle, offset, value)
            .await
    }

    async fn send_value_push(
        &self,
        kind: ValueKind,
        conn: ConnHandle,
        handle: u16,
        offset: u16,
        value: &[u8],
    ) -> Result<(), Error> {
        let raw = self
            .request(Request::Notify(NotifyReq {
                kind,
                conn,
                handle,
                offset,
                value,
            }))
            .await?;
        let rsp = match Response::parse(raw.opcode, &raw.data)? {
            Response::Notify(rsp) => rsp,
            _ => return Err(Error::UnexpectedResponse),
        };
        rsp.status.to_result()?;
        let conn_matches = rsp.conn == conn || rsp.conn == ConnHandle::BROADCAST;
        if !conn_matches || rsp.handle != handle || rsp.kind != kind {
            return Err(Error::UnexpectedResponse);
        }
        Ok(())
    }

    /// Run one discovery round over the given range.
    ///
    /// An empty result means the range held no more matches.
    pub async fn discover<const N: usize>(
        &self,
        conn: ConnHandle,
        kind: DiscoverKind,
        uuid: Option<&Uuid>,
        range: HandleRange,
    ) -> Result<Vec<Discovered, N>, Error> {
        let raw = self
            .request(Request::Discover(crate::proto::client::DiscoverReq {
                conn,
                kind,
                uuid: uuid.cloned(),
                range,
            }))
            .await?;
        let rsp = match Response::parse(raw.opcode, &raw.data)? {
            Response::Discover(rsp) => rsp,
            _ => return Err(Error::UnexpectedResponse),
        };
        rsp.status.to_result()?;
        if rsp.conn != conn {
            return Err(Error::UnexpectedResponse);
        }
        let mut results = Vec::new();
        for entry in rsp.entries.iter() {
            results.push(entry?).map_err(|_| Error::InsufficientSpace)?;
        }
        Ok(results)
    }

    /// Discover everything matching in the given range, advancing past the
    /// last returned handle until the controller reports an empty round.
    pub async fn discover_all<const N: usize>(
        &self,
        conn: ConnHandle,
        kind: DiscoverKind,
        uuid: Option<&Uuid>,
        range: HandleRange,
    ) -> Result<Vec<Discovered, N>, Error> {
        let mut results = Vec::new();
        let mut start = range.start;
        loop {
            let round: Vec<Discovered, N> = self
                .discover(conn, kind, uuid, HandleRange::new(start, range.end))
                .await?;
            if round.is_empty() {
                break;
            }
            let mut last = start;
            for entry in round {
                last = last.max(entry.last_handle());
                results.push(entry).map_err(|_| Error::InsufficientSpace)?;
            }
            if last >= range.end {
                break;
            }
            start = last + 1;
        }
        Ok(results)
    }

    /// Read a remote attribute value.
    ///
    /// The number of bytes copied into the provided buffer is returned.
    pub async fn read(&self, conn: ConnHandle, handle: u16, offset: u16, dest: &mut [u8]) -> Result<usize, Error> {
        let raw = self.request(Request::Read(ReadReq { conn, handle, offset })).await?;
        let rsp = match Response::parse(raw.opcode, &raw.data)? {
            Response::Read(rsp) => rsp,
            _ => return Err(Error::UnexpectedResponse),
        };
        rsp.status.to_result()?;
        if rsp.conn != conn || rsp.handle != handle {
            return Err(Error::UnexpectedResponse);
        }
        let to_copy = rsp.value.len().min(dest.len());
        dest[..to_copy].copy_from_slice(&rsp.value[..to_copy]);
        Ok(to_copy)
    }

    /// Write a remote attribute value, acknowledged at the ATT level.
    pub async fn write(&self, conn: ConnHandle, handle: u16, offset: u16, value: &[u8]) -> Result<(), Error> {
        self.write_with(conn, handle, offset, true, value).await
    }

    /// Write a remote attribute value as an unacknowledged command.
    ///
    /// The link-level submission acknowledgment is still awaited.
    pub async fn write_without_response(
        &self,
        conn: ConnHandle,
        handle: u16,
        offset: u16,
        value: &[u8],
    ) -> Result<(), Error> {
        self.write_with(conn, handle, offset, false, value).await
    }

    async fn write_with(
        &self,
        conn: ConnHandle,
        handle: u16,
        offset: u16,
        with_response: bool,
        value: &[u8],
    ) -> Result<(), Error> {
        let raw = self
            .request(Request::Write(WriteReq {
                conn,
                handle,
                offset,
                with_response,
                value,
            }))
            .await?;
        let rsp = match Response::parse(raw.opcode, &raw.data)? {
            Response::Write(rsp) => rsp,
            _ => return Err(Error::UnexpectedResponse),
        };
        rsp.status.to_result()?;
        if rsp.conn != conn || rsp.handle != handle {
            return Err(Error::UnexpectedResponse);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use embassy_futures::join::{join, join3};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use futures_executor::block_on;

    use super::*;
    use crate::proto::client::{DiscoverRsp, DiscoveredEntries, ReadRsp, TimeoutEvt, WriteRsp};
    use crate::proto::server::{GetValueRsp, Handles, NotifyRsp, Permissions, RegisterServiceRsp, SetValueRsp, WriteEvt};
    use crate::proto::{Opcode, Status};

    type TestLink<'w> = Link<NoopRawMutex, &'w mut [u8], 4, 4>;

    // futures_executor's block_on must not nest, so every frame is built
    // before the executor is entered.
    fn frame(opcode: Opcode, id: RequestId, encode: impl FnOnce(&mut WriteCursor<'_>)) -> Frame {
        let mut buf = [0u8; MTU];
        let mut w = WriteCursor::new(&mut buf);
        let (mut header, mut body) = w.split(HEADER_SIZE).unwrap();
        encode(&mut body);
        header.write(FrameHeader::new(opcode, id, body.len() as u16)).unwrap();
        let len = HEADER_SIZE + body.len();

        let mut frame = Frame::new();
        block_on(frame.read(&mut &buf[..len])).unwrap();
        frame
    }

    fn response_frame(rsp: &Response<'_>, id: RequestId) -> Frame {
        frame(rsp.opcode(), id, |w| rsp.encode(w).unwrap())
    }

    #[test]
    fn read_correlates_response() {
        let mut out = [0u8; 256];
        let link: TestLink = Link::new(&mut out[..]);

        let rsp = response_frame(
            &Response::Read(ReadRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                handle: 0x0010,
                offset: 0,
                value: &[5, 6],
            }),
            RequestId(1),
        );

        let mut dest = [0u8; 8];
        let (read, _) = block_on(join(link.read(ConnHandle(1), 0x0010, 0, &mut dest), async {
            link.process(&rsp).await.unwrap();
        }));
        assert_eq!(read.unwrap(), 2);
        assert_eq!(&dest[..2], &[5, 6]);
    }

    #[test]
    fn nonzero_status_surfaced() {
        let mut out = [0u8; 256];
        let link: TestLink = Link::new(&mut out[..]);

        let rsp = response_frame(
            &Response::Write(WriteRsp {
                status: Status(-5),
                conn: ConnHandle(1),
                handle: 0x0010,
                len: 0,
            }),
            RequestId(1),
        );

        let (res, _) = block_on(join(link.write(ConnHandle(1), 0x0010, 0, &[1]), async {
            link.process(&rsp).await.unwrap();
        }));
        assert!(matches!(res, Err(Error::Status(Status(-5)))));
    }

    #[test]
    fn echo_mismatch_rejected() {
        let mut out = [0u8; 256];
        let link: TestLink = Link::new(&mut out[..]);

        // Response echoes the wrong attribute handle.
        let rsp = response_frame(
            &Response::Read(ReadRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                handle: 0x0099,
                offset: 0,
                value: &[],
            }),
            RequestId(1),
        );

        let mut dest = [0u8; 4];
        let (res, _) = block_on(join(link.read(ConnHandle(1), 0x0010, 0, &mut dest), async {
            link.process(&rsp).await.unwrap();
        }));
        assert!(matches!(res, Err(Error::UnexpectedResponse)));
    }

    #[test]
    fn mismatched_opcode_rejected() {
        let mut out = [0u8; 256];
        let link: TestLink = Link::new(&mut out[..]);

        // A write response arrives for a read request's id.
        let rsp = response_frame(
            &Response::Write(WriteRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                handle: 0x0010,
                len: 1,
            }),
            RequestId(1),
        );

        let mut dest = [0u8; 4];
        let (res, _) = block_on(join(link.read(ConnHandle(1), 0x0010, 0, &mut dest), async {
            link.process(&rsp).await.unwrap();
        }));
        assert!(matches!(res, Err(Error::UnexpectedResponse)));
    }

    #[test]
    fn out_of_order_responses_route_correctly() {
        let mut out = [0u8; 512];
        let link: TestLink = Link::new(&mut out[..]);

        let rsp_second = response_frame(
            &Response::Read(ReadRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                handle: 0x0021,
                offset: 0,
                value: &[0x22],
            }),
            RequestId(2),
        );
        let rsp_first = response_frame(
            &Response::Read(ReadRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                handle: 0x0020,
                offset: 0,
                value: &[0x11],
            }),
            RequestId(1),
        );

        let mut dest_a = [0u8; 4];
        let mut dest_b = [0u8; 4];
        let (a, b, _) = block_on(join3(
            link.read(ConnHandle(1), 0x0020, 0, &mut dest_a),
            link.read(ConnHandle(1), 0x0021, 0, &mut dest_b),
            async {
                // Respond to the second request before the first.
                link.process(&rsp_second).await.unwrap();
                link.process(&rsp_first).await.unwrap();
            },
        ));
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert_eq!(dest_a[0], 0x11);
        assert_eq!(dest_b[0], 0x22);
    }

    #[test]
    fn get_attribute_value_copies_out() {
        let mut out = [0u8; 256];
        let link: TestLink = Link::new(&mut out[..]);

        let rsp = response_frame(
            &Response::GetValue(GetValueRsp {
                status: Status::SUCCESS,
                handle: 0x0031,
                value: &[1, 2, 3, 4],
            }),
            RequestId(1),
        );

        // Destination smaller than the value; the copy is truncated.
        let mut dest = [0u8; 3];
        let (res, _) = block_on(join(link.get_attribute_value(0x0031, &mut dest), async {
            link.process(&rsp).await.unwrap();
        }));
        assert_eq!(res.unwrap(), 3);
        assert_eq!(dest, [1, 2, 3]);
    }

    #[test]
    fn set_attribute_value_checks_echo() {
        let mut out = [0u8; 256];
        let link: TestLink = Link::new(&mut out[..]);

        let rsp = response_frame(
            &Response::SetValue(SetValueRsp {
                status: Status::SUCCESS,
                handle: 0x0031,
            }),
            RequestId(1),
        );

        let (res, _) = block_on(join(link.set_attribute_value(0x0031, 0, &[7]), async {
            link.process(&rsp).await.unwrap();
        }));
        assert!(res.is_ok());
    }

    #[test]
    fn register_service_returns_handles() {
        let mut out = [0u8; 512];
        let link: TestLink = Link::new(&mut out[..]);

        let attrs = [
            AttrDef {
                uuid: Some(Uuid::new_short(0x2800)),
                data: None,
                max_len: 0,
                perm: Permissions::READ,
            },
            AttrDef {
                uuid: Some(Uuid::new_short(0x2A00)),
                data: None,
                max_len: 16,
                perm: Permissions::READ | Permissions::WRITE,
            },
        ];
        let handle_bytes = [0x10, 0x00, 0x11, 0x00];
        let rsp = response_frame(
            &Response::RegisterService(RegisterServiceRsp {
                status: Status::SUCCESS,
                service_idx: 1,
                attr_count: 2,
                handles: Handles::new(&handle_bytes),
            }),
            RequestId(1),
        );

        let (res, _) = block_on(join(link.register_service::<4>(1, &attrs), async {
            link.process(&rsp).await.unwrap();
        }));
        let handles = res.unwrap();
        assert_eq!(&handles[..], &[0x0010, 0x0011]);
    }

    #[test]
    fn notify_accepts_broadcast_echo() {
        let mut out = [0u8; 256];
        let link: TestLink = Link::new(&mut out[..]);

        let rsp = response_frame(
            &Response::Notify(NotifyRsp {
                status: Status::SUCCESS,
                conn: ConnHandle::BROADCAST,
                handle: 0x0021,
                kind: ValueKind::Notification,
            }),
            RequestId(1),
        );

        let (res, _) = block_on(join(link.notify(ConnHandle(1), 0x0021, 0, &[1, 2]), async {
            link.process(&rsp).await.unwrap();
        }));
        assert!(res.is_ok());
    }

    #[test]
    fn indication_kind_echo_checked() {
        let mut out = [0u8; 256];
        let link: TestLink = Link::new(&mut out[..]);

        // Controller echoes the wrong push kind.
        let rsp = response_frame(
            &Response::Notify(NotifyRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                handle: 0x0021,
                kind: ValueKind::Notification,
            }),
            RequestId(1),
        );

        let (res, _) = block_on(join(link.indicate(ConnHandle(1), 0x0021, 0, &[]), async {
            link.process(&rsp).await.unwrap();
        }));
        assert!(matches!(res, Err(Error::UnexpectedResponse)));
    }

    #[test]
    fn discover_all_paginates() {
        let mut out = [0u8; 1024];
        let link: TestLink = Link::new(&mut out[..]);

        let mut entries = [0u8; 64];
        let entry_len = {
            let mut w = WriteCursor::new(&mut entries);
            Discovered::PrimaryService {
                handle: 0x0001,
                range: HandleRange::new(0x0001, 0x000A),
                uuid: Uuid::new_short(0x180F),
            }
            .encode_entry(&mut w)
            .unwrap();
            w.len()
        };

        let round_one = response_frame(
            &Response::Discover(DiscoverRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                entries: DiscoveredEntries::new(&entries[..entry_len]),
            }),
            RequestId(1),
        );
        let round_two = response_frame(
            &Response::Discover(DiscoverRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                entries: DiscoveredEntries::new(&[]),
            }),
            RequestId(2),
        );

        let (res, _) = block_on(join(
            link.discover_all::<4>(ConnHandle(1), DiscoverKind::PrimaryService, None, HandleRange::FULL),
            async {
                link.process(&round_one).await.unwrap();
                // Wait for the second round's request before answering it.
                embassy_futures::yield_now().await;
                link.process(&round_two).await.unwrap();
            },
        ));
        let found = res.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].last_handle(), 0x000A);
    }

    #[test]
    fn events_are_queued() {
        let mut out = [0u8; 64];
        let link: TestLink = Link::new(&mut out[..]);

        let evt = Event::Write(WriteEvt {
            conn: ConnHandle(1),
            handle: 0x0010,
            offset: 0,
            op: WriteOp::Request,
            value: &[0xAA],
        });
        let evt_frame = frame(evt.opcode(), RequestId::NONE, |w| evt.encode(w).unwrap());

        block_on(async {
            link.process(&evt_frame).await.unwrap();
            let received = link.next_event().await;
            assert_eq!(
                received,
                LinkEvent::Write {
                    conn: ConnHandle(1),
                    handle: 0x0010,
                    offset: 0,
                    op: WriteOp::Request,
                    value: Vec::from_slice(&[0xAA]).unwrap(),
                }
            );
        });
    }

    #[test]
    fn event_with_request_id_rejected() {
        let mut out = [0u8; 64];
        let link: TestLink = Link::new(&mut out[..]);

        let evt = Event::Timeout(TimeoutEvt {
            conn: ConnHandle(1),
            reason: 1,
        });
        let evt_frame = frame(evt.opcode(), RequestId(7), |w| evt.encode(w).unwrap());
        assert!(block_on(link.process(&evt_frame)).is_err());
    }

    #[test]
    fn unmatched_response_dropped_with_error() {
        let mut out = [0u8; 64];
        let link: TestLink = Link::new(&mut out[..]);

        let rsp = response_frame(
            &Response::Write(WriteRsp {
                status: Status::SUCCESS,
                conn: ConnHandle(1),
                handle: 0x0010,
                len: 0,
            }),
            RequestId(99),
        );
        let res = block_on(link.process(&rsp));
        assert!(matches!(res, Err(Error::UnknownRequest(RequestId(99)))));
    }

    #[test]
    fn request_frame_on_wire() {
        let mut out = [0u8; 64];
        {
            let link: TestLink = Link::new(&mut out[..]);
            let rsp = response_frame(
                &Response::Read(ReadRsp {
                    status: Status::SUCCESS,
                    conn: ConnHandle(2),
                    handle: 0x0042,
                    offset: 0,
                    value: &[],
                }),
                RequestId(1),
            );
            let mut dest = [0u8; 1];
            let (res, _) = block_on(join(link.read(ConnHandle(2), 0x0042, 0, &mut dest), async {
                link.process(&rsp).await.unwrap();
            }));
            res.unwrap();
        }
        // header: opcode READ, id 1, len 6; payload: conn 2, handle 0x42, offset 0
        assert_eq!(
            &out[..11],
            &[0x08, 0x01, 0x00, 0x06, 0x00, 0x02, 0x00, 0x42, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn run_terminates_on_transport_eof() {
        let mut out = [0u8; 64];
        let link: TestLink = Link::new(&mut out[..]);
        // An empty reader produces EOF immediately.
        let res = block_on(link.run(&b""[..]));
        assert!(matches!(res, Err(Error::Transport(_))));
    }
}
