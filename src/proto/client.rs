//! Client-role messages: discovery, reads and writes against remote
//! servers, and the value/timeout events the controller forwards.

use super::{read_opt_uuid, read_uuid, uuid_size, write_opt_uuid, write_uuid, Status, ValueKind};
use crate::codec::{self, Decode, Encode, FixedSize};
use crate::cursor::{ReadCursor, WriteCursor};
use crate::types::uuid::Uuid;
use crate::types::{ConnHandle, HandleRange};

/// What a [`DiscoverReq`] is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DiscoverKind {
    PrimaryService = 0x01,
    IncludedService = 0x02,
    Characteristic = 0x03,
    Descriptor = 0x04,
}

impl TryFrom<u8> for DiscoverKind {
    type Error = codec::Error;
    fn try_from(val: u8) -> Result<Self, codec::Error> {
        Ok(match val {
            0x01 => Self::PrimaryService,
            0x02 => Self::IncludedService,
            0x03 => Self::Characteristic,
            0x04 => Self::Descriptor,
            _ => return Err(codec::Error::InvalidValue),
        })
    }
}

impl FixedSize for DiscoverKind {
    const SIZE: usize = 1;
}

impl Encode for DiscoverKind {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        dest[0] = *self as u8;
        Ok(())
    }
}

impl Decode<'_> for DiscoverKind {
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        u8::decode(src)?.try_into()
    }
}

/// Characteristic properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicProps(u8);

bitflags::bitflags! {
    impl CharacteristicProps: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// Discover attributes on a remote server.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoverReq {
    pub conn: ConnHandle,
    pub kind: DiscoverKind,
    /// Filter by attribute UUID; absent discovers everything in range.
    pub uuid: Option<Uuid>,
    pub range: HandleRange,
}

impl DiscoverReq {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.conn)?;
        w.write(self.kind)?;
        w.write(self.range)?;
        write_opt_uuid(w, self.uuid.as_ref())
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let conn = r.read()?;
        let kind = r.read()?;
        let range = r.read()?;
        let uuid = read_opt_uuid(&mut r)?;
        Ok(Self {
            conn,
            kind,
            uuid,
            range,
        })
    }
}

/// One attribute found by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Discovered {
    PrimaryService {
        /// Declaration handle.
        handle: u16,
        /// Handle range the service spans.
        range: HandleRange,
        uuid: Uuid,
    },
    IncludedService {
        /// Handle of the include declaration.
        handle: u16,
        /// Handle range of the included service.
        range: HandleRange,
        uuid: Uuid,
    },
    Characteristic {
        decl_handle: u16,
        value_handle: u16,
        props: CharacteristicProps,
        uuid: Uuid,
    },
    Descriptor {
        handle: u16,
        uuid: Uuid,
    },
}

impl Discovered {
    pub fn kind(&self) -> DiscoverKind {
        match self {
            Discovered::PrimaryService { .. } => DiscoverKind::PrimaryService,
            Discovered::IncludedService { .. } => DiscoverKind::IncludedService,
            Discovered::Characteristic { .. } => DiscoverKind::Characteristic,
            Discovered::Descriptor { .. } => DiscoverKind::Descriptor,
        }
    }

    /// The highest handle this result accounts for, used to advance a
    /// paginated discovery.
    pub fn last_handle(&self) -> u16 {
        match self {
            Discovered::PrimaryService { range, .. } => range.end,
            Discovered::IncludedService { handle, .. } => *handle,
            Discovered::Characteristic { value_handle, .. } => *value_handle,
            Discovered::Descriptor { handle, .. } => *handle,
        }
    }

    fn body_size(&self) -> usize {
        1 + match self {
            Discovered::PrimaryService { uuid, .. } => 6 + uuid_size(uuid),
            Discovered::IncludedService { uuid, .. } => 6 + uuid_size(uuid),
            Discovered::Characteristic { uuid, .. } => 5 + uuid_size(uuid),
            Discovered::Descriptor { uuid, .. } => 2 + uuid_size(uuid),
        }
    }

    /// Serialize as a length-prefixed result entry.
    pub fn encode_entry(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        let size = self.body_size();
        if size > u8::MAX as usize {
            return Err(codec::Error::InvalidValue);
        }
        w.write(size as u8)?;
        w.write(self.kind())?;
        match self {
            Discovered::PrimaryService { handle, range, uuid }
            | Discovered::IncludedService { handle, range, uuid } => {
                w.write(*handle)?;
                w.write(*range)?;
                write_uuid(w, uuid)
            }
            Discovered::Characteristic {
                decl_handle,
                value_handle,
                props,
                uuid,
            } => {
                w.write(*decl_handle)?;
                w.write(*value_handle)?;
                w.write(props.bits())?;
                write_uuid(w, uuid)
            }
            Discovered::Descriptor { handle, uuid } => {
                w.write(*handle)?;
                write_uuid(w, uuid)
            }
        }
    }

    fn parse_body(body: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(body);
        let kind: DiscoverKind = r.read()?;
        Ok(match kind {
            DiscoverKind::PrimaryService => Discovered::PrimaryService {
                handle: r.read()?,
                range: r.read()?,
                uuid: read_uuid(&mut r)?,
            },
            DiscoverKind::IncludedService => Discovered::IncludedService {
                handle: r.read()?,
                range: r.read()?,
                uuid: read_uuid(&mut r)?,
            },
            DiscoverKind::Characteristic => Discovered::Characteristic {
                decl_handle: r.read()?,
                value_handle: r.read()?,
                props: CharacteristicProps::from_bits_truncate(r.read::<u8>()?),
                uuid: read_uuid(&mut r)?,
            },
            DiscoverKind::Descriptor => Discovered::Descriptor {
                handle: r.read()?,
                uuid: read_uuid(&mut r)?,
            },
        })
    }
}

/// The result entries of a [`DiscoverRsp`], a sequence of length-prefixed
/// tagged entries.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredEntries<'a> {
    data: &'a [u8],
}

impl<'a> DiscoveredEntries<'a> {
    /// Wrap raw result entry bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> DiscoveredIter<'a> {
        DiscoveredIter {
            cursor: ReadCursor::new(self.data),
            failed: false,
        }
    }
}

/// Iterator over discovery result entries.
#[derive(Clone)]
pub struct DiscoveredIter<'a> {
    cursor: ReadCursor<'a>,
    failed: bool,
}

impl Iterator for DiscoveredIter<'_> {
    type Item = Result<Discovered, codec::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.available() == 0 {
            return None;
        }
        let res = (|| {
            let len = self.cursor.read::<u8>()? as usize;
            let body = self.cursor.slice(len)?;
            Discovered::parse_body(body)
        })();
        if res.is_err() {
            self.failed = true;
        }
        Some(res)
    }
}

/// Response to [`DiscoverReq`].
///
/// An empty result set means the requested range held no more matches.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoverRsp<'a> {
    pub status: Status,
    /// Echo of the connection handle.
    pub conn: ConnHandle,
    pub entries: DiscoveredEntries<'a>,
}

impl<'a> DiscoverRsp<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.status)?;
        w.write(self.conn)?;
        w.append(self.entries.data)
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let status = r.read()?;
        let conn = r.read()?;
        Ok(Self {
            status,
            conn,
            entries: DiscoveredEntries::new(r.remaining()),
        })
    }
}

/// Read a remote attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadReq {
    pub conn: ConnHandle,
    pub handle: u16,
    /// Byte offset into the attribute value.
    pub offset: u16,
}

impl ReadReq {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.conn)?;
        w.write(self.handle)?;
        w.write(self.offset)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        Ok(Self {
            conn: r.read()?,
            handle: r.read()?,
            offset: r.read()?,
        })
    }
}

/// Response to [`ReadReq`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadRsp<'a> {
    pub status: Status,
    /// Echo of the connection handle.
    pub conn: ConnHandle,
    /// Echo of the read attribute handle.
    pub handle: u16,
    /// Offset of the returned data.
    pub offset: u16,
    pub value: &'a [u8],
}

impl<'a> ReadRsp<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.status)?;
        w.write(self.conn)?;
        w.write(self.handle)?;
        w.write(self.offset)?;
        w.append(self.value)
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let status = r.read()?;
        let conn = r.read()?;
        let handle = r.read()?;
        let offset = r.read()?;
        Ok(Self {
            status,
            conn,
            handle,
            offset,
            value: r.remaining(),
        })
    }
}

/// Write a remote attribute value.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteReq<'a> {
    pub conn: ConnHandle,
    pub handle: u16,
    /// Byte offset into the attribute value.
    pub offset: u16,
    /// Whether the peer acknowledges the write at the ATT level. The link
    /// response arrives either way.
    pub with_response: bool,
    pub value: &'a [u8],
}

impl<'a> WriteReq<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.conn)?;
        w.write(self.handle)?;
        w.write(self.offset)?;
        w.write(self.with_response as u8)?;
        w.append(self.value)
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let conn = r.read()?;
        let handle = r.read()?;
        let offset = r.read()?;
        let with_response = match r.read::<u8>()? {
            0 => false,
            1 => true,
            _ => return Err(codec::Error::InvalidValue),
        };
        Ok(Self {
            conn,
            handle,
            offset,
            with_response,
            value: r.remaining(),
        })
    }
}

/// Response to [`WriteReq`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteRsp {
    pub status: Status,
    /// Echo of the connection handle.
    pub conn: ConnHandle,
    /// Echo of the written attribute handle.
    pub handle: u16,
    /// Number of bytes written.
    pub len: u16,
}

impl WriteRsp {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.status)?;
        w.write(self.conn)?;
        w.write(self.handle)?;
        w.write(self.len)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        Ok(Self {
            status: r.read()?,
            conn: r.read()?,
            handle: r.read()?,
            len: r.read()?,
        })
    }
}

/// A notification or indication arrived from a peer.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ValueEvt<'a> {
    pub conn: ConnHandle,
    /// Handle of the characteristic value.
    pub handle: u16,
    pub kind: ValueKind,
    pub value: &'a [u8],
}

impl<'a> ValueEvt<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.conn)?;
        w.write(self.handle)?;
        w.write(self.kind)?;
        w.append(self.value)
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let conn = r.read()?;
        let handle = r.read()?;
        let kind = r.read()?;
        Ok(Self {
            conn,
            handle,
            kind,
            value: r.remaining(),
        })
    }
}

/// An ATT protocol timeout occurred on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeoutEvt {
    pub conn: ConnHandle,
    /// Controller-defined timeout reason.
    pub reason: u16,
}

impl TimeoutEvt {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.conn)?;
        w.write(self.reason)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        Ok(Self {
            conn: r.read()?,
            reason: r.read()?,
        })
    }
}
