//! Server-role messages: the host's attribute table lives in the
//! controller, so registering services, maintaining attribute values and
//! pushing notifications all cross the link.

use super::{ValueKind, write_uuid, read_uuid, uuid_size};
use crate::codec::{self, Decode, Encode, FixedSize};
use crate::cursor::{ReadCursor, WriteCursor};
use crate::types::uuid::Uuid;
use crate::types::{ConnHandle, HandleRange};
use crate::proto::Status;

/// Size of the fixed registration payload header (service index + count).
pub(crate) const REG_HEADER_SIZE: usize = 2;

/// Size of one streamed attribute table entry.
pub(crate) const ATTR_ENTRY_SIZE: usize = 10;

/// Attribute permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Permissions(u16);

bitflags::bitflags! {
    impl Permissions: u16 {
        const READ = 0x0001;
        const WRITE = 0x0002;
        const READ_ENCRYPT = 0x0004;
        const WRITE_ENCRYPT = 0x0008;
        const READ_AUTHEN = 0x0010;
        const WRITE_AUTHEN = 0x0020;
        const PREPARE_WRITE = 0x0040;
    }
}

/// Write sub-operation reported in a [`WriteEvt`].
///
/// Prepare/cancel/execute name the phases of the queued-write protocol;
/// sequencing them into a pending queue is the host stack's business, the
/// link only carries the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WriteOp {
    /// Acknowledged write request.
    Request = 0x01,
    /// Unacknowledged write command.
    Command = 0x02,
    /// Signed unacknowledged write command.
    SignedCommand = 0x03,
    /// Queue a write for later execution.
    Prepare = 0x04,
    /// Discard all queued writes.
    Cancel = 0x05,
    /// Commit all queued writes.
    Execute = 0x06,
}

impl TryFrom<u8> for WriteOp {
    type Error = codec::Error;
    fn try_from(val: u8) -> Result<Self, codec::Error> {
        Ok(match val {
            0x01 => Self::Request,
            0x02 => Self::Command,
            0x03 => Self::SignedCommand,
            0x04 => Self::Prepare,
            0x05 => Self::Cancel,
            0x06 => Self::Execute,
            _ => return Err(codec::Error::InvalidValue),
        })
    }
}

impl FixedSize for WriteOp {
    const SIZE: usize = 1;
}

impl Encode for WriteOp {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        dest[0] = *self as u8;
        Ok(())
    }
}

impl Decode<'_> for WriteOp {
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        u8::decode(src)?.try_into()
    }
}

/// One attribute in a service definition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttrDef<'a> {
    /// Attribute type; absent for attributes typed by their position.
    pub uuid: Option<Uuid>,
    /// Initial attribute value; absent when the controller allocates storage.
    pub data: Option<&'a [u8]>,
    /// Maximum value length.
    pub max_len: u16,
    /// Attribute permissions.
    pub perm: Permissions,
}

/// The attribute table of a registration request.
///
/// On the wire the table is a sequence of fixed-size entries referencing a
/// trailing blob region through payload-relative offsets, where offset 0
/// means the field is absent. The payload always starts with the two-byte
/// registration header, so no real field can sit at offset 0.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttrTable<'a> {
    /// A table built by the host for encoding.
    Defs(&'a [AttrDef<'a>]),
    /// A table parsed off the wire.
    Wire {
        /// The complete registration payload (offsets index into it).
        payload: &'a [u8],
        /// Number of entries.
        count: u8,
    },
}

impl<'a> AttrTable<'a> {
    /// Number of attributes in the table.
    pub fn count(&self) -> u8 {
        match self {
            AttrTable::Defs(defs) => defs.len() as u8,
            AttrTable::Wire { count, .. } => *count,
        }
    }

    /// Iterate the attributes.
    pub fn iter(&self) -> AttrIter<'a> {
        match self {
            AttrTable::Defs(defs) => AttrIter::Defs(defs.iter()),
            AttrTable::Wire { payload, count } => AttrIter::Wire {
                payload: *payload,
                remaining: *count,
                pos: REG_HEADER_SIZE,
            },
        }
    }
}

/// Iterator over the attributes of an [`AttrTable`].
#[derive(Clone)]
pub enum AttrIter<'a> {
    Defs(core::slice::Iter<'a, AttrDef<'a>>),
    Wire {
        payload: &'a [u8],
        remaining: u8,
        pos: usize,
    },
}

impl<'a> AttrIter<'a> {
    fn next_wire(payload: &'a [u8], pos: usize) -> Result<AttrDef<'a>, codec::Error> {
        if pos + ATTR_ENTRY_SIZE > payload.len() {
            return Err(codec::Error::InsufficientSpace);
        }
        let mut r = ReadCursor::new(&payload[pos..pos + ATTR_ENTRY_SIZE]);
        let uuid_offset = r.read::<u16>()? as usize;
        let data_offset = r.read::<u16>()? as usize;
        let data_len = r.read::<u16>()? as usize;
        let max_len: u16 = r.read()?;
        let perm = Permissions::from_bits_truncate(r.read::<u16>()?);

        let uuid = if uuid_offset != 0 {
            if uuid_offset >= payload.len() {
                return Err(codec::Error::InvalidValue);
            }
            let mut u = ReadCursor::new(&payload[uuid_offset..]);
            Some(read_uuid(&mut u)?)
        } else {
            None
        };

        let data = if data_offset != 0 {
            if data_offset + data_len > payload.len() {
                return Err(codec::Error::InvalidValue);
            }
            Some(&payload[data_offset..data_offset + data_len])
        } else {
            None
        };

        Ok(AttrDef {
            uuid,
            data,
            max_len,
            perm,
        })
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<AttrDef<'a>, codec::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            AttrIter::Defs(iter) => iter.next().map(|def| Ok(def.clone())),
            AttrIter::Wire {
                payload,
                remaining,
                pos,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let res = Self::next_wire(*payload, *pos);
                if res.is_err() {
                    *remaining = 0;
                } else {
                    *remaining -= 1;
                    *pos += ATTR_ENTRY_SIZE;
                }
                Some(res)
            }
        }
    }
}

/// Register a service's attribute table with the controller.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterServiceReq<'a> {
    /// Index of the service in the host's database, echoed in the response.
    pub service_idx: u8,
    pub attrs: AttrTable<'a>,
}

impl<'a> RegisterServiceReq<'a> {
    pub fn new(service_idx: u8, attrs: &'a [AttrDef<'a>]) -> Self {
        Self {
            service_idx,
            attrs: AttrTable::Defs(attrs),
        }
    }

    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        let defs = match &self.attrs {
            // A parsed table re-encodes to the identical payload.
            AttrTable::Wire { payload, .. } => return w.append(payload),
            AttrTable::Defs(defs) => *defs,
        };
        if defs.len() > u8::MAX as usize {
            return Err(codec::Error::InvalidValue);
        }

        w.write(self.service_idx)?;
        w.write(defs.len() as u8)?;

        // Entries reference the blob region through payload offsets.
        let mut blob_pos = REG_HEADER_SIZE + defs.len() * ATTR_ENTRY_SIZE;
        for def in defs {
            let uuid_offset = match &def.uuid {
                Some(uuid) => {
                    let offset = blob_pos;
                    blob_pos += uuid_size(uuid);
                    offset
                }
                None => 0,
            };
            let data_offset = match def.data {
                Some(data) => {
                    let offset = blob_pos;
                    blob_pos += data.len();
                    offset
                }
                None => 0,
            };
            if blob_pos > u16::MAX as usize {
                return Err(codec::Error::InsufficientSpace);
            }
            w.write(uuid_offset as u16)?;
            w.write(data_offset as u16)?;
            w.write(def.data.map(|d| d.len()).unwrap_or(0) as u16)?;
            w.write(def.max_len)?;
            w.write(def.perm.bits())?;
        }
        for def in defs {
            if let Some(uuid) = &def.uuid {
                write_uuid(w, uuid)?;
            }
            if let Some(data) = def.data {
                w.append(data)?;
            }
        }
        Ok(())
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        if payload.len() < REG_HEADER_SIZE {
            return Err(codec::Error::InsufficientSpace);
        }
        let service_idx = payload[0];
        let count = payload[1];
        if REG_HEADER_SIZE + count as usize * ATTR_ENTRY_SIZE > payload.len() {
            return Err(codec::Error::InsufficientSpace);
        }
        Ok(Self {
            service_idx,
            attrs: AttrTable::Wire { payload, count },
        })
    }
}

/// The handle table assigned by the controller on registration, one 16-bit
/// handle per attribute in table order.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handles<'a> {
    data: &'a [u8],
}

impl<'a> Handles<'a> {
    /// Wrap raw little-endian handle pairs.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> HandleIter<'a> {
        HandleIter {
            data: self.data,
            pos: 0,
        }
    }
}

/// Iterator over u16 handles from raw LE byte pairs.
#[derive(Clone)]
pub struct HandleIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Iterator for HandleIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 2 > self.data.len() {
            return None;
        }
        let handle = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Some(handle)
    }
}

/// Response to [`RegisterServiceReq`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterServiceRsp<'a> {
    pub status: Status,
    /// Echo of the registered service index.
    pub service_idx: u8,
    /// Echo of the registered attribute count.
    pub attr_count: u8,
    /// Assigned handles, one per attribute.
    pub handles: Handles<'a>,
}

impl<'a> RegisterServiceRsp<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.status)?;
        w.write(self.service_idx)?;
        w.write(self.attr_count)?;
        w.append(self.handles.data)
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let status = r.read()?;
        let service_idx = r.read()?;
        let attr_count: u8 = r.read()?;
        let handles = Handles::new(r.remaining());
        if handles.len() != attr_count as usize || handles.data.len() % 2 != 0 {
            return Err(codec::Error::InvalidValue);
        }
        Ok(Self {
            status,
            service_idx,
            attr_count,
            handles,
        })
    }
}

/// Set a local attribute value.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetValueReq<'a> {
    pub handle: u16,
    pub offset: u16,
    pub value: &'a [u8],
}

impl<'a> SetValueReq<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.handle)?;
        w.write(self.offset)?;
        w.append(self.value)
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let handle = r.read()?;
        let offset = r.read()?;
        Ok(Self {
            handle,
            offset,
            value: r.remaining(),
        })
    }
}

/// Response to [`SetValueReq`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetValueRsp {
    pub status: Status,
    /// Echo of the written value handle.
    pub handle: u16,
}

impl SetValueRsp {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.status)?;
        w.write(self.handle)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        Ok(Self {
            status: r.read()?,
            handle: r.read()?,
        })
    }
}

/// Get a local attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GetValueReq {
    pub handle: u16,
}

impl GetValueReq {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.handle)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        Ok(Self { handle: r.read()? })
    }
}

/// Response to [`GetValueReq`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GetValueRsp<'a> {
    pub status: Status,
    /// Echo of the read value handle.
    pub handle: u16,
    pub value: &'a [u8],
}

impl<'a> GetValueRsp<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.status)?;
        w.write(self.handle)?;
        w.append(self.value)
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let status = r.read()?;
        let handle = r.read()?;
        Ok(Self {
            status,
            handle,
            value: r.remaining(),
        })
    }
}

/// Send a service-changed indication for a handle range.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceChangedReq {
    pub conn: ConnHandle,
    pub range: HandleRange,
}

impl ServiceChangedReq {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.conn)?;
        w.write(self.range)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        Ok(Self {
            conn: r.read()?,
            range: r.read()?,
        })
    }
}

/// Response to [`ServiceChangedReq`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceChangedRsp {
    pub status: Status,
    /// Echo of the connection handle.
    pub conn: ConnHandle,
}

impl ServiceChangedRsp {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.status)?;
        w.write(self.conn)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        Ok(Self {
            status: r.read()?,
            conn: r.read()?,
        })
    }
}

/// Push a value to a peer as a notification or indication.
///
/// The kind selects the request opcode and is not part of the payload. An
/// empty value asks the controller to send the currently stored value.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotifyReq<'a> {
    pub kind: ValueKind,
    pub conn: ConnHandle,
    pub handle: u16,
    pub offset: u16,
    pub value: &'a [u8],
}

impl<'a> NotifyReq<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.conn)?;
        w.write(self.handle)?;
        w.write(self.offset)?;
        w.append(self.value)
    }

    pub fn parse(kind: ValueKind, payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let conn = r.read()?;
        let handle = r.read()?;
        let offset = r.read()?;
        Ok(Self {
            kind,
            conn,
            handle,
            offset,
            value: r.remaining(),
        })
    }
}

/// Response to [`NotifyReq`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotifyRsp {
    pub status: Status,
    /// Echo of the connection handle, or [`ConnHandle::BROADCAST`].
    pub conn: ConnHandle,
    /// Echo of the pushed value handle.
    pub handle: u16,
    /// Echo of the push kind.
    pub kind: ValueKind,
}

impl NotifyRsp {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.status)?;
        w.write(self.conn)?;
        w.write(self.handle)?;
        w.write(self.kind)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        Ok(Self {
            status: r.read()?,
            conn: r.read()?,
            handle: r.read()?,
            kind: r.read()?,
        })
    }
}

/// A peer wrote to an attribute in the host's table.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteEvt<'a> {
    pub conn: ConnHandle,
    /// Handle of the written attribute.
    pub handle: u16,
    /// Byte offset into the attribute value.
    pub offset: u16,
    pub op: WriteOp,
    pub value: &'a [u8],
}

impl<'a> WriteEvt<'a> {
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), codec::Error> {
        w.write(self.conn)?;
        w.write(self.handle)?;
        w.write(self.offset)?;
        w.write(self.op)?;
        w.append(self.value)
    }

    pub fn parse(payload: &'a [u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(payload);
        let conn = r.read()?;
        let handle = r.read()?;
        let offset = r.read()?;
        let op = r.read()?;
        Ok(Self {
            conn,
            handle,
            offset,
            op,
            value: r.remaining(),
        })
    }
}
