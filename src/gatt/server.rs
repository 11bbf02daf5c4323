use std::sync::atomic::{AtomicU32, Ordering};

use structbuf::Unpacker;
use tracing::{debug, trace, warn};

use ErrorCode::*;

use crate::gap::{self, AdvFlag, Uuid, Uuid16};

use super::*;

/// GATT server. One instance is shared by all connections; the transport
/// serializes requests within a connection and passes the per-link
/// [`Connection`] state on every dispatch.
#[derive(Debug)]
pub struct Server {
    db: Db,
    io: IoMap,
    ntf: NotifyTable,
    name: Option<Box<str>>,
}

impl Server {
    /// Creates a new server builder.
    #[inline]
    #[must_use]
    pub fn build() -> ServerBuilder {
        ServerBuilder {
            db: Builder::<Db>::new(),
            name: None,
        }
    }

    /// Handles one ATT request PDU, writing the response or error response
    /// into `out`. Returns the number of response bytes, which never exceeds
    /// the negotiated MTU. A return value of 0 means that not even a 5-byte
    /// error response fit into `out`.
    pub fn l2cap_input(&self, pdu: &[u8], out: &mut [u8], conn: &mut Connection) -> usize {
        let n = out.len().min(usize::from(conn.negotiated_mtu()));
        let out = &mut out[..n];
        let Some(&op) = pdu.first() else { return 0 };
        trace!("Request {op:#04X}: {pdu:02X?}");
        let r = match Opcode::try_from(op) {
            Ok(Opcode::ExchangeMtuReq) => self.exchange_mtu(pdu, out, conn),
            Ok(Opcode::FindInformationReq) => self.find_information(pdu, out),
            Ok(Opcode::FindByTypeValueReq) => self.find_by_type_value(pdu, out, conn),
            Ok(Opcode::ReadByTypeReq) => self.read_by_type(pdu, out, conn),
            Ok(Opcode::ReadReq) => self.read(pdu, out, conn),
            Ok(Opcode::ReadBlobReq) => self.read_blob(pdu, out, conn),
            Ok(Opcode::ReadByGroupTypeReq) => self.read_by_group_type(pdu, out),
            Ok(Opcode::WriteReq) => self.write(pdu, out, conn),
            _ => Err(ErrorRsp::new(op, None, RequestNotSupported)),
        };
        match r {
            Ok(n) => n,
            Err(e) => {
                warn!("{e}");
                error_rsp(&e, out)
            }
        }
    }

    /// Fills `buf` with advertising data: the Flags AD structure followed by
    /// the device name, shortened if necessary. Returns the number of bytes
    /// written.
    pub fn advertising_data(&self, buf: &mut [u8]) -> usize {
        let mut p = Appender::new(buf);
        gap::flags(&mut p, AdvFlag::LE_GENERAL | AdvFlag::NO_BREDR);
        if let Some(name) = self.name.as_deref() {
            gap::local_name(&mut p, name);
        }
        p.len()
    }

    /// Marks the characteristic value at `hdl` as pending notification.
    /// Returns `false` if `hdl` is not a notifying characteristic value
    /// handle.
    ///
    /// This may be called from any thread or interrupt context. The caller
    /// is responsible for publishing the value itself; the server reads it
    /// through the regular I/O callback when the notification is sent.
    pub fn notify(&self, hdl: Handle) -> bool {
        let Some(i) = self.ntf.chars.iter().position(|&(h, _)| h == hdl) else {
            return false;
        };
        self.ntf.pending.fetch_or(1 << i, Ordering::SeqCst);
        true
    }

    /// Composes an `ATT_HANDLE_VALUE_NTF` PDU for the next pending
    /// characteristic that the client subscribed to. The transport calls
    /// this at each outbound opportunity; 0 means nothing to send. Pending
    /// characteristics that the client did not subscribe to are dropped.
    pub fn next_notification(&self, out: &mut [u8], conn: &mut Connection) -> usize {
        let n = out.len().min(usize::from(conn.negotiated_mtu()));
        let out = &mut out[..n];
        let mut pending = self.ntf.pending.load(Ordering::SeqCst);
        while pending != 0 {
            let i = pending.trailing_zeros() as usize;
            let bit = 1 << i;
            pending &= !bit;
            self.ntf.pending.fetch_and(!bit, Ordering::SeqCst);
            let (hdl, slot) = self.ntf.chars[i];
            if !conn.cccd(slot).contains(Cccd::NOTIFY) {
                continue;
            }
            if out.len() < 3 {
                return 0;
            }
            let (hdr, val) = out.split_at_mut(3);
            let Ok(rd) = self.read_attr(hdl, 0, val, conn) else {
                continue;
            };
            hdr[0] = Opcode::HandleValueNtf.into();
            hdr[1..3].copy_from_slice(&u16::from(hdl).to_le_bytes());
            return 3 + rd.len;
        }
        0
    }
}

/// Request handlers. Each either fills `out` with a complete response and
/// returns its length, or returns the error response to be synthesized.
impl Server {
    /// Handles `ATT_EXCHANGE_MTU_REQ` ([Vol 3] Part F, Section 3.4.2.1).
    fn exchange_mtu(&self, pdu: &[u8], out: &mut [u8], conn: &mut Connection) -> RspResult<usize> {
        const OP: Opcode = Opcode::ExchangeMtuReq;
        require_len(OP, pdu, 3, 3)?;
        let mtu = Unpacker::new(&pdu[1..]).u16();
        if mtu < DEFAULT_MTU {
            return OP.err(InvalidPdu);
        }
        debug!("Client MTU: {mtu}");
        conn.set_client_mtu(mtu);
        let mut w = Appender::new(out);
        if !(w.u8(Opcode::ExchangeMtuRsp.into()) && w.u16(conn.server_mtu())) {
            return OP.err(UnlikelyError);
        }
        Ok(w.len())
    }

    /// Handles `ATT_FIND_INFORMATION_REQ` ([Vol 3] Part F, Section 3.4.3.1).
    /// The response format is selected by the first attribute in the range;
    /// attributes of the other UUID width are skipped.
    fn find_information(&self, pdu: &[u8], out: &mut [u8]) -> RspResult<usize> {
        const OP: Opcode = Opcode::FindInformationReq;
        require_len(OP, pdu, 5, 5)?;
        let hdls = self.check_handle_range(OP, pdu)?;
        let Some(first) = self.db.get(hdls.start()) else {
            return OP.hdl_err(AttributeNotFound, hdls.start());
        };
        let short = first.is_16bit();
        let fmt = if short {
            UuidFmt::Short16
        } else {
            UuidFmt::Long128
        };
        let mut w = Appender::new(out);
        if !(w.u8(Opcode::FindInformationRsp.into()) && w.u8(fmt.into())) {
            return OP.err(UnlikelyError);
        }
        for (hdl, at) in self.db.iter_range(hdls) {
            let mut rec = [0; 18];
            rec[..2].copy_from_slice(&u16::from(hdl).to_le_bytes());
            let n = match at.typ16() {
                Some(u) if short => {
                    rec[2..4].copy_from_slice(&u.to_bytes());
                    4
                }
                None if !short => {
                    rec[2..].copy_from_slice(&self.db.typ(at).to_bytes());
                    18
                }
                _ => continue,
            };
            if !w.put(&rec[..n]) {
                break;
            }
        }
        Ok(w.len())
    }

    /// Handles `ATT_FIND_BY_TYPE_VALUE_REQ` for Primary Service discovery
    /// by UUID ([Vol 3] Part F, Section 3.4.3.3). Any other group type is
    /// rejected.
    fn find_by_type_value(
        &self,
        pdu: &[u8],
        out: &mut [u8],
        conn: &Connection,
    ) -> RspResult<usize> {
        const OP: Opcode = Opcode::FindByTypeValueReq;
        if pdu.len() < 9 || pdu.len() > usize::from(conn.negotiated_mtu()) {
            return OP.err(InvalidPdu);
        }
        let hdls = self.check_handle_range(OP, pdu)?;
        if Uuid16::new(Unpacker::new(&pdu[5..]).u16()) != Some(Declaration::PRIMARY_SERVICE) {
            return OP.hdl_err(UnsupportedGroupType, hdls.start());
        }
        let val = &pdu[7..];
        let mut w = Appender::new(out);
        if !w.u8(Opcode::FindByTypeValueRsp.into()) {
            return OP.err(UnlikelyError);
        }
        let mut found = false;
        for g in self.db.service_groups() {
            if !hdls.contains(g.hdl) || self.db.value(g.decl) != val {
                continue;
            }
            let mut rec = [0; 4];
            rec[..2].copy_from_slice(&u16::from(g.hdl).to_le_bytes());
            rec[2..].copy_from_slice(&u16::from(g.end).to_le_bytes());
            if !w.put(&rec) {
                break;
            }
            found = true;
        }
        if !found {
            return OP.hdl_err(AttributeNotFound, hdls.start());
        }
        Ok(w.len())
    }

    /// Handles `ATT_READ_BY_TYPE_REQ` ([Vol 3] Part F, Section 3.4.4.1).
    /// The first readable match fixes the record value size; matches of a
    /// different size are skipped, not errored.
    fn read_by_type(&self, pdu: &[u8], out: &mut [u8], conn: &Connection) -> RspResult<usize> {
        const OP: Opcode = Opcode::ReadByTypeReq;
        require_len(OP, pdu, 7, 21)?;
        let hdls = self.check_handle_range(OP, pdu)?;
        let Ok(typ) = Uuid::try_from(&pdu[5..]) else {
            return OP.hdl_err(AttributeNotFound, hdls.start());
        };
        let mut w = Appender::new(out);
        if !w.skip(2) {
            return OP.err(UnlikelyError);
        }
        let mut rec: Option<usize> = None;
        for (hdl, at) in self.db.iter_range(hdls) {
            if self.db.typ(at) != typ {
                continue;
            }
            let tail = w.tail();
            if tail.len() < 2 {
                break;
            }
            let (hdr, val) = tail.split_at_mut(2);
            let cap = val.len().min(MAX_TYPE_VAL_LEN);
            let Ok(rd) = self.read_attr(hdl, 0, &mut val[..cap], conn) else {
                continue;
            };
            if rd.truncated && rd.len != MAX_TYPE_VAL_LEN {
                continue; // Remaining output space clipped the value
            }
            match rec {
                None => rec = Some(rd.len),
                Some(n) if n == rd.len => {}
                Some(_) => continue,
            }
            hdr.copy_from_slice(&u16::from(hdl).to_le_bytes());
            w.advance(2 + rd.len);
        }
        let Some(n) = rec else {
            return OP.hdl_err(AttributeNotFound, hdls.start());
        };
        w.set_u8(0, Opcode::ReadByTypeRsp.into());
        #[allow(clippy::cast_possible_truncation)]
        w.set_u8(1, (2 + n) as u8);
        Ok(w.len())
    }

    /// Handles `ATT_READ_REQ` ([Vol 3] Part F, Section 3.4.4.3).
    fn read(&self, pdu: &[u8], out: &mut [u8], conn: &Connection) -> RspResult<usize> {
        const OP: Opcode = Opcode::ReadReq;
        require_len(OP, pdu, 3, 3)?;
        let hdl = self.check_handle(OP, pdu)?;
        let Some((op, val)) = out.split_first_mut() else {
            return OP.err(UnlikelyError);
        };
        match self.read_attr(hdl, 0, val, conn) {
            Ok(rd) => {
                *op = Opcode::ReadRsp.into();
                Ok(1 + rd.len)
            }
            Err(_) => OP.hdl_err(ReadNotPermitted, hdl),
        }
    }

    /// Handles `ATT_READ_BLOB_REQ` ([Vol 3] Part F, Section 3.4.4.5).
    fn read_blob(&self, pdu: &[u8], out: &mut [u8], conn: &Connection) -> RspResult<usize> {
        const OP: Opcode = Opcode::ReadBlobReq;
        require_len(OP, pdu, 5, 5)?;
        let hdl = self.check_handle(OP, pdu)?;
        let off = Unpacker::new(&pdu[3..]).u16();
        let Some((op, val)) = out.split_first_mut() else {
            return OP.err(UnlikelyError);
        };
        match self.read_attr(hdl, off, val, conn) {
            Ok(rd) => {
                *op = Opcode::ReadBlobRsp.into();
                Ok(1 + rd.len)
            }
            Err(InvalidOffset) => OP.hdl_err(InvalidOffset, hdl),
            Err(_) => OP.hdl_err(ReadNotPermitted, hdl),
        }
    }

    /// Handles `ATT_READ_BY_GROUP_TYPE_REQ` for Primary Service discovery
    /// ([Vol 3] Part F, Section 3.4.4.9). Only the 16-bit Primary Service
    /// group type is supported. The UUID width of the first in-range
    /// service fixes the record size.
    fn read_by_group_type(&self, pdu: &[u8], out: &mut [u8]) -> RspResult<usize> {
        const OP: Opcode = Opcode::ReadByGroupTypeReq;
        require_len(OP, pdu, 7, 21)?;
        let hdls = self.check_handle_range(OP, pdu)?;
        if pdu.len() != 7
            || Uuid16::new(Unpacker::new(&pdu[5..]).u16()) != Some(Declaration::PRIMARY_SERVICE)
        {
            return OP.hdl_err(UnsupportedGroupType, hdls.start());
        }
        let mut w = Appender::new(out);
        if !(w.u8(Opcode::ReadByGroupTypeRsp.into()) && w.skip(1)) {
            return OP.err(UnlikelyError);
        }
        let mut uuid_len = 0;
        for g in self.db.service_groups() {
            if !hdls.contains(g.hdl) {
                continue;
            }
            let uuid = self.db.value(g.decl);
            if uuid_len == 0 {
                uuid_len = uuid.len();
            }
            if uuid.len() != uuid_len {
                continue;
            }
            let mut rec = [0; 20];
            rec[..2].copy_from_slice(&u16::from(g.hdl).to_le_bytes());
            rec[2..4].copy_from_slice(&u16::from(g.end).to_le_bytes());
            rec[4..4 + uuid_len].copy_from_slice(uuid);
            if !w.put(&rec[..4 + uuid_len]) {
                break;
            }
        }
        if w.len() <= 2 {
            return OP.hdl_err(AttributeNotFound, hdls.start());
        }
        #[allow(clippy::cast_possible_truncation)]
        w.set_u8(1, (4 + uuid_len) as u8);
        Ok(w.len())
    }

    /// Handles `ATT_WRITE_REQ` ([Vol 3] Part F, Section 3.4.5.1). The write
    /// is all-or-nothing: on failure no state changes.
    fn write(&self, pdu: &[u8], out: &mut [u8], conn: &mut Connection) -> RspResult<usize> {
        const OP: Opcode = Opcode::WriteReq;
        if pdu.len() < 3 {
            return OP.err(InvalidPdu);
        }
        let hdl = self.check_handle(OP, pdu)?;
        match self.write_attr(hdl, &pdu[3..], conn) {
            Ok(()) => {
                let Some(op) = out.first_mut() else {
                    return OP.err(UnlikelyError);
                };
                *op = Opcode::WriteRsp.into();
                Ok(1)
            }
            Err(InvalidAttributeValueLength) => OP.hdl_err(InvalidAttributeValueLength, hdl),
            Err(_) => OP.hdl_err(WriteNotPermitted, hdl),
        }
    }
}

/// Attribute access.
impl Server {
    /// Reads the value of `hdl` at `off` into `buf`.
    fn read_attr(
        &self,
        hdl: Handle,
        off: u16,
        buf: &mut [u8],
        conn: &Connection,
    ) -> std::result::Result<Rd, ErrorCode> {
        let at = self.db.get(hdl).ok_or(InvalidHandle)?;
        match at.kind() {
            AttrKind::Stored => read_stored(self.db.value(at), off, buf),
            AttrKind::Io(props) => {
                if !props.contains(Prop::READ) {
                    return Err(ReadNotPermitted);
                }
                let mut r = ReadReq::new(hdl, off, buf);
                self.io.read(&mut r)?;
                Ok(Rd {
                    len: r.len(),
                    truncated: r.is_truncated(),
                })
            }
            AttrKind::ClientConfig(slot) => {
                read_stored(&conn.cccd(slot).bits().to_le_bytes(), off, buf)
            }
        }
    }

    /// Writes `val` to the attribute at `hdl`.
    fn write_attr(
        &self,
        hdl: Handle,
        val: &[u8],
        conn: &mut Connection,
    ) -> std::result::Result<(), ErrorCode> {
        let at = self.db.get(hdl).ok_or(InvalidHandle)?;
        match at.kind() {
            AttrKind::Stored => Err(WriteNotPermitted),
            AttrKind::Io(props) => {
                if !props.contains(Prop::WRITE) {
                    return Err(WriteNotPermitted);
                }
                self.io.write(&WriteReq { hdl, val })
            }
            AttrKind::ClientConfig(slot) => {
                if val.len() != 2 {
                    return Err(InvalidAttributeValueLength);
                }
                let v = u16::from_le_bytes([val[0], val[1]]);
                conn.set_cccd(slot, Cccd::from_bits_truncate(v));
                Ok(())
            }
        }
    }
}

/// PDU validation.
impl Server {
    /// Parses and validates the handle range at bytes 1..5
    /// ([Vol 3] Part F, Section 3.4.3.1).
    fn check_handle_range(&self, op: Opcode, pdu: &[u8]) -> RspResult<HandleRange> {
        let mut p = Unpacker::new(&pdu[1..]);
        let (start, end) = (p.u16(), p.u16());
        let Some(s) = Handle::new(start) else {
            return op.err(InvalidHandle);
        };
        let Some(e) = Handle::new(end).filter(|&e| s <= e) else {
            return op.hdl_err(InvalidHandle, s);
        };
        if s.index() >= self.db.len() {
            return op.hdl_err(AttributeNotFound, s);
        }
        Ok(HandleRange::new(s, e))
    }

    /// Parses and validates the handle at bytes 1..3.
    fn check_handle(&self, op: Opcode, pdu: &[u8]) -> RspResult<Handle> {
        let Some(hdl) = Handle::new(Unpacker::new(&pdu[1..]).u16()) else {
            return op.err(InvalidHandle);
        };
        if hdl.index() >= self.db.len() {
            return op.hdl_err(AttributeNotFound, hdl);
        }
        Ok(hdl)
    }
}

/// Builder used to declare the services provided by a [`Server`].
#[derive(Debug)]
pub struct ServerBuilder {
    db: Builder<Db>,
    name: Option<Box<str>>,
}

impl ServerBuilder {
    /// Sets the discoverable device name.
    pub fn name(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.name = Some(Box::from(name.as_ref()));
        self
    }

    /// Defines a primary service ([Vol 3] Part G, Section 3.1), calling
    /// `chars` to define its characteristics.
    #[inline]
    pub fn primary_service<T>(
        &mut self,
        uuid: impl Into<Uuid>,
        chars: impl FnOnce(&mut Builder<ServiceDef>) -> T,
    ) -> (Handle, T) {
        self.db.primary_service(uuid, chars)
    }

    /// Returns the finished server.
    #[must_use]
    pub fn freeze(self) -> Server {
        let (db, io, chars) = self.db.freeze();
        Server {
            db,
            io,
            ntf: NotifyTable {
                chars,
                pending: AtomicU32::new(0),
            },
            name: self.name,
        }
    }
}

/// Notifying characteristic value handles, their CCCD slots, and the
/// pending bit per table entry.
#[derive(Debug, Default)]
struct NotifyTable {
    chars: Box<[(Handle, u8)]>,
    pending: AtomicU32,
}

/// Completed read: bytes produced and whether the value was truncated to
/// fit the buffer.
#[derive(Clone, Copy, Debug)]
struct Rd {
    len: usize,
    truncated: bool,
}

/// Copies a stored value into `buf` starting at `off`.
fn read_stored(v: &[u8], off: u16, buf: &mut [u8]) -> std::result::Result<Rd, ErrorCode> {
    let v = v.get(usize::from(off)..).ok_or(InvalidOffset)?;
    let n = v.len().min(buf.len());
    buf[..n].copy_from_slice(&v[..n]);
    Ok(Rd {
        len: n,
        truncated: n < v.len(),
    })
}

/// Validates the PDU size, which must be `a` or `b`
/// ([Vol 3] Part F, Section 3.3).
fn require_len(op: Opcode, pdu: &[u8], a: usize, b: usize) -> RspResult<()> {
    if pdu.len() == a || pdu.len() == b {
        Ok(())
    } else {
        op.err(InvalidPdu)
    }
}

/// Synthesizes an `ATT_ERROR_RSP` PDU ([Vol 3] Part F, Section 3.4.1.1),
/// or suppresses the response entirely if even 5 bytes do not fit.
fn error_rsp(e: &ErrorRsp, out: &mut [u8]) -> usize {
    let mut p = Appender::new(out);
    if p.remaining() < 5 {
        return 0;
    }
    let ok = p.u8(Opcode::ErrorRsp.into())
        && p.u8(e.req)
        && p.u16(e.hdl.map_or(0, u16::from))
        && p.u8(e.err.into());
    debug_assert!(ok);
    p.len()
}
