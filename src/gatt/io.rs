//! Characteristic and descriptor value access.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::name_of;

use super::*;

/// I/O callback result type.
pub type IoResult = std::result::Result<(), ErrorCode>;

/// Characteristic or descriptor I/O callback. The host application owns the
/// value memory; the server only reaches it through this callback.
#[derive(Clone)]
#[repr(transparent)]
pub struct Io(Arc<dyn for<'a, 'b> Fn(IoReq<'a, 'b>) -> IoResult + Send + Sync>);

impl Io {
    /// Returns an I/O callback for a method of `T`.
    #[inline(always)]
    pub fn with<T: Send + Sync + 'static>(
        this: &Arc<T>,
        f: impl Fn(&T, IoReq) -> IoResult + Send + Sync + 'static,
    ) -> Self {
        let this = Arc::clone(this);
        Self(Arc::new(move |req: IoReq| f(&this, req)))
    }
}

impl Debug for Io {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        (f.debug_tuple(name_of!(Io)).field(&Arc::as_ptr(&self.0))).finish()
    }
}

impl<T: for<'a, 'b> Fn(IoReq<'a, 'b>) -> IoResult + Send + Sync + 'static> From<T> for Io {
    #[inline(always)]
    fn from(f: T) -> Self {
        Self(Arc::new(f))
    }
}

/// Map of handles to their I/O callbacks.
#[derive(Debug, Default)]
pub(super) struct IoMap(pub(super) BTreeMap<Handle, Io>);

impl IoMap {
    /// Executes a read request.
    #[inline(always)]
    pub fn read(&self, r: &mut ReadReq) -> IoResult {
        let hdl = r.hdl;
        self.exec(hdl, IoReq::Read(r))
    }

    /// Executes a write request.
    #[inline(always)]
    pub fn write(&self, w: &WriteReq) -> IoResult {
        self.exec(w.hdl, IoReq::Write(w))
    }

    /// Executes the specified request.
    #[inline]
    fn exec(&self, hdl: Handle, req: IoReq) -> IoResult {
        (self.0.get(&hdl).ok_or(ErrorCode::UnlikelyError)).and_then(|io| (io.0)(req))
    }
}

/// Characteristic or descriptor I/O request.
#[derive(Debug)]
#[non_exhaustive]
pub enum IoReq<'a, 'b> {
    Read(&'a mut ReadReq<'b>),
    Write(&'a WriteReq<'a>),
}

/// Server characteristic or descriptor read request. The value is written
/// directly into the response buffer, truncated to the space remaining
/// under the negotiated MTU.
#[derive(Debug)]
pub struct ReadReq<'a> {
    pub(super) hdl: Handle,
    pub(super) off: u16,
    buf: &'a mut [u8],
    len: usize,
    truncated: bool,
}

impl<'a> ReadReq<'a> {
    /// Creates a new read request.
    #[inline(always)]
    pub(super) fn new(hdl: Handle, off: u16, buf: &'a mut [u8]) -> Self {
        Self {
            hdl,
            off,
            buf,
            len: 0,
            truncated: false,
        }
    }

    /// Returns the attribute handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.hdl
    }

    /// Returns the value offset.
    #[inline(always)]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.off as _
    }

    /// Provides the complete attribute value with automatic offset and
    /// truncation handling.
    #[inline]
    pub fn complete(&mut self, v: impl AsRef<[u8]>) -> IoResult {
        self.partial((v.as_ref().get(self.offset()..)).ok_or(ErrorCode::InvalidOffset)?)
    }

    /// Provides the attribute value starting at the requested offset. The
    /// value is truncated if the buffer is smaller.
    pub fn partial(&mut self, v: impl AsRef<[u8]>) -> IoResult {
        let v = v.as_ref();
        let n = v.len().min(self.buf.len());
        self.buf[..n].copy_from_slice(&v[..n]);
        self.len = n;
        self.truncated = n < v.len();
        Ok(())
    }

    /// Returns the number of value bytes provided.
    #[inline(always)]
    pub(super) fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the provided value was truncated to fit the buffer.
    #[inline(always)]
    pub(super) fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Server characteristic or descriptor write request.
#[derive(Debug)]
pub struct WriteReq<'a> {
    pub(super) hdl: Handle,
    pub(super) val: &'a [u8],
}

impl<'a> WriteReq<'a> {
    /// Returns the attribute handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.hdl
    }

    /// Returns the value to be written.
    #[inline(always)]
    #[must_use]
    pub const fn value(&self) -> &'a [u8] {
        self.val
    }

    /// Updates `dst` with the written value. All-or-nothing: returns
    /// `InvalidAttributeValueLength` without modifying `dst` if the value
    /// does not fit.
    #[inline]
    pub fn update(&self, mut dst: impl AsMut<[u8]>) -> IoResult {
        let Some(dst) = dst.as_mut().get_mut(..self.val.len()) else {
            return Err(ErrorCode::InvalidAttributeValueLength);
        };
        dst.copy_from_slice(self.val);
        Ok(())
    }
}

impl<'a> AsRef<[u8]> for WriteReq<'a> {
    #[inline(always)]
    fn as_ref(&self) -> &'a [u8] {
        self.val
    }
}
