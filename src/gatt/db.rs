use crate::gap::{Uuid, Uuid16};

pub use builder::*;

use super::*;

mod builder;

/// Data arena index type. `u16` is enough for 3k 128-bit characteristics.
type Idx = u16;

/// Read-only attribute table.
///
/// Describes the service structure, access rules, and stores declaration
/// values. Handles are contiguous starting at 1, so handle `h` is always
/// the entry at index `h - 1`. The table is immutable after construction;
/// only characteristic values and per-connection configuration bits change
/// at runtime.
#[derive(Clone, Debug, Default)]
pub struct Db {
    /// Attribute metadata in handle order.
    attr: Box<[Attr]>,
    /// Concatenated declaration values and 128-bit UUIDs.
    data: Box<[u8]>,
}

impl Db {
    /// Returns the number of attributes.
    #[inline(always)]
    #[must_use]
    pub(super) fn len(&self) -> usize {
        self.attr.len()
    }

    /// Returns the attribute for the specified handle or `None` if the
    /// handle is past the end of the table.
    #[inline]
    #[must_use]
    pub(super) fn get(&self, hdl: Handle) -> Option<&Attr> {
        self.attr.get(hdl.index())
    }

    /// Returns the attribute type.
    #[inline]
    pub(super) fn typ(&self, at: &Attr) -> Uuid {
        at.typ.map_or_else(
            || {
                let i = usize::from(at.val.0) - 16;
                let mut b = [0; 16];
                b.copy_from_slice(&self.data[i..i + 16]);
                // SAFETY: The builder stores a non-zero 128-bit UUID at
                // `at.val.0 - 16`
                unsafe { Uuid::new_unchecked(u128::from_le_bytes(b)) }
            },
            Uuid16::as_uuid,
        )
    }

    /// Returns the stored attribute value. The value is empty for
    /// attributes that are not backed by the data arena.
    #[inline(always)]
    #[must_use]
    pub(super) fn value(&self, at: &Attr) -> &[u8] {
        &self.data[usize::from(at.val.0)..usize::from(at.val.1)]
    }

    /// Returns an iterator over all attributes within the handle range,
    /// clipped to the end of the table.
    pub(super) fn iter_range(&self, hdls: HandleRange) -> impl Iterator<Item = (Handle, &Attr)> {
        let i = hdls.start().index().min(self.attr.len());
        let j = usize::from(hdls.end()).min(self.attr.len()).max(i);
        (self.attr[i..j].iter())
            .enumerate()
            .filter_map(move |(k, at)| Handle::from_index(i + k).map(|h| (h, at)))
    }

    /// Returns an iterator over service groups in handle order. Each group
    /// spans from its service declaration to the last attribute before the
    /// next one.
    #[inline]
    pub(super) fn service_groups(&self) -> ServiceGroups<'_> {
        ServiceGroups { db: self, i: 0 }
    }
}

/// Attribute entry. `val` contains start and end indices of the stored
/// value in the data arena. If `typ` is `None`, then the attribute has a
/// 128-bit type UUID stored at `val.0 - 16..val.0`.
#[derive(Clone, Copy, Debug)]
#[must_use]
pub(super) struct Attr {
    typ: Option<Uuid16>,
    val: (Idx, Idx),
    kind: AttrKind,
}

/// Attribute value backing.
#[derive(Clone, Copy, Debug)]
pub(super) enum AttrKind {
    /// Declaration or read-only value stored in the data arena.
    Stored,
    /// Value owned by the host application, reached through an I/O
    /// callback and gated by the characteristic properties.
    Io(Prop),
    /// Client Characteristic Configuration bits, stored per connection at
    /// the contained slot.
    ClientConfig(u8),
}

impl Attr {
    /// Returns the value backing.
    #[inline(always)]
    pub(super) const fn kind(&self) -> AttrKind {
        self.kind
    }

    /// Returns whether the attribute type is a 16-bit UUID.
    #[inline(always)]
    pub(super) const fn is_16bit(&self) -> bool {
        self.typ.is_some()
    }

    /// Returns the 16-bit attribute type or `None` for a 128-bit type.
    #[inline(always)]
    pub(super) const fn typ16(&self) -> Option<Uuid16> {
        self.typ
    }

    /// Returns whether the attribute is a service declaration.
    #[inline]
    fn is_service(&self) -> bool {
        self.typ == Some(Declaration::PRIMARY_SERVICE)
            || self.typ == Some(Declaration::SECONDARY_SERVICE)
    }
}

/// Iterator over service groups.
#[derive(Clone, Debug)]
pub(super) struct ServiceGroups<'a> {
    db: &'a Db,
    i: usize,
}

/// One service and the handle range that its attributes span.
#[derive(Clone, Copy, Debug)]
pub(super) struct ServiceGroup<'a> {
    pub hdl: Handle,
    pub end: Handle,
    pub decl: &'a Attr,
}

impl<'a> Iterator for ServiceGroups<'a> {
    type Item = ServiceGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let attr = &self.db.attr;
        let s = self.i + attr.get(self.i..)?.iter().position(Attr::is_service)?;
        let e = (attr[s + 1..].iter().position(Attr::is_service))
            .map_or(attr.len(), |j| s + 1 + j);
        self.i = e;
        Some(ServiceGroup {
            hdl: Handle::from_index(s)?,
            end: Handle::from_index(e - 1)?,
            decl: &attr[s],
        })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.db.attr.len() - self.i))
    }
}

impl std::iter::FusedIterator for ServiceGroups<'_> {}
