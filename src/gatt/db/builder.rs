use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use structbuf::{Pack, Packer, StructBuf};

use crate::gap::Uuid;

use super::*;

/// Database service definition marker type.
#[derive(Debug)]
pub struct ServiceDef;

/// Database characteristic definition marker type.
#[derive(Debug)]
pub struct CharacteristicDef;

/// Database builder used to define services, characteristics, and
/// descriptors. Handles are assigned in declaration order, starting at 1.
#[derive(Debug)]
#[repr(transparent)]
pub struct Builder<T>(DbBuilder, PhantomData<T>);

impl<T> Deref for Builder<T> {
    type Target = DbBuilder;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Builder<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Builder<Db> {
    /// Creates a new database builder.
    #[inline]
    #[must_use]
    pub(crate) fn new() -> Self {
        Self(
            DbBuilder {
                attr: Vec::with_capacity(16),
                data: Vec::with_capacity(128),
                ..DbBuilder::default()
            },
            PhantomData,
        )
    }

    /// Returns the final read-only table, the I/O callback map, and the
    /// notifying characteristic slots.
    #[must_use]
    pub(in crate::gatt) fn freeze(self) -> (Db, IoMap, Box<[(Handle, u8)]>) {
        (
            Db {
                attr: self.0.attr.into_boxed_slice(),
                data: self.0.data.into_boxed_slice(),
            },
            IoMap(self.0.io),
            self.0.ntf.into_boxed_slice(),
        )
    }

    /// Defines a primary service ([Vol 3] Part G, Section 3.1), calling
    /// `chars` to define its characteristics.
    pub fn primary_service<T>(
        &mut self,
        uuid: impl Into<Uuid>,
        chars: impl FnOnce(&mut Builder<ServiceDef>) -> T,
    ) -> (Handle, T) {
        let uuid = uuid.into();
        let hdl = self.decl(Declaration::PRIMARY_SERVICE, |p| put_uuid(p, uuid));
        let v = chars(self.builder());
        (hdl, v)
    }
}

impl Builder<ServiceDef> {
    /// Defines a characteristic with a host-owned value
    /// ([Vol 3] Part G, Section 3.3). Returns the value handle.
    ///
    /// A Client Characteristic Configuration descriptor is added
    /// automatically when `props` permits notifications or indications.
    pub fn characteristic<T>(
        &mut self,
        uuid: impl Into<Uuid>,
        props: Prop,
        io: impl Into<Io>,
        descs: impl FnOnce(&mut Builder<CharacteristicDef>) -> T,
    ) -> (Handle, T) {
        let vhdl = self.decl_value(uuid.into(), props);
        self.io.insert(vhdl, io.into());
        if props.intersects(Prop::NOTIFY | Prop::INDICATE) {
            let slot = self.ccc;
            assert!(slot < 32, "too many notifying characteristics");
            self.ccc += 1;
            self.append_attr(
                Some(Descriptor::CLIENT_CHARACTERISTIC_CONFIGURATION),
                AttrKind::ClientConfig(slot),
            );
            if props.contains(Prop::NOTIFY) {
                self.ntf.push((vhdl, slot));
            }
        }
        let v = descs(self.builder());
        (vhdl, v)
    }

    /// Defines a read-only characteristic with a table-stored value
    /// ([Vol 3] Part G, Section 3.3). Returns the value handle.
    pub fn ro_characteristic(&mut self, uuid: impl Into<Uuid>, val: impl AsRef<[u8]>) -> Handle {
        let uuid = uuid.into();
        let vhdl = self.decl_value_hdr(uuid, Prop::READ);
        if uuid.as_u16().is_none() {
            self.append_data(&uuid.to_bytes());
        }
        let val = self.append_data(val.as_ref());
        self.attr.push(Attr {
            typ: uuid.as_uuid16(),
            val,
            kind: AttrKind::Stored,
        });
        vhdl
    }

    /// Adds characteristic and characteristic value declarations for a
    /// host-owned value. Returns the value handle.
    fn decl_value(&mut self, uuid: Uuid, props: Prop) -> Handle {
        let vhdl = self.decl_value_hdr(uuid, props);
        if uuid.as_u16().is_none() {
            self.append_data(&uuid.to_bytes());
        }
        let hdl = self.append_attr(uuid.as_uuid16(), AttrKind::Io(props));
        debug_assert_eq!(hdl, vhdl);
        hdl
    }

    /// Adds the characteristic declaration whose 19- or 5-byte value is
    /// `props + value handle + UUID`.
    fn decl_value_hdr(&mut self, uuid: Uuid, props: Prop) -> Handle {
        let vhdl = (self.next_handle().next()).expect("maximum handle reached");
        self.decl(Declaration::CHARACTERISTIC, |p| {
            p.u8(props.bits()).u16(u16::from(vhdl));
            put_uuid(p, uuid);
        });
        vhdl
    }
}

impl Builder<CharacteristicDef> {
    /// Declares a characteristic descriptor with a host-owned value
    /// ([Vol 3] Part G, Section 3.3.3).
    pub fn descriptor(
        &mut self,
        uuid: impl Into<Uuid>,
        props: Prop,
        io: impl Into<Io>,
    ) -> Handle {
        let uuid = uuid.into();
        if uuid.as_u16().is_none() {
            self.append_data(&uuid.to_bytes());
        }
        let hdl = self.append_attr(uuid.as_uuid16(), AttrKind::Io(props));
        self.io.insert(hdl, io.into());
        hdl
    }
}

/// Shared builder state. Only reachable through the typed [`Builder`]
/// wrappers.
#[derive(Debug, Default)]
pub struct DbBuilder {
    attr: Vec<Attr>,
    data: Vec<u8>,
    io: BTreeMap<Handle, Io>,
    ntf: Vec<(Handle, u8)>,
    ccc: u8,
}

impl DbBuilder {
    /// Reborrows the state as a typed builder.
    fn builder<T>(&mut self) -> &mut Builder<T> {
        // SAFETY: Builder<T> is a repr(transparent) wrapper around DbBuilder
        unsafe { &mut *(self as *mut Self).cast() }
    }

    /// Returns the handle of the next appended attribute.
    fn next_handle(&self) -> Handle {
        Handle::from_index(self.attr.len()).expect("maximum handle reached")
    }

    /// Appends an attribute without a stored value. For a 128-bit type, the
    /// UUID must already be the last 16 bytes of the data arena.
    fn append_attr(&mut self, typ: Option<Uuid16>, kind: AttrKind) -> Handle {
        let hdl = self.next_handle();
        let i = Idx::try_from(self.data.len()).expect("attribute data overflow");
        self.attr.push(Attr {
            typ,
            val: (i, i),
            kind,
        });
        hdl
    }

    /// Appends raw bytes to the data arena.
    fn append_data(&mut self, v: &[u8]) -> (Idx, Idx) {
        let i = Idx::try_from(self.data.len()).expect("attribute data overflow");
        self.data.extend_from_slice(v);
        let j = Idx::try_from(self.data.len()).expect("attribute data overflow");
        (i, j)
    }

    /// Appends a declaration attribute, calling `f` to encode its value.
    fn decl(&mut self, typ: Uuid16, f: impl FnOnce(&mut Packer)) -> Handle {
        let mut v = StructBuf::new(19);
        f(&mut v.append());
        let val = self.append_data(v.as_ref());
        let hdl = self.next_handle();
        self.attr.push(Attr {
            typ: Some(typ),
            val,
            kind: AttrKind::Stored,
        });
        hdl
    }
}

/// Writes either a 16- or a 128-bit UUID at the current index.
#[inline]
fn put_uuid(p: &mut Packer, u: Uuid) {
    match u.as_u16() {
        Some(v) => {
            p.u16(v);
        }
        None => {
            p.u128(u128::from(u));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::gap::uuid16;

    use super::*;

    fn nop() -> Io {
        Io::from(|_: IoReq| Err(ErrorCode::UnlikelyError))
    }

    #[test]
    fn handle_numbering() {
        let mut b = Builder::<Db>::new();
        let (svc, vhdl) = b.primary_service(uuid16(0x180F), |s| {
            s.characteristic(uuid16(0x2A19), Prop::READ | Prop::NOTIFY, nop(), |_| {})
                .0
        });
        let (svc2, name) = b.primary_service(uuid16(0x1800), |s| {
            s.ro_characteristic(uuid16(0x2A00), b"bluejay")
        });
        let (db, _, ntf) = b.freeze();

        assert_eq!(u16::from(svc), 1);
        assert_eq!(u16::from(vhdl), 3); // decl = 2, value = 3, CCCD = 4
        assert_eq!(u16::from(svc2), 5);
        assert_eq!(u16::from(name), 7);
        assert_eq!(db.len(), 7);
        assert_eq!(ntf.as_ref(), &[(vhdl, 0)]);
    }

    #[test]
    fn declaration_values() {
        let mut b = Builder::<Db>::new();
        let (_, (vhdl, _)) = b.primary_service(uuid16(0x180F), |s| {
            s.characteristic(uuid16(0x2A19), Prop::READ | Prop::WRITE, nop(), |_| {})
        });
        let (db, ..) = b.freeze();

        let svc = db.get(Handle::new(1).unwrap()).unwrap();
        assert_eq!(db.typ(svc), Declaration::PRIMARY_SERVICE.as_uuid());
        assert_eq!(db.value(svc), &[0x0F, 0x18]);

        let decl = db.get(Handle::new(2).unwrap()).unwrap();
        assert_eq!(db.value(decl), &[0x0A, 0x03, 0x00, 0x19, 0x2A]);

        let val = db.get(vhdl).unwrap();
        assert!(val.is_16bit());
        assert_eq!(db.typ(val), uuid16(0x2A19).as_uuid());
    }

    #[test]
    fn long_uuid_arena() {
        const SVC: u128 = 0x8C8B4094_0DE2_499F_A28A_4EED5BC73CA9;
        const CHR: u128 = 0x8C8B4094_0DE2_499F_A28A_4EED5BC73CAA;
        let mut b = Builder::<Db>::new();
        let (_, (vhdl, _)) = b.primary_service(Uuid::new(SVC).unwrap(), |s| {
            s.characteristic(Uuid::new(CHR).unwrap(), Prop::READ, nop(), |_| {})
        });
        let (db, ..) = b.freeze();

        let svc = db.get(Handle::new(1).unwrap()).unwrap();
        assert_eq!(db.value(svc), &SVC.to_le_bytes());

        // The characteristic declaration value embeds the full UUID
        let decl = db.get(Handle::new(2).unwrap()).unwrap();
        let v = db.value(decl);
        assert_eq!(v.len(), 19);
        assert_eq!(v[0], Prop::READ.bits());
        assert_eq!(&v[1..3], &[0x03, 0x00]);
        assert_eq!(&v[3..19], &CHR.to_le_bytes());

        // The value attribute recovers the same UUID from the arena
        let val = db.get(vhdl).unwrap();
        assert!(!val.is_16bit());
        assert_eq!(db.typ(val), Uuid::new(CHR).unwrap());
    }

    #[test]
    fn service_groups() {
        let mut b = Builder::<Db>::new();
        b.primary_service(uuid16(0x180F), |s| {
            s.characteristic(uuid16(0x2A19), Prop::READ | Prop::NOTIFY, nop(), |_| {})
        });
        b.primary_service(uuid16(0x1800), |s| {
            s.ro_characteristic(uuid16(0x2A00), b"x")
        });
        let (db, ..) = b.freeze();

        let g: Vec<_> = (db.service_groups())
            .map(|g| (u16::from(g.hdl), u16::from(g.end)))
            .collect();
        assert_eq!(g, [(1, 4), (5, 7)]);
    }
}
