use crate::gap::{uuid16, Uuid16};

/// GATT declaration attribute types ([Vol 3] Part G, Section 3).
#[derive(Debug)]
pub struct Declaration;

impl Declaration {
    pub const PRIMARY_SERVICE: Uuid16 = uuid16(0x2800);
    pub const SECONDARY_SERVICE: Uuid16 = uuid16(0x2801);
    pub const INCLUDE: Uuid16 = uuid16(0x2802);
    pub const CHARACTERISTIC: Uuid16 = uuid16(0x2803);
}

/// GATT characteristic descriptor types ([Vol 3] Part G, Section 3.3.3).
#[derive(Debug)]
pub struct Descriptor;

impl Descriptor {
    pub const CHARACTERISTIC_EXTENDED_PROPERTIES: Uuid16 = uuid16(0x2900);
    pub const CHARACTERISTIC_USER_DESCRIPTION: Uuid16 = uuid16(0x2901);
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid16 = uuid16(0x2902);
}

bitflags::bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    #[derive(Default)]
    #[repr(transparent)]
    pub struct Prop: u8 {
        /// Permits broadcasts of the Characteristic Value using the Server
        /// Characteristic Configuration Descriptor.
        const BROADCAST = 0x01;
        /// Permits reads of the Characteristic Value.
        const READ = 0x02;
        /// Permits writes of the Characteristic Value without response.
        const WRITE_CMD = 0x04;
        /// Permits writes of the Characteristic Value with response.
        const WRITE = 0x08;
        /// Permits notifications of a Characteristic Value without
        /// acknowledgment. If set, the Client Characteristic Configuration
        /// Descriptor shall exist.
        const NOTIFY = 0x10;
        /// Permits indications of a Characteristic Value with acknowledgment.
        /// If set, the Client Characteristic Configuration Descriptor shall
        /// exist.
        const INDICATE = 0x20;
    }
}

bitflags::bitflags! {
    /// Client Characteristic Configuration descriptor value
    /// ([Vol 3] Part G, Section 3.3.3.3).
    #[derive(Default)]
    #[repr(transparent)]
    pub struct Cccd: u16 {
        /// The Characteristic Value shall be notified.
        const NOTIFY = 1 << 0;
        /// The Characteristic Value shall be indicated.
        const INDICATE = 1 << 1;
    }
}
