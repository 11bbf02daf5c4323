//! Advertising data assembly using the length-type-value format
//! (\[CSS\] Part A, Section 1 and [Assigned Numbers] Section 2.3).

use crate::att::Appender;

bitflags::bitflags! {
    /// Advertising flags (\[CSS\] Part A, Section 1.3).
    #[derive(Default)]
    #[repr(transparent)]
    pub struct AdvFlag: u8 {
        /// LE Limited Discoverable Mode.
        const LE_LIMITED = 0x01;
        /// LE General Discoverable Mode.
        const LE_GENERAL = 0x02;
        /// BR/EDR Not Supported.
        const NO_BREDR = 0x04;
    }
}

/// Advertising data types ([Assigned Numbers] Section 2.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub(crate) enum AdType {
    Flags = 0x01,
    ShortLocalName = 0x08,
    CompleteLocalName = 0x09,
}

/// Appends the Flags AD structure if it fits.
pub(crate) fn flags(p: &mut Appender, v: AdvFlag) {
    let _ = p.put(&[2, AdType::Flags.into(), v.bits()]);
}

/// Appends either the complete or a shortened Local Name AD structure,
/// depending on how much of the name fits (\[CSS\] Part A, Section 1.2).
pub(crate) fn local_name(p: &mut Appender, name: &str) {
    if p.remaining() < 3 || name.is_empty() {
        return;
    }
    let n = name.len().min(p.remaining() - 2).min(254);
    let typ = if n == name.len() {
        AdType::CompleteLocalName
    } else {
        AdType::ShortLocalName
    };
    #[allow(clippy::cast_possible_truncation)]
    let _ = p.u8(n as u8 + 1) && p.u8(typ.into()) && p.put(&name.as_bytes()[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_and_complete_name() {
        let mut buf = [0; 16];
        let mut p = Appender::new(&mut buf);
        flags(&mut p, AdvFlag::LE_GENERAL | AdvFlag::NO_BREDR);
        local_name(&mut p, "Pedometer");
        let n = p.len();
        let want = &[
            0x02, // Length of this Data
            0x01, // <Flags>
            0x06, // LE General Discoverable Mode | BR/EDR Not Supported
            0x0A, // Length of this Data
            0x09, // <Complete local name>
            0x50, // 'P'
            0x65, // 'e'
            0x64, // 'd'
            0x6F, // 'o'
            0x6D, // 'm'
            0x65, // 'e'
            0x74, // 't'
            0x65, // 'e'
            0x72, // 'r'
        ];
        assert_eq!(&buf[..n], want);
    }

    #[test]
    fn shortened_name() {
        let mut buf = [0; 8];
        let mut p = Appender::new(&mut buf);
        flags(&mut p, AdvFlag::LE_GENERAL | AdvFlag::NO_BREDR);
        local_name(&mut p, "Pedometer");
        let n = p.len();
        assert_eq!(&buf[..n], &[0x02, 0x01, 0x06, 0x04, 0x08, b'P', b'e', b'd']);
    }

    #[test]
    fn no_room_for_name() {
        let mut buf = [0; 5];
        let mut p = Appender::new(&mut buf);
        flags(&mut p, AdvFlag::LE_GENERAL);
        local_name(&mut p, "Pedometer");
        assert_eq!(p.len(), 3);
    }
}
