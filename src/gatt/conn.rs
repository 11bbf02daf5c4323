use smallvec::SmallVec;

use super::*;

/// Per-connection server state. The transport creates one instance per
/// L2CAP link and passes it by mutable reference on every dispatch; it
/// carries no references into the server and is discarded when the link
/// goes down.
#[derive(Clone, Debug)]
pub struct Connection {
    server_mtu: u16,
    client_mtu: u16,
    cccd: SmallVec<[Cccd; 8]>,
}

impl Connection {
    /// Creates connection state with the maximum transmission unit that the
    /// server can provide.
    ///
    /// # Panics
    ///
    /// Panics if `server_mtu` is below the default ATT MTU.
    #[must_use]
    pub fn new(server_mtu: u16) -> Self {
        assert!(server_mtu >= DEFAULT_MTU);
        Self {
            server_mtu,
            client_mtu: DEFAULT_MTU,
            cccd: SmallVec::new(),
        }
    }

    /// Returns the server MTU.
    #[inline(always)]
    #[must_use]
    pub const fn server_mtu(&self) -> u16 {
        self.server_mtu
    }

    /// Returns the client MTU. This is the default of 23 until the client
    /// performs an MTU exchange.
    #[inline(always)]
    #[must_use]
    pub const fn client_mtu(&self) -> u16 {
        self.client_mtu
    }

    /// Sets the MTU of the connected client, normally as a reaction to an
    /// `ATT_EXCHANGE_MTU_REQ`.
    #[inline]
    pub fn set_client_mtu(&mut self, mtu: u16) {
        debug_assert!(mtu >= DEFAULT_MTU);
        self.client_mtu = mtu;
    }

    /// Returns the negotiated MTU.
    #[inline]
    #[must_use]
    pub fn negotiated_mtu(&self) -> u16 {
        self.server_mtu.min(self.client_mtu)
    }

    /// Returns the client configuration bits for CCCD slot `i`.
    #[inline]
    pub(super) fn cccd(&self, i: u8) -> Cccd {
        (self.cccd.get(usize::from(i)).copied()).unwrap_or_default()
    }

    /// Sets the client configuration bits for CCCD slot `i`.
    pub(super) fn set_cccd(&mut self, i: u8, v: Cccd) {
        let i = usize::from(i);
        if i >= self.cccd.len() {
            self.cccd.resize(i + 1, Cccd::default());
        }
        self.cccd[i] = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_negotiation() {
        let mut cn = Connection::new(100);
        assert_eq!(cn.server_mtu(), 100);
        assert_eq!(cn.client_mtu(), 23);
        assert_eq!(cn.negotiated_mtu(), 23);
        cn.set_client_mtu(64);
        assert_eq!(cn.negotiated_mtu(), 64);
        cn.set_client_mtu(512);
        assert_eq!(cn.negotiated_mtu(), 100);
    }

    #[test]
    fn cccd_slots() {
        let mut cn = Connection::new(23);
        assert_eq!(cn.cccd(3), Cccd::default());
        cn.set_cccd(3, Cccd::NOTIFY);
        assert_eq!(cn.cccd(3), Cccd::NOTIFY);
        assert_eq!(cn.cccd(0), Cccd::default());
        cn.set_cccd(3, Cccd::default());
        assert_eq!(cn.cccd(3), Cccd::default());
    }

    #[test]
    #[should_panic]
    fn bad_server_mtu() {
        let _ = Connection::new(22);
    }
}
