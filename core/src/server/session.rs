//! Per-connection authentication state.

use std::net::SocketAddr;

use subtle::ConstantTimeEq;

use crate::storage::LABEL_LEN;

/// The state of one client connection. Every connection starts
/// unauthenticated; only CONNECT can move it forward.
pub struct Session {
    peer: SocketAddr,
    authenticated: bool,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Self {
        Session {
            peer,
            authenticated: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Compares the client token against the server token in constant time
    /// and updates the session state. The comparison scans every byte
    /// regardless of where the first difference sits.
    pub fn authenticate(
        &mut self,
        client_token: &[u8; LABEL_LEN],
        server_token: &[u8; LABEL_LEN],
    ) -> bool {
        self.authenticated = client_token.ct_eq(server_token).into();
        self.authenticated
    }

    /// Returns the session to the unauthenticated state.
    pub fn disconnect(&mut self) {
        self.authenticated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("127.0.0.1:0".parse().unwrap())
    }

    fn token(fill: u8) -> [u8; LABEL_LEN] {
        [fill; LABEL_LEN]
    }

    #[test]
    fn starts_unauthenticated() {
        assert!(!session().is_authenticated());
    }

    #[test]
    fn matching_token_authenticates() {
        let mut s = session();
        assert!(s.authenticate(&token(0xAB), &token(0xAB)));
        assert!(s.is_authenticated());
    }

    #[test]
    fn wrong_token_rejected() {
        let mut s = session();
        let mut nearly = token(0xAB);
        nearly[31] ^= 1;
        assert!(!s.authenticate(&nearly, &token(0xAB)));
        assert!(!s.is_authenticated());
    }

    #[test]
    fn disconnect_resets() {
        let mut s = session();
        s.authenticate(&token(1), &token(1));
        s.disconnect();
        assert!(!s.is_authenticated());
    }

    #[test]
    fn failed_attempt_clears_previous_auth() {
        let mut s = session();
        s.authenticate(&token(1), &token(1));
        assert!(!s.authenticate(&token(2), &token(1)));
        assert!(!s.is_authenticated());
    }
}
