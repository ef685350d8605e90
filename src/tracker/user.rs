//! User accounts

use crate::protocol::PeerEndpoint;

/// A registered account and its current piece server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    passcode: String,
    endpoint: Option<(String, u16)>,
    connected: bool,
}

impl User {
    pub fn new(id: impl Into<String>, passcode: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            passcode: passcode.into(),
            endpoint: None,
            connected: false,
        }
    }

    pub fn check_passcode(&self, passcode: &str) -> bool {
        self.passcode == passcode
    }

    /// Mark connected and remember where the user serves pieces
    pub fn login(&mut self, address: impl Into<String>, port: u16) {
        self.endpoint = Some((address.into(), port));
        self.connected = true;
    }

    pub fn logout(&mut self) {
        self.endpoint = None;
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Piece server endpoint, only while connected
    pub fn endpoint(&self) -> Option<PeerEndpoint> {
        match (&self.endpoint, self.connected) {
            (Some((address, port)), true) => Some(PeerEndpoint::new(self.id.clone(), address.clone(), *port)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_logout() {
        let mut user = User::new("alice", "pw");
        assert!(user.check_passcode("pw"));
        assert!(!user.check_passcode("nope"));
        assert!(user.endpoint().is_none());

        user.login("127.0.0.1", 7001);
        assert!(user.is_connected());
        assert_eq!(user.endpoint().unwrap().socket_addr(), "127.0.0.1:7001");

        user.logout();
        assert!(!user.is_connected());
        assert!(user.endpoint().is_none());
    }
}
