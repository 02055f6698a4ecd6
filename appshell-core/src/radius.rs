//! RADIUS-backed user controller
//!
//! Implements the client side of RFC 2865 Access-Request with PAP:
//! - `User-Password` hidden with the shared secret and the request
//!   authenticator
//! - `NAS-Identifier` set to the crate name
//! - Response Authenticator checked before trusting the answer
//!
//! Only reads are supported: the backend cannot create or modify users.

use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use rand::RngCore;
use thiserror::Error;
use tokio::net::UdpSocket;

use crate::config::RadiusConfig;
use crate::users::{Identity, UserController};

const ACCESS_REQUEST: u8 = 1;
const ACCESS_ACCEPT: u8 = 2;
const ACCESS_REJECT: u8 = 3;
const ACCESS_CHALLENGE: u8 = 11;

const ATTR_USER_NAME: u8 = 1;
const ATTR_USER_PASSWORD: u8 = 2;
const ATTR_NAS_IDENTIFIER: u8 = 32;

const HEADER_LEN: usize = 20;
const MAX_PACKET_LEN: usize = 4096;
const MAX_PASSWORD_LEN: usize = 128;
const NAS_IDENTIFIER: &str = "appshell";

#[derive(Debug, Error)]
pub enum RadiusError {
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No response after {0} attempts")]
    Timeout(u32),

    #[error("Attribute too long: {0}")]
    AttributeTooLong(&'static str),

    #[error("Malformed response: {0}")]
    Malformed(&'static str),

    #[error("Response authenticator mismatch")]
    BadAuthenticator,
}

/// Outcome of an Access-Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResponse {
    Accept,
    Reject,
    Challenge,
}

/// Minimal RADIUS authentication client
pub struct RadiusClient {
    host: String,
    port: u16,
    secret: Vec<u8>,
    retries: u32,
    timeout: Duration,
}

impl RadiusClient {
    pub fn new(host: &str, port: u16, secret: &str, retries: u32, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            secret: secret.as_bytes().to_vec(),
            retries: retries.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &RadiusConfig) -> Self {
        Self::new(
            &config.host,
            config.port,
            &config.shared_secret,
            config.retries,
            Duration::from_secs(config.timeout),
        )
    }

    /// Send an Access-Request and wait for a verified answer
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AccessResponse, RadiusError> {
        let mut identifier = [0u8; 1];
        let mut authenticator = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut identifier);
        rand::thread_rng().fill_bytes(&mut authenticator);

        let packet = self.access_request(identifier[0], &authenticator, username, password)?;

        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect((self.host.as_str(), self.port)).await?;

        let mut buf = vec![0u8; MAX_PACKET_LEN];
        for attempt in 1..=self.retries {
            socket.send(&packet).await?;
            match tokio::time::timeout(self.timeout, socket.recv(&mut buf)).await {
                Ok(Ok(len)) => {
                    let reply = &buf[..len];
                    // Stray or stale datagram: keep waiting on the next attempt
                    if reply.len() >= 2 && reply[1] != identifier[0] {
                        tracing::debug!("Ignoring RADIUS reply with foreign identifier");
                        continue;
                    }
                    return self.parse_response(reply, identifier[0], &authenticator);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    tracing::debug!(
                        "RADIUS {}:{} timed out (attempt {}/{})",
                        self.host,
                        self.port,
                        attempt,
                        self.retries
                    );
                }
            }
        }
        Err(RadiusError::Timeout(self.retries))
    }

    fn access_request(
        &self,
        identifier: u8,
        authenticator: &[u8; 16],
        username: &str,
        password: &str,
    ) -> Result<Vec<u8>, RadiusError> {
        let mut attributes = Vec::new();
        push_attribute(&mut attributes, ATTR_USER_NAME, username.as_bytes(), "User-Name")?;
        let hidden = hide_password(password.as_bytes(), &self.secret, authenticator)?;
        push_attribute(&mut attributes, ATTR_USER_PASSWORD, &hidden, "User-Password")?;
        push_attribute(&mut attributes, ATTR_NAS_IDENTIFIER, NAS_IDENTIFIER.as_bytes(), "NAS-Identifier")?;

        let length = (HEADER_LEN + attributes.len()) as u16;
        let mut packet = Vec::with_capacity(length as usize);
        packet.push(ACCESS_REQUEST);
        packet.push(identifier);
        packet.extend_from_slice(&length.to_be_bytes());
        packet.extend_from_slice(authenticator);
        packet.extend_from_slice(&attributes);
        Ok(packet)
    }

    fn parse_response(
        &self,
        reply: &[u8],
        identifier: u8,
        request_authenticator: &[u8; 16],
    ) -> Result<AccessResponse, RadiusError> {
        if reply.len() < HEADER_LEN {
            return Err(RadiusError::Malformed("short packet"));
        }
        let length = u16::from_be_bytes([reply[2], reply[3]]) as usize;
        if length < HEADER_LEN || length > reply.len() {
            return Err(RadiusError::Malformed("bad length"));
        }
        if reply[1] != identifier {
            return Err(RadiusError::Malformed("identifier mismatch"));
        }

        let mut hasher = Md5::new();
        hasher.update(&reply[..4]);
        hasher.update(request_authenticator);
        hasher.update(&reply[HEADER_LEN..length]);
        hasher.update(&self.secret);
        if hasher.finalize().as_slice() != &reply[4..HEADER_LEN] {
            return Err(RadiusError::BadAuthenticator);
        }

        match reply[0] {
            ACCESS_ACCEPT => Ok(AccessResponse::Accept),
            ACCESS_REJECT => Ok(AccessResponse::Reject),
            ACCESS_CHALLENGE => Ok(AccessResponse::Challenge),
            _ => Err(RadiusError::Malformed("unexpected code")),
        }
    }
}

fn push_attribute(out: &mut Vec<u8>, kind: u8, value: &[u8], name: &'static str) -> Result<(), RadiusError> {
    if value.len() > 253 {
        return Err(RadiusError::AttributeTooLong(name));
    }
    out.push(kind);
    out.push((value.len() + 2) as u8);
    out.extend_from_slice(value);
    Ok(())
}

/// RFC 2865 §5.2 password hiding
fn hide_password(password: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> Result<Vec<u8>, RadiusError> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(RadiusError::AttributeTooLong("User-Password"));
    }
    let padded_len = password.len().div_ceil(16).max(1) * 16;
    let mut padded = password.to_vec();
    padded.resize(padded_len, 0);

    let mut hidden = Vec::with_capacity(padded_len);
    let mut previous: Vec<u8> = authenticator.to_vec();
    for chunk in padded.chunks(16) {
        let mut hasher = Md5::new();
        hasher.update(secret);
        hasher.update(&previous);
        let mask = hasher.finalize();
        let block: Vec<u8> = chunk.iter().zip(mask.iter()).map(|(p, m)| p ^ m).collect();
        hidden.extend_from_slice(&block);
        previous = block;
    }
    Ok(hidden)
}

/// User controller delegating authentication to a RADIUS server
pub struct RadiusUserController {
    client: RadiusClient,
    info: String,
    user_table: Vec<String>,
}

impl RadiusUserController {
    pub fn new(config: &RadiusConfig) -> Self {
        let info = format!("{}:{}", config.host, config.port);
        tracing::info!("RadiusUserController({}): Using RADIUS server", info);
        Self {
            client: RadiusClient::from_config(config),
            info,
            user_table: config.user_table.iter().map(|u| u.trim().to_lowercase()).collect(),
        }
    }

    fn permitted(&self, username: &str) -> bool {
        self.user_table.is_empty() || self.user_table.iter().any(|u| u == username)
    }
}

#[async_trait]
impl UserController for RadiusUserController {
    fn describe(&self) -> String {
        format!("RadiusUserController({})", self.info)
    }

    async fn authenticate(&self, username: &str, password: &str) -> Option<Identity> {
        // Mobile keyboards like to capitalise and pad usernames
        let username = username.trim().to_lowercase();
        if !self.permitted(&username) {
            tracing::info!("{}: {}: Not in user table", self.describe(), username);
            return None;
        }

        match self.client.authenticate(&username, password).await {
            Ok(AccessResponse::Accept) => {
                tracing::info!("{}: {}: Auth Successful", self.describe(), username);
                Some(Identity::new(username.clone(), username, true, true))
            }
            Ok(response) => {
                tracing::info!("{}: {}: Auth failed ({:?})", self.describe(), username, response);
                None
            }
            Err(e) => {
                tracing::error!("{}: {}: RADIUS error: {}", self.describe(), username, e);
                None
            }
        }
    }

    async fn get_user(&self, user_id: &str) -> Option<Identity> {
        self.permitted(user_id)
            .then(|| Identity::new(user_id, user_id, true, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "testing123";

    /// Recover the password from a hidden User-Password value
    fn reveal(hidden: &[u8], secret: &[u8], authenticator: &[u8]) -> Vec<u8> {
        let mut plain = Vec::new();
        let mut previous = authenticator.to_vec();
        for chunk in hidden.chunks(16) {
            let mut hasher = Md5::new();
            hasher.update(secret);
            hasher.update(&previous);
            let mask = hasher.finalize();
            plain.extend(chunk.iter().zip(mask.iter()).map(|(c, m)| c ^ m));
            previous = chunk.to_vec();
        }
        while plain.last() == Some(&0) {
            plain.pop();
        }
        plain
    }

    fn attribute(packet: &[u8], kind: u8) -> Option<Vec<u8>> {
        let mut pos = HEADER_LEN;
        while pos + 2 <= packet.len() {
            let len = packet[pos + 1] as usize;
            if packet[pos] == kind {
                return Some(packet[pos + 2..pos + len].to_vec());
            }
            pos += len;
        }
        None
    }

    /// Fake server accepting `alice` / `wonderland`, counting requests
    async fn fake_server() -> (u16, Arc<AtomicUsize>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_PACKET_LEN];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let request = &buf[..len];
                let user = attribute(request, ATTR_USER_NAME).unwrap();
                let hidden = attribute(request, ATTR_USER_PASSWORD).unwrap();
                let password = reveal(&hidden, SECRET.as_bytes(), &request[4..20]);

                let code = if user == b"alice" && password == b"wonderland" {
                    ACCESS_ACCEPT
                } else {
                    ACCESS_REJECT
                };
                let mut reply = vec![code, request[1], 0, HEADER_LEN as u8];
                let mut hasher = Md5::new();
                hasher.update(&reply);
                hasher.update(&request[4..20]);
                hasher.update(SECRET.as_bytes());
                reply.extend_from_slice(&hasher.finalize());
                socket.send_to(&reply, peer).await.unwrap();
            }
        });

        (port, hits)
    }

    fn config(port: u16, user_table: &[&str]) -> RadiusConfig {
        RadiusConfig {
            host: "127.0.0.1".into(),
            shared_secret: SECRET.into(),
            port,
            user_table: user_table.iter().map(|u| u.to_string()).collect(),
            retries: 1,
            timeout: 2,
        }
    }

    #[test]
    fn test_password_hiding_round_trips() {
        let authenticator = [7u8; 16];
        let password = b"a-password-longer-than-sixteen-bytes";
        let hidden = hide_password(password, b"s", &authenticator).unwrap();
        assert_eq!(hidden.len(), 48);
        assert_eq!(reveal(&hidden, b"s", &authenticator), password.to_vec());
    }

    #[test]
    fn test_oversized_password_is_rejected() {
        let result = hide_password(&[b'x'; 129], b"s", &[0u8; 16]);
        assert!(matches!(result, Err(RadiusError::AttributeTooLong("User-Password"))));
    }

    #[tokio::test]
    async fn test_accept_and_reject() {
        let (port, _) = fake_server().await;
        let controller = RadiusUserController::new(&config(port, &[]));

        let identity = controller.authenticate("  Alice ", "wonderland").await.unwrap();
        assert_eq!(identity.username(), "alice");
        assert!(identity.is_authenticated());

        assert!(controller.authenticate("alice", "wrong").await.is_none());
    }

    #[tokio::test]
    async fn test_allow_list_short_circuits_network() {
        let (port, hits) = fake_server().await;
        let controller = RadiusUserController::new(&config(port, &["bob"]));

        assert!(controller.authenticate("alice", "wonderland").await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_secret_fails_authenticator_check() {
        let (port, _) = fake_server().await;
        let client = RadiusClient::new("127.0.0.1", port, "other-secret", 1, Duration::from_secs(2));
        let result = client.authenticate("alice", "wonderland").await;
        assert!(matches!(result, Err(RadiusError::BadAuthenticator)));
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_no_identity() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let mut cfg = config(port, &[]);
        cfg.timeout = 0;
        let controller = RadiusUserController::new(&cfg);
        assert!(controller.authenticate("alice", "wonderland").await.is_none());
        drop(socket);
    }

    #[tokio::test]
    async fn test_get_user_respects_allow_list() {
        let controller = RadiusUserController::new(&config(1812, &["bob"]));
        assert!(controller.get_user("bob").await.is_some());
        assert!(controller.get_user("alice").await.is_none());

        let open = RadiusUserController::new(&config(1812, &[]));
        assert!(open.get_user("alice").await.is_some());
    }
}
