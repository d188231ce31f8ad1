//! SCRAM-SHA-256 client messages (RFC 5802, RFC 7677).
//!
//! The exchange is modelled as values: [`ClientFirst`] is consumed by the
//! server-first message and yields a [`ClientFinal`], which verifies the
//! server-final message. No state is shared between handshakes.

use std::num::NonZeroU32;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ring::{
    digest,
    hmac,
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};

use crate::error::{AuthPhase, ClientError};

/// GS2 header for a client without channel binding.
const GS2_HEADER: &str = "n,,";
/// Base64 of [`GS2_HEADER`], sent back in the client-final message.
const CHANNEL_BINDING: &str = "biws";
/// Random bytes in a client nonce.
const NONCE_LEN: usize = 24;
/// Highest PBKDF2 iteration count a server may demand.
pub const MAX_ITERATIONS: u32 = 1_000_000;

fn first_err(message: impl Into<String>) -> ClientError { ClientError::auth(AuthPhase::ClientFirst, message) }

fn final_err(message: impl Into<String>) -> ClientError { ClientError::auth(AuthPhase::ClientFinal, message) }

/// Escape a username for the `n=` attribute.
fn sasl_name(username: &str) -> String { username.replace('=', "=3D").replace(',', "=2C") }

fn random_nonce() -> Result<String, ClientError> {
    let mut bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| first_err("system random source unavailable"))?;
    Ok(STANDARD.encode(bytes))
}

/// Client state before the server challenge.
#[derive(Clone)]
pub struct ClientFirst {
    password: String,
    nonce: String,
    bare: String,
}

impl std::fmt::Debug for ClientFirst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFirst")
            .field("bare", &self.bare)
            .finish_non_exhaustive()
    }
}

impl ClientFirst {
    /// Start an exchange with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Authentication`] if the system random source
    /// fails.
    pub fn new(username: &str, password: &str) -> Result<Self, ClientError> {
        Ok(Self::with_nonce(username, password, &random_nonce()?))
    }

    /// Start an exchange with a caller-chosen nonce.
    #[must_use]
    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            password: password.to_owned(),
            nonce: nonce.to_owned(),
            bare: format!("n={},r={nonce}", sasl_name(username)),
        }
    }

    /// The client-first message, GS2 header included.
    #[must_use]
    pub fn message(&self) -> String { format!("{GS2_HEADER}{}", self.bare) }

    /// Consume the server-first message and derive the client proof.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Authentication`] if the message is malformed,
    /// reports an error, requests an unsupported extension, or does not
    /// extend the client nonce.
    pub fn receive_server_first(self, server_first: &str) -> Result<ClientFinal, ClientError> {
        let challenge = ServerFirst::parse(server_first)?;
        if !challenge.nonce.starts_with(&self.nonce) || challenge.nonce.len() <= self.nonce.len() {
            return Err(first_err("server nonce does not extend client nonce"));
        }

        let mut salted = [0u8; digest::SHA256_OUTPUT_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            challenge.iterations,
            &challenge.salt,
            self.password.as_bytes(),
            &mut salted,
        );
        let salted_key = hmac::Key::new(hmac::HMAC_SHA256, &salted);
        let client_key = hmac::sign(&salted_key, b"Client Key");
        let stored_key = digest::digest(&digest::SHA256, client_key.as_ref());

        let without_proof = format!("c={CHANNEL_BINDING},r={}", challenge.nonce);
        let auth_message = format!("{},{server_first},{without_proof}", self.bare);

        let client_signature = hmac::sign(
            &hmac::Key::new(hmac::HMAC_SHA256, stored_key.as_ref()),
            auth_message.as_bytes(),
        );
        let proof: Vec<u8> = client_key
            .as_ref()
            .iter()
            .zip(client_signature.as_ref())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac::sign(&salted_key, b"Server Key");
        Ok(ClientFinal {
            message: format!("{without_proof},p={}", STANDARD.encode(proof)),
            server_key: hmac::Key::new(hmac::HMAC_SHA256, server_key.as_ref()),
            auth_message,
        })
    }
}

struct ServerFirst {
    nonce: String,
    salt: Vec<u8>,
    iterations: NonZeroU32,
}

impl ServerFirst {
    fn parse(message: &str) -> Result<Self, ClientError> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in message.split(',') {
            let (key, value) = attr
                .split_once('=')
                .ok_or_else(|| first_err(format!("malformed server-first attribute {attr:?}")))?;
            match key {
                "e" => return Err(first_err(format!("server rejected client-first: {value}"))),
                "m" => return Err(first_err("server requires an unsupported SCRAM extension")),
                "r" => nonce = Some(value.to_owned()),
                "s" => {
                    salt = Some(
                        STANDARD
                            .decode(value)
                            .map_err(|e| first_err(format!("salt is not base64: {e}")))?,
                    );
                }
                "i" => {
                    iterations = value
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n <= MAX_ITERATIONS)
                        .and_then(NonZeroU32::new);
                    if iterations.is_none() {
                        return Err(first_err(format!("invalid iteration count {value:?}")));
                    }
                }
                _ => {}
            }
        }
        Ok(Self {
            nonce: nonce.ok_or_else(|| first_err("server-first has no nonce"))?,
            salt: salt.ok_or_else(|| first_err("server-first has no salt"))?,
            iterations: iterations.ok_or_else(|| first_err("server-first has no iteration count"))?,
        })
    }
}

/// Client state after the server challenge.
#[derive(Clone)]
pub struct ClientFinal {
    message: String,
    server_key: hmac::Key,
    auth_message: String,
}

impl std::fmt::Debug for ClientFinal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFinal").finish_non_exhaustive()
    }
}

impl ClientFinal {
    /// The client-final message including the proof.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }

    /// Check the server signature in the server-final message.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Authentication`] if the server reports an
    /// error or its signature does not match.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), ClientError> {
        if let Some(reason) = server_final.strip_prefix("e=") {
            return Err(final_err(format!("server rejected client-final: {reason}")));
        }
        let encoded = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| final_err("server-final has no verifier"))?;
        let signature = STANDARD
            .decode(encoded)
            .map_err(|e| final_err(format!("server verifier is not base64: {e}")))?;
        hmac::verify(&self.server_key, self.auth_message.as_bytes(), &signature)
            .map_err(|_| final_err("server signature mismatch"))
    }
}
