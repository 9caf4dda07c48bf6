//! Client side of the SASL mechanisms used against MSK.
//!
//! Only message construction and verification live here; the session
//! carries the bytes over SaslAuthenticate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha512};

use crate::error::{KafkaError, KafkaResult};

pub const SCRAM_SHA_512: &str = "SCRAM-SHA-512";
pub const OAUTHBEARER: &str = "OAUTHBEARER";

/// RFC 7628 initial client response carrying a bearer token.
pub fn oauthbearer_initial_response(token: &str) -> Vec<u8> {
    format!("n,,\x01auth=Bearer {token}\x01\x01").into_bytes()
}

fn scram_error(message: impl Into<String>) -> KafkaError {
    KafkaError::Sasl {
        mechanism: SCRAM_SHA_512,
        message: message.into(),
    }
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> KafkaResult<Vec<u8>> {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(key).map_err(|e| scram_error(format!("hmac key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Usernames escape `=` and `,` per RFC 5802.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

/// SCRAM-SHA-512 client conversation.
pub struct ScramClient {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        let random: [u8; 24] = rand::thread_rng().gen();
        Self::with_nonce(username, password, BASE64.encode(random))
    }

    fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        let client_first_bare = format!("n={},r={}", escape_username(username), client_nonce);
        Self {
            password: password.to_string(),
            client_nonce,
            client_first_bare,
            server_signature: None,
        }
    }

    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare).into_bytes()
    }

    /// Consume server-first and produce client-final.
    pub fn client_final(&mut self, server_first: &[u8]) -> KafkaResult<Vec<u8>> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| scram_error("server-first-message is not UTF-8"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|e| scram_error(format!("invalid salt: {e}")))?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|e| scram_error(format!("invalid iteration count: {e}")))?,
                );
            } else if let Some(value) = part.strip_prefix("e=") {
                return Err(scram_error(format!("server rejected client-first: {value}")));
            }
        }
        let nonce = nonce.ok_or_else(|| scram_error("server-first-message missing nonce"))?;
        let salt = salt.ok_or_else(|| scram_error("server-first-message missing salt"))?;
        let iterations =
            iterations.ok_or_else(|| scram_error("server-first-message missing iterations"))?;

        if !nonce.starts_with(&self.client_nonce) {
            return Err(scram_error("server nonce does not extend client nonce"));
        }

        let mut salted_password = [0u8; 64];
        pbkdf2_hmac::<Sha512>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );
        let client_key = hmac_sha512(&salted_password, b"Client Key")?;
        let stored_key = Sha512::digest(&client_key);
        let server_key = hmac_sha512(&salted_password, b"Server Key")?;

        // c=biws is base64("n,,")
        let client_final_without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac_sha512(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.server_signature = Some(hmac_sha512(&server_key, auth_message.as_bytes())?);

        Ok(format!("{client_final_without_proof},p={}", BASE64.encode(proof)).into_bytes())
    }

    /// Verify the server's signature from server-final.
    pub fn verify_server_final(&self, server_final: &[u8]) -> KafkaResult<()> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| scram_error("server-final-message is not UTF-8"))?;
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(scram_error(format!("server rejected credentials: {error}")));
        }
        let expected = self
            .server_signature
            .as_ref()
            .ok_or_else(|| scram_error("server-final received before client-final"))?;
        let received = server_final
            .strip_prefix("v=")
            .and_then(|v| BASE64.decode(v).ok())
            .ok_or_else(|| scram_error("server-final-message missing verifier"))?;
        if &received != expected {
            return Err(scram_error("server signature mismatch"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Server side of one exchange, computed from the same primitives.
    fn server_first_and_final(
        client: &ScramClient,
        password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> (String, impl Fn(&str) -> String) {
        let nonce = format!("{}srv", client.client_nonce);
        let server_first = format!("r={nonce},s={},i={iterations}", BASE64.encode(salt));
        let client_first_bare = client.client_first_bare.clone();
        let password = password.to_string();
        let salt = salt.to_vec();
        let server_first_clone = server_first.clone();
        let finish = move |client_final: &str| {
            let without_proof = client_final.split(",p=").next().unwrap();
            let auth_message = format!("{client_first_bare},{server_first_clone},{without_proof}");
            let mut salted = [0u8; 64];
            pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, iterations, &mut salted);
            let server_key = hmac_sha512(&salted, b"Server Key").unwrap();
            let signature = hmac_sha512(&server_key, auth_message.as_bytes()).unwrap();
            format!("v={}", BASE64.encode(signature))
        };
        (server_first, finish)
    }

    #[test]
    fn test_full_exchange_verifies_server() {
        let mut client = ScramClient::with_nonce("svc=app", "secret", "abc123".to_string());
        assert_eq!(client.client_first(), b"n,,n=svc=3Dapp,r=abc123".to_vec());

        let (server_first, finish) = server_first_and_final(&client, "secret", b"salty", 4096);
        let client_final = client.client_final(server_first.as_bytes()).unwrap();
        let client_final = String::from_utf8(client_final).unwrap();
        assert!(client_final.starts_with("c=biws,r=abc123srv,p="));

        let server_final = finish(&client_final);
        client.verify_server_final(server_final.as_bytes()).unwrap();
    }

    #[test]
    fn test_wrong_server_signature_rejected() {
        let mut client = ScramClient::with_nonce("svc", "secret", "abc".to_string());
        let (server_first, finish) = server_first_and_final(&client, "other", b"salty", 4096);
        let client_final = client.client_final(server_first.as_bytes()).unwrap();
        let server_final = finish(std::str::from_utf8(&client_final).unwrap());
        assert!(client.verify_server_final(server_final.as_bytes()).is_err());
    }

    #[test]
    fn test_foreign_nonce_rejected() {
        let mut client = ScramClient::with_nonce("svc", "secret", "abc".to_string());
        let err = client
            .client_final(b"r=zzz,s=c2FsdA==,i=4096")
            .unwrap_err();
        assert!(err.to_string().contains("nonce"));
    }

    #[test]
    fn test_server_error_surfaces() {
        let client = ScramClient::with_nonce("svc", "secret", "abc".to_string());
        let err = client.verify_server_final(b"e=invalid-proof").unwrap_err();
        assert!(err.to_string().contains("invalid-proof"));
    }

    #[test]
    fn test_oauthbearer_framing() {
        assert_eq!(
            oauthbearer_initial_response("tok"),
            b"n,,\x01auth=Bearer tok\x01\x01".to_vec()
        );
    }
}
