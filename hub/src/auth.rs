use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};
use errors::{AuthError, Result};

/// Verifies worker identities on WebSocket upgrade.
///
/// The maintainer signs each node id offline; the server only holds the
/// public key. Tokens look like `node_id:base64(signature)` where the
/// signature is a detached Ed25519 signature over the raw node-id bytes.
pub struct NodeAuthenticator {
    verifying_key: VerifyingKey,
}

impl NodeAuthenticator {
    pub fn new(public_key_base64: &str) -> Result<Self> {
        if public_key_base64.is_empty() {
            return Err(AuthError::InvalidVerifyKey("not configured".into()).into());
        }

        let key_bytes = BASE64
            .decode(public_key_base64)
            .map_err(|e| AuthError::InvalidEncoding(Box::new(e)))?;

        let key_bytes: [u8; PUBLIC_KEY_LENGTH] = key_bytes.try_into().map_err(|v: Vec<u8>| {
            AuthError::InvalidVerifyKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                v.len()
            ))
        })?;

        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| AuthError::InvalidVerifyKey(e.to_string()))?;

        Ok(NodeAuthenticator { verifying_key })
    }

    /// Checks token format and signature, returning the node id.
    pub fn verify_token(&self, token: &str) -> Result<String> {
        let (node_id, signature_b64) = split_token(token)?;

        let signature_bytes = BASE64
            .decode(signature_b64)
            .map_err(|e| AuthError::InvalidEncoding(Box::new(e)))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| AuthError::InvalidSignature(node_id.to_string()))?;

        self.verifying_key
            .verify(node_id.as_bytes(), &signature)
            .map_err(|_| AuthError::InvalidSignature(node_id.to_string()))?;

        Ok(node_id.to_string())
    }
}

/// Splits on the last colon so node ids may themselves contain colons.
fn split_token(token: &str) -> Result<(&str, &str)> {
    match token.rfind(':') {
        Some(i) if i > 0 && i < token.len() - 1 => Ok((&token[..i], &token[i + 1..])),
        _ => Err(AuthError::InvalidTokenFormat.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair() -> (SigningKey, String) {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let public_b64 = BASE64.encode(signing_key.verifying_key().to_bytes());
        (signing_key, public_b64)
    }

    fn token_for(signing_key: &SigningKey, node_id: &str) -> String {
        let signature = signing_key.sign(node_id.as_bytes());
        format!("{}:{}", node_id, BASE64.encode(signature.to_bytes()))
    }

    #[test]
    fn valid_token_yields_the_node_id() {
        let (signing_key, public_b64) = keypair();
        let auth = NodeAuthenticator::new(&public_b64).unwrap();

        let node_id = auth.verify_token(&token_for(&signing_key, "node-7")).unwrap();
        assert_eq!(node_id, "node-7");
    }

    #[test]
    fn node_ids_may_contain_colons() {
        let (signing_key, public_b64) = keypair();
        let auth = NodeAuthenticator::new(&public_b64).unwrap();

        let node_id = auth
            .verify_token(&token_for(&signing_key, "eu:fra:worker-2"))
            .unwrap();
        assert_eq!(node_id, "eu:fra:worker-2");
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (signing_key, public_b64) = keypair();
        let auth = NodeAuthenticator::new(&public_b64).unwrap();

        let signature = signing_key.sign(b"node-7");
        let token = format!("node-8:{}", BASE64.encode(signature.to_bytes()));
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let (_, public_b64) = keypair();
        let auth = NodeAuthenticator::new(&public_b64).unwrap();

        assert!(auth.verify_token("no-colon").is_err());
        assert!(auth.verify_token(":sig-without-node").is_err());
        assert!(auth.verify_token("node-without-sig:").is_err());
        assert!(auth.verify_token("node-7:!!!not-base64!!!").is_err());
    }

    #[test]
    fn bad_public_keys_are_rejected_at_construction() {
        assert!(NodeAuthenticator::new("").is_err());
        assert!(NodeAuthenticator::new("AAAA").is_err());
        assert!(NodeAuthenticator::new("not base64 at all").is_err());
    }
}
