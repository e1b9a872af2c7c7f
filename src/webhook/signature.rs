use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Check that `signature` is the hex encoded HMAC-SHA256 of `body` under `secret`.
///
/// The comparison runs in constant time. Returns `false` when there is no
/// secret, the signature is missing or it is not valid hex.
pub fn verify_signature(body: &[u8], signature: Option<&str>, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        tracing::warn!("no webhook secret is configured, skipping signature verification");
        return false;
    };

    let Some(signature) = signature else {
        tracing::warn!("webhook delivery has no signature");
        return false;
    };

    let Ok(expected) = hex::decode(signature.trim()) else {
        tracing::warn!("webhook signature is not hex");
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&expected).is_ok()
}

/// The hex encoded HMAC-SHA256 of `body` under `secret`, as the bank sends it.
#[cfg(test)]
pub(crate) fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}
