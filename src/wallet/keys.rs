//! Key material owned by one wallet.

use bitcoin::secp256k1::{All, Keypair, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};

/// A public point and, unless watch-only, its secret scalar. Immutable after load.
#[derive(Clone)]
pub struct KeyMaterial {
    secret: Option<SecretKey>,
    public: PublicKey,
}

impl KeyMaterial {
    pub fn from_secret(secp: &Secp256k1<All>, secret: SecretKey) -> Self {
        Self { public: secret.public_key(secp), secret: Some(secret) }
    }

    /// No secret: any signing attempt fails with a tweaking error.
    pub fn watch_only(public: PublicKey) -> Self {
        Self { secret: None, public }
    }

    pub fn public_key(&self) -> PublicKey { self.public }
    pub fn x_only(&self) -> XOnlyPublicKey { self.public.x_only_public_key().0 }
    pub fn secret(&self) -> Option<&SecretKey> { self.secret.as_ref() }
    pub fn is_watch_only(&self) -> bool { self.secret.is_none() }

    pub fn keypair(&self, secp: &Secp256k1<All>) -> Option<Keypair> {
        self.secret.as_ref().map(|sk| Keypair::from_secret_key(secp, sk))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public", &self.public)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_secret() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let key = KeyMaterial::from_secret(&secp, sk);
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&hex::encode(sk.secret_bytes())));
    }

    #[test]
    fn watch_only_has_no_keypair() {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let key = KeyMaterial::watch_only(sk.public_key(&secp));
        assert!(key.is_watch_only());
        assert!(key.keypair(&secp).is_none());
        assert_eq!(key.x_only(), sk.x_only_public_key(&secp).0);
    }
}
