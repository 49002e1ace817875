//! Relayer key handling
//!
//! Loads the two signing identities the relayer needs: a secp256k1 key for EVM
//! mint transactions and an Ed25519 keypair for Solana mint transactions.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use solana_sdk::signer::keypair::{keypair_from_seed, Keypair};

// ============================================================================
// EVM SIGNER
// ============================================================================

/// secp256k1 signer for EVM transactions.
#[derive(Clone)]
pub struct EvmSigner {
    signing_key: SigningKey,
}

impl std::fmt::Debug for EvmSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmSigner")
            .field("address", &self.address().unwrap_or_default())
            .finish()
    }
}

impl EvmSigner {
    /// Parses a hex private key, with or without the `0x` prefix.
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let trimmed = private_key.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(stripped).context("EVM private key is not valid hex")?;
        if bytes.len() != 32 {
            anyhow::bail!(
                "Invalid EVM private key length: expected 32 bytes, got {}",
                bytes.len()
            );
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("Invalid secp256k1 private key: {}", e))?;
        Ok(Self { signing_key })
    }

    /// Ethereum address: last 20 bytes of keccak256 over the uncompressed public key.
    pub fn address(&self) -> Result<String> {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let public_key_bytes = point.as_bytes();
        if public_key_bytes.len() != 65 || public_key_bytes[0] != 0x04 {
            anyhow::bail!("Invalid public key format: expected 65 bytes with 0x04 prefix");
        }

        let hash = Keccak256::digest(&public_key_bytes[1..]);
        Ok(format!("0x{}", hex::encode(&hash[12..32])))
    }

    /// Signs a 32-byte transaction hash.
    ///
    /// # Returns
    ///
    /// * `Ok((r, s, recovery_id))` - Signature components with recovery id 0 or 1
    /// * `Err(anyhow::Error)` - Signing failed
    pub fn sign_transaction_hash(&self, tx_hash: &[u8; 32]) -> Result<([u8; 32], [u8; 32], u8)> {
        use k256::ecdsa::signature::hazmat::PrehashSigner;
        let signature: EcdsaSignature = self
            .signing_key
            .sign_prehash(tx_hash)
            .map_err(|e| anyhow::anyhow!("Failed to sign transaction hash: {}", e))?;
        // Ethereum requires low-s signatures
        let signature = signature.normalize_s().unwrap_or(signature);

        let sig_bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[..32]);
        s.copy_from_slice(&sig_bytes[32..64]);

        let expected = self.signing_key.verifying_key().to_encoded_point(false);
        let mut recovery_id = None;
        for candidate in 0u8..=1 {
            let Some(id) = RecoveryId::from_byte(candidate) else {
                continue;
            };
            if let Ok(recovered) = VerifyingKey::recover_from_prehash(tx_hash, &signature, id) {
                if recovered.to_encoded_point(false) == expected {
                    recovery_id = Some(candidate);
                    break;
                }
            }
        }
        let recovery_id = recovery_id
            .ok_or_else(|| anyhow::anyhow!("Could not determine signature recovery id"))?;

        Ok((r, s, recovery_id))
    }
}

// ============================================================================
// SOLANA KEYPAIR
// ============================================================================

/// Parses a Solana keypair from a JSON byte array, base58 or base64 string.
///
/// The decoded bytes may be a full 64-byte keypair or a 32-byte Ed25519 seed.
pub fn load_solana_keypair(raw: &str) -> Result<Keypair> {
    let trimmed = raw.trim();

    let bytes = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<u8>>(trimmed)
            .context("Failed to parse Solana keypair JSON byte array")?
    } else if let Ok(decoded) = bs58::decode(trimmed).into_vec() {
        decoded
    } else {
        STANDARD
            .decode(trimmed)
            .context("Solana keypair is neither a JSON array, base58 nor base64")?
    };

    keypair_from_bytes(&bytes)
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    match bytes.len() {
        64 => Keypair::try_from(bytes).context("Failed to create Solana keypair"),
        32 => keypair_from_seed(bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create Solana keypair from seed: {}", e)),
        other => anyhow::bail!(
            "Invalid Solana keypair length: expected 64 (or 32-byte seed), got {}",
            other
        ),
    }
}
