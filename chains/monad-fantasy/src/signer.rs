use core_logic::error::WalletError;
use core_logic::{MessageSigner, PrivateKey};
use ethers::prelude::*;
use ethers::utils::{hash_message, to_checksum};
use hex::encode as hex_encode;

/// EIP-191 personal-message signer backed by an ethers `LocalWallet`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EthersSigner;

impl EthersSigner {
    fn wallet(key: &PrivateKey) -> Result<LocalWallet, WalletError> {
        key.expose()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|_| WalletError::InvalidKeyFormat)
    }
}

impl MessageSigner for EthersSigner {
    fn sign_message(&self, message: &str, key: &PrivateKey) -> Result<String, WalletError> {
        let wallet = Self::wallet(key)?;
        let signature = wallet
            .sign_hash(hash_message(message))
            .map_err(|_| WalletError::InvalidKeyFormat)?;
        Ok(format!("0x{}", hex_encode(signature.to_vec())))
    }

    /// EIP-55 checksummed address.
    fn address_of(&self, key: &PrivateKey) -> Result<String, WalletError> {
        Ok(to_checksum(&Self::wallet(key)?.address(), None))
    }
}
