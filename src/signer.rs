//! Pluggable signers and capability negotiation
//!
//! A signing identity exposes an explicit set of capabilities. The negotiator
//! picks the strongest one for the ledger at hand, then recovers the signer
//! from the digest and signature and compares it with the identity's key, so a
//! device signing with the wrong key is caught before anything is broadcast.

use crate::types::{account_address, AccountTx, TxId, UtxoAddress, UtxoTx};
use crate::{Error, Result};
use alloy_primitives::{eip191_hash_message, Address, Bytes, B256};
use async_trait::async_trait;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use tracing::debug;

/// 65 byte recoverable signature, `v` normalized to 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    pub r: B256,
    pub s: B256,
    pub v: u8,
}

impl RawSignature {
    /// Parses `r || s || v`, accepting both 0/1 and 27/28 recovery bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::InvalidSignature(format!(
                "expected 65 bytes, got {}",
                bytes.len()
            )));
        }
        let v = match bytes[64] {
            v @ (0 | 1) => v,
            v @ (27 | 28) => v - 27,
            v => return Err(Error::InvalidSignature(format!("invalid recovery byte {v}"))),
        };
        Ok(Self {
            r: B256::from_slice(&bytes[..32]),
            s: B256::from_slice(&bytes[32..64]),
            v,
        })
    }

    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }

    pub fn recover(&self, digest: &B256) -> Result<PublicKey> {
        let recovery_id = RecoveryId::from_i32(i32::from(self.v))
            .map_err(|e| Error::InvalidSignature(e.to_string()))?;
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(self.r.as_slice());
        compact[32..].copy_from_slice(self.s.as_slice());
        let signature = RecoverableSignature::from_compact(&compact, recovery_id)
            .map_err(|e| Error::InvalidSignature(e.to_string()))?;
        SECP256K1
            .recover_ecdsa(&Message::from_digest(digest.0), &signature)
            .map_err(|e| Error::InvalidSignature(e.to_string()))
    }
}

/// Signs an arbitrary 32 byte digest
#[async_trait]
pub trait DigestSigner: Send + Sync {
    async fn sign_digest(&self, digest: B256) -> Result<RawSignature>;
}

/// Signs `"\x19Ethereum Signed Message:\n" || len || message`
#[async_trait]
pub trait PrefixedMessageSigner: Send + Sync {
    async fn sign_prefixed_message(&self, message: &[u8]) -> Result<RawSignature>;
}

#[async_trait]
pub trait AccountTxSigner: Send + Sync {
    async fn sign_account_tx(&self, tx: &AccountTx) -> Result<RawSignature>;
}

#[async_trait]
pub trait UtxoTxSigner: Send + Sync {
    async fn sign_utxo_tx(&self, tx: &UtxoTx) -> Result<RawSignature>;
}

/// Signs and broadcasts an A-ledger transaction, returning the transaction id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmittingSigner: Send + Sync {
    async fn sign_and_submit(&self, tx: &AccountTx) -> Result<String>;
}

/// What a signing identity can do; absent entries are unsupported
#[derive(Clone, Copy, Default)]
pub struct SignerCapabilities<'a> {
    pub digest: Option<&'a dyn DigestSigner>,
    pub prefixed_message: Option<&'a dyn PrefixedMessageSigner>,
    pub account_tx: Option<&'a dyn AccountTxSigner>,
    pub utxo_tx: Option<&'a dyn UtxoTxSigner>,
    pub sign_and_submit: Option<&'a dyn SubmittingSigner>,
}

/// Recovery target of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKey {
    PublicKey(PublicKey),
    Address(Address),
}

impl IdentityKey {
    pub fn account_address(&self) -> Address {
        match self {
            IdentityKey::PublicKey(key) => account_address(key),
            IdentityKey::Address(address) => *address,
        }
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        match self {
            IdentityKey::PublicKey(key) => Some(*key),
            IdentityKey::Address(_) => None,
        }
    }

    /// U-ledger owner address; needs the public key
    pub fn utxo_address(&self) -> Result<UtxoAddress> {
        self.public_key()
            .map(|key| UtxoAddress::from_public_key(&key))
            .ok_or_else(|| {
                Error::InvalidParameter(
                    "U-ledger operations need an identity with a public key".to_string(),
                )
            })
    }
}

/// A participant able to authorize transactions
pub trait SigningIdentity: Send + Sync {
    fn key(&self) -> IdentityKey;

    fn capabilities(&self) -> SignerCapabilities<'_>;

    /// Group account the identity acts through, if any
    fn group_account(&self) -> Option<Address> {
        None
    }
}

/// Signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_id: TxId,
    pub raw: Bytes,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

/// Chooses a signing capability and checks the recovered signer
pub struct SignerNegotiator;

impl SignerNegotiator {
    /// Delegates to a sign-and-submit capability if the identity has one
    pub async fn sign_and_submit(
        identity: &dyn SigningIdentity,
        tx: &AccountTx,
    ) -> Result<Option<TxId>> {
        let Some(signer) = identity.capabilities().sign_and_submit else {
            return Ok(None);
        };
        debug!("Delegating signing and submission to the signer");
        let returned = signer.sign_and_submit(tx).await?;
        validate_tx_id(&returned).map(Some)
    }

    /// Transaction signing first, raw digest signing second
    pub async fn sign_account_tx(
        identity: &dyn SigningIdentity,
        tx: &AccountTx,
    ) -> Result<SignedTransaction> {
        let capabilities = identity.capabilities();
        let digest = tx.signing_digest();

        let signature = if let Some(signer) = capabilities.account_tx {
            debug!("Signing A-ledger transaction with transaction signer");
            signer.sign_account_tx(tx).await?
        } else if let Some(signer) = capabilities.digest {
            debug!("Signing A-ledger transaction digest {}", digest);
            signer.sign_digest(digest).await?
        } else {
            return Err(Error::NoSigningCapability(
                "A-ledger transactions need transaction or digest signing".to_string(),
            ));
        };

        let expected = identity.key().account_address();
        let recovered = account_address(&signature.recover(&digest)?);
        if recovered != expected {
            return Err(Error::SignatureMismatch {
                expected: expected.to_string(),
                recovered: recovered.to_string(),
            });
        }

        let raw = tx.signed_bytes(&signature);
        Ok(SignedTransaction {
            tx_id: AccountTx::tx_id(&raw),
            raw,
        })
    }

    /// Transaction signing, then raw digest, then prefixed message. The same
    /// signature covers every input.
    pub async fn sign_utxo_tx(
        identity: &dyn SigningIdentity,
        tx: &UtxoTx,
    ) -> Result<SignedTransaction> {
        let expected = identity.key().public_key().ok_or_else(|| {
            Error::NoSigningCapability(
                "U-ledger transactions need an identity with a public key".to_string(),
            )
        })?;
        let capabilities = identity.capabilities();
        let digest = tx.signing_digest()?;

        let (signature, recovery_digest) = if let Some(signer) = capabilities.utxo_tx {
            debug!("Signing U-ledger transaction with transaction signer");
            (signer.sign_utxo_tx(tx).await?, digest)
        } else if let Some(signer) = capabilities.digest {
            debug!("Signing U-ledger transaction digest {}", digest);
            (signer.sign_digest(digest).await?, digest)
        } else if let Some(signer) = capabilities.prefixed_message {
            let message = hex::encode(digest);
            debug!("Signing U-ledger transaction digest as prefixed message");
            (
                signer.sign_prefixed_message(message.as_bytes()).await?,
                eip191_hash_message(message.as_bytes()),
            )
        } else {
            return Err(Error::NoSigningCapability(
                "U-ledger transactions need transaction, digest or message signing".to_string(),
            ));
        };

        let recovered = signature.recover(&recovery_digest)?;
        if recovered != expected {
            return Err(Error::SignatureMismatch {
                expected: hex::encode(expected.serialize()),
                recovered: hex::encode(recovered.serialize()),
            });
        }

        let signatures = vec![signature; tx.signature_count()];
        let raw = tx.signed_bytes(&signatures)?;
        Ok(SignedTransaction {
            tx_id: UtxoTx::tx_id(&raw),
            raw,
        })
    }
}

/// Accepts a 32 byte hex hash, with or without `0x`
pub fn validate_tx_id(id: &str) -> Result<TxId> {
    let body = id.strip_prefix("0x").unwrap_or(id);
    if body.len() != 64 {
        return Err(Error::InvalidTransactionId(id.to_string()));
    }
    let bytes = hex::decode(body).map_err(|_| Error::InvalidTransactionId(id.to_string()))?;
    Ok(B256::from_slice(&bytes))
}

/// Which capabilities a [`LocalKeySigner`] advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSigningMode {
    /// Every capability except sign-and-submit
    Full,
    DigestOnly,
    PrefixedMessageOnly,
}

/// In-process secp256k1 key
pub struct LocalKeySigner {
    secret: SecretKey,
    public: PublicKey,
    mode: LocalSigningMode,
    group_account: Option<Address>,
}

impl LocalKeySigner {
    pub fn new(secret: SecretKey) -> Self {
        Self {
            public: secret.public_key(SECP256K1),
            secret,
            mode: LocalSigningMode::Full,
            group_account: None,
        }
    }

    pub fn from_slice(secret: &[u8]) -> Result<Self> {
        let secret = SecretKey::from_slice(secret)
            .map_err(|e| Error::InvalidParameter(format!("secret key: {e}")))?;
        Ok(Self::new(secret))
    }

    pub fn with_mode(mut self, mode: LocalSigningMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_group_account(mut self, group_account: Address) -> Self {
        self.group_account = Some(group_account);
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn address(&self) -> Address {
        account_address(&self.public)
    }

    fn sign_hash(&self, digest: &B256) -> RawSignature {
        let (recovery_id, compact) = SECP256K1
            .sign_ecdsa_recoverable(&Message::from_digest(digest.0), &self.secret)
            .serialize_compact();
        RawSignature {
            r: B256::from_slice(&compact[..32]),
            s: B256::from_slice(&compact[32..]),
            v: recovery_id.to_i32() as u8,
        }
    }
}

#[async_trait]
impl DigestSigner for LocalKeySigner {
    async fn sign_digest(&self, digest: B256) -> Result<RawSignature> {
        Ok(self.sign_hash(&digest))
    }
}

#[async_trait]
impl PrefixedMessageSigner for LocalKeySigner {
    async fn sign_prefixed_message(&self, message: &[u8]) -> Result<RawSignature> {
        Ok(self.sign_hash(&eip191_hash_message(message)))
    }
}

#[async_trait]
impl AccountTxSigner for LocalKeySigner {
    async fn sign_account_tx(&self, tx: &AccountTx) -> Result<RawSignature> {
        Ok(self.sign_hash(&tx.signing_digest()))
    }
}

#[async_trait]
impl UtxoTxSigner for LocalKeySigner {
    async fn sign_utxo_tx(&self, tx: &UtxoTx) -> Result<RawSignature> {
        Ok(self.sign_hash(&tx.signing_digest()?))
    }
}

impl SigningIdentity for LocalKeySigner {
    fn key(&self) -> IdentityKey {
        IdentityKey::PublicKey(self.public)
    }

    fn capabilities(&self) -> SignerCapabilities<'_> {
        match self.mode {
            LocalSigningMode::Full => SignerCapabilities {
                digest: Some(self),
                prefixed_message: Some(self),
                account_tx: Some(self),
                utxo_tx: Some(self),
                sign_and_submit: None,
            },
            LocalSigningMode::DigestOnly => SignerCapabilities {
                digest: Some(self),
                ..Default::default()
            },
            LocalSigningMode::PrefixedMessageOnly => SignerCapabilities {
                prefixed_message: Some(self),
                ..Default::default()
            },
        }
    }

    fn group_account(&self) -> Option<Address> {
        self.group_account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{UtxoOwners, UtxoOutput, UtxoTxKind, Utxo};
    use alloy_primitives::U256;

    fn signer(byte: u8) -> LocalKeySigner {
        LocalKeySigner::from_slice(&[byte; 32]).unwrap()
    }

    fn account_tx(from: Address) -> AccountTx {
        AccountTx {
            chain_id: 14,
            nonce: 7,
            from,
            to: Address::repeat_byte(0x22),
            value: U256::from(1_000u64),
            data: Bytes::new(),
            gas_limit: 21_000,
            max_fee_per_gas: 50_000_000_000,
            max_priority_fee_per_gas: 0,
        }
    }

    fn utxo_tx(owner: UtxoAddress) -> UtxoTx {
        let utxo = |index| Utxo {
            tx_id: B256::repeat_byte(5),
            output_index: index,
            asset_id: B256::repeat_byte(1),
            amount: 5_000_000,
            owners: UtxoOwners::single(owner),
        };
        UtxoTx {
            network_id: 14,
            ledger: B256::repeat_byte(2),
            inputs: vec![utxo(0), utxo(1)],
            outputs: vec![UtxoOutput {
                asset_id: B256::repeat_byte(1),
                amount: 9_000_000,
                owners: UtxoOwners::single(owner),
            }],
            kind: UtxoTxKind::Base,
            memo: Bytes::new(),
        }
    }

    /// Claims one key but signs with another
    struct Impostor {
        claimed: PublicKey,
        actual: LocalKeySigner,
    }

    impl SigningIdentity for Impostor {
        fn key(&self) -> IdentityKey {
            IdentityKey::PublicKey(self.claimed)
        }

        fn capabilities(&self) -> SignerCapabilities<'_> {
            self.actual.capabilities()
        }
    }

    struct AddressOnly(Address);

    impl SigningIdentity for AddressOnly {
        fn key(&self) -> IdentityKey {
            IdentityKey::Address(self.0)
        }

        fn capabilities(&self) -> SignerCapabilities<'_> {
            SignerCapabilities::default()
        }
    }

    struct Submitter {
        address: Address,
        inner: MockSubmittingSigner,
    }

    impl SigningIdentity for Submitter {
        fn key(&self) -> IdentityKey {
            IdentityKey::Address(self.address)
        }

        fn capabilities(&self) -> SignerCapabilities<'_> {
            SignerCapabilities {
                sign_and_submit: Some(&self.inner),
                ..Default::default()
            }
        }
    }

    #[test]
    fn test_signature_recovers_signer() {
        let signer = signer(1);
        let digest = B256::repeat_byte(0x42);
        let signature = signer.sign_hash(&digest);
        assert_eq!(signature.recover(&digest).unwrap(), signer.public_key());
    }

    #[test]
    fn test_recovery_byte_normalization() {
        let signature = signer(1).sign_hash(&B256::repeat_byte(3));
        let mut bytes = signature.to_bytes();
        bytes[64] += 27;
        assert_eq!(RawSignature::from_bytes(&bytes).unwrap(), signature);
        bytes[64] = 5;
        assert!(RawSignature::from_bytes(&bytes).is_err());
        assert!(RawSignature::from_bytes(&bytes[..64]).is_err());
    }

    #[tokio::test]
    async fn test_account_signing_paths() {
        for mode in [LocalSigningMode::Full, LocalSigningMode::DigestOnly] {
            let signer = signer(1).with_mode(mode);
            let tx = account_tx(signer.address());
            let signed = SignerNegotiator::sign_account_tx(&signer, &tx).await.unwrap();
            assert_eq!(signed.tx_id, AccountTx::tx_id(&signed.raw));
            assert_eq!(signed.raw[0], 0x02);
        }
    }

    #[tokio::test]
    async fn test_prefixed_message_only_cannot_sign_account_tx() {
        let signer = signer(1).with_mode(LocalSigningMode::PrefixedMessageOnly);
        let err = SignerNegotiator::sign_account_tx(&signer, &account_tx(signer.address()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSigningCapability(_)));
    }

    #[tokio::test]
    async fn test_utxo_signing_paths() {
        for mode in [
            LocalSigningMode::Full,
            LocalSigningMode::DigestOnly,
            LocalSigningMode::PrefixedMessageOnly,
        ] {
            let signer = signer(2).with_mode(mode);
            let tx = utxo_tx(UtxoAddress::from_public_key(&signer.public_key()));
            let signed = SignerNegotiator::sign_utxo_tx(&signer, &tx).await.unwrap();
            assert_eq!(signed.tx_id, UtxoTx::tx_id(&signed.raw));
            // unsigned body, count, one 65 byte credential per input
            assert_eq!(signed.raw.len(), tx.unsigned_bytes().unwrap().len() + 4 + 2 * 65);
        }
    }

    #[tokio::test]
    async fn test_mismatched_signer_is_rejected() {
        let impostor = Impostor {
            claimed: signer(1).public_key(),
            actual: signer(2),
        };
        let tx = account_tx(impostor.key().account_address());
        let err = SignerNegotiator::sign_account_tx(&impostor, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { .. }));

        let tx = utxo_tx(impostor.key().utxo_address().unwrap());
        let err = SignerNegotiator::sign_utxo_tx(&impostor, &tx).await.unwrap_err();
        assert!(matches!(err, Error::SignatureMismatch { .. }));
    }

    #[tokio::test]
    async fn test_address_only_identity_cannot_sign_utxo() {
        let identity = AddressOnly(Address::repeat_byte(9));
        let tx = utxo_tx(UtxoAddress([0; 20]));
        assert!(matches!(
            SignerNegotiator::sign_utxo_tx(&identity, &tx).await,
            Err(Error::NoSigningCapability(_))
        ));
        assert!(identity.key().utxo_address().is_err());
        assert_eq!(
            SignerNegotiator::sign_and_submit(&identity, &account_tx(identity.0))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_sign_and_submit_validates_returned_id() {
        let mut inner = MockSubmittingSigner::new();
        inner
            .expect_sign_and_submit()
            .times(1)
            .returning(|_| Ok(format!("0x{}", "ab".repeat(32))));
        let identity = Submitter {
            address: Address::repeat_byte(1),
            inner,
        };
        let id = SignerNegotiator::sign_and_submit(&identity, &account_tx(identity.address))
            .await
            .unwrap();
        assert_eq!(id, Some(B256::repeat_byte(0xab)));

        let mut inner = MockSubmittingSigner::new();
        inner
            .expect_sign_and_submit()
            .returning(|_| Ok("0x1234".to_string()));
        let identity = Submitter {
            address: Address::repeat_byte(1),
            inner,
        };
        let err = SignerNegotiator::sign_and_submit(&identity, &account_tx(identity.address))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransactionId(_)));
    }

    #[test]
    fn test_validate_tx_id() {
        assert!(validate_tx_id(&"cd".repeat(32)).is_ok());
        assert!(validate_tx_id(&format!("0x{}", "zz".repeat(32))).is_err());
        assert!(validate_tx_id("").is_err());
    }
}
