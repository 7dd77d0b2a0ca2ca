use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use fundme_core::{Address, NativeAmount};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Gas limit used when the caller does not pick one.
pub const DEFAULT_GAS_LIMIT: u64 = 3_000_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    Fund { amount: NativeAmount },
    Withdraw,
    CheaperWithdraw,
    UpdateAnswer { answer: i128 },
}

impl Call {
    /// Native value the caller attaches to the call.
    pub fn value(&self) -> NativeAmount {
        match self {
            Call::Fund { amount } => *amount,
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Call::Fund { .. } => "fund",
            Call::Withdraw => "withdraw",
            Call::CheaperWithdraw => "cheaper_withdraw",
            Call::UpdateAnswer { .. } => "update_answer",
        }
    }

    fn commitment(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.name().as_bytes());
        match self {
            Call::Fund { amount } => buf.extend_from_slice(&amount.to_le_bytes()),
            Call::UpdateAnswer { answer } => buf.extend_from_slice(&answer.to_le_bytes()),
            Call::Withdraw | Call::CheaperWithdraw => {}
        }
        buf
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedTx {
    pub chain_id: u64,
    pub from: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub call: Call,
}

impl UnsignedTx {
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"fundme/tx");
        hasher.update(self.chain_id.to_le_bytes());
        hasher.update(self.from.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.gas_limit.to_le_bytes());
        hasher.update(self.call.commitment());
        hasher.finalize().into()
    }

    pub fn sign(self, key: &SigningKey) -> Transaction {
        let signature = key.sign(&self.digest());
        Transaction {
            body: self,
            signature: signature.to_bytes().to_vec(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub body: UnsignedTx,
    #[serde(with = "crate::tx::serde_bytes")]
    pub signature: Vec<u8>,
}

impl Transaction {
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.body.digest());
        hasher.update(&self.signature);
        hasher.finalize().into()
    }

    /// Checks that `body.from` signed this transaction.
    pub fn verify(&self) -> Result<(), SignatureError> {
        let key = VerifyingKey::from_bytes(self.body.from.as_bytes())
            .map_err(|_| SignatureError::MalformedKey(self.body.from))?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| SignatureError::MalformedSignature(self.body.from))?;
        key.verify_strict(&self.body.digest(), &signature)
            .map_err(|_| SignatureError::InvalidSignature(self.body.from))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("sender {0} is not an ed25519 key")]
    MalformedKey(Address),
    #[error("malformed signature from {0}")]
    MalformedSignature(Address),
    #[error("invalid signature from {0}")]
    InvalidSignature(Address),
}

/// Address of an externally owned account.
pub fn address_of(key: &SigningKey) -> Address {
    Address::from_bytes(key.verifying_key().to_bytes())
}

/// Deterministic development signer number `index` for `seed`.
pub fn dev_signer(seed: &[u8; 32], index: u32) -> SigningKey {
    let mut hasher = Sha256::new();
    hasher.update(b"fundme/devnet-account");
    hasher.update(seed);
    hasher.update(index.to_le_bytes());
    SigningKey::from_bytes(&hasher.finalize().into())
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
