//! Core chain types: headers, blocks, and their canonical RLP encoding.
//!
//! A header's proof-of-work [`HeaderVersion`] is carried alongside the
//! header but is never encoded or transmitted; it is derived from the block
//! height by [`ChainConfig::header_version`](crate::fork::ChainConfig::header_version)
//! and selects both the seal algorithm and the function behind
//! [`Header::hash`].

use primitive_types::{H160, H256, U256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

use crate::crypto::{keccak256, version_hash};
use crate::fork::HeaderVersion;

/// A 20-byte account address.
pub type Address = H160;

/// Number of RLP fields of a header without its seal.
const UNSEALED_FIELDS: usize = 12;
/// Number of RLP fields of a sealed header.
const SEALED_FIELDS: usize = 14;

/// A block header.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Header {
    pub parent_hash: H256,
    pub uncle_hash: H256,
    pub coinbase: Address,
    pub state_root: H256,
    pub tx_root: H256,
    pub receipt_root: H256,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Seconds since the Unix epoch.
    pub time: u64,
    pub extra: Vec<u8>,
    pub mix_digest: H256,
    pub nonce: u64,
    /// Proof-of-work algorithm, derived from height. Never hashed or sent.
    #[serde(skip)]
    pub version: Option<HeaderVersion>,
}

impl Header {
    fn stream(&self, s: &mut RlpStream, sealed: bool) {
        s.begin_list(if sealed { SEALED_FIELDS } else { UNSEALED_FIELDS });
        s.append(&self.parent_hash);
        s.append(&self.uncle_hash);
        s.append(&self.coinbase);
        s.append(&self.state_root);
        s.append(&self.tx_root);
        s.append(&self.receipt_root);
        s.append(&self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.time);
        s.append(&self.extra);
        if sealed {
            s.append(&self.mix_digest);
            s.append(&self.nonce.to_be_bytes().as_slice());
        }
    }

    /// RLP encoding of the header without mix digest and nonce.
    pub fn unsealed_rlp(&self) -> Vec<u8> {
        let mut s = RlpStream::new();
        self.stream(&mut s, false);
        s.out().to_vec()
    }

    /// Keccak-256 of the header without its seal: the proof-of-work job hash.
    pub fn hash_no_nonce(&self) -> H256 {
        keccak256(self.unsealed_rlp())
    }

    /// Block hash, computed with the algorithm of the header's version.
    ///
    /// Headers without a version hash with Keccak-256, like version 1.
    pub fn hash(&self) -> H256 {
        let encoded = rlp::encode(self);
        match self.version {
            None | Some(HeaderVersion::Keccak) => keccak256(&encoded),
            Some(version) => H256(version_hash(version, &encoded)),
        }
    }

    /// Set the version in place and return the resulting block hash.
    pub fn set_version(&mut self, version: HeaderVersion) -> H256 {
        self.version = Some(version);
        self.hash()
    }

    /// Copy of this header carrying `version`.
    pub fn with_version(&self, version: HeaderVersion) -> Header {
        Header {
            version: Some(version),
            ..self.clone()
        }
    }
}

impl Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        self.stream(s, true);
    }
}

impl Decodable for Header {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != SEALED_FIELDS {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let nonce_bytes: Vec<u8> = rlp.val_at(13)?;
        let nonce_bytes: [u8; 8] = nonce_bytes
            .try_into()
            .map_err(|_| DecoderError::Custom("nonce must be 8 bytes"))?;
        Ok(Header {
            parent_hash: rlp.val_at(0)?,
            uncle_hash: rlp.val_at(1)?,
            coinbase: rlp.val_at(2)?,
            state_root: rlp.val_at(3)?,
            tx_root: rlp.val_at(4)?,
            receipt_root: rlp.val_at(5)?,
            difficulty: rlp.val_at(6)?,
            number: rlp.val_at(7)?,
            gas_limit: rlp.val_at(8)?,
            gas_used: rlp.val_at(9)?,
            time: rlp.val_at(10)?,
            extra: rlp.val_at(11)?,
            mix_digest: rlp.val_at(12)?,
            nonce: u64::from_be_bytes(nonce_bytes),
            version: None,
        })
    }
}

/// An opaque, already-encoded transaction. Execution belongs to the host chain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Transaction(pub Vec<u8>);

impl Encodable for Transaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        self.0.rlp_append(s);
    }
}

impl Decodable for Transaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Transaction(rlp.as_val()?))
    }
}

/// An opaque transaction receipt. Receipts are not part of the block encoding.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Receipt(pub Vec<u8>);

/// Keccak-256 of the RLP list of `uncles`.
pub fn calc_uncle_hash(uncles: &[Header]) -> H256 {
    keccak256(rlp::encode_list::<Header, _>(uncles))
}

/// A block: header, transactions, uncle headers, and receipts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
    pub receipts: Vec<Receipt>,
}

impl Block {
    /// Assemble a block, committing the header to its uncle list.
    pub fn new(
        mut header: Header,
        transactions: Vec<Transaction>,
        uncles: Vec<Header>,
        receipts: Vec<Receipt>,
    ) -> Self {
        header.uncle_hash = calc_uncle_hash(&uncles);
        Self {
            header,
            transactions,
            uncles,
            receipts,
        }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    pub fn version(&self) -> Option<HeaderVersion> {
        self.header.version
    }

    /// Replace the header with a sealed copy, keeping the body.
    pub fn with_seal(&self, header: Header) -> Block {
        Block {
            header,
            ..self.clone()
        }
    }
}

impl Encodable for Block {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.header);
        s.append_list::<Transaction, _>(&self.transactions);
        s.append_list::<Header, _>(&self.uncles);
    }
}

impl Decodable for Block {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Block {
            header: rlp.val_at(0)?,
            transactions: rlp.list_at(1)?,
            uncles: rlp.list_at(2)?,
            receipts: Vec::new(),
        })
    }
}
