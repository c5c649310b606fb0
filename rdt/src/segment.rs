//! Wire segment: the unit exchanged between sender and receiver.
//!
//! Encoded as a JSON object per spec: `sequence`, `data`, `ack`, `eof`,
//! `checksum`. The checksum is an MD5 hex digest over the concatenation of
//! the other four fields' string forms, in that order.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

pub const DATA_SIZE: usize = 1000;
pub const MAX_DATAGRAM: usize = 1500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub sequence: u64,
    pub data: String,
    pub ack: bool,
    pub eof: bool,
    pub checksum: String,
}

/// An acknowledgment sent by the receiver back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckReply {
    pub ack: u64,
    pub expected_seq: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed segment json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checksum mismatch")]
    BadChecksum,
}

fn checksum_of(sequence: u64, data: &str, ack: bool, eof: bool) -> String {
    let mut hasher = Md5::new();
    hasher.update(sequence.to_string().as_bytes());
    hasher.update(data.as_bytes());
    hasher.update(ack.to_string().as_bytes());
    hasher.update(eof.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

impl Segment {
    pub fn data_segment(sequence: u64, data: String) -> Self {
        let checksum = checksum_of(sequence, &data, false, false);
        Segment {
            sequence,
            data,
            ack: false,
            eof: false,
            checksum,
        }
    }

    pub fn eof_segment(sequence: u64) -> Self {
        let checksum = checksum_of(sequence, "", false, true);
        Segment {
            sequence,
            data: String::new(),
            ack: false,
            eof: true,
            checksum,
        }
    }

    pub fn verify(&self) -> bool {
        checksum_of(self.sequence, &self.data, self.ack, self.eof) == self.checksum
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Segment serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let segment: Segment = serde_json::from_slice(bytes)?;
        if !segment.verify() {
            return Err(DecodeError::BadChecksum);
        }
        Ok(segment)
    }
}

impl AckReply {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("AckReply serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
