//! Wire messages: a tagged sum type over every kind in the protocol.
//! Unknown `type` tags and missing required fields are both rejected at
//! decode time by serde's enum matching, turning them into a `CodecError`
//! the caller drops per the error-handling policy.

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::replica::ReplicaId;

/// Sentinel used for `leader`/`dst` when no leader is known, or to address
/// all peers at once.
pub const UNKNOWN_OR_BROADCAST: &str = "FFFF";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub src: ReplicaId,
    pub dst: ReplicaId,
    pub leader: ReplicaId,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Body {
    #[serde(rename = "get")]
    Get {
        #[serde(rename = "MID")]
        mid: String,
        key: String,
    },
    #[serde(rename = "put")]
    Put {
        #[serde(rename = "MID")]
        mid: String,
        key: String,
        value: String,
    },
    #[serde(rename = "ok")]
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        value: Option<String>,
    },
    #[serde(rename = "redirect")]
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },
    #[serde(rename = "fail")]
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },
    #[serde(rename = "appendEntries")]
    AppendEntries {
        term: u64,
        #[serde(rename = "prevLogIndex")]
        prev_log_index: i64,
        #[serde(rename = "prevLogTerm")]
        prev_log_term: i64,
        entries: Vec<LogEntry>,
        #[serde(rename = "leaderCommit")]
        leader_commit: i64,
    },
    #[serde(rename = "appendEntriesReply")]
    AppendEntriesReply { term: u64, success: bool },
    #[serde(rename = "requestVote")]
    RequestVote {
        term: u64,
        #[serde(rename = "lastLogIndex")]
        last_log_index: i64,
        #[serde(rename = "lastLogTerm")]
        last_log_term: i64,
    },
    #[serde(rename = "vote")]
    Vote { term: u64, vote: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed message json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Message serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
