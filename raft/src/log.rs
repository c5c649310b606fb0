use serde::{Deserialize, Serialize};

use crate::replica::ReplicaId;

/// One state-machine command. `received_by` names the replica that accepted
/// this entry from a client while it was leader, so a later log
/// reconciliation that truncates the entry knows which client to redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub key: String,
    pub value: String,
    pub client_id: ReplicaId,
    pub request_id: String,
    pub received_by: ReplicaId,
}
