//! Replica state and the cooperative event loop that drives it: run leader
//! or follower duties for this tick, then apply whatever just committed.
//! Mirrors the teacher's `TCB`: one struct owning all protocol state, with
//! behavior split across `election.rs`, `replication.rs`, and `client.rs`
//! as separate `impl Replica` blocks for the three subsystems.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::log::LogEntry;
use crate::message::{Body, Message, UNKNOWN_OR_BROADCAST};

pub type ReplicaId = String;

pub const BASE_TIMEOUT: Duration = Duration::from_millis(150);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(75);
pub const REPLICATION_BATCH: usize = 50;
pub const IN_FLIGHT_RETRY_GAP: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone)]
pub struct PeerProgress {
    pub next_index: u64,
    pub match_index: i64,
    pub in_flight: Option<(u32, Instant)>,
}

#[derive(Debug, Clone, Default)]
pub struct ElectionState {
    pub votes: HashMap<ReplicaId, bool>,
}

pub struct Replica {
    pub id: ReplicaId,
    pub peers: Vec<ReplicaId>,

    pub current_term: u64,
    pub voted_for: Option<ReplicaId>,
    pub log: Vec<LogEntry>,
    pub state: HashMap<String, String>,
    pub commit_index: i64,
    pub last_applied: i64,
    pub leader_id: ReplicaId,
    pub role: Role,
    pub pre_election_queue: VecDeque<Message>,

    pub peer_progress: HashMap<ReplicaId, PeerProgress>,
    pub election: Option<ElectionState>,

    pub(crate) election_deadline: Instant,
    pub(crate) election_timeout: Duration,
    pub(crate) heartbeat_deadline: Instant,
}

fn random_election_timeout() -> Duration {
    let millis = rand::thread_rng().gen_range(BASE_TIMEOUT.as_millis()..=2 * BASE_TIMEOUT.as_millis());
    Duration::from_millis(millis as u64)
}

impl Replica {
    pub fn new(id: ReplicaId, peers: Vec<ReplicaId>, now: Instant) -> Self {
        Replica {
            id,
            peers,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            state: HashMap::new(),
            commit_index: -1,
            last_applied: -1,
            leader_id: UNKNOWN_OR_BROADCAST.to_string(),
            role: Role::Follower,
            pre_election_queue: VecDeque::new(),
            peer_progress: HashMap::new(),
            election: None,
            election_deadline: now,
            election_timeout: random_election_timeout(),
            heartbeat_deadline: now,
        }
    }

    pub fn total_replicas(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn last_log_index(&self) -> i64 {
        self.log.len() as i64 - 1
    }

    pub fn last_log_term(&self) -> i64 {
        self.log.last().map(|e| e.term as i64).unwrap_or(-1)
    }

    pub(crate) fn reset_election_timer(&mut self, now: Instant) {
        self.election_deadline = now;
        self.election_timeout = random_election_timeout();
    }

    /// Adopt a newer term unconditionally clearing vote and any in-flight
    /// election/leadership, without asserting who the new leader is.
    pub(crate) fn step_down(&mut self, term: u64) {
        self.current_term = term;
        self.voted_for = None;
        self.leader_id = UNKNOWN_OR_BROADCAST.to_string();
        self.role = Role::Follower;
        self.election = None;
        self.peer_progress.clear();
    }

    /// One iteration of the cooperative loop: run leader or follower duties,
    /// then apply whatever just got committed.
    pub fn tick(&mut self, now: Instant) -> Vec<Message> {
        let mut out = Vec::new();

        if self.role == Role::Leader {
            if now.duration_since(self.heartbeat_deadline) >= HEARTBEAT_INTERVAL {
                self.heartbeat_deadline = now;
                out.extend(self.update_followers(now, true));
                self.update_commit_index();
            }
        } else if now.duration_since(self.election_deadline) >= self.election_timeout {
            out.extend(self.start_election(now));
        }

        out.extend(self.apply_committed());
        out
    }

    pub fn handle_message(&mut self, msg: Message, now: Instant) -> Vec<Message> {
        match &msg.body {
            Body::Get { .. } | Body::Put { .. } => self.dispatch_client(msg, now),
            Body::AppendEntries { .. } => self.handle_append_entries(msg, now),
            Body::AppendEntriesReply { .. } => self.handle_append_entries_reply(msg),
            Body::RequestVote { .. } => self.handle_request_vote(msg, now),
            Body::Vote { .. } => self.handle_vote(msg, now),
            Body::Ok { .. } | Body::Redirect { .. } | Body::Fail { .. } => Vec::new(),
        }
    }

    pub(crate) fn apply_committed(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let entry = self.log[self.last_applied as usize].clone();
            self.state.insert(entry.key.clone(), entry.value.clone());
            debug!(index = self.last_applied, key = %entry.key, "applied log entry");

            if self.role == Role::Leader && entry.received_by == self.id {
                out.push(Message {
                    src: self.id.clone(),
                    dst: entry.client_id.clone(),
                    leader: self.id.clone(),
                    body: Body::Ok {
                        mid: entry.request_id.clone(),
                        value: None,
                    },
                });
                info!(mid = %entry.request_id, "replied ok to client after commit");
            }
        }
        out
    }

    pub(crate) fn redirect(&self, dst: &str, mid: &str) -> Message {
        Message {
            src: self.id.clone(),
            dst: dst.to_string(),
            leader: self.leader_id.clone(),
            body: Body::Redirect { mid: mid.to_string() },
        }
    }
}
