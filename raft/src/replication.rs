//! Append-entries RPC, consistency check, log reconciliation, match-index
//! advancement, and leader commit-index advance.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::message::{Body, Message};
use crate::replica::{Replica, Role, IN_FLIGHT_RETRY_GAP, REPLICATION_BATCH};

impl Replica {
    /// Leader side: send AppendEntries to every peer whose log is behind,
    /// or to all peers unconditionally when `force` (the heartbeat tick).
    pub(crate) fn update_followers(&mut self, now: Instant, force: bool) -> Vec<Message> {
        let last_index = self.last_log_index();
        let current_term = self.current_term;
        let commit_index = self.commit_index;
        let log = self.log.clone();
        let peers = self.peers.clone();

        let mut out = Vec::new();
        for peer in peers {
            let progress = self.peer_progress.get_mut(&peer).expect("peer progress initialized at election");
            let next_index = progress.next_index;
            let has_backlog = last_index >= next_index as i64;

            if !force && !has_backlog {
                continue;
            }
            if !force {
                let allowed = match progress.in_flight {
                    None => true,
                    Some((_, sent_at)) => now.duration_since(sent_at) > IN_FLIGHT_RETRY_GAP,
                };
                if !allowed {
                    continue;
                }
            }

            let prev_log_index = next_index as i64 - 1;
            let prev_log_term = if prev_log_index < 0 {
                -1
            } else {
                log[prev_log_index as usize].term as i64
            };

            let entries = if has_backlog {
                let end = std::cmp::min(log.len(), next_index as usize + REPLICATION_BATCH);
                log[next_index as usize..end].to_vec()
            } else {
                Vec::new()
            };

            progress.in_flight = Some((entries.len() as u32, now));

            out.push(Message {
                src: self.id.clone(),
                dst: peer,
                leader: self.id.clone(),
                body: Body::AppendEntries {
                    term: current_term,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: commit_index,
                },
            });
        }
        out
    }

    /// Leader side: advance `commit_index` as far as quorum allows, only
    /// over entries from the current term.
    pub(crate) fn update_commit_index(&mut self) {
        loop {
            let candidate = self.commit_index + 1;
            if candidate as usize >= self.log.len() {
                break;
            }
            let replicated = 1 + self
                .peer_progress
                .values()
                .filter(|p| p.match_index >= candidate)
                .count();

            if replicated > self.total_replicas() / 2 && self.log[candidate as usize].term == self.current_term {
                self.commit_index = candidate;
                debug!(commit_index = candidate, "advanced commit index");
            } else {
                break;
            }
        }
    }

    /// Leader side: process the follower's reply to an AppendEntries.
    pub(crate) fn handle_append_entries_reply(&mut self, msg: Message) -> Vec<Message> {
        let Body::AppendEntriesReply { term, success } = msg.body else {
            unreachable!("dispatched only for AppendEntriesReply bodies");
        };

        if success {
            if let Some(progress) = self.peer_progress.get_mut(&msg.src) {
                if let Some((sent, _)) = progress.in_flight.take() {
                    progress.next_index += sent as u64;
                    progress.match_index = progress.next_index as i64 - 1;
                }
            }
            // A quorum may have just been reached; advance commit_index and
            // apply right away rather than waiting for the next heartbeat.
            self.update_commit_index();
            return self.apply_committed();
        } else if term > self.current_term {
            // The reply's source is a follower, not necessarily the new
            // leader — step down and wait for the real leader's
            // AppendEntries instead of assuming `msg.src` is it.
            self.step_down(term);
        } else if let Some(progress) = self.peer_progress.get_mut(&msg.src) {
            progress.next_index = progress.next_index.saturating_sub(1);
            progress.in_flight = None;
        }

        Vec::new()
    }

    /// Follower side: accept or reject an AppendEntries, reconciling the
    /// local log suffix against the leader's.
    pub(crate) fn handle_append_entries(&mut self, msg: Message, now: Instant) -> Vec<Message> {
        let Body::AppendEntries {
            term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        } = msg.body
        else {
            unreachable!("dispatched only for AppendEntries bodies");
        };

        self.reset_election_timer(now);

        let mut out = Vec::new();
        if term >= self.current_term {
            self.current_term = term;
            self.leader_id = msg.src.clone();
            self.role = Role::Follower;
            self.election = None;
            self.peer_progress.clear();
            out.extend(self.drain_pre_election_queue(now));
        }

        if entries.is_empty() {
            return out;
        }

        if term < self.current_term {
            out.push(self.append_entries_reply(&msg.src, false));
            return out;
        }

        let mismatched_prev = prev_log_index >= 0
            && (self.log.len() as i64 <= prev_log_index
                || self.log[prev_log_index as usize].term as i64 != prev_log_term);
        if mismatched_prev {
            out.push(self.append_entries_reply(&msg.src, false));
            return out;
        }

        let start = (prev_log_index + 1) as usize;
        let mut redundant = 0usize;
        for (i, entry) in entries.iter().enumerate() {
            let idx = start + i;
            if idx < self.log.len() && self.log[idx].term == entry.term {
                redundant += 1;
            } else {
                break;
            }
        }

        let last_valid = start + redundant;
        for stale in &self.log[last_valid..] {
            if stale.received_by == self.id {
                warn!(mid = %stale.request_id, "log entry overwritten by reconciliation, redirecting client");
                out.push(self.redirect(&stale.client_id, &stale.request_id));
            }
        }
        self.log.truncate(last_valid);
        self.log.extend(entries[redundant..].iter().cloned());

        if leader_commit > self.commit_index {
            self.commit_index = std::cmp::min(self.log.len() as i64 - 1, leader_commit);
        }

        info!(entries = entries.len() - redundant, "appended log entries");
        out.push(self.append_entries_reply(&msg.src, true));
        out
    }

    fn append_entries_reply(&self, dst: &str, success: bool) -> Message {
        Message {
            src: self.id.clone(),
            dst: dst.to_string(),
            leader: self.leader_id.clone(),
            body: Body::AppendEntriesReply {
                term: self.current_term,
                success,
            },
        }
    }
}
