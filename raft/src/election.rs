//! Candidacy, vote requests, vote collection, quorum detection.

use std::time::Instant;

use tracing::info;

use crate::message::{Body, Message, UNKNOWN_OR_BROADCAST};
use crate::replica::{ElectionState, PeerProgress, Replica, Role};

impl Replica {
    pub(crate) fn start_election(&mut self, now: Instant) -> Vec<Message> {
        self.leader_id = UNKNOWN_OR_BROADCAST.to_string();
        self.election = Some(ElectionState::default());
        self.voted_for = None;

        self.current_term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.id.clone());
        self.election.as_mut().unwrap().votes.insert(self.id.clone(), true);

        self.reset_election_timer(now);
        info!(term = self.current_term, "starting election");

        let last_log_index = self.last_log_index();
        let last_log_term = self.last_log_term();

        self.peers
            .clone()
            .into_iter()
            .map(|peer| Message {
                src: self.id.clone(),
                dst: peer,
                leader: UNKNOWN_OR_BROADCAST.to_string(),
                body: Body::RequestVote {
                    term: self.current_term,
                    last_log_index,
                    last_log_term,
                },
            })
            .collect()
    }

    pub(crate) fn handle_request_vote(&mut self, msg: Message, now: Instant) -> Vec<Message> {
        let Body::RequestVote {
            term,
            last_log_index,
            last_log_term,
        } = msg.body
        else {
            unreachable!("dispatched only for RequestVote bodies");
        };

        if term > self.current_term {
            self.step_down(term);
        }

        let candidate_up_to_date = last_log_term > self.last_log_term()
            || (last_log_term == self.last_log_term() && last_log_index >= self.last_log_index());

        let already_voted_elsewhere = matches!(&self.voted_for, Some(v) if v != &msg.src);
        let grant = term == self.current_term && !already_voted_elsewhere && candidate_up_to_date;

        if grant {
            self.voted_for = Some(msg.src.clone());
        }

        self.reset_election_timer(now);

        vec![Message {
            src: self.id.clone(),
            dst: msg.src,
            leader: self.leader_id.clone(),
            body: Body::Vote {
                term: self.current_term,
                vote: grant,
            },
        }]
    }

    pub(crate) fn handle_vote(&mut self, msg: Message, now: Instant) -> Vec<Message> {
        let Body::Vote { term, vote } = msg.body else {
            unreachable!("dispatched only for Vote bodies");
        };

        if term > self.current_term {
            // A reply's source is not necessarily the new leader; step down
            // and wait for an AppendEntries to learn who actually is.
            self.step_down(term);
            return Vec::new();
        }

        if self.role != Role::Candidate || term != self.current_term {
            return Vec::new();
        }

        let Some(election) = self.election.as_mut() else {
            return Vec::new();
        };
        election.votes.insert(msg.src, vote);

        let granted = election.votes.values().filter(|v| **v).count();
        if granted > self.total_replicas() / 2 {
            return self.become_leader(now);
        }

        Vec::new()
    }

    pub(crate) fn become_leader(&mut self, now: Instant) -> Vec<Message> {
        self.role = Role::Leader;
        self.leader_id = self.id.clone();
        self.election = None;

        let next_index = self.log.len() as u64;
        self.peer_progress = self
            .peers
            .iter()
            .map(|p| {
                (
                    p.clone(),
                    PeerProgress {
                        next_index,
                        match_index: -1,
                        in_flight: None,
                    },
                )
            })
            .collect();

        info!(term = self.current_term, "elected leader");

        self.heartbeat_deadline = now;
        let mut out = self.update_followers(now, true);
        out.extend(self.drain_pre_election_queue(now));
        out
    }
}
