//! get/put handling, leader redirect, and the pre-election queue that
//! buffers client requests while no leader is known.

use std::time::Instant;

use tracing::debug;

use crate::log::LogEntry;
use crate::message::{Body, Message, UNKNOWN_OR_BROADCAST};
use crate::replica::{Replica, Role};

impl Replica {
    pub(crate) fn dispatch_client(&mut self, msg: Message, now: Instant) -> Vec<Message> {
        if self.role != Role::Leader {
            if self.leader_id == UNKNOWN_OR_BROADCAST {
                debug!(src = %msg.src, "queuing client request, no leader known yet");
                self.pre_election_queue.push_back(msg);
                return Vec::new();
            }
            let mid = match &msg.body {
                Body::Get { mid, .. } | Body::Put { mid, .. } => mid.clone(),
                _ => unreachable!("dispatch_client only receives Get/Put"),
            };
            return vec![self.redirect(&msg.src, &mid)];
        }

        match msg.body {
            Body::Get { mid, key } => self.handle_get(&msg.src, &mid, &key),
            Body::Put { mid, key, value } => self.handle_put(&msg.src, &mid, &key, &value, now),
            _ => unreachable!("dispatch_client only receives Get/Put"),
        }
    }

    fn handle_get(&mut self, src: &str, mid: &str, key: &str) -> Vec<Message> {
        let value = self.state.get(key).cloned().unwrap_or_default();
        vec![Message {
            src: self.id.clone(),
            dst: src.to_string(),
            leader: self.id.clone(),
            body: Body::Ok {
                mid: mid.to_string(),
                value: Some(value),
            },
        }]
    }

    fn handle_put(&mut self, src: &str, mid: &str, key: &str, value: &str, _now: Instant) -> Vec<Message> {
        self.log.push(LogEntry {
            term: self.current_term,
            key: key.to_string(),
            value: value.to_string(),
            client_id: src.to_string(),
            request_id: mid.to_string(),
            received_by: self.id.clone(),
        });
        // The `ok` reply is sent later, in `apply_committed`, once this
        // entry is actually committed and applied.
        Vec::new()
    }

    pub(crate) fn drain_pre_election_queue(&mut self, now: Instant) -> Vec<Message> {
        let queued: Vec<Message> = self.pre_election_queue.drain(..).collect();
        let mut out = Vec::new();
        for msg in queued {
            out.extend(self.dispatch_client(msg, now));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader(id: &str, peers: &[&str]) -> Replica {
        let mut r = Replica::new(
            id.to_string(),
            peers.iter().map(|s| s.to_string()).collect(),
            Instant::now(),
        );
        r.role = Role::Leader;
        r.leader_id = id.to_string();
        r
    }

    #[test]
    fn get_on_follower_without_leader_is_queued() {
        let mut r = Replica::new("0000".into(), vec!["0001".into()], Instant::now());
        let msg = Message {
            src: "client".into(),
            dst: "0000".into(),
            leader: UNKNOWN_OR_BROADCAST.into(),
            body: Body::Get {
                mid: "m1".into(),
                key: "a".into(),
            },
        };
        let out = r.dispatch_client(msg, Instant::now());
        assert!(out.is_empty());
        assert_eq!(r.pre_election_queue.len(), 1);
    }

    #[test]
    fn get_on_follower_with_known_leader_redirects() {
        let mut r = Replica::new("0000".into(), vec!["0001".into()], Instant::now());
        r.leader_id = "0001".into();
        let msg = Message {
            src: "client".into(),
            dst: "0000".into(),
            leader: "0001".into(),
            body: Body::Get {
                mid: "m1".into(),
                key: "a".into(),
            },
        };
        let out = r.dispatch_client(msg, Instant::now());
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].body, Body::Redirect { .. }));
    }

    #[test]
    fn put_on_leader_appends_without_immediate_reply() {
        let mut r = leader("0000", &["0001", "0002"]);
        let msg = Message {
            src: "client".into(),
            dst: "0000".into(),
            leader: "0000".into(),
            body: Body::Put {
                mid: "m1".into(),
                key: "a".into(),
                value: "1".into(),
            },
        };
        let out = r.dispatch_client(msg, Instant::now());
        assert!(out.is_empty());
        assert_eq!(r.log.len(), 1);
        assert_eq!(r.log[0].received_by, "0000");
    }

    #[test]
    fn get_on_leader_reads_committed_state_immediately() {
        let mut r = leader("0000", &["0001"]);
        r.state.insert("a".into(), "1".into());
        let msg = Message {
            src: "client".into(),
            dst: "0000".into(),
            leader: "0000".into(),
            body: Body::Get {
                mid: "m1".into(),
                key: "a".into(),
            },
        };
        let out = r.dispatch_client(msg, Instant::now());
        match &out[0].body {
            Body::Ok { value, .. } => assert_eq!(value.as_deref(), Some("1")),
            _ => panic!("expected ok reply"),
        }
    }

    #[test]
    fn queue_drains_in_fifo_order_once_leader_known() {
        let mut r = Replica::new("0000".into(), vec!["0001".into()], Instant::now());
        for (mid, key) in [("m1", "a"), ("m2", "b")] {
            r.pre_election_queue.push_back(Message {
                src: "client".into(),
                dst: "0000".into(),
                leader: UNKNOWN_OR_BROADCAST.into(),
                body: Body::Get {
                    mid: mid.into(),
                    key: key.into(),
                },
            });
        }
        r.leader_id = "0001".into();
        let out = r.drain_pre_election_queue(Instant::now());
        assert_eq!(out.len(), 2);
        match &out[0].body {
            Body::Redirect { mid } => assert_eq!(mid, "m1"),
            _ => panic!("expected redirect"),
        }
    }
}
