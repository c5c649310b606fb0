//! Multi-replica scenarios driven purely through the `Replica` state machine
//! API, with messages routed by hand instead of over real sockets.

use std::collections::{HashMap, VecDeque};
use std::thread::sleep;
use std::time::{Duration, Instant};

use raft_replica::message::UNKNOWN_OR_BROADCAST;
use raft_replica::{Body, Message, Replica, Role};

struct Cluster {
    replicas: HashMap<String, Replica>,
}

impl Cluster {
    fn new(ids: &[&str]) -> Self {
        let now = Instant::now();
        let mut replicas = HashMap::new();
        for id in ids {
            let peers = ids.iter().filter(|p| **p != *id).map(|p| p.to_string()).collect();
            replicas.insert(id.to_string(), Replica::new(id.to_string(), peers, now));
        }
        Cluster { replicas }
    }

    /// Feed `msgs` into the cluster, routing every reply they generate until
    /// the queue drains or `budget` messages have been processed (settles a
    /// round of heartbeats/replication without looping forever on a bug).
    fn settle(&mut self, msgs: Vec<Message>, budget: usize) -> Vec<Message> {
        let mut queue: VecDeque<Message> = msgs.into_iter().collect();
        let mut delivered_to_client = Vec::new();
        let mut processed = 0;

        while let Some(msg) = queue.pop_front() {
            processed += 1;
            if processed > budget {
                break;
            }
            if msg.dst == UNKNOWN_OR_BROADCAST {
                continue;
            }
            match self.replicas.get_mut(&msg.dst) {
                Some(replica) => {
                    let out = replica.handle_message(msg, Instant::now());
                    for reply in out {
                        if self.replicas.contains_key(&reply.dst) {
                            queue.push_back(reply);
                        } else {
                            delivered_to_client.push(reply);
                        }
                    }
                }
                None => delivered_to_client.push(msg),
            }
        }
        delivered_to_client
    }

    fn tick_all(&mut self) -> Vec<Message> {
        let now = Instant::now();
        let mut out = Vec::new();
        for replica in self.replicas.values_mut() {
            out.extend(replica.tick(now));
        }
        out
    }

    fn tick_one(&mut self, id: &str) -> Vec<Message> {
        self.replicas.get_mut(id).unwrap().tick(Instant::now())
    }

    fn leaders(&self) -> Vec<&str> {
        self.replicas
            .values()
            .filter(|r| r.role == Role::Leader)
            .map(|r| r.id.as_str())
            .collect()
    }
}

#[test]
fn election_among_five_replicas_reaches_a_single_leader() {
    let mut cluster = Cluster::new(&["0000", "0001", "0002", "0003", "0004"]);

    // only 0000 times out; the rest haven't reached their own deadline yet.
    sleep(Duration::from_millis(310));
    let votes_out = cluster
        .replicas
        .get_mut("0000")
        .unwrap()
        .tick(Instant::now());
    let replies = cluster.settle(votes_out, 100);

    assert!(replies.is_empty(), "no client-facing messages expected from an election");
    assert_eq!(cluster.leaders(), vec!["0000"]);
    for peer in ["0001", "0002", "0003", "0004"] {
        let r = &cluster.replicas[peer];
        assert_eq!(r.role, Role::Follower);
        assert_eq!(r.leader_id, "0000");
    }
}

#[test]
fn put_then_get_commits_and_redirects_non_leaders() {
    let mut cluster = Cluster::new(&["0000", "0001", "0002"]);
    sleep(Duration::from_millis(310));
    let votes_out = cluster
        .replicas
        .get_mut("0000")
        .unwrap()
        .tick(Instant::now());
    cluster.settle(votes_out, 100);
    assert_eq!(cluster.leaders(), vec!["0000"]);

    // a client put against a follower is redirected to the known leader.
    let put_to_follower = Message {
        src: "client".into(),
        dst: "0001".into(),
        leader: UNKNOWN_OR_BROADCAST.into(),
        body: Body::Put {
            mid: "m0".into(),
            key: "a".into(),
            value: "1".into(),
        },
    };
    let redirect = cluster.settle(vec![put_to_follower], 10);
    assert_eq!(redirect.len(), 1);
    match &redirect[0].body {
        Body::Redirect { mid } => assert_eq!(mid, "m0"),
        _ => panic!("expected redirect"),
    }

    // the real put against the leader appends, replicates, and eventually
    // commits once a quorum of AppendEntriesReply{success: true} arrives.
    let put_to_leader = Message {
        src: "client".into(),
        dst: "0000".into(),
        leader: "0000".into(),
        body: Body::Put {
            mid: "m1".into(),
            key: "a".into(),
            value: "1".into(),
        },
    };
    cluster.settle(vec![put_to_leader], 10);

    // wait past the heartbeat cadence so the leader's periodic AppendEntries
    // picks up the new entry.
    sleep(Duration::from_millis(80));
    let heartbeats = cluster.tick_all();
    let replies = cluster.settle(heartbeats, 100);
    let ok_reply = replies.iter().find(|m| matches!(m.body, Body::Ok { .. }));
    assert!(ok_reply.is_some(), "client should see an ok reply once the put commits");

    let get = Message {
        src: "client".into(),
        dst: "0000".into(),
        leader: "0000".into(),
        body: Body::Get {
            mid: "m2".into(),
            key: "a".into(),
        },
    };
    let get_reply = cluster.settle(vec![get], 10);
    match &get_reply[0].body {
        Body::Ok { value, .. } => assert_eq!(value.as_deref(), Some("1")),
        _ => panic!("expected ok reply to get"),
    }
}

#[test]
fn stale_leader_is_reconciled_and_its_unreplicated_client_gets_redirected() {
    let mut cluster = Cluster::new(&["0000", "0001", "0002"]);

    // 0000 wins the first election and accepts a client put into its own
    // log, but is partitioned away before it ever replicates the entry.
    sleep(Duration::from_millis(310));
    let votes_out = cluster
        .replicas
        .get_mut("0000")
        .unwrap()
        .tick(Instant::now());
    cluster.settle(votes_out, 100);
    assert_eq!(cluster.leaders(), vec!["0000"]);

    let put = Message {
        src: "client".into(),
        dst: "0000".into(),
        leader: "0000".into(),
        body: Body::Put {
            mid: "m1".into(),
            key: "a".into(),
            value: "1".into(),
        },
    };
    cluster.settle(vec![put], 10);
    assert_eq!(cluster.replicas["0000"].log.len(), 1);

    // 0001, cut off from 0000, times out and wins a new term among the
    // remaining majority (0001 + 0002) — their logs are both empty, so
    // 0000's unreplicated entry cannot block the vote.
    sleep(Duration::from_millis(310));
    let votes_out = cluster
        .replicas
        .get_mut("0001")
        .unwrap()
        .tick(Instant::now());
    let reachable: Vec<Message> = votes_out.into_iter().filter(|m| m.dst != "0000").collect();
    cluster.settle(reachable, 100);
    assert_eq!(cluster.leaders(), vec!["0001"]);
    assert_eq!(cluster.replicas["0000"].role, Role::Leader, "still unaware it lost leadership");

    // a new client put against the real leader, then the partition heals:
    // replicating it to 0000 detects the log mismatch at index 0 and
    // truncates 0000's stale entry, redirecting its original client.
    let put2 = Message {
        src: "client".into(),
        dst: "0001".into(),
        leader: "0001".into(),
        body: Body::Put {
            mid: "m2".into(),
            key: "b".into(),
            value: "2".into(),
        },
    };
    cluster.settle(vec![put2], 10);

    sleep(Duration::from_millis(80));
    let healed = cluster.tick_one("0001");
    let replies = cluster.settle(healed, 100);

    assert_eq!(cluster.replicas["0000"].role, Role::Follower);
    assert_eq!(cluster.replicas["0000"].current_term, 2);
    assert_eq!(cluster.replicas["0000"].log.len(), 1);
    assert_eq!(cluster.replicas["0000"].log[0].key, "b");

    let redirect = replies.iter().find(|m| matches!(m.body, Body::Redirect { .. }));
    assert!(redirect.is_some(), "client with a truncated entry should be redirected");
    match &redirect.unwrap().body {
        Body::Redirect { mid } => assert_eq!(mid, "m1"),
        _ => unreachable!(),
    }
}
