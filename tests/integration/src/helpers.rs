//! Test helpers for running a replica set of in-process responders.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use replset_election::{
    spawn_listener, CapturedLog, ExecutorConfig, FreshnessChecker, FreshnessResponder,
    FreshnessResults, HostAndPort, LocalMemberState, MemberConfig, OpTime, ReplicaSetConfig,
    ReplicationExecutor, SufficiencyPolicy, TcpTransport,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// How a member of the test set behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// Answers freshness requests.
    Up,
    /// Nothing listens on its port.
    Down,
    /// Accepts connections but never answers.
    Silent,
}

/// A replica set whose members listen on random local ports.
///
/// Member `i` has id `i + 1`. Every member starts at the same optime.
pub struct TestSet {
    pub config: ReplicaSetConfig,
    responders: Vec<Option<Arc<FreshnessResponder>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestSet {
    /// Starts one responder per `Up` member, all at `position`.
    pub async fn start(peers: &[Peer], position: OpTime) -> Self {
        let mut addrs = Vec::with_capacity(peers.len());
        let mut responders = Vec::with_capacity(peers.len());
        let mut tasks = Vec::new();

        for (i, peer) in peers.iter().enumerate() {
            match peer {
                Peer::Up => {
                    // bind first, install the real config once every port is known
                    let placeholder = ReplicaSetConfig::new(
                        "rs0",
                        1,
                        vec![MemberConfig::new(i as u32 + 1, HostAndPort::new("127.0.0.1", 0))],
                    );
                    let state = LocalMemberState::new(placeholder, 0, position).unwrap();
                    let responder = Arc::new(FreshnessResponder::new(state));
                    let (addr, task) =
                        spawn_listener(local_any(), Arc::clone(&responder)).await.unwrap();
                    addrs.push(addr);
                    responders.push(Some(responder));
                    tasks.push(task);
                }
                Peer::Down => {
                    let l = TcpListener::bind(local_any()).await.unwrap();
                    addrs.push(l.local_addr().unwrap());
                    responders.push(None);
                }
                Peer::Silent => {
                    let l = TcpListener::bind(local_any()).await.unwrap();
                    addrs.push(l.local_addr().unwrap());
                    responders.push(None);
                    tasks.push(tokio::spawn(hold_connections(l)));
                }
            }
        }

        let members = addrs
            .iter()
            .enumerate()
            .map(|(i, addr)| MemberConfig::new(i as u32 + 1, host_of(*addr)))
            .collect();
        let config = ReplicaSetConfig::new("rs0", 1, members);
        config.validate().unwrap();

        for (i, responder) in responders.iter().enumerate() {
            if let Some(r) = responder {
                r.set_config(config.clone(), i).unwrap();
            }
        }

        Self {
            config,
            responders,
            tasks,
        }
    }

    /// The responder of member `i`. Panics if the member is not `Up`.
    pub fn member(&self, i: usize) -> &FreshnessResponder {
        self.responders[i]
            .as_deref()
            .unwrap_or_else(|| panic!("member {i} has no responder"))
    }

    pub fn host(&self, i: usize) -> &HostAndPort {
        &self.config.members[i].host
    }

    /// Runs a freshness check as member `self_index` at `position`.
    pub async fn check(&self, self_index: usize, position: OpTime) -> (FreshnessResults, CapturedLog) {
        self.check_with(CheckOptions {
            self_index,
            position,
            ..CheckOptions::default()
        })
        .await
    }

    pub async fn check_with(&self, opts: CheckOptions) -> (FreshnessResults, CapturedLog) {
        let config = opts.config.unwrap_or_else(|| self.config.clone());
        let executor = ReplicationExecutor::new(
            Arc::new(TcpTransport::new()),
            ExecutorConfig {
                command_timeout: opts.timeout,
            },
        )
        .unwrap();
        let log = CapturedLog::new();
        let mut checker = FreshnessChecker::new()
            .with_policy(opts.policy)
            .with_sink(Arc::new(log.clone()));

        let targets = config.freshness_targets(opts.self_index).unwrap();
        let results = tokio::time::timeout(
            Duration::from_secs(10),
            checker.check(&executor, opts.position, &config, opts.self_index, &targets),
        )
        .await
        .expect("freshness check did not finish")
        .unwrap();
        executor.shutdown();
        (results, log)
    }
}

impl Drop for TestSet {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Knobs for [`TestSet::check_with`].
pub struct CheckOptions {
    pub self_index: usize,
    pub position: OpTime,
    /// Config the candidate believes in; defaults to the set's own.
    pub config: Option<ReplicaSetConfig>,
    pub policy: SufficiencyPolicy,
    pub timeout: Duration,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            self_index: 0,
            position: OpTime::default(),
            config: None,
            policy: SufficiencyPolicy::AllPeers,
            timeout: Duration::from_secs(5),
        }
    }
}

fn local_any() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn host_of(addr: SocketAddr) -> HostAndPort {
    HostAndPort::new(addr.ip().to_string(), addr.port())
}

async fn hold_connections(listener: TcpListener) {
    let mut held = Vec::new();
    while let Ok((stream, _)) = listener.accept().await {
        held.push(stream);
    }
}
