//! Fixtures shared by the cross-crate tests: replicated clusters of networks
//! over an in-memory log, and a scripted router control channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fabric_command::{
    CommandStateMachine, Decoders, Dispatcher, MemoryLog, RateLimiter, ReplicatedDispatcher,
    ReplicatedLog,
};
use fabric_core::proto::{
    self, RouterTerminatorState, TerminatorInvalidReason, ValidateTerminatorsRequest,
    ValidateTerminatorsResponse,
};
use fabric_core::NetworkOptions;
use fabric_model::Network;
use fabric_routing::{ChannelError, ControlChannel, ControlMessage, Link, Router};
use parking_lot::Mutex;

fn replica(
    log: Arc<dyn ReplicatedLog>,
    decoders: Arc<Decoders>,
    options: &NetworkOptions,
) -> Network {
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(ReplicatedDispatcher::new(
        log,
        decoders,
        RateLimiter::disabled(),
    ));
    match Network::new(options.clone(), dispatcher) {
        Ok(network) => network,
        Err(err) => panic!("invalid network options: {err}"),
    }
}

/// Controllers sharing one committed log. Commands dispatched on any member
/// are applied by every member, and fail on the proposer if they fail on its
/// own replica.
pub struct Cluster {
    pub log: Arc<MemoryLog>,
    pub members: Vec<Network>,
    options: NetworkOptions,
}

impl Cluster {
    pub fn new(size: usize) -> Self {
        Self::with_options(size, NetworkOptions::default())
    }

    pub fn with_options(size: usize, options: NetworkOptions) -> Self {
        let decoders = Arc::new(Decoders::new());
        let log = Arc::new(MemoryLog::new(Arc::new(CommandStateMachine::new(
            Arc::clone(&decoders),
        ))));
        let leader = replica(Arc::new(log.member(0)), decoders, &options);
        let mut cluster = Self {
            members: vec![leader],
            log,
            options,
        };
        for _ in 1..size {
            cluster.join();
        }
        cluster
    }

    /// Adds a member, replaying everything committed so far into it.
    pub fn join(&mut self) -> &Network {
        let decoders = Arc::new(Decoders::new());
        let position = self.log.replica_count();
        let member = replica(
            Arc::new(self.log.member(position)),
            Arc::clone(&decoders),
            &self.options,
        );
        self.log
            .add_replica(Arc::new(CommandStateMachine::new(decoders)));
        self.members.push(member);
        &self.members[self.members.len() - 1]
    }

    pub fn leader(&self) -> &Network {
        &self.members[0]
    }
}

/// Connects a router with no control channel.
pub fn connect(network: &Network, id: &str) -> Arc<Router> {
    let router = Arc::new(Router::new(id, format!("router-{id}")));
    network.connect_router(Arc::clone(&router), None);
    router
}

/// Reports a connected link with the same latency measured on both sides.
pub fn report_link(
    network: &Network,
    id: &str,
    src: &str,
    dst: &str,
    latency: Duration,
) -> Arc<Link> {
    let dial_address = format!("tls:{dst}:6262");
    let (link, _) = match network.link_reported(id, 1, "tls", &dial_address, src, dst) {
        Ok(reported) => reported,
        Err(err) => panic!("link {id} rejected: {err}"),
    };
    let nanos = i64::try_from(latency.as_nanos()).unwrap_or(i64::MAX);
    link.set_src_latency(nanos);
    link.set_dst_latency(nanos);
    link
}

/// Router-side terminator table answering validation requests.
pub struct ScriptedRouter {
    peer_id: String,
    known: Mutex<HashMap<String, RouterTerminatorState>>,
    requests: Mutex<Vec<ValidateTerminatorsRequest>>,
}

impl ScriptedRouter {
    pub fn new(peer_id: &str) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.into(),
            known: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_valid(&self, terminator_id: &str) {
        self.known.lock().insert(
            terminator_id.into(),
            RouterTerminatorState {
                valid: true,
                ..RouterTerminatorState::default()
            },
        );
    }

    pub fn set_invalid(&self, terminator_id: &str, reason: TerminatorInvalidReason, detail: &str) {
        self.known.lock().insert(
            terminator_id.into(),
            RouterTerminatorState {
                valid: false,
                reason: reason as i32,
                detail: detail.into(),
            },
        );
    }

    pub fn requests(&self) -> Vec<ValidateTerminatorsRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ControlChannel for ScriptedRouter {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn send(&self, _msg: ControlMessage) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn request(&self, msg: ControlMessage) -> Result<ControlMessage, ChannelError> {
        let request: ValidateTerminatorsRequest =
            msg.decode(proto::CONTENT_TYPE_VALIDATE_TERMINATORS_REQUEST)?;
        let states = {
            let known = self.known.lock();
            request
                .terminators
                .iter()
                .filter_map(|t| known.get(&t.id).map(|state| (t.id.clone(), state.clone())))
                .collect()
        };
        self.requests.lock().push(request);

        Ok(ControlMessage::encode(
            proto::CONTENT_TYPE_VALIDATE_TERMINATORS_RESPONSE,
            &ValidateTerminatorsResponse { states },
        ))
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
