use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fabric_command::{
    Command, CommandError, CommandStateMachine, Decoders, Dispatcher, MemoryLog, RateLimiter,
    ReplicatedDispatcher,
};
use fabric_core::proto::{
    self, RouterTerminatorState, ValidateTerminatorsRequest, ValidateTerminatorsResponse,
};
use fabric_core::NetworkOptions;
use fabric_routing::{ChannelError, ControlChannel, ControlMessage, Router, RouterRegistry};
use parking_lot::{Condvar, Mutex};

use crate::db::Db;
use crate::service::ServiceManager;
use crate::terminator_manager::TerminatorManager;

/// Managers wired to a single-replica in-memory log, so every mutation goes
/// through encode, log append and decode.
pub struct Stack {
    pub decoders: Arc<Decoders>,
    pub log: Arc<MemoryLog>,
    pub registry: Arc<RouterRegistry>,
    pub services: Arc<ServiceManager>,
    pub terminators: Arc<TerminatorManager>,
}

pub fn local_stack() -> Stack {
    stack_with(|dispatcher| dispatcher)
}

/// A stack whose dispatches can be held back, as a slow commit would.
pub fn gated_stack() -> (Stack, Arc<GatedDispatcher>) {
    let mut gate = None;
    let stack = stack_with(|inner| {
        let gated = GatedDispatcher::new(inner);
        gate = Some(Arc::clone(&gated));
        gated as Arc<dyn Dispatcher>
    });
    match gate {
        Some(gate) => (stack, gate),
        None => unreachable!("stack_with always wraps the dispatcher"),
    }
}

fn stack_with(wrap: impl FnOnce(Arc<dyn Dispatcher>) -> Arc<dyn Dispatcher>) -> Stack {
    let decoders = Arc::new(Decoders::new());
    let fsm = Arc::new(CommandStateMachine::new(Arc::clone(&decoders)));
    let log = Arc::new(MemoryLog::new(fsm));
    let dispatcher = wrap(Arc::new(ReplicatedDispatcher::new(
        Arc::clone(&log) as _,
        Arc::clone(&decoders),
        RateLimiter::disabled(),
    )));

    let db = Arc::new(Db::new());
    let registry = Arc::new(RouterRegistry::new());
    let services = ServiceManager::new(Arc::clone(&db), Arc::clone(&dispatcher));
    let terminators = TerminatorManager::new(
        Arc::clone(&db),
        dispatcher,
        Arc::clone(&registry),
        &NetworkOptions::default(),
    );

    Stack {
        decoders,
        log,
        registry,
        services,
        terminators,
    }
}

impl Stack {
    pub fn connect(&self, id: &str, name: &str, channel: Arc<MockChannel>) -> Arc<Router> {
        let router = Arc::new(Router::new(id, name));
        self.registry
            .mark_connected(Arc::clone(&router), Some(channel as Arc<dyn ControlChannel>));
        router
    }
}

/// Holds every dispatch while closed.
pub struct GatedDispatcher {
    inner: Arc<dyn Dispatcher>,
    closed: Mutex<bool>,
    opened: Condvar,
    waiting: Mutex<usize>,
}

impl GatedDispatcher {
    fn new(inner: Arc<dyn Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            closed: Mutex::new(false),
            opened: Condvar::new(),
            waiting: Mutex::new(0),
        })
    }

    pub fn close(&self) {
        *self.closed.lock() = true;
    }

    pub fn open(&self) {
        *self.closed.lock() = false;
        self.opened.notify_all();
    }

    /// Dispatches currently held at the gate.
    pub fn waiting(&self) -> usize {
        *self.waiting.lock()
    }
}

impl Dispatcher for GatedDispatcher {
    fn dispatch(&self, command: &dyn Command) -> Result<(), CommandError> {
        {
            let mut closed = self.closed.lock();
            if *closed {
                *self.waiting.lock() += 1;
                while *closed {
                    self.opened.wait(&mut closed);
                }
                *self.waiting.lock() -= 1;
            }
        }
        self.inner.dispatch(command)
    }

    fn decoders(&self) -> &Arc<Decoders> {
        self.inner.decoders()
    }
}

pub enum Reply {
    States(HashMap<String, RouterTerminatorState>),
    AllValid,
    Never,
    Fail,
}

/// Control channel answering validation requests from a canned reply.
pub struct MockChannel {
    peer_id: String,
    reply: Reply,
    requests: Mutex<Vec<ValidateTerminatorsRequest>>,
}

impl MockChannel {
    pub fn new(peer_id: &str, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.into(),
            reply,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ValidateTerminatorsRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ControlChannel for MockChannel {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn send(&self, _msg: ControlMessage) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn request(&self, msg: ControlMessage) -> Result<ControlMessage, ChannelError> {
        let request: ValidateTerminatorsRequest =
            msg.decode(proto::CONTENT_TYPE_VALIDATE_TERMINATORS_REQUEST)?;
        self.requests.lock().push(request.clone());

        let states = match &self.reply {
            Reply::States(states) => states.clone(),
            Reply::AllValid => request
                .terminators
                .iter()
                .map(|t| {
                    (
                        t.id.clone(),
                        RouterTerminatorState {
                            valid: true,
                            ..RouterTerminatorState::default()
                        },
                    )
                })
                .collect(),
            Reply::Never => std::future::pending().await,
            Reply::Fail => return Err(ChannelError::Send("connection reset".into())),
        };
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
