//! Leaves that act on the world, possibly over several ticks.

use crate::{
    blackboard::Blackboard,
    context::Context,
    convert::ConvertFromString,
    error::{Error, Result},
    port::{NodeConfig, PortsList},
    short_type_name,
    wake_up::WakeUpSignal,
    BehaviorNode, NodeStatus,
};
use futures::{future::BoxFuture, task::noop_waker_ref, FutureExt};
use std::{
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, TryRecvError},
        Arc, Mutex,
    },
    task::{Context as TaskContext, Poll},
    thread::{self, JoinHandle},
};
use tracing::{debug, warn};

pub enum ActionNode {
    /// Completes in the tick that started it.
    Sync(Box<dyn BehaviorNode>),
    Stateful(StatefulAction),
    Threaded(ThreadedAction),
    Coro(CoroAction),
}

impl ActionNode {
    pub fn registration_name(&self) -> String {
        match self {
            Self::Sync(node) => node.registration_name(),
            Self::Stateful(node) => node.body.registration_name(),
            Self::Threaded(node) => node.name.clone(),
            Self::Coro(node) => node.name.clone(),
        }
    }

    pub fn provided_ports(&self) -> PortsList {
        match self {
            Self::Sync(node) => node.provided_ports(),
            Self::Stateful(node) => node.body.provided_ports(),
            Self::Threaded(node) => node.ports.clone(),
            Self::Coro(node) => node.ports.clone(),
        }
    }

    pub(crate) fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        match self {
            Self::Sync(node) => {
                let status = node.tick(ctx)?;
                if status == NodeStatus::Running {
                    return Err(Error::logic(format!(
                        "synchronous action [{}] returned RUNNING",
                        ctx.name()
                    )));
                }
                Ok(status)
            }
            Self::Stateful(node) => node.tick(ctx),
            Self::Threaded(node) => node.tick(ctx),
            Self::Coro(node) => node.tick(ctx),
        }
    }

    pub(crate) fn halt(&mut self, ctx: &mut Context) -> Result<()> {
        match self {
            Self::Sync(_) => Ok(()),
            Self::Stateful(node) => node.halt(ctx),
            Self::Threaded(node) => {
                node.halt();
                Ok(())
            }
            Self::Coro(node) => {
                node.future = None;
                Ok(())
            }
        }
    }
}

/// An action that starts something in `on_start` and checks on it in
/// `on_running` on every following tick.
pub trait StatefulActionNode {
    fn provided_ports(&self) -> PortsList {
        vec![]
    }

    fn on_start(&mut self, ctx: &mut Context) -> Result<NodeStatus>;

    fn on_running(&mut self, ctx: &mut Context) -> Result<NodeStatus>;

    /// Called when the node is halted while `Running`.
    /// [`Context::is_halt_requested`] is already true at this point.
    fn on_halted(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn registration_name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }
}

pub struct StatefulAction {
    body: Box<dyn StatefulActionNode>,
}

impl StatefulAction {
    pub fn new(body: impl StatefulActionNode + 'static) -> Self {
        Self {
            body: Box::new(body),
        }
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let (status, callback) = match ctx.status() {
            NodeStatus::Idle => {
                ctx.set_halt_requested(false);
                (self.body.on_start(ctx)?, "on_start")
            }
            NodeStatus::Running => (self.body.on_running(ctx)?, "on_running"),
            prev => return Ok(prev),
        };
        if status == NodeStatus::Idle {
            return Err(Error::logic(format!(
                "[{}]: {}() must not return IDLE",
                ctx.name(),
                callback
            )));
        }
        Ok(status)
    }

    fn halt(&mut self, ctx: &mut Context) -> Result<()> {
        ctx.set_halt_requested(true);
        if ctx.status() == NodeStatus::Running {
            self.body.on_halted(ctx)?;
        }
        Ok(())
    }
}

/// The body of a [`ThreadedAction`]. It runs on a worker thread and should
/// check [`ThreadContext::is_halt_requested`] regularly.
pub trait ThreadedActionNode: Send + 'static {
    fn provided_ports(&self) -> PortsList {
        vec![]
    }

    fn tick(&mut self, ctx: &ThreadContext) -> Result<NodeStatus>;

    fn registration_name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// What a threaded body can reach from its worker thread.
pub struct ThreadContext {
    config: NodeConfig,
    halt_requested: Arc<AtomicBool>,
    wake_up: Arc<WakeUpSignal>,
}

impl ThreadContext {
    pub fn get_input<T>(&self, name: &str) -> Result<T>
    where
        T: ConvertFromString + Clone + 'static,
    {
        self.config.get_input(name)
    }

    pub fn set_output<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.config.set_output(name, value)
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.config.blackboard
    }

    pub fn is_halt_requested(&self) -> bool {
        self.halt_requested.load(Ordering::SeqCst)
    }

    pub fn emit_wake_up(&self) {
        self.wake_up.emit_signal();
    }
}

struct Worker {
    handle: JoinHandle<()>,
    rx: Receiver<Result<NodeStatus>>,
}

pub struct ThreadedAction {
    name: String,
    ports: PortsList,
    body: Arc<Mutex<Box<dyn ThreadedActionNode>>>,
    halt_requested: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl ThreadedAction {
    pub fn new(body: impl ThreadedActionNode) -> Self {
        Self {
            name: body.registration_name(),
            ports: body.provided_ports(),
            body: Arc::new(Mutex::new(Box::new(body))),
            halt_requested: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn launch(&mut self, ctx: &mut Context) -> Result<()> {
        ctx.set_status(NodeStatus::Running)?;
        self.halt_requested.store(false, Ordering::SeqCst);

        let thread_ctx = ThreadContext {
            config: ctx.config().clone(),
            halt_requested: self.halt_requested.clone(),
            wake_up: ctx.wake_up_signal(),
        };
        let body = self.body.clone();
        let name = ctx.name().to_owned();
        let (tx, rx) = channel();
        let handle = thread::Builder::new()
            .name(format!("bt-{}", name))
            .spawn(move || {
                let res = catch_unwind(AssertUnwindSafe(|| {
                    let mut body = body.lock().unwrap_or_else(|e| e.into_inner());
                    body.tick(&thread_ctx)
                }))
                .unwrap_or_else(|_| {
                    Err(Error::runtime(format!("threaded action [{}] panicked", name)))
                });
                if let Err(e) = &res {
                    warn!(node = %name, "threaded action failed: {}", e);
                }
                let _ = tx.send(res);
                if !thread_ctx.is_halt_requested() {
                    thread_ctx.emit_wake_up();
                }
            })
            .map_err(|e| Error::runtime(format!("failed to spawn worker thread: {}", e)))?;
        self.worker = Some(Worker { handle, rx });
        Ok(())
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.handle.join();
        }
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        if self.worker.is_none() {
            self.launch(ctx)?;
        }
        let received = match &self.worker {
            Some(worker) => worker.rx.try_recv(),
            None => return Ok(NodeStatus::Running),
        };
        match received {
            Err(TryRecvError::Empty) => Ok(NodeStatus::Running),
            Err(TryRecvError::Disconnected) => {
                self.join();
                ctx.reset_status();
                Err(Error::runtime(format!(
                    "worker of [{}] exited without a result",
                    ctx.name()
                )))
            }
            Ok(Ok(NodeStatus::Running)) => {
                self.join();
                self.launch(ctx)?;
                Ok(NodeStatus::Running)
            }
            Ok(Ok(status)) => {
                self.join();
                Ok(status)
            }
            Ok(Err(e)) => {
                self.join();
                ctx.reset_status();
                Err(e)
            }
        }
    }

    /// Blocks until the worker thread has returned.
    fn halt(&mut self) {
        self.halt_requested.store(true, Ordering::SeqCst);
        if self.worker.is_some() {
            debug!(node = %self.name, "waiting for the worker thread to stop");
        }
        self.join();
    }
}

impl Drop for ThreadedAction {
    fn drop(&mut self) {
        self.halt();
    }
}

type CoroFactory = Box<dyn FnMut(CoroContext) -> BoxFuture<'static, Result<NodeStatus>>>;

/// An action whose body is an `async` block. The future is polled once per
/// tick on the driver thread and dropped when the node is halted.
///
/// ```rust
/// # use behavior_tree_core::*;
/// let action = CoroAction::new("Countdown", vec![], |ctx: CoroContext| async move {
///     for _ in 0..3 {
///         ctx.yield_running().await;
///     }
///     Ok::<_, Error>(NodeStatus::Success)
/// });
/// let mut tree = Tree::new(BehaviorNodeContainer::new_node(NodeKind::coro(action))).unwrap();
/// assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
/// ```
pub struct CoroAction {
    name: String,
    ports: PortsList,
    factory: CoroFactory,
    future: Option<BoxFuture<'static, Result<NodeStatus>>>,
}

impl CoroAction {
    pub fn new<F, Fut>(name: impl Into<String>, ports: PortsList, mut body: F) -> Self
    where
        F: FnMut(CoroContext) -> Fut + 'static,
        Fut: Future<Output = Result<NodeStatus>> + Send + 'static,
    {
        Self {
            name: name.into(),
            ports,
            factory: Box::new(move |ctx| body(ctx).boxed()),
            future: None,
        }
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        if self.future.is_none() {
            ctx.set_status(NodeStatus::Running)?;
            let coro_ctx = CoroContext {
                config: ctx.config().clone(),
                wake_up: ctx.wake_up_signal(),
            };
            self.future = Some((self.factory)(coro_ctx));
        }
        let Some(future) = self.future.as_mut() else {
            return Ok(NodeStatus::Running);
        };
        match future.poll_unpin(&mut TaskContext::from_waker(noop_waker_ref())) {
            Poll::Pending => Ok(NodeStatus::Running),
            Poll::Ready(res) => {
                self.future = None;
                res
            }
        }
    }
}

pub struct CoroContext {
    config: NodeConfig,
    wake_up: Arc<WakeUpSignal>,
}

impl CoroContext {
    pub fn get_input<T>(&self, name: &str) -> Result<T>
    where
        T: ConvertFromString + Clone + 'static,
    {
        self.config.get_input(name)
    }

    pub fn set_output<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.config.set_output(name, value)
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.config.blackboard
    }

    pub fn emit_wake_up(&self) {
        self.wake_up.emit_signal();
    }

    /// Suspends the body until the next tick; the node reports `Running`.
    pub fn yield_running(&self) -> YieldRunning {
        YieldRunning { yielded: false }
    }
}

pub struct YieldRunning {
    yielded: bool,
}

impl Future for YieldRunning {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}
