use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{RefineRequest, StreamRequest, TestRequest, WorkflowBackend};
use crate::stream::{StreamMessage, SubscriptionHandle, subscribe};

use super::machine::{CONNECTION_LOST, Transition, WorkflowMachine};
use super::state::{ActiveTab, WorkflowSnapshot};

/// Owns one workflow session and publishes its snapshot to any number of
/// readers.
///
/// Cloning yields another handle to the same session. Actions never return
/// errors: every failure lands in [`WorkflowSnapshot::error`].
pub struct WorkflowStore<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for WorkflowStore<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<B> {
    backend: B,
    core: Arc<Core>,
}

/// State reachable from the delivery task. The task only holds a `Weak`.
struct Core {
    snapshot: watch::Sender<Arc<WorkflowSnapshot>>,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    /// Tag of the subscription whose events may still be applied.
    epoch: u64,
    /// Bumped by `reset`; request-style results from older sessions are dropped.
    session: u64,
    subscription: Option<SubscriptionHandle>,
    disposed: bool,
}

impl Core {
    fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(WorkflowSnapshot::default()));
        Self {
            snapshot,
            control: Mutex::new(Control::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock unless disposed.
    fn active(&self) -> Option<MutexGuard<'_, Control>> {
        let control = self.lock();
        if control.disposed {
            warn!("workflow store is disposed; ignoring action");
            return None;
        }
        Some(control)
    }

    /// Copy-on-write update. Holding the control guard serialises writers.
    fn publish(&self, _held: &MutexGuard<'_, Control>, f: impl FnOnce(&mut WorkflowSnapshot)) {
        self.snapshot.send_modify(|snapshot| f(Arc::make_mut(snapshot)));
    }

    fn deliver(&self, epoch: u64, message: StreamMessage) {
        let control = self.lock();
        if control.disposed || control.epoch != epoch {
            debug!(epoch, current = control.epoch, "dropping message from superseded stream");
            return;
        }

        match message {
            StreamMessage::Event(event) => {
                let kind = event.kind();
                let mut transition = Transition::Stay;
                self.publish(&control, |s| transition = WorkflowMachine::apply(s, event));
                match transition {
                    Transition::Stay => {}
                    Transition::Phase(status) => debug!(%status, "workflow phase changed"),
                    Transition::TurnEnded(status) => info!(%status, "turn finished"),
                    Transition::Failed(detail) => warn!(kind, %detail, "server reported an error"),
                }
            }
            StreamMessage::Failed(e) => {
                warn!(error = %e, "event stream failed");
                self.publish(&control, |s| {
                    WorkflowMachine::fail(s, CONNECTION_LOST);
                });
            }
            StreamMessage::Closed => self.publish(&control, |s| {
                if s.is_streaming {
                    debug!("event stream closed before an update");
                    WorkflowMachine::stream_closed(s);
                }
            }),
        }
    }
}

impl<B: WorkflowBackend> WorkflowStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                core: Arc::new(Core::new()),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Begin a new workflow from free-text input, superseding any turn in flight.
    pub async fn start(&self, user_input: &str) {
        let Some(epoch) = self.begin_turn(|s| WorkflowMachine::start(s, user_input)) else {
            return;
        };
        info!(epoch, "starting workflow");
        self.open(
            epoch,
            StreamRequest::Start {
                user_input: user_input.to_string(),
            },
        )
        .await;
    }

    /// Continue the current workflow with an answer. Does nothing until the
    /// server has assigned a thread id.
    pub async fn answer_clarification(&self, answer: &str) {
        let Some(thread_id) = self.snapshot().thread_id.clone() else {
            debug!("no thread id yet; ignoring answer");
            return;
        };
        let Some(epoch) = self.begin_turn(|s| WorkflowMachine::answer(s, answer)) else {
            return;
        };
        info!(epoch, %thread_id, "answering clarification");
        self.open(
            epoch,
            StreamRequest::Continue {
                thread_id,
                answer: answer.to_string(),
            },
        )
        .await;
    }

    /// Replace the content of the variant at `index`.
    pub fn update_variant(&self, index: usize, content: impl Into<String>) {
        let core = &self.shared.core;
        let Some(control) = core.active() else {
            return;
        };
        let content = content.into();
        let mut updated = false;
        core.publish(&control, |s| {
            updated = WorkflowMachine::update_variant(s, index, content)
        });
        if !updated {
            debug!(index, "variant index out of range; ignoring edit");
        }
    }

    /// Execute a variant against a test input and record the output under
    /// `variant_id`.
    pub async fn run_test(&self, variant_content: &str, variant_id: &str, test_input: &str) {
        let core = &self.shared.core;
        let session = {
            let Some(control) = core.active() else {
                return;
            };
            core.publish(&control, WorkflowMachine::begin_test);
            control.session
        };

        let request = TestRequest {
            prompt: variant_content.to_string(),
            input: test_input.to_string(),
        };
        debug!(variant_id, "running variant test");
        let result = self.shared.backend.execute_test(&request).await;

        let control = core.lock();
        if control.disposed || control.session != session {
            debug!(variant_id, "discarding test result from a previous session");
            return;
        }
        match result {
            Ok(response) => {
                info!(variant_id, "variant test finished");
                core.publish(&control, |s| {
                    WorkflowMachine::test_succeeded(s, variant_id.to_string(), response.result)
                });
            }
            Err(e) => {
                warn!(variant_id, error = %e, "variant test failed");
                core.publish(&control, |s| WorkflowMachine::test_failed(s, e.to_string()));
            }
        }
    }

    /// Ask the server to refine one variant. Does nothing without a thread id.
    pub async fn refine_variant(&self, variant_id: &str, feedback: &str) {
        let core = &self.shared.core;
        let Some(thread_id) = self.snapshot().thread_id.clone() else {
            debug!("no thread id yet; ignoring refine");
            return;
        };
        let session = {
            let Some(control) = core.active() else {
                return;
            };
            core.publish(&control, WorkflowMachine::begin_refine);
            control.session
        };

        let request = RefineRequest {
            variant_id: variant_id.to_string(),
            feedback: feedback.to_string(),
        };
        info!(%thread_id, variant_id, "refining variant");
        let result = self.shared.backend.refine_variant(&thread_id, &request).await;

        let control = core.lock();
        if control.disposed || control.session != session {
            debug!(variant_id, "discarding refine result from a previous session");
            return;
        }
        match result {
            Ok(response) => core.publish(&control, |s| {
                WorkflowMachine::refine_succeeded(s, response.state);
            }),
            Err(e) => {
                warn!(variant_id, error = %e, "refine failed");
                core.publish(&control, |s| {
                    WorkflowMachine::refine_failed(s, e.to_string());
                });
            }
        }
    }

    pub fn set_active_tab(&self, tab: ActiveTab) {
        let core = &self.shared.core;
        if let Some(control) = core.active() {
            core.publish(&control, |s| s.active_tab = tab);
        }
    }

    /// Return to the initial snapshot. The active stream is cancelled and
    /// pending request results are ignored when they arrive.
    pub fn reset(&self) {
        let core = &self.shared.core;
        let Some(mut control) = core.active() else {
            return;
        };
        control.epoch += 1;
        control.session += 1;
        control.subscription = None;
        core.publish(&control, |s| *s = WorkflowSnapshot::default());
        info!(session = control.session, "workflow reset");
    }

    /// Tear down the session. Later actions are ignored.
    pub fn dispose(&self) {
        let core = &self.shared.core;
        let mut control = core.lock();
        if control.disposed {
            return;
        }
        control.disposed = true;
        control.epoch += 1;
        control.subscription = None;
        core.publish(&control, |s| s.is_streaming = false);
        debug!("workflow store disposed");
    }

    pub fn snapshot(&self) -> Arc<WorkflowSnapshot> {
        Arc::clone(&self.shared.core.snapshot.borrow())
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<WorkflowSnapshot>> {
        self.shared.core.snapshot.subscribe()
    }

    /// Resolve once no turn is streaming and return that snapshot.
    pub async fn wait_for_turn(&self) -> Arc<WorkflowSnapshot> {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| !s.is_streaming).await {
            Ok(snapshot) => Arc::clone(&snapshot),
            Err(_) => self.snapshot(),
        }
    }

    /// Supersede the current subscription and apply `f`. Returns the new epoch.
    fn begin_turn(&self, f: impl FnOnce(&mut WorkflowSnapshot)) -> Option<u64> {
        let core = &self.shared.core;
        let mut control = core.active()?;
        control.epoch += 1;
        control.subscription = None;
        core.publish(&control, f);
        Some(control.epoch)
    }

    async fn open(&self, epoch: u64, request: StreamRequest) {
        let result = self.shared.backend.open_stream(request).await;

        let core = &self.shared.core;
        let mut control = core.lock();
        if control.disposed || control.epoch != epoch {
            debug!(epoch, "stream opened for a superseded turn; closing it");
            return;
        }
        match result {
            Ok(source) => {
                let weak = Arc::downgrade(core);
                let handle = subscribe(source, move |message| {
                    if let Some(core) = weak.upgrade() {
                        core.deliver(epoch, message);
                    }
                });
                control.subscription = Some(handle);
            }
            Err(e) => {
                warn!(error = %e, "could not open event stream");
                core.publish(&control, |s| {
                    WorkflowMachine::fail(s, e.to_string());
                });
            }
        }
    }
}
