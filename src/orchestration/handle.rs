use crate::orchestration::error::OrchestratorError;
use crate::orchestration::outcome::RunOutcome;
use crate::orchestration::progress::{StageEvent, StageEvents};
use crate::shared::ids::{IntentId, OptionId, RunId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

type Reply = Sender<Result<(), OrchestratorError>>;

#[derive(Debug)]
pub(crate) enum Command {
    Confirm { intent_id: IntentId, reply: Reply },
    Reject { intent_id: IntentId, reply: Reply },
    ChooseOption { option_id: OptionId, reply: Reply },
    Wake,
}

impl Command {
    pub(crate) fn reply_finished(self, run_id: &RunId) {
        let reply = match self {
            Command::Confirm { reply, .. }
            | Command::Reject { reply, .. }
            | Command::ChooseOption { reply, .. } => reply,
            Command::Wake => return,
        };
        let _ = reply.send(Err(OrchestratorError::RunFinished {
            run_id: run_id.clone(),
        }));
    }
}

#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    control: Sender<Command>,
    events: Option<Receiver<StageEvent>>,
    cancel: Arc<AtomicBool>,
    engine: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: RunId,
        control: Sender<Command>,
        events: Receiver<StageEvent>,
        cancel: Arc<AtomicBool>,
        engine: JoinHandle<RunOutcome>,
    ) -> Self {
        Self {
            run_id,
            control,
            events: Some(events),
            cancel,
            engine,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn subscribe(&mut self) -> Result<StageEvents, OrchestratorError> {
        self.events
            .take()
            .map(StageEvents::new)
            .ok_or(OrchestratorError::AlreadySubscribed)
    }

    pub fn confirm(&self, intent_id: &IntentId) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Confirm {
            intent_id: intent_id.clone(),
            reply,
        })
    }

    pub fn reject(&self, intent_id: &IntentId) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Reject {
            intent_id: intent_id.clone(),
            reply,
        })
    }

    pub fn choose_option(&self, option_id: &OptionId) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::ChooseOption {
            option_id: option_id.clone(),
            reply,
        })
    }

    /// Requests cooperative cancellation. Takes effect at the next stage
    /// boundary or while the engine waits; gate submissions already past
    /// validation still finish.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.control.send(Command::Wake);
    }

    pub fn is_finished(&self) -> bool {
        self.engine.is_finished()
    }

    pub fn result(self) -> Result<RunOutcome, OrchestratorError> {
        let RunHandle {
            run_id,
            control,
            engine,
            ..
        } = self;
        drop(control);
        engine
            .join()
            .map_err(|_| OrchestratorError::EnginePanicked { run_id })
    }

    fn request(
        &self,
        build: impl FnOnce(Reply) -> Command,
    ) -> Result<(), OrchestratorError> {
        let finished = || OrchestratorError::RunFinished {
            run_id: self.run_id.clone(),
        };
        let (reply_tx, reply_rx) = mpsc::channel();
        self.control.send(build(reply_tx)).map_err(|_| finished())?;
        reply_rx.recv().map_err(|_| finished())?
    }
}
