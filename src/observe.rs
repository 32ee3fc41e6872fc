//! Observation events emitted by the pipeline and the worker/consumer
//! handshake that carries them to a front-end.

use crate::{
    codegen::{asm::AsmRegister, regalloc::Location},
    error::{CompileError, CompileResult},
    lexer::lex::Span,
    parser::ast::NodeId,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender},
        Arc,
    },
    time::Duration,
};

/// How long a blocked worker waits before re-checking the cancel flag.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Lexer,
    Parser,
    Codegen,
    Finished,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    TokenStart,
    WordAccumulate,
    TokenEnd,
    NodeStart,
    NodeEnd,
    ParameterSet,
    RegisterSet,
    RegisterCleared,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub mode: Mode,
    pub state: State,
    pub span: Option<Span>,
    pub text: Option<String>,
    pub node: Option<NodeId>,
    pub register: Option<AsmRegister>,
    pub location: Option<Location>,
}

impl Event {
    pub fn new(mode: Mode, state: State) -> Event {
        Event {
            mode,
            state,
            span: None,
            text: None,
            node: None,
            register: None,
            location: None,
        }
    }

    pub fn at(mut self, span: &Span) -> Event {
        self.span = Some(span.clone());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Event {
        self.text = Some(text.into());
        self
    }

    pub fn with_node(mut self, node: NodeId) -> Event {
        self.node = Some(node);
        self
    }

    pub fn with_register(mut self, register: AsmRegister, location: Location) -> Event {
        self.register = Some(register);
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Lexer => "lexer",
            Mode::Parser => "parser",
            Mode::Codegen => "codegen",
            Mode::Finished => "finished",
            Mode::Error => "error",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::TokenStart => "token-start",
            State::WordAccumulate => "word",
            State::TokenEnd => "token-end",
            State::NodeStart => "node-start",
            State::NodeEnd => "node-end",
            State::ParameterSet => "parameter-set",
            State::RegisterSet => "register-set",
            State::RegisterCleared => "register-cleared",
            State::Finished => "done",
            State::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.mode, self.state)?;
        if let Some(span) = &self.span {
            write!(f, " @{}", span)?;
        }
        if let Some(node) = self.node {
            write!(f, " {}", node)?;
        }
        match (self.register, self.location) {
            (Some(register), Some(location)) => write!(f, " {} <- {}", register, location)?,
            (Some(register), None) => write!(f, " {}", register)?,
            (None, Some(location)) => write!(f, " {}", location)?,
            (None, None) => {}
        }
        if let Some(text) = &self.text {
            write!(f, " {:?}", text)?;
        }
        Ok(())
    }
}

/// Sink for pipeline checkpoints. Returning an error aborts the compilation.
pub trait Observer {
    fn notify(&mut self, event: &Event) -> CompileResult<()>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Observer for Silent {
    fn notify(&mut self, _event: &Event) -> CompileResult<()> {
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl Recorder {
    pub fn states(&self, mode: Mode) -> Vec<State> {
        self.events
            .iter()
            .filter(|event| event.mode == mode)
            .map(|event| event.state)
            .collect()
    }
}

impl Observer for Recorder {
    fn notify(&mut self, event: &Event) -> CompileResult<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Shared cooperative termination flag.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Worker side of the handshake: publishes one event and blocks until the
/// consumer acknowledges it or the cancel flag is raised.
pub struct Handshake {
    events: SyncSender<Event>,
    acks: Receiver<()>,
    cancel: CancelToken,
}

/// Consumer side of the handshake.
pub struct Consumer {
    events: Receiver<Event>,
    acks: Sender<()>,
    cancel: CancelToken,
}

pub fn handshake() -> (Handshake, Consumer) {
    let (event_tx, event_rx) = mpsc::sync_channel(1);
    let (ack_tx, ack_rx) = mpsc::channel();
    let cancel = CancelToken::new();

    (
        Handshake {
            events: event_tx,
            acks: ack_rx,
            cancel: cancel.clone(),
        },
        Consumer {
            events: event_rx,
            acks: ack_tx,
            cancel,
        },
    )
}

impl Observer for Handshake {
    fn notify(&mut self, event: &Event) -> CompileResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        self.events
            .send(event.clone())
            .map_err(|_| CompileError::Cancelled)?;

        loop {
            match self.acks.recv_timeout(POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        return Err(CompileError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CompileError::Cancelled),
            }
        }
    }
}

impl Consumer {
    /// Next published event; `None` once the worker has finished.
    pub fn recv(&self) -> Option<Event> {
        self.events.recv().ok()
    }

    pub fn acknowledge(&self) {
        let _ = self.acks.send(());
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
