//! The peer-to-peer session.
//!
//! One TCP connection, two helper threads: a reader that turns the byte
//! stream into messages on a bounded inbound queue, and a writer that
//! drains a bounded outbound queue onto the socket. The game thread owns
//! the emulator and is the only code that touches it; the helpers only
//! ever see the queues and the socket, so the emulator needs no locks.
//!
//! Transport failure in either helper is fatal to the session: the
//! helper flags it and exits, and the next game-thread call reports it.

use std::io;
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::game::{Checkpoint, Game};
use crate::protocol::{
    read_message, write_message, Message, MessageKind, INPUT_BATCH_SIZE,
};

/// Queue depth between the game thread and each helper.
const QUEUE_CAPACITY: usize = 1000;

#[derive(Debug)]
pub enum SessionError {
    /// Failed to establish the connection.
    Connect(io::Error),
    /// The stream broke mid-session. Unrecoverable; a higher layer may
    /// offer a fresh session.
    Transport,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(err) => write!(f, "netplay: failed to connect: {err}"),
            Self::Transport => write!(f, "netplay: transport failure"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Pending local input waiting to be flushed as one Input message.
struct InputBatch {
    start_frame: u32,
    buttons: Vec<u8>,
}

impl InputBatch {
    fn new(start_frame: u32) -> Self {
        Self {
            start_frame,
            buttons: Vec::with_capacity(INPUT_BATCH_SIZE),
        }
    }
}

/// A live two-peer session wrapping the rollback [`Game`].
pub struct Session<'a> {
    game: Game<'a>,
    outbound: Option<SyncSender<Message>>,
    inbound: Receiver<Message>,
    stream: TcpStream,
    stop: Arc<AtomicBool>,
    dead: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    batch: InputBatch,
    remote_bye: bool,
}

impl<'a> Session<'a> {
    /// Host a session: listen on `addr` and accept exactly one peer.
    pub fn host(game: Game<'a>, addr: impl ToSocketAddrs) -> Result<Self, SessionError> {
        let listener = TcpListener::bind(addr).map_err(SessionError::Connect)?;
        let (stream, _) = listener.accept().map_err(SessionError::Connect)?;
        Ok(Self::over(game, stream))
    }

    /// Join a hosted session at `addr`.
    pub fn join(game: Game<'a>, addr: impl ToSocketAddrs) -> Result<Self, SessionError> {
        let stream = TcpStream::connect(addr).map_err(SessionError::Connect)?;
        Ok(Self::over(game, stream))
    }

    /// Wrap an established connection and start the I/O helpers.
    pub fn over(game: Game<'a>, stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();

        let (out_tx, out_rx) = sync_channel::<Message>(QUEUE_CAPACITY);
        let (in_tx, in_rx) = sync_channel::<Message>(QUEUE_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let dead = Arc::new(AtomicBool::new(false));

        let reader = {
            let mut stream = stream.try_clone().expect("clone stream for reader");
            let stop = Arc::clone(&stop);
            let dead = Arc::clone(&dead);
            std::thread::spawn(move || loop {
                match read_message(&mut stream) {
                    Ok(msg) => {
                        if in_tx.send(msg).is_err() {
                            break; // session dropped
                        }
                    }
                    Err(err) => {
                        if !stop.load(Ordering::SeqCst) {
                            eprintln!("[ERROR] netplay: read failed: {err}");
                            dead.store(true, Ordering::SeqCst);
                        }
                        break;
                    }
                }
            })
        };

        let writer = {
            let mut stream = stream.try_clone().expect("clone stream for writer");
            let stop = Arc::clone(&stop);
            let dead = Arc::clone(&dead);
            std::thread::spawn(move || {
                while let Ok(msg) = out_rx.recv() {
                    if let Err(err) = write_message(&mut stream, &msg) {
                        if !stop.load(Ordering::SeqCst) {
                            eprintln!("[ERROR] netplay: write failed: {err}");
                            dead.store(true, Ordering::SeqCst);
                        }
                        break;
                    }
                }
            })
        };

        Self {
            game,
            outbound: Some(out_tx),
            inbound: in_rx,
            stream,
            stop,
            dead,
            reader: Some(reader),
            writer: Some(writer),
            batch: InputBatch::new(0),
            remote_bye: false,
        }
    }

    pub fn game(&self) -> &Game<'a> {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game<'a> {
        &mut self.game
    }

    /// The session is over: the peer said goodbye or the link died.
    pub fn should_exit(&self) -> bool {
        self.remote_bye || self.dead.load(Ordering::SeqCst)
    }

    /// Host side, once, before gameplay: initialize the game, adopt the
    /// fresh state as the shared baseline and ship it to the peer.
    pub fn send_reset(&mut self) -> Result<(), SessionError> {
        self.game.init(None);
        self.batch = InputBatch::new(0);

        let checkpoint = self.game.checkpoint();
        let msg = Message::reset(checkpoint.frame, checkpoint.state.clone());
        self.send(msg)
    }

    /// Record local input for the upcoming frame and flush a batch to
    /// the peer every [`INPUT_BATCH_SIZE`] frames.
    pub fn send_input(&mut self, buttons: u8) -> Result<(), SessionError> {
        self.game.handle_local_input(buttons);
        self.batch.buttons.push(buttons);

        if self.batch.buttons.len() >= INPUT_BATCH_SIZE {
            let batch = std::mem::replace(
                &mut self.batch,
                InputBatch::new(self.game.frame() + 1),
            );
            self.send(Message::input(batch.start_frame, batch.buttons))?;
        }
        Ok(())
    }

    /// Say goodbye. Best-effort: the peer may already be gone.
    pub fn send_bye(&mut self) {
        if let Some(outbound) = &self.outbound {
            let _ = outbound.try_send(Message::bye());
        }
    }

    /// Drain one pending message from the peer, if any.
    pub fn handle_messages(&mut self) -> Result<(), SessionError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(SessionError::Transport);
        }

        if let Ok(msg) = self.inbound.try_recv() {
            match msg.kind {
                MessageKind::Reset => {
                    self.batch = InputBatch::new(msg.frame);
                    self.game
                        .init(Some(Checkpoint::new(msg.frame, msg.payload)));
                }
                MessageKind::Input => {
                    for &buttons in &msg.payload {
                        self.game.handle_remote_input(buttons);
                    }
                }
                MessageKind::Bye => {
                    self.remote_bye = true;
                }
            }
        }
        Ok(())
    }

    /// One visible frame: pump the peer's messages, then advance.
    pub fn run_frame(&mut self) -> Result<(), SessionError> {
        self.handle_messages()?;
        self.game.run_frame();
        Ok(())
    }

    fn send(&mut self, msg: Message) -> Result<(), SessionError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(SessionError::Transport);
        }
        let outbound = self.outbound.as_ref().ok_or(SessionError::Transport)?;
        match outbound.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                // The writer is behind; block rather than drop input.
                outbound.send(msg).map_err(|_| SessionError::Transport)
            }
            Err(TrySendError::Disconnected(_)) => Err(SessionError::Transport),
        }
    }

    /// Shut the session down and join the helpers. In-flight outbound
    /// messages may be lost.
    pub fn close(mut self) {
        self.shutdown();
        // Free queue capacity in case the reader is parked on a full
        // inbound queue; its next read fails and it exits.
        while self.inbound.try_recv().is_ok() {}
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the sender stops the writer; shutting the socket down
        // unblocks the reader.
        self.outbound = None;
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
