//! The rollback scheduler.
//!
//! `Game` keeps three input histories aligned to the last synchronized
//! checkpoint: what we pressed, what the remote peer confirmed, and what
//! we speculated for the frames they have not confirmed yet. Each visible
//! frame starts with a reconciliation pass: rewind to the checkpoint,
//! replay the confirmed prefix with both real inputs, re-checkpoint,
//! then replay the remainder against refreshed speculation until we are
//! back at the frame we started from.

use std::time::{Duration, Instant};

use emu_state::{crc32, snapshot_from_slice, snapshot_to_vec};
use nes_core::{Bus, Port};

use crate::ring::InputRing;

/// Input history depth. The session layer keeps the peers within a few
/// frames of each other, so this is hundreds of frames of slack.
const RING_CAPACITY: usize = 300;

/// One visible frame's wall-clock budget; replays longer than this are
/// reported as lag.
const FRAME_DURATION: Duration = Duration::from_micros(16_667);

/// A complete, deterministic snapshot of the console at a known frame.
#[derive(Clone)]
pub struct Checkpoint {
    pub frame: u32,
    pub state: Vec<u8>,
    pub crc32: u32,
}

impl Checkpoint {
    pub fn new(frame: u32, state: Vec<u8>) -> Self {
        let crc32 = crc32(&state);
        Self { frame, state, crc32 }
    }
}

/// Rollback state manager for one two-player session.
pub struct Game<'a> {
    bus: &'a mut Bus,
    frame: u32,
    generation: u32,
    checkpoint: Checkpoint,

    local_input: InputRing,
    remote_input: InputRing,
    speculated_input: InputRing,
    last_remote_input: u8,

    local_port: Port,
    remote_port: Port,

    /// Arm the console's execution trace for the confirmed portion of
    /// replays (where both sides' inputs are known and comparable).
    trace_replay: bool,
}

impl<'a> Game<'a> {
    /// The bus must be reset and carry the loaded cartridge. `local_port`
    /// is the controller this peer drives; the other port is the remote's.
    pub fn new(bus: &'a mut Bus, local_port: Port) -> Self {
        let remote_port = match local_port {
            Port::One => Port::Two,
            Port::Two => Port::One,
        };
        Self {
            bus,
            frame: 0,
            generation: 0,
            checkpoint: Checkpoint::new(0, Vec::new()),
            local_input: InputRing::new(RING_CAPACITY),
            remote_input: InputRing::new(RING_CAPACITY),
            speculated_input: InputRing::new(RING_CAPACITY),
            last_remote_input: 0,
            local_port,
            remote_port,
            trace_replay: false,
        }
    }

    /// (Re)start the session. With a checkpoint, adopt it and rewind the
    /// console to it; without one, snapshot the console as the new
    /// baseline. Either way the input histories start empty and the
    /// generation counter ticks up.
    pub fn init(&mut self, checkpoint: Option<Checkpoint>) {
        self.generation = self.generation.wrapping_add(1);
        self.frame = 0;

        self.local_input = InputRing::new(RING_CAPACITY);
        self.remote_input = InputRing::new(RING_CAPACITY);
        self.speculated_input = InputRing::new(RING_CAPACITY);
        // last_remote_input survives: it is still the best prediction.

        match checkpoint {
            Some(checkpoint) => {
                self.checkpoint = checkpoint;
                self.rollback();
            }
            None => self.save(),
        }
    }

    /// Record one frame of local input. The remote joystick keeps its
    /// last confirmed bitmap: the assumption is that the peer keeps
    /// pressing the same buttons until told otherwise.
    pub fn handle_local_input(&mut self, buttons: u8) {
        self.bus.set_buttons(self.local_port, buttons);
        self.bus.set_buttons(self.remote_port, self.last_remote_input);

        self.local_input.push(buttons);
        self.speculated_input.push(self.last_remote_input);
    }

    /// Record one frame of confirmed remote input.
    pub fn handle_remote_input(&mut self, buttons: u8) {
        self.remote_input.push(buttons);
        self.last_remote_input = buttons;
    }

    /// Reconcile with whatever remote input has arrived, then advance
    /// exactly one visible frame.
    pub fn run_frame(&mut self) {
        self.apply_remote_input();
        self.play_frame();
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Bumped on every `init`.
    pub fn gen(&self) -> u32 {
        self.generation
    }

    /// Frames of local input not yet folded into the checkpoint.
    pub fn pending_local(&self) -> usize {
        self.local_input.len()
    }

    /// Received remote inputs not yet folded into the checkpoint.
    pub fn pending_remote(&self) -> usize {
        self.remote_input.len()
    }

    pub fn set_trace_replay(&mut self, on: bool) {
        self.trace_replay = on;
    }

    pub fn bus(&self) -> &Bus {
        self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        self.bus
    }

    /// Tick the console until the frame edge.
    fn play_frame(&mut self) {
        loop {
            if self.bus.tick().frame_complete {
                break;
            }
        }

        self.frame += 1;
        // Wraps after ~2 years of continuous play; a wrapped counter
        // would desynchronize the input rings silently, so die loudly.
        assert!(self.frame != 0, "frame counter overflow");
    }

    /// Snapshot the console as the new checkpoint.
    fn save(&mut self) {
        let state = snapshot_to_vec(&*self.bus)
            .unwrap_or_else(|err| panic!("failed to create checkpoint: {err}"));
        self.checkpoint = Checkpoint::new(self.frame, state);
    }

    /// Rewind the console to the checkpoint.
    fn rollback(&mut self) {
        snapshot_from_slice(&mut *self.bus, &self.checkpoint.state)
            .unwrap_or_else(|err| panic!("failed to restore checkpoint: {err}"));
        self.frame = self.checkpoint.frame;
    }

    /// The reconciliation pass.
    ///
    /// Rewinds to the checkpoint, replays the prefix of frames for which
    /// both inputs are confirmed, snapshots that as the new checkpoint,
    /// rebuilds the speculation tail from the newest confirmed remote
    /// bitmap, and replays the tail back up to the frame we entered at.
    /// The whole replay runs with the PPU fast-forwarded.
    fn apply_remote_input(&mut self) {
        let confirmed = self.local_input.len().min(self.remote_input.len());
        if confirmed == 0 {
            return;
        }

        let started = Instant::now();
        let end_frame = self.frame;
        let checkpoint_frame = self.checkpoint.frame;

        self.rollback();
        self.bus.set_fast_forward(true);

        // Confirmed prefix: both inputs are ground truth here, which is
        // also the only stretch worth tracing for desync comparison.
        if self.trace_replay {
            self.bus.set_trace_enabled(true);
        }
        for i in 0..confirmed {
            self.bus
                .set_buttons(self.local_port, self.local_input.get(i));
            self.bus
                .set_buttons(self.remote_port, self.remote_input.get(i));
            self.play_frame();
        }
        if self.trace_replay {
            self.bus.set_trace_enabled(false);
        }

        // This is the newest state both sides agree on.
        self.save();

        // Refresh the speculation tail: the newest confirmed remote
        // bitmap is the best predictor for the unconfirmed frames.
        let predicted = self.remote_input.get(confirmed - 1);
        for i in confirmed..self.local_input.len() {
            self.speculated_input.set(i, predicted);
        }

        // Replay the speculative tail, stopping exactly at the frame we
        // entered with.
        for i in confirmed..self.local_input.len() {
            self.bus
                .set_buttons(self.remote_port, self.speculated_input.get(i));
            self.bus
                .set_buttons(self.local_port, self.local_input.get(i));
            if self.frame < end_frame {
                self.play_frame();
            }
        }
        assert!(
            self.frame == end_frame,
            "replay diverged: at frame {} instead of {end_frame}",
            self.frame,
        );

        self.local_input.drain_front(confirmed);
        self.remote_input.drain_front(confirmed);
        self.speculated_input.drain_front(confirmed);

        self.bus.set_fast_forward(false);

        let elapsed = started.elapsed();
        if elapsed > FRAME_DURATION {
            eprintln!(
                "[DEBUG] replay lag: {elapsed:?} (replayed {} frames)",
                end_frame - checkpoint_frame,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::testing::input_echo_rom;
    use nes_core::load_rom;

    fn console() -> Bus {
        let mut bus = Bus::new(load_rom(&input_echo_rom()).unwrap());
        bus.reset();
        bus
    }

    #[test]
    fn init_saves_a_baseline_checkpoint() {
        let mut bus = console();
        let mut game = Game::new(&mut bus, Port::One);
        game.init(None);

        assert_eq!(game.frame(), 0);
        assert_eq!(game.gen(), 1);
        assert_eq!(game.checkpoint().frame, 0);
        assert!(!game.checkpoint().state.is_empty());
        assert_eq!(
            game.checkpoint().crc32,
            emu_state::crc32(&game.checkpoint().state)
        );
    }

    #[test]
    fn frames_advance_one_at_a_time() {
        let mut bus = console();
        let mut game = Game::new(&mut bus, Port::One);
        game.init(None);

        for i in 1..=5 {
            game.handle_local_input(0);
            game.run_frame();
            assert_eq!(game.frame(), i);
        }
    }

    #[test]
    fn init_from_own_checkpoint_is_a_noop() {
        let mut bus = console();
        let mut game = Game::new(&mut bus, Port::One);
        game.init(None);

        // A few frames of play; the remote's input for a frame arrives
        // after that frame has run locally, as over a real link.
        for _ in 0..3 {
            game.handle_local_input(0x11);
            game.run_frame();
            game.handle_remote_input(0x22);
        }
        game.handle_local_input(0x11);
        game.run_frame();

        let cp = game.checkpoint().clone();
        let state_before = emu_state::snapshot_to_vec(game.bus()).unwrap();
        let frame_before = game.frame();

        game.init(Some(cp.clone()));
        assert_eq!(game.frame(), cp.frame);

        // The same tail input from the restored checkpoint reproduces
        // the state we had.
        for _ in cp.frame..frame_before {
            game.handle_local_input(0x11);
            game.run_frame();
        }
        let state_after = emu_state::snapshot_to_vec(game.bus()).unwrap();
        assert_eq!(state_before, state_after);
    }

    #[test]
    fn reconciliation_returns_to_the_entry_frame() {
        let mut bus = console();
        let mut game = Game::new(&mut bus, Port::One);
        game.init(None);

        // Run ahead on speculation only.
        for i in 0..6u8 {
            game.handle_local_input(i);
            game.run_frame();
        }
        assert_eq!(game.frame(), 6);

        // Late remote input for the first 4 frames arrives at once.
        for i in 0..4u8 {
            game.handle_remote_input(i.wrapping_mul(3));
        }
        game.handle_local_input(6);
        game.run_frame();

        // One new frame on top of the entry frame.
        assert_eq!(game.frame(), 7);
        // Checkpoint advanced to the confirmed prefix.
        assert_eq!(game.checkpoint().frame, 4);
    }

    #[test]
    fn delayed_remote_input_converges_to_the_same_state() {
        let local_inputs: Vec<u8> = (0..30).map(|i| (i * 7) as u8).collect();
        let remote_inputs: Vec<u8> = (0..30).map(|i| (i * 13 + 1) as u8).collect();

        // Session A: each frame's remote input arrives right after the
        // frame runs, one frame of latency.
        let mut bus_a = console();
        let mut game_a = Game::new(&mut bus_a, Port::One);
        game_a.init(None);
        for i in 0..30 {
            game_a.handle_local_input(local_inputs[i]);
            game_a.run_frame();
            game_a.handle_remote_input(remote_inputs[i]);
        }

        // Session B: remote input arrives 7 frames late.
        let mut bus_b = console();
        let mut game_b = Game::new(&mut bus_b, Port::One);
        game_b.init(None);
        for i in 0..30 {
            if i >= 7 {
                game_b.handle_remote_input(remote_inputs[i - 7]);
            }
            game_b.handle_local_input(local_inputs[i]);
            game_b.run_frame();
        }
        // Deliver session B's stragglers.
        for i in 23..30 {
            game_b.handle_remote_input(remote_inputs[i]);
        }
        // One reconciling frame on each side; by now both have consumed
        // the same 30 input pairs.
        game_a.handle_local_input(0);
        game_a.run_frame();
        game_b.handle_local_input(0);
        game_b.run_frame();

        assert_eq!(game_a.frame(), game_b.frame());
        assert_eq!(game_a.checkpoint().frame, game_b.checkpoint().frame);
        assert_eq!(game_a.checkpoint().crc32, game_b.checkpoint().crc32);
        assert_eq!(game_a.checkpoint().state, game_b.checkpoint().state);
    }

    #[test]
    fn speculation_repeats_last_confirmed_remote_input() {
        let mut bus = console();
        let mut game = Game::new(&mut bus, Port::One);
        game.init(None);

        game.handle_local_input(0x01);
        game.run_frame();
        game.handle_remote_input(0x5A);

        // No further remote input: speculation holds 0x5A.
        game.handle_local_input(0x02);
        game.run_frame();
        // The remote joystick's live bitmap is the speculated one; the
        // NMI handler copied it into $12 during the last frame.
        assert_eq!(game.bus().peek(0x0012), 0x5A);
    }
}
