//! Rollback netplay.
//!
//! Two peers run the same console in lockstep-with-prediction. Each side
//! applies its own input immediately, speculates the remote input as
//! "whatever they pressed last", and, when the real remote input arrives,
//! rewinds to the last synchronized checkpoint and re-simulates. The PPU
//! runs fast-forwarded during replays, so only the visible frame pays for
//! pixel composition.
//!
//! The [`game`] module is the rollback scheduler; [`session`] carries the
//! wire protocol from [`protocol`] over one TCP stream with a reader and
//! a writer thread. The emulator itself is only ever touched from the
//! game thread.

pub mod game;
pub mod protocol;
pub mod ring;
pub mod session;

pub use game::{Checkpoint, Game};
pub use protocol::{Message, MessageKind, ProtocolError};
pub use ring::InputRing;
pub use session::{Session, SessionError};
