pub mod identity;
pub mod message;
pub mod session;

pub use identity::{ConnectionId, PeerRosterEntry, Roster, UserIdentity};
pub use message::{OutgoingMessage, RoomMessage};
pub use session::{AddressFamily, IceCandidate, IceServer, SdpType, SessionDescription};
