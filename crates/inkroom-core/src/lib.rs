//! Inkroom Core Library
//!
//! Client-side synchronization core for shared whiteboard rooms: typed drawing
//! operations and their wire codec, the undo history, the outbound queue, the
//! room session state machine, and the bootstrap that rebuilds a room's
//! surface from its persisted baseline and stored operations.

pub mod api;
pub mod applier;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod history;
pub mod operation;
pub mod pending;
pub mod protocol;
pub mod raster;
pub mod session;
pub mod surface;
pub mod transport;
pub mod whiteboard;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{
    ApiDispatcher, ApiError, HttpRoomApi, InlineDispatcher, MemoryRoomApi, RoomApi,
    ThreadedDispatcher, Ticket,
};
pub use applier::EchoFilter;
pub use bootstrap::{Bootstrap, BootstrapPhase, BootstrapReport};
pub use codec::{CodecError, DrawMessage, StoredOperation};
pub use config::ClientConfig;
pub use history::RasterHistory;
pub use operation::{DrawOp, DrawOperation, OpKind};
pub use pending::{FlushReport, PendingQueue};
pub use raster::PixelSurface;
pub use session::{ConnectionState, Session, SessionError, SessionResult};
pub use surface::{Surface, SurfaceError};
pub use transport::{ConnectRequest, NativeWebSocket, Transport, TransportError, TransportEvent};
pub use whiteboard::{ChatEntry, Identity, Whiteboard, WhiteboardEvent};
