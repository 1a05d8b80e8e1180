//! View synchronous group membership over a multicast group transport.
//!
//! This crate provides:
//! - Agreed, monotonically versioned views of each group's membership
//! - A state exchange round after every raw membership change
//! - A view safety gate holding back sends and view reads mid-change
//! - Per-group communication channels with listener fan-out
//! - A binding that owns the transport and dispatches its events
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod binding;
mod channel;
mod config;
mod controller;
mod error;
mod exchange;
mod gate;
mod ids;
mod listener;
mod message;
mod retry;
mod statistics;
mod view;

pub use binding::{GroupHandle, ViewSyncBinding};
pub use channel::{CommunicationChannel, ProtocolHandler};
pub use config::ViewSyncConfig;
pub use controller::{ControllerState, ViewController};
pub use error::{CodecError, Error, Result};
pub use exchange::{StateBroadcaster, StateExchangeCoordinator};
pub use gate::ViewSafetyGate;
pub use ids::{GroupId, MemberId, ViewId};
pub use listener::{
    DataExchangeListener, ListenerError, ListenerId, ListenerRegistry, MessageReceivedListener,
    ViewChangedListener,
};
pub use message::{DeliveryGuarantee, Envelope, MemberState, Message, STATE_EXCHANGE_TAG};
pub use statistics::{Statistics, StatisticsSnapshot};
pub use view::View;
