pub mod codec;
pub mod types;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::WireError;
use crate::node::context::NodeContext;

/// Stable wire identifier of a message shape.
pub type WireId = u32;

/// A typed request/response object exchanged between nodes.
///
/// Capabilities are composed rather than inherited: serialization comes from
/// serde/bincode, side effects from `handle`, and the reply from `response`.
/// `as_any` lets callers downcast received responses to concrete shapes.
pub trait Message: Send + Sync + fmt::Debug {
    fn wire_id(&self) -> WireId;

    fn encode(&self) -> Result<Vec<u8>, WireError>;

    /// Serialized payload size estimate, used for buffer reservation.
    fn estimated_size(&self) -> usize;

    /// Apply receiving-side effects on the hosting node.
    fn handle(&self, ctx: &NodeContext);

    /// Build the reply addressed to the sender; `None` yields a generic ack.
    fn response(&self, ctx: &NodeContext) -> Option<Box<dyn Message>>;

    fn as_any(&self) -> &dyn Any;
}

/// Implemented by every concrete message shape; the blanket impl below
/// provides the full `Message` surface from it.
pub trait WireMessage:
    Serialize + DeserializeOwned + Send + Sync + fmt::Debug + 'static
{
    const WIRE_ID: WireId;

    fn on_handle(&self, _ctx: &NodeContext) {}

    fn on_response(&self, _ctx: &NodeContext) -> Option<Box<dyn Message>> {
        None
    }
}

impl<T: WireMessage> Message for T {
    fn wire_id(&self) -> WireId {
        T::WIRE_ID
    }

    fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(WireError::Encode)
    }

    fn estimated_size(&self) -> usize {
        bincode::serialized_size(self).map(|n| n as usize).unwrap_or(0)
    }

    fn handle(&self, ctx: &NodeContext) {
        self.on_handle(ctx);
    }

    fn response(&self, ctx: &NodeContext) -> Option<Box<dyn Message>> {
        self.on_response(ctx)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast a received message to a concrete shape.
pub fn downcast<T: WireMessage>(message: &dyn Message) -> Option<&T> {
    message.as_any().downcast_ref::<T>()
}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Message>, WireError>;

fn decode_as<T: WireMessage>(payload: &[u8]) -> Result<Box<dyn Message>, WireError> {
    Ok(Box::new(bincode::deserialize::<T>(payload).map_err(WireError::Decode)?))
}

/// Explicit closed table mapping a wire id to its decode function. Built once
/// at process start and shared by `Arc`; both ends of a connection must use
/// the same registrations to understand each other.
#[derive(Default)]
pub struct MessageRegistry {
    decoders: HashMap<WireId, DecodeFn>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        MessageRegistry { decoders: HashMap::new() }
    }

    /// Register a message shape. Colliding wire ids are a programming error.
    pub fn register<T: WireMessage>(&mut self) {
        if self.decoders.insert(T::WIRE_ID, decode_as::<T>).is_some() {
            panic!("duplicate message registration for wire id {}", T::WIRE_ID);
        }
    }

    pub fn knows(&self, id: WireId) -> bool {
        self.decoders.contains_key(&id)
    }

    pub fn decode(&self, id: WireId, payload: &[u8]) -> Result<Box<dyn Message>, WireError> {
        let decode = self.decoders.get(&id).ok_or(WireError::UnknownTypeId(id))?;
        decode(payload)
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.decoders.keys().collect();
        ids.sort();
        f.debug_struct("MessageRegistry").field("wire_ids", &ids).finish()
    }
}

/// Registry holding every message shape this crate defines.
pub fn standard_registry() -> MessageRegistry {
    let mut registry = MessageRegistry::new();
    registry.register::<types::Ping>();
    registry.register::<types::BooleanResponse>();
    registry.register::<types::StatusResponse>();
    registry.register::<types::IntResponse>();
    registry.register::<types::JobCommandMessage>();
    registry.register::<types::StartJobMessage>();
    registry.register::<types::WorkRequestMessage>();
    registry.register::<types::JobProbeMessage>();
    registry.register::<types::WorkResponseMessage>();
    registry.register::<types::IdentifyMessage>();
    registry
}
