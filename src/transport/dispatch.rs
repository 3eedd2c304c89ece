//! Per-kind dispatch of decoded inbound packets
//!
//! Callbacks receive a mutable context `C` owned outside the dispatcher, so a
//! callback can never reach back into the handler table while it is being
//! iterated. Registration changes only happen between dispatches.

use tracing::trace;

use super::TransportError;
use crate::protocol::{Packet, PacketKind, PlayerId};

pub type HandlerId = u64;

type ErasedCallback<C> = Box<dyn FnMut(&mut C, PlayerId, &Packet) -> bool + Send>;
type ObjectHook = Box<dyn FnMut(PlayerId, &Packet) + Send>;

struct Registration<C> {
    id: HandlerId,
    kind: PacketKind,
    callback: ErasedCallback<C>,
}

/// Decode one text frame into a packet
pub fn decode_packet(text: &str) -> Result<Packet, TransportError> {
    serde_json::from_str(text).map_err(TransportError::Decode)
}

/// Routes inbound packets to callbacks registered per [`PacketKind`]
pub struct PacketDispatcher<C> {
    handlers: Vec<Registration<C>>,
    next_id: HandlerId,
    object_hook: Option<ObjectHook>,
}

impl<C> PacketDispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 1,
            object_hook: None,
        }
    }

    /// Hook that sees every decoded packet regardless of kind
    pub fn set_object_hook(&mut self, hook: impl FnMut(PlayerId, &Packet) + Send + 'static) {
        self.object_hook = Some(Box::new(hook));
    }

    /// Subscribe `callback` to every packet of `kind`
    pub fn on_packet<F>(&mut self, kind: PacketKind, mut callback: F) -> HandlerId
    where
        F: FnMut(&mut C, PlayerId, Packet) + Send + 'static,
    {
        self.register(
            kind,
            Box::new(move |ctx, client, packet| {
                callback(ctx, client, packet.clone());
                true
            }),
        )
    }

    /// Subscribe `callback` to packets of `kind` accepted by `validator`;
    /// the callback receives the validator's narrowed value
    pub fn on_validated<V, P, F>(&mut self, kind: PacketKind, validator: P, mut callback: F) -> HandlerId
    where
        P: Fn(&Packet) -> Option<V> + Send + 'static,
        F: FnMut(&mut C, PlayerId, V) + Send + 'static,
    {
        self.register(
            kind,
            Box::new(move |ctx, client, packet| match validator(packet) {
                Some(value) => {
                    callback(ctx, client, value);
                    true
                }
                None => false,
            }),
        )
    }

    fn register(&mut self, kind: PacketKind, callback: ErasedCallback<C>) -> HandlerId {
        let id = self.next_id;
        self.next_id += 1;
        self.handlers.push(Registration { id, kind, callback });
        id
    }

    /// Remove exactly one registration
    pub fn unregister(&mut self, id: HandlerId) -> Result<(), TransportError> {
        let position = self
            .handlers
            .iter()
            .position(|h| h.id == id)
            .ok_or(TransportError::HandlerNotFound(id))?;
        self.handlers.remove(position);
        Ok(())
    }

    pub fn handler_count(&self, kind: PacketKind) -> usize {
        self.handlers.iter().filter(|h| h.kind == kind).count()
    }

    /// Decode `text` and run every matching callback in registration order.
    /// Returns how many callbacks fired.
    pub fn dispatch_text(&mut self, ctx: &mut C, client: PlayerId, text: &str) -> Result<usize, TransportError> {
        let packet = decode_packet(text)?;
        Ok(self.dispatch(ctx, client, &packet))
    }

    pub fn dispatch(&mut self, ctx: &mut C, client: PlayerId, packet: &Packet) -> usize {
        if let Some(hook) = self.object_hook.as_mut() {
            hook(client, packet);
        }

        let kind = packet.kind();
        let mut fired = 0;
        for handler in self.handlers.iter_mut().filter(|h| h.kind == kind) {
            if (handler.callback)(ctx, client, packet) {
                fired += 1;
            }
        }

        if fired == 0 {
            trace!(client_id = client, kind = %kind, "packet had no accepting handler");
        }
        fired
    }
}

impl<C> Default for PacketDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}
