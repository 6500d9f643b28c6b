//! Opcode → typed handler registry.
//!
//! A [`Hub`] declares the payload type it accepts. [`HubRegistry`] keeps
//! the hubs registered for each [`OpCode`] in registration order and routes
//! an inbound text message to the first one whose shape matches:
//!
//! 1. the message must be a JSON object with an integer `op` naming a
//!    defined opcode;
//! 2. the registration's `expects_data` must equal the presence of `d`
//!    (`"d": null` counts as absent);
//! 3. for dispatch registrations, `t` must name the same event;
//! 4. `d` (or `null`) must deserialize into the hub's payload type.
//!
//! Nothing in this path is fatal: unroutable messages are reported through
//! [`DispatchOutcome`] and dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::connection::Connection;
use crate::error::ServerError;
use crate::protocol::{DispatchType, OpCode};

static NULL: Value = Value::Null;

/// A typed message handler.
pub trait Hub: Send + Sync + 'static {
    /// Shape of the `d` field this hub accepts. Hubs that take no data use
    /// `()`, which matches an absent `d`.
    type Payload: DeserializeOwned + Send + 'static;

    /// Handles one decoded message for `connection`.
    ///
    /// # Errors
    ///
    /// Whatever the hub fails with. The error is logged by the worker and
    /// only ends the connection if it is fatal to it.
    fn handle<'a>(
        &'a self,
        connection: &'a Arc<Connection>,
        payload: Self::Payload,
    ) -> BoxFuture<'a, Result<(), ServerError>>;
}

trait ErasedHub: Send + Sync {
    fn try_dispatch<'a>(
        &'a self,
        connection: &'a Arc<Connection>,
        data: &Value,
    ) -> Option<BoxFuture<'a, Result<(), ServerError>>>;
}

impl<H: Hub> ErasedHub for H {
    fn try_dispatch<'a>(
        &'a self,
        connection: &'a Arc<Connection>,
        data: &Value,
    ) -> Option<BoxFuture<'a, Result<(), ServerError>>> {
        let payload = H::Payload::deserialize(data).ok()?;
        Some(self.handle(connection, payload))
    }
}

/// One hub bound to an opcode.
pub struct Registration {
    opcode: OpCode,
    dispatch: Option<DispatchType>,
    expects_data: bool,
    hub_name: &'static str,
    payload_name: &'static str,
    hub: Box<dyn ErasedHub>,
}

impl Registration {
    /// Opcode the hub is bound to.
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Dispatch event the hub is restricted to, if any.
    #[must_use]
    pub const fn dispatch(&self) -> Option<DispatchType> {
        self.dispatch
    }

    /// Whether the hub requires a `d` field.
    #[must_use]
    pub const fn expects_data(&self) -> bool {
        self.expects_data
    }

    /// Type name of the hub.
    #[must_use]
    pub const fn hub_name(&self) -> &'static str {
        self.hub_name
    }

    /// Type name of the hub's payload.
    #[must_use]
    pub const fn payload_name(&self) -> &'static str {
        self.payload_name
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("opcode", &self.opcode)
            .field("dispatch", &self.dispatch)
            .field("expects_data", &self.expects_data)
            .field("hub", &self.hub_name)
            .field("payload", &self.payload_name)
            .finish()
    }
}

/// How [`HubRegistry::handle_message`] disposed of a message.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A hub handled the message.
    Dispatched {
        /// Type name of the hub.
        hub: &'static str,
    },
    /// Not a JSON object.
    MalformedJson,
    /// No integer `op` field.
    MissingOpCode,
    /// `op` is not a defined opcode.
    UnknownOpCode(i64),
    /// Nothing is registered for the opcode.
    NoHandlers(OpCode),
    /// Hubs are registered but none accepted the message shape.
    NoMatchingShape(OpCode),
    /// The selected hub returned an error.
    Failed {
        /// Type name of the hub.
        hub: &'static str,
        /// Error returned by the hub.
        error: ServerError,
    },
}

impl DispatchOutcome {
    /// Returns `true` if a hub was selected, whether or not it succeeded.
    #[must_use]
    pub const fn was_routed(&self) -> bool {
        matches!(self, Self::Dispatched { .. } | Self::Failed { .. })
    }

    /// Returns `true` if the connection cannot continue after this message.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Failed { error, .. } => error.is_fatal_to_connection(),
            _ => false,
        }
    }
}

/// Registered hubs, grouped by opcode in registration order.
#[derive(Default)]
pub struct HubRegistry {
    hubs: HashMap<OpCode, Vec<Registration>>,
}

impl HubRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `hub` to `opcode`.
    pub fn register<H: Hub>(&mut self, opcode: OpCode, expects_data: bool, hub: H) -> &mut Self {
        self.insert(opcode, None, expects_data, hub)
    }

    /// Binds `hub` to `opcode` for messages whose `t` is `dispatch`.
    pub fn register_dispatch<H: Hub>(
        &mut self,
        opcode: OpCode,
        dispatch: DispatchType,
        expects_data: bool,
        hub: H,
    ) -> &mut Self {
        self.insert(opcode, Some(dispatch), expects_data, hub)
    }

    fn insert<H: Hub>(
        &mut self,
        opcode: OpCode,
        dispatch: Option<DispatchType>,
        expects_data: bool,
        hub: H,
    ) -> &mut Self {
        let registration = Registration {
            opcode,
            dispatch,
            expects_data,
            hub_name: short_type_name::<H>(),
            payload_name: short_type_name::<H::Payload>(),
            hub: Box::new(hub),
        };
        tracing::debug!(
            ?opcode,
            ?dispatch,
            expects_data,
            hub = registration.hub_name,
            "hub registered"
        );
        self.hubs.entry(opcode).or_default().push(registration);
        self
    }

    /// Returns the registrations for `opcode`, in match order.
    #[must_use]
    pub fn registrations(&self, opcode: OpCode) -> &[Registration] {
        self.hubs.get(&opcode).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hubs.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }

    /// Routes one text message from `connection` to the first matching hub
    /// and runs it to completion.
    pub async fn handle_message(&self, connection: &Arc<Connection>, text: &str) -> DispatchOutcome {
        let Ok(Value::Object(message)) = serde_json::from_str::<Value>(text) else {
            return DispatchOutcome::MalformedJson;
        };
        let Some(raw_op) = message.get("op").and_then(Value::as_i64) else {
            return DispatchOutcome::MissingOpCode;
        };
        let Ok(opcode) = OpCode::try_from(raw_op) else {
            return DispatchOutcome::UnknownOpCode(raw_op);
        };
        let registrations = self.registrations(opcode);
        if registrations.is_empty() {
            return DispatchOutcome::NoHandlers(opcode);
        }

        let data = message.get("d").filter(|d| !d.is_null());
        let dispatch = message
            .get("t")
            .and_then(|t| DispatchType::deserialize(t).ok());

        for registration in registrations {
            if registration.expects_data != data.is_some() {
                continue;
            }
            if registration.dispatch.is_some() && registration.dispatch != dispatch {
                continue;
            }
            let Some(handled) = registration
                .hub
                .try_dispatch(connection, data.unwrap_or(&NULL))
            else {
                continue;
            };

            let hub = registration.hub_name;
            return match handled.await {
                Ok(()) => DispatchOutcome::Dispatched { hub },
                Err(error) => DispatchOutcome::Failed { hub, error },
            };
        }

        DispatchOutcome::NoMatchingShape(opcode)
    }
}

impl fmt::Debug for HubRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.hubs.iter().map(|(opcode, registrations)| {
                let names: Vec<_> = registrations.iter().map(|r| r.hub_name).collect();
                (opcode, names)
            }))
            .finish()
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(idx) => full.get(idx + 2..).unwrap_or(full),
        None => full,
    }
}
