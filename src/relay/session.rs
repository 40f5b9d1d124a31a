//! Per-connection relay state machine and the shared group registry
//!
//! A connection starts uninitialised. `init` makes it the leader of a group
//! keyed by its client id; `make-supplier` then turns it into a supplier of
//! another leader's group, whose frames are forwarded to that leader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;

use super::codec;
use super::protocol::{InitPayload, MessageType, WireMessage};
use crate::error::ProtocolError;
use crate::tracking::LandmarkSchema;

pub type ConnectionId = u64;

/// What a connection's writer task sends to its socket
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// A forwarded frame, written as the `data` token then the binary payload
    Data(Vec<u8>),
    Close { code: u16, reason: String },
}

pub type Outbox = mpsc::UnboundedSender<RelayMessage>;

#[derive(Debug, Clone)]
struct Group {
    schema: LandmarkSchema,
    connection: ConnectionId,
    outbox: Outbox,
}

/// Groups by leader client id, shared by every connection.
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    groups: Arc<RwLock<HashMap<String, Group>>>,
    next_connection: Arc<AtomicU64>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Group>> {
        self.groups.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Group>> {
        self.groups.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a group, replacing any group with the same client id.
    fn register(&self, client_id: &str, group: Group) {
        if let Some(previous) = self.write().insert(client_id.to_string(), group) {
            tracing::warn!(
                "Group {} re-registered, replacing connection {}",
                client_id,
                previous.connection
            );
        }
    }

    /// Remove a group only if `connection` still owns it.
    fn remove_owned(&self, client_id: &str, connection: ConnectionId) -> bool {
        let mut groups = self.write();
        match groups.get(client_id) {
            Some(group) if group.connection == connection => {
                groups.remove(client_id);
                true
            }
            _ => false,
        }
    }

    fn lookup(&self, client_id: &str) -> Option<Group> {
        self.read().get(client_id).cloned()
    }

    pub fn schema_of(&self, client_id: &str) -> Option<LandmarkSchema> {
        self.read().get(client_id).map(|group| group.schema)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.read().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// What the socket loop should do after a message
#[derive(Debug, Clone, PartialEq)]
pub enum SessionControl {
    Continue,
    Close(ProtocolError),
}

#[derive(Debug, Clone, PartialEq)]
enum Role {
    Uninitialized,
    Leader {
        client_id: String,
        schema: LandmarkSchema,
    },
    Supplier {
        client_id: String,
        leader: String,
    },
}

/// State of one relay connection
#[derive(Debug)]
pub struct Session {
    connection: ConnectionId,
    outbox: Outbox,
    expecting: MessageType,
    role: Role,
}

impl Session {
    pub fn new(connection: ConnectionId, outbox: Outbox) -> Self {
        Self {
            connection,
            outbox,
            expecting: MessageType::None,
            role: Role::Uninitialized,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn client_id(&self) -> Option<&str> {
        match &self.role {
            Role::Uninitialized => None,
            Role::Leader { client_id, .. } | Role::Supplier { client_id, .. } => Some(client_id),
        }
    }

    /// The leader this connection supplies, if any.
    pub fn leader(&self) -> Option<&str> {
        match &self.role {
            Role::Supplier { leader, .. } => Some(leader),
            _ => None,
        }
    }

    pub fn is_supplier(&self) -> bool {
        matches!(self.role, Role::Supplier { .. })
    }

    /// Handle one incoming message.
    pub fn handle(&mut self, registry: &GroupRegistry, message: WireMessage) -> SessionControl {
        let expecting = std::mem::take(&mut self.expecting);

        match expecting {
            MessageType::None => {
                self.expect_type(message);
                SessionControl::Continue
            }
            MessageType::Init => self.handle_init(registry, message),
            MessageType::MakeSupplier => self.handle_make_supplier(registry, message),
            MessageType::Data => {
                if let Err(e) = self.handle_data(registry, message) {
                    tracing::warn!("Dropping frame from {}: {}", self.label(), e);
                }
                SessionControl::Continue
            }
        }
    }

    /// Release whatever the connection registered.
    pub fn disconnect(self, registry: &GroupRegistry) {
        if let Role::Leader { client_id, .. } = &self.role {
            if registry.remove_owned(client_id, self.connection) {
                tracing::info!("Group {} closed", client_id);
            }
        }
        tracing::debug!("Connection {} finished", self.connection);
    }

    fn label(&self) -> String {
        match self.client_id() {
            Some(id) => id.to_string(),
            None => format!("#{}", self.connection),
        }
    }

    fn expect_type(&mut self, message: WireMessage) {
        let WireMessage::Text(token) = message else {
            tracing::warn!(
                "Client {} sent binary data without a message type",
                self.label()
            );
            return;
        };

        match token.parse::<MessageType>() {
            Ok(ty) => self.expecting = ty,
            Err(e) => tracing::warn!("Client {}: {}", self.label(), e),
        }
    }

    fn handle_init(&mut self, registry: &GroupRegistry, message: WireMessage) -> SessionControl {
        let WireMessage::Text(payload) = message else {
            return SessionControl::Close(ProtocolError::MalformedInit(
                "<binary>".to_string(),
            ));
        };
        let init = match InitPayload::parse(&payload) {
            Ok(init) => init,
            Err(e) => return SessionControl::Close(e),
        };

        if let Role::Leader { client_id, .. } = &self.role {
            registry.remove_owned(client_id, self.connection);
        }

        registry.register(
            &init.client_id,
            Group {
                schema: init.schema,
                connection: self.connection,
                outbox: self.outbox.clone(),
            },
        );
        tracing::info!(
            "Client {} registered a group ({} schema)",
            init.client_id,
            init.schema
        );

        self.role = Role::Leader {
            client_id: init.client_id,
            schema: init.schema,
        };
        SessionControl::Continue
    }

    fn handle_make_supplier(
        &mut self,
        registry: &GroupRegistry,
        message: WireMessage,
    ) -> SessionControl {
        let (client_id, schema) = match &self.role {
            Role::Leader { client_id, schema } => (client_id.clone(), *schema),
            Role::Uninitialized => {
                tracing::error!(
                    "Ignoring make-supplier from {}: {}",
                    self.label(),
                    ProtocolError::NotInitialized
                );
                return SessionControl::Continue;
            }
            Role::Supplier { leader, .. } => {
                tracing::warn!(
                    "Client {} already supplies {}",
                    self.label(),
                    leader
                );
                return SessionControl::Continue;
            }
        };

        let WireMessage::Text(leader) = message else {
            return SessionControl::Close(ProtocolError::UnknownLeader("<binary>".to_string()));
        };

        if leader == client_id {
            return SessionControl::Close(ProtocolError::SelfSupply(client_id));
        }

        let Some(group) = registry.lookup(&leader) else {
            return SessionControl::Close(ProtocolError::UnknownLeader(leader));
        };
        if group.schema != schema {
            return SessionControl::Close(ProtocolError::SchemaMismatch {
                supplier: schema.to_string(),
                leader,
                expected: group.schema.to_string(),
            });
        }

        registry.remove_owned(&client_id, self.connection);
        tracing::info!("Client {} now supplies {}", client_id, leader);

        self.role = Role::Supplier { client_id, leader };
        SessionControl::Continue
    }

    /// Forward a supplier's frame to its leader. Frames that cannot be
    /// forwarded are dropped without closing the connection.
    fn handle_data(
        &mut self,
        registry: &GroupRegistry,
        message: WireMessage,
    ) -> Result<(), ProtocolError> {
        let WireMessage::Binary(frame) = message else {
            return Err(ProtocolError::MalformedFrame(
                "data payload must be binary".to_string(),
            ));
        };

        let leader = match &self.role {
            Role::Supplier { leader, .. } => leader,
            Role::Leader { client_id, .. } => {
                tracing::warn!(
                    "Did not expect landmarks from leader client in group {}",
                    client_id
                );
                return Ok(());
            }
            Role::Uninitialized => return Err(ProtocolError::NotInitialized),
        };

        codec::inspect(&frame)?;

        let Some(group) = registry.lookup(leader) else {
            tracing::debug!("Leader {} is gone, dropping frame", leader);
            return Ok(());
        };
        if group.outbox.send(RelayMessage::Data(frame)).is_err() {
            tracing::debug!("Leader {} stopped reading, dropping frame", leader);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::codec::FrameCodec;
    use crate::relay::protocol::{data_messages, init_messages, make_supplier_messages};
    use crate::tracking::{Landmark, LandmarkObservation};

    struct Client {
        session: Session,
        inbox: mpsc::UnboundedReceiver<RelayMessage>,
    }

    impl Client {
        fn connect(registry: &GroupRegistry) -> Self {
            let (tx, inbox) = mpsc::unbounded_channel();
            Self {
                session: Session::new(registry.next_connection_id(), tx),
                inbox,
            }
        }

        fn send(&mut self, registry: &GroupRegistry, messages: [WireMessage; 2]) -> SessionControl {
            let [token, payload] = messages;
            assert_eq!(
                self.session.handle(registry, token),
                SessionControl::Continue
            );
            self.session.handle(registry, payload)
        }
    }

    fn frame(client_id: &str) -> Vec<u8> {
        FrameCodec::new(client_id, LandmarkSchema::Coco)
            .unwrap()
            .encode(&[LandmarkObservation::new(Landmark::Nose, 1.0, 2.0)])
            .unwrap()
    }

    fn leader_and_supplier(registry: &GroupRegistry) -> (Client, Client) {
        let mut leader = Client::connect(registry);
        let mut supplier = Client::connect(registry);
        let init = init_messages("front", LandmarkSchema::Coco).unwrap();
        assert_eq!(leader.send(registry, init), SessionControl::Continue);
        let init = init_messages("side", LandmarkSchema::Coco).unwrap();
        assert_eq!(supplier.send(registry, init), SessionControl::Continue);
        (leader, supplier)
    }

    #[test]
    fn test_init_registers_group() {
        let registry = GroupRegistry::new();
        let mut client = Client::connect(&registry);
        let init = init_messages("front", LandmarkSchema::BlazePose).unwrap();

        assert_eq!(client.send(&registry, init), SessionControl::Continue);
        assert_eq!(registry.schema_of("front"), Some(LandmarkSchema::BlazePose));
        assert_eq!(client.session.client_id(), Some("front"));
        assert!(!client.session.is_supplier());
    }

    #[test]
    fn test_malformed_init_closes() {
        let registry = GroupRegistry::new();
        let mut client = Client::connect(&registry);
        let messages = [
            WireMessage::Text("init".to_string()),
            WireMessage::Text("front".to_string()),
        ];
        assert!(matches!(
            client.send(&registry, messages),
            SessionControl::Close(ProtocolError::MalformedInit(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_supplier_frames_reach_leader() {
        let registry = GroupRegistry::new();
        let (mut leader, mut supplier) = leader_and_supplier(&registry);

        let control = supplier.send(&registry, make_supplier_messages("front"));
        assert_eq!(control, SessionControl::Continue);
        assert!(supplier.session.is_supplier());
        assert_eq!(supplier.session.leader(), Some("front"));
        assert!(!registry.contains("side"));
        assert!(registry.contains("front"));

        let bytes = frame("side");
        supplier.send(&registry, data_messages(bytes.clone()));
        supplier.send(&registry, data_messages(bytes.clone()));

        assert_eq!(leader.inbox.try_recv().unwrap(), RelayMessage::Data(bytes.clone()));
        assert_eq!(leader.inbox.try_recv().unwrap(), RelayMessage::Data(bytes));
        assert!(leader.inbox.try_recv().is_err());
    }

    #[test]
    fn test_make_supplier_unknown_leader_closes() {
        let registry = GroupRegistry::new();
        let (_leader, mut supplier) = leader_and_supplier(&registry);
        assert_eq!(
            supplier.send(&registry, make_supplier_messages("nobody")),
            SessionControl::Close(ProtocolError::UnknownLeader("nobody".to_string()))
        );
    }

    #[test]
    fn test_make_supplier_schema_mismatch_closes() {
        let registry = GroupRegistry::new();
        let mut leader = Client::connect(&registry);
        leader.send(&registry, init_messages("front", LandmarkSchema::BlazePose).unwrap());
        let mut supplier = Client::connect(&registry);
        supplier.send(&registry, init_messages("side", LandmarkSchema::Coco).unwrap());

        let control = supplier.send(&registry, make_supplier_messages("front"));
        assert!(matches!(
            control,
            SessionControl::Close(ProtocolError::SchemaMismatch { .. })
        ));
        assert!(registry.contains("side"));
    }

    #[test]
    fn test_make_supplier_of_self_closes() {
        let registry = GroupRegistry::new();
        let (mut leader, _supplier) = leader_and_supplier(&registry);
        assert_eq!(
            leader.send(&registry, make_supplier_messages("front")),
            SessionControl::Close(ProtocolError::SelfSupply("front".to_string()))
        );
    }

    #[test]
    fn test_messages_before_init_are_ignored() {
        let registry = GroupRegistry::new();
        let (mut leader, _) = leader_and_supplier(&registry);
        let mut stranger = Client::connect(&registry);

        assert_eq!(
            stranger.send(&registry, make_supplier_messages("front")),
            SessionControl::Continue
        );
        assert_eq!(
            stranger.send(&registry, data_messages(frame("x"))),
            SessionControl::Continue
        );
        assert!(leader.inbox.try_recv().is_err());
        assert!(stranger.session.client_id().is_none());
    }

    #[test]
    fn test_data_before_init_is_not_initialized() {
        let registry = GroupRegistry::new();
        let mut stranger = Client::connect(&registry);
        assert_eq!(
            stranger.session.handle_data(&registry, WireMessage::Binary(frame("x"))),
            Err(ProtocolError::NotInitialized)
        );
    }

    #[test]
    fn test_leader_data_is_dropped() {
        let registry = GroupRegistry::new();
        let (mut leader, _) = leader_and_supplier(&registry);
        leader.send(&registry, data_messages(frame("front")));
        assert!(leader.inbox.try_recv().is_err());
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let registry = GroupRegistry::new();
        let (mut leader, mut supplier) = leader_and_supplier(&registry);
        supplier.send(&registry, make_supplier_messages("front"));

        let control = supplier.send(&registry, data_messages(vec![9, 1, 2]));
        assert_eq!(control, SessionControl::Continue);
        assert!(leader.inbox.try_recv().is_err());

        // The state machine is back to waiting for a type token
        supplier.send(&registry, data_messages(frame("side")));
        assert!(leader.inbox.try_recv().is_ok());
    }

    #[test]
    fn test_unknown_type_token_is_skipped() {
        let registry = GroupRegistry::new();
        let mut client = Client::connect(&registry);

        let control = client
            .session
            .handle(&registry, WireMessage::Text("hello".to_string()));
        assert_eq!(control, SessionControl::Continue);
        client
            .session
            .handle(&registry, WireMessage::Binary(vec![1, 2, 3]));

        client.send(&registry, init_messages("late", LandmarkSchema::Coco).unwrap());
        assert!(registry.contains("late"));
    }

    #[test]
    fn test_disconnect_removes_only_own_group() {
        let registry = GroupRegistry::new();
        let mut first = Client::connect(&registry);
        first.send(&registry, init_messages("front", LandmarkSchema::Coco).unwrap());

        // A reconnecting client takes over the id before the old socket closes
        let mut second = Client::connect(&registry);
        second.send(&registry, init_messages("front", LandmarkSchema::Coco).unwrap());

        first.session.disconnect(&registry);
        assert!(registry.contains("front"));

        second.session.disconnect(&registry);
        assert!(!registry.contains("front"));
    }

    #[test]
    fn test_frames_to_departed_leader_are_dropped() {
        let registry = GroupRegistry::new();
        let (leader, mut supplier) = leader_and_supplier(&registry);
        supplier.send(&registry, make_supplier_messages("front"));

        leader.session.disconnect(&registry);
        let control = supplier.send(&registry, data_messages(frame("side")));
        assert_eq!(control, SessionControl::Continue);
    }

    #[test]
    fn test_reinit_moves_group() {
        let registry = GroupRegistry::new();
        let mut client = Client::connect(&registry);
        client.send(&registry, init_messages("a", LandmarkSchema::Coco).unwrap());
        client.send(&registry, init_messages("b", LandmarkSchema::Coco).unwrap());
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));
        assert_eq!(registry.len(), 1);
    }
}
