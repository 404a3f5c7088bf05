//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::sequencer::ConnectionStatus;
use parley_protocol::packet::{
    AccessToken, BotCreate, BotInvite, ClientIdentity, ContactAction, ContactType, ContactsManage,
    EntityGet, FileTokenRequest, InviteResolve, Login, MfaSecret, Ping, Search, SearchTarget,
    Signup,
};
use parley_protocol::{
    Channel, Entity, EntityGetRequest, EntityType, Packet, PacketBody, PageDirection, Pagination,
    StatusCode,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Logged in; the access token identifies the session.
    Token(String),
    /// The account needs a second factor; follow up with
    /// [`Client::submit_mfa`].
    MfaRequired,
}

/// High-level client for a parley server.
pub struct Client {
    conn: Connection,
    echo: AtomicU32,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::from_connection(Connection::new(config))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            echo: AtomicU32::new(1),
        }
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.conn.close().await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.conn.status()
    }

    /// Packets the server pushes without being asked.
    pub fn subscribe_spontaneous(&self) -> broadcast::Receiver<Packet> {
        self.conn.subscribe_spontaneous()
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Sends `body` and returns the reply body. A non-OK `Status` reply
    /// becomes `ClientError::Status`.
    async fn call(&self, body: impl Into<PacketBody>) -> Result<PacketBody, ClientError> {
        let reply = self.conn.request(Packet::new(body)).await?;
        match reply.body {
            PacketBody::Status(status) if !status.is_ok() => Err(ClientError::Status {
                code: status.code,
                message: status.message,
            }),
            body => Ok(body),
        }
    }

    async fn call_ok(&self, body: impl Into<PacketBody>) -> Result<(), ClientError> {
        match self.call(body).await? {
            PacketBody::Status(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn call_entities(&self, body: impl Into<PacketBody>) -> Result<Vec<Entity>, ClientError> {
        match self.call(body).await? {
            PacketBody::Entities(reply) => Ok(reply.entities),
            other => Err(unexpected(&other)),
        }
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Pings the server and returns the round-trip time.
    pub async fn ping(&self) -> Result<Duration, ClientError> {
        let echo = self.echo.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        match self.call(Ping::new(echo)).await? {
            PacketBody::Pong(pong) if pong.echo == echo => Ok(start.elapsed()),
            PacketBody::Pong(pong) => Err(ClientError::UnexpectedReply(format!(
                "pong echo {} for ping {}",
                pong.echo, echo
            ))),
            other => Err(unexpected(&other)),
        }
    }

    /// Logs in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, ClientError> {
        match self.call(Login::new(email, password)).await {
            Ok(PacketBody::AccessToken(reply)) => Ok(LoginOutcome::Token(reply.token)),
            Ok(other) => Err(unexpected(&other)),
            Err(e) if e.status_code() == Some(StatusCode::MfaRequired) => {
                Ok(LoginOutcome::MfaRequired)
            }
            Err(e) => Err(e),
        }
    }

    /// Completes a login that answered [`LoginOutcome::MfaRequired`].
    pub async fn submit_mfa(&self, code: &str) -> Result<String, ClientError> {
        let secret = MfaSecret {
            secret: code.to_string(),
        };
        match self.call(secret).await? {
            PacketBody::AccessToken(reply) => Ok(reply.token),
            other => Err(unexpected(&other)),
        }
    }

    /// Resumes a session with a previously issued access token.
    pub async fn authenticate(&self, token: &str) -> Result<(), ClientError> {
        self.call_ok(AccessToken {
            token: token.to_string(),
        })
        .await
    }

    /// Creates an account and returns its access token.
    pub async fn signup(&self, email: &str, name: &str, password: &str) -> Result<String, ClientError> {
        let signup = Signup {
            email: email.to_string(),
            name: name.to_string(),
            password: password.to_string(),
        };
        match self.call(signup).await? {
            PacketBody::AccessToken(reply) => Ok(reply.token),
            other => Err(unexpected(&other)),
        }
    }

    /// Announces this client's public key.
    pub async fn send_identity(&self, public_key: Vec<u8>) -> Result<(), ClientError> {
        self.call_ok(ClientIdentity { public_key }).await
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Fetches entities. The server may answer with fewer entities than
    /// requested, or with partial ones.
    pub async fn get_entities(
        &self,
        requests: Vec<EntityGetRequest>,
    ) -> Result<Vec<Entity>, ClientError> {
        self.call_entities(EntityGet { requests }).await
    }

    /// Fetches a single entity.
    pub async fn get_entity(
        &self,
        entity_type: EntityType,
        id: u64,
    ) -> Result<Option<Entity>, ClientError> {
        let entities = self
            .get_entities(vec![EntityGetRequest::new(entity_type, id)])
            .await?;
        Ok(entities
            .into_iter()
            .find(|e| e.entity_type() == entity_type && e.id() == id))
    }

    /// Fetches up to `max_count` messages of a channel, starting at
    /// message `from` and going in `direction`.
    pub async fn page_messages(
        &self,
        channel: u64,
        direction: PageDirection,
        from: u64,
        max_count: u8,
    ) -> Result<Vec<Entity>, ClientError> {
        let request = EntityGetRequest::new(EntityType::Channel, channel).with_pagination(Pagination {
            field: u16::from(Channel::MESSAGES_FIELD),
            direction,
            from,
            max_count,
        });
        self.get_entities(vec![request]).await
    }

    /// Requests a short-lived download token for a file.
    pub async fn file_token(&self, file: u64) -> Result<String, ClientError> {
        match self.call(FileTokenRequest { file }).await? {
            PacketBody::FileToken(reply) => Ok(reply.token),
            other => Err(unexpected(&other)),
        }
    }

    // =========================================================================
    // Contacts, search and bots
    // =========================================================================

    /// Adds or removes a contact relation.
    pub async fn manage_contact(
        &self,
        contact_type: ContactType,
        action: ContactAction,
        id: u64,
    ) -> Result<(), ClientError> {
        self.call_ok(ContactsManage::new(contact_type, action, id))
            .await
    }

    /// Runs a search and returns the matching entities.
    pub async fn search(
        &self,
        target: SearchTarget,
        ref_id: u64,
        query: &str,
    ) -> Result<Vec<Entity>, ClientError> {
        self.call_entities(Search::new(target, ref_id, query)).await
    }

    /// Looks up an invite. With `add` set the user also joins the group.
    pub async fn resolve_invite(&self, code: &str, add: bool) -> Result<Vec<Entity>, ClientError> {
        let invite = InviteResolve {
            code: code.to_string(),
            add,
        };
        self.call_entities(invite).await
    }

    /// Creates a bot account; the reply carries the new bot entity.
    pub async fn create_bot(&self, name: &str) -> Result<Vec<Entity>, ClientError> {
        self.call_entities(BotCreate {
            name: name.to_string(),
        })
        .await
    }

    pub async fn invite_bot(&self, bot: u64, group: u64) -> Result<(), ClientError> {
        self.call_ok(BotInvite { bot, group }).await
    }
}

fn unexpected(body: &PacketBody) -> ClientError {
    ClientError::UnexpectedReply(body.packet_type().name().to_string())
}
