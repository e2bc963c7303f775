//! Session Manager.
//!
//! Anonymous sessions are namespaced under [`fabric_store::ANONYMOUS_TENANT`]
//! so upgrading migrates the session key to the real tenant's namespace,
//! purging the anonymous key after copy.

use std::sync::Arc;

use fabric_bus::WriteAheadLog;
use fabric_store::{StateSurface, Strategy, ANONYMOUS_TENANT};
use fabric_types::{FabricError, Fields, Session, SessionId, TenantId, WalEventType};
use serde_json::json;

/// Creates, upgrades, and fetches sessions through the State Surface,
/// appending WAL events alongside.
pub struct SessionManager {
    state: Arc<StateSurface>,
    wal: Arc<WriteAheadLog>,
}

impl SessionManager {
    /// Construct a session manager over `state` and `wal`.
    pub fn new(state: Arc<StateSurface>, wal: Arc<WriteAheadLog>) -> Self {
        Self { state, wal }
    }

    async fn persist(&self, tenant_id: &str, session: &Session) -> Result<(), FabricError> {
        let value = serde_json::to_value(session)
            .map_err(|e| FabricError::validation(format!("unencodable session: {e}")))?;
        let fields: Fields = value.as_object().cloned().unwrap_or_default().into_iter().collect();
        self.state
            .set_session_state(tenant_id, &session.session_id, fields, Strategy::Hot)
            .await
    }

    /// Create a fresh anonymous session.
    pub async fn create_anonymous_session(
        &self,
        execution_contract: Fields,
        metadata: Fields,
    ) -> Result<Session, FabricError> {
        let session_id = fabric_clock::new_id();
        let session = Session::anonymous(session_id.clone(), execution_contract, metadata);
        self.persist(ANONYMOUS_TENANT, &session).await?;

        let mut payload = Fields::new();
        payload.insert("session_id".into(), json!(session_id));
        self.wal.append(WalEventType::SessionCreated, ANONYMOUS_TENANT, payload).await;

        Ok(session)
    }

    /// Create a session that is tenant-scoped from the start.
    pub async fn create_authenticated_session(
        &self,
        tenant_id: TenantId,
        user_id: String,
        session_id: Option<SessionId>,
        execution_contract: Fields,
        metadata: Fields,
    ) -> Result<Session, FabricError> {
        let session_id = session_id.unwrap_or_else(fabric_clock::new_id);
        let session = Session::authenticated(
            session_id.clone(),
            tenant_id.clone(),
            user_id,
            execution_contract,
            metadata,
        );
        self.persist(&tenant_id, &session).await?;

        let mut payload = Fields::new();
        payload.insert("session_id".into(), json!(session_id));
        self.wal.append(WalEventType::SessionCreated, &tenant_id, payload).await;

        Ok(session)
    }

    /// Upgrade an anonymous session in place: migrate it into `tenant_id`'s
    /// namespace, bind `user_id`, clear the anonymity flag, and purge the
    /// anonymous key. Rejects sessions that are not currently anonymous.
    pub async fn upgrade_session(
        &self,
        session_id: &str,
        tenant_id: TenantId,
        user_id: String,
        metadata: Fields,
    ) -> Result<Session, FabricError> {
        let anon_fields = self
            .state
            .get_session_state(ANONYMOUS_TENANT, session_id)
            .await?
            .ok_or_else(|| FabricError::validation(format!("no anonymous session {session_id}")))?;
        let mut session: Session = serde_json::from_value(serde_json::Value::Object(
            anon_fields.into_iter().collect(),
        ))
        .map_err(|e| FabricError::validation(format!("corrupt session state: {e}")))?;

        if !session.is_anonymous {
            return Err(FabricError::validation(format!(
                "session {session_id} is not anonymous; re-upgrade is rejected"
            )));
        }

        session.tenant_id = Some(tenant_id.clone());
        session.user_id = Some(user_id);
        session.is_anonymous = false;
        session.updated_at = chrono::Utc::now();
        for (k, v) in metadata {
            session.metadata.insert(k, v);
        }

        self.persist(&tenant_id, &session).await?;
        self.state.delete_state("session", ANONYMOUS_TENANT, session_id).await?;

        let mut payload = Fields::new();
        payload.insert("session_id".into(), json!(session_id));
        self.wal.append(WalEventType::SessionUpgraded, &tenant_id, payload).await;

        Ok(session)
    }

    /// Fetch a session by id, scoped to `tenant_id` when given (`None`
    /// consults only the anonymous namespace). Cross-tenant lookup of a
    /// given session id returns `None`.
    pub async fn get_session(
        &self,
        session_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<Session>, FabricError> {
        let namespace = tenant_id.unwrap_or(ANONYMOUS_TENANT);
        let Some(fields) = self.state.get_session_state(namespace, session_id).await? else {
            return Ok(None);
        };
        let session = serde_json::from_value(serde_json::Value::Object(fields.into_iter().collect()))
            .map_err(|e| FabricError::validation(format!("corrupt session state: {e}")))?;
        Ok(Some(session))
    }

    /// Record a session's last-activity timestamp (called by the Execution
    /// Lifecycle Manager on commit).
    pub async fn touch_last_activity(&self, tenant_id: &str, session_id: &str) -> Result<(), FabricError> {
        let Some(mut session) = self.get_session(session_id, Some(tenant_id)).await? else {
            return Ok(());
        };
        session.updated_at = chrono::Utc::now();
        self.persist(tenant_id, &session).await
    }
}
