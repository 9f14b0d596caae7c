//! The catalog's Supabase project, reached through PostgREST RPC functions.
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use base64::Engine as _;
use catalog_utils::{
    EntityKey, InteractionKind, InteractionOp, InteractionState, ReviewDraft, ReviewRecord, Stars,
    ViewerId,
};
use chrono::{DateTime, Utc};
use optimist::{Gateway, GatewayError, ReviewGateway};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

pub fn supabase_config() -> SupabaseConfig {
    SupabaseConfig {
        supabase_url: option_env!("TOOLSHELF_SUPABASE_URL")
            .unwrap_or("https://toolshelf.supabase.co")
            .to_string(),
        supabase_anon_key: option_env!("TOOLSHELF_SUPABASE_ANON_KEY")
            .unwrap_or_default()
            .to_string(),
    }
}

/// The signed-in user's access token, shared by every gateway.
#[derive(Default)]
pub struct Session {
    access_token: RefCell<Option<String>>,
}

impl Session {
    pub fn set_access_token(&self, access_token: Option<String>) {
        *self.access_token.borrow_mut() = access_token;
    }

    /// Active while there is a token and its `exp` claim is in the future.
    pub fn is_active(&self) -> bool {
        self.access_token
            .borrow()
            .as_deref()
            .and_then(token_expiry)
            .is_some_and(|exp| exp > Utc::now())
    }

    fn bearer(&self, config: &SupabaseConfig) -> String {
        self.access_token
            .borrow()
            .clone()
            .unwrap_or_else(|| config.supabase_anon_key.clone())
    }
}

/// Reads the `exp` claim without checking the signature; the server does that.
pub(crate) fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: i64,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .inspect_err(|e| log::warn!("Access token payload is not base64: {e}"))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .inspect_err(|e| log::warn!("Access token has no usable exp claim: {e}"))
        .ok()?;
    DateTime::from_timestamp(claims.exp, 0)
}

#[derive(Clone)]
struct Rpc {
    config: SupabaseConfig,
    session: Rc<Session>,
}

impl Rpc {
    async fn call<T: DeserializeOwned>(
        &self,
        function: &str,
        args: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let text = self.send(function, args).await?;
        parse(function, &text)
    }

    /// For functions returning `void`, which PostgREST answers with an empty body.
    async fn call_void(&self, function: &str, args: serde_json::Value) -> Result<(), GatewayError> {
        let text = self.send(function, args).await?;
        parse_void(function, &text)
    }

    async fn send(&self, function: &str, args: serde_json::Value) -> Result<String, GatewayError> {
        let SupabaseConfig {
            supabase_url,
            supabase_anon_key,
        } = &self.config;

        let url = format!("{supabase_url}/rest/v1/rpc/{function}");
        let token = self.session.bearer(&self.config);

        let response = fetch_happen::Client
            .post(&url)
            .header("apikey", supabase_anon_key)
            .header("Authorization", format!("Bearer {token}"))
            .json(&args)
            .map_err(|e| GatewayError::Transport(format!("{e:?}")))?
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{e:?}")))?;

        if !response.ok() {
            let status: u16 = response.status().into();
            let body = response.text().await.unwrap_or_default();
            log::error!("{function} RPC failed with status {status}: {body}");
            return Err(GatewayError::Status { status, body });
        }

        response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("{e:?}")))
    }
}

fn parse<T: DeserializeOwned>(function: &str, text: &str) -> Result<T, GatewayError> {
    serde_json::from_str(text).map_err(|e| {
        GatewayError::Malformed(format!(
            "Failed to parse {function} response: {e}. Body: {text}"
        ))
    })
}

fn parse_void(function: &str, text: &str) -> Result<(), GatewayError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    parse::<serde_json::Value>(function, text).map(|_| ())
}

/// One row of `get_interaction_states`.
#[derive(Debug, Deserialize)]
struct InteractionRow {
    entity_id: String,
    count: i64,
    viewer_engaged: bool,
}

#[derive(Debug, Deserialize)]
struct StateRow {
    count: i64,
    viewer_engaged: bool,
}

impl From<StateRow> for InteractionState {
    fn from(row: StateRow) -> Self {
        // the tables allow negative counts after manual edits
        InteractionState::new(row.count.clamp(0, i64::from(u32::MAX)) as u32, row.viewer_engaged)
    }
}

/// Likes or bookmarks, depending on `kind`.
#[derive(Clone)]
pub struct SupabaseInteractions {
    kind: InteractionKind,
    rpc: Rpc,
}

impl SupabaseInteractions {
    pub fn new(kind: InteractionKind, config: SupabaseConfig, session: Rc<Session>) -> Self {
        Self {
            kind,
            rpc: Rpc { config, session },
        }
    }
}

impl Gateway<InteractionState> for SupabaseInteractions {
    async fn fetch_state(
        &self,
        key: &EntityKey,
        viewer: Option<&ViewerId>,
    ) -> Result<InteractionState, GatewayError> {
        let row: StateRow = self
            .rpc
            .call(
                "get_interaction_state",
                json!({
                    "p_kind": self.kind.as_str(),
                    "p_entity_id": key,
                    "p_viewer_id": viewer,
                }),
            )
            .await?;
        Ok(row.into())
    }

    async fn fetch_states(
        &self,
        keys: &[EntityKey],
        viewer: Option<&ViewerId>,
    ) -> Result<HashMap<EntityKey, InteractionState>, GatewayError> {
        let rows: Vec<InteractionRow> = self
            .rpc
            .call(
                "get_interaction_states",
                json!({
                    "p_kind": self.kind.as_str(),
                    "p_entity_ids": keys,
                    "p_viewer_id": viewer,
                }),
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let state = StateRow {
                    count: row.count,
                    viewer_engaged: row.viewer_engaged,
                };
                (EntityKey::new(row.entity_id), state.into())
            })
            .collect())
    }

    async fn mutate(
        &self,
        key: &EntityKey,
        viewer: &ViewerId,
        op: InteractionOp,
    ) -> Result<Option<InteractionState>, GatewayError> {
        let echoed: Option<StateRow> = self
            .rpc
            .call(
                "apply_interaction",
                json!({
                    "p_kind": self.kind.as_str(),
                    "p_entity_id": key,
                    "p_viewer_id": viewer,
                    "p_op": op,
                }),
            )
            .await?;
        Ok(echoed.map(InteractionState::from))
    }

    async fn has_active_session(&self) -> bool {
        self.rpc.session.is_active()
    }
}

/// A `reviews` row. The table predates the catalog's naming.
#[derive(Debug, Deserialize)]
struct ReviewRow {
    id: String,
    user_id: String,
    tool_id: String,
    rating: i64,
    comment: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    helpful_count: i64,
}

impl TryFrom<ReviewRow> for ReviewRecord {
    type Error = GatewayError;

    fn try_from(row: ReviewRow) -> Result<Self, GatewayError> {
        let rating = Stars::try_from(row.rating).map_err(|_| {
            GatewayError::Malformed(format!("review {} has rating {}", row.id, row.rating))
        })?;
        Ok(ReviewRecord {
            author_id: ViewerId::new(row.user_id),
            entity_key: EntityKey::new(row.tool_id),
            rating,
            body: row.comment,
            updated_at: row.updated_at.unwrap_or(row.created_at),
            created_at: row.created_at,
            helpful_count: row.helpful_count.clamp(0, i64::from(u32::MAX)) as u32,
            id: row.id,
        })
    }
}

fn records(rows: Vec<ReviewRow>) -> Result<Vec<ReviewRecord>, GatewayError> {
    rows.into_iter().map(ReviewRecord::try_from).collect()
}

#[derive(Clone)]
pub struct SupabaseReviews {
    rpc: Rpc,
}

impl SupabaseReviews {
    pub fn new(config: SupabaseConfig, session: Rc<Session>) -> Self {
        Self {
            rpc: Rpc { config, session },
        }
    }
}

impl ReviewGateway for SupabaseReviews {
    async fn list_reviews(&self, key: &EntityKey) -> Result<Vec<ReviewRecord>, GatewayError> {
        let rows: Vec<ReviewRow> = self
            .rpc
            .call("list_reviews", json!({ "p_tool_id": key }))
            .await?;
        records(rows)
    }

    async fn list_reviews_many(
        &self,
        keys: &[EntityKey],
    ) -> Result<HashMap<EntityKey, Vec<ReviewRecord>>, GatewayError> {
        let rows: Vec<ReviewRow> = self
            .rpc
            .call("list_reviews_many", json!({ "p_tool_ids": keys }))
            .await?;

        // every requested key was answered, even the ones with no reviews
        let mut grouped: HashMap<EntityKey, Vec<ReviewRecord>> =
            keys.iter().map(|key| (key.clone(), Vec::new())).collect();
        for record in records(rows)? {
            grouped
                .entry(record.entity_key.clone())
                .or_default()
                .push(record);
        }
        Ok(grouped)
    }

    async fn create_review(
        &self,
        key: &EntityKey,
        author: &ViewerId,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError> {
        let row: ReviewRow = self
            .rpc
            .call(
                "create_review",
                json!({
                    "p_tool_id": key,
                    "p_user_id": author,
                    "p_rating": draft.rating(),
                    "p_comment": draft.body(),
                }),
            )
            .await?;
        row.try_into()
    }

    async fn update_review(
        &self,
        review: &ReviewRecord,
        draft: &ReviewDraft,
    ) -> Result<ReviewRecord, GatewayError> {
        let row: ReviewRow = self
            .rpc
            .call(
                "update_review",
                json!({
                    "p_review_id": review.id,
                    "p_rating": draft.rating(),
                    "p_comment": draft.body(),
                }),
            )
            .await?;
        row.try_into()
    }

    async fn delete_review(&self, review: &ReviewRecord) -> Result<(), GatewayError> {
        self.rpc
            .call_void("delete_review", json!({ "p_review_id": review.id }))
            .await
    }

    async fn mark_helpful(
        &self,
        review: &ReviewRecord,
        viewer: &ViewerId,
    ) -> Result<Option<ReviewRecord>, GatewayError> {
        let row: Option<ReviewRow> = self
            .rpc
            .call(
                "mark_review_helpful",
                json!({ "p_review_id": review.id, "p_user_id": viewer }),
            )
            .await?;
        row.map(ReviewRecord::try_from).transpose()
    }

    async fn has_active_session(&self) -> bool {
        self.rpc.session.is_active()
    }
}
