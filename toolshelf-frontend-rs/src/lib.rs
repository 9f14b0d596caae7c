mod supabase;
mod utils;

use std::rc::Rc;
use std::sync::LazyLock;

use catalog_utils::{EntityKey, InteractionKind, InteractionState, ReviewOrder, ViewerId};
use optimist::{ListenerKey, OptimisticStore, ReviewLifecycle, StoreConfig, Tickets};
use serde::{Deserialize, Serialize};
use slotmap::{Key as _, KeyData};
use wasm_bindgen::prelude::*;

pub use supabase::{Session, SupabaseConfig, SupabaseInteractions, SupabaseReviews, supabase_config};
use utils::{WasmSpawner, js_error, to_js};

type InteractionStore = OptimisticStore<InteractionState, SupabaseInteractions>;

/// Overrides for the defaults, all optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(default)]
pub struct ToolshelfOptions {
    /// `Some(None)` would be indistinguishable from absent in JS, so `0` disables staleness.
    pub stale_after_secs: Option<i64>,
    pub demo_ceiling: Option<u32>,
    pub supabase: Option<SupabaseConfig>,
}

impl ToolshelfOptions {
    fn store_config(&self) -> StoreConfig {
        let defaults = StoreConfig::default();
        StoreConfig {
            stale_after_secs: match self.stale_after_secs {
                Some(0) => None,
                Some(secs) => Some(secs),
                None => defaults.stale_after_secs,
            },
            demo_ceiling: self.demo_ceiling.unwrap_or(defaults.demo_ceiling),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Subscribed {
    pub listener: u64,
    pub state: InteractionState,
}

#[wasm_bindgen]
pub struct Toolshelf {
    session: Rc<Session>,
    likes: InteractionStore,
    bookmarks: InteractionStore,
    reviews: ReviewLifecycle<SupabaseReviews>,
}

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
#[allow(clippy::declare_interior_mutable_const)]
const LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Logging initialized");
});

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl Toolshelf {
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(constructor))]
    pub fn new(options: Option<ToolshelfOptions>) -> Self {
        #[allow(clippy::borrow_interior_mutable_const)]
        *LOGGER;

        let options = options.unwrap_or_default();
        let config = options.store_config();
        let supabase = options.supabase.clone().unwrap_or_else(supabase_config);
        let session = Rc::new(Session::default());
        let spawner = Rc::new(WasmSpawner);
        // one mutation per entity at a time, whichever kind it is
        let tickets = Tickets::default();

        let store = |kind| {
            OptimisticStore::new(
                SupabaseInteractions::new(kind, supabase.clone(), Rc::clone(&session)),
                config.clone(),
                tickets.clone(),
                spawner.clone(),
            )
        };

        Self {
            likes: store(InteractionKind::Like),
            bookmarks: store(InteractionKind::Bookmark),
            reviews: ReviewLifecycle::new(
                SupabaseReviews::new(supabase.clone(), Rc::clone(&session)),
                tickets.clone(),
            ),
            session,
        }
    }

    /// Call whenever the auth library refreshes or clears the token.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn set_access_token(&self, access_token: Option<String>) {
        self.session.set_access_token(access_token);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn likes(&self, entity_id: String, viewer_id: Option<String>) -> InteractionState {
        self.likes.get(&EntityKey::new(entity_id), viewer(&viewer_id).as_ref())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn bookmarks(&self, entity_id: String, viewer_id: Option<String>) -> InteractionState {
        self.bookmarks
            .get(&EntityKey::new(entity_id), viewer(&viewer_id).as_ref())
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn subscribe_likes(
        &self,
        entity_id: String,
        viewer_id: Option<String>,
        callback: js_sys::Function,
    ) -> Subscribed {
        subscribe(&self.likes, entity_id, viewer_id, callback)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn subscribe_bookmarks(
        &self,
        entity_id: String,
        viewer_id: Option<String>,
        callback: js_sys::Function,
    ) -> Subscribed {
        subscribe(&self.bookmarks, entity_id, viewer_id, callback)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn unsubscribe_likes(&self, listener: u64) {
        self.likes.unsubscribe(listener_from_js(listener));
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn unsubscribe_bookmarks(&self, listener: u64) {
        self.bookmarks.unsubscribe(listener_from_js(listener));
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn toggle_like(
        &self,
        entity_id: String,
        viewer_id: Option<String>,
    ) -> Result<InteractionState, JsValue> {
        self.likes
            .toggle(&EntityKey::new(entity_id), viewer(&viewer_id).as_ref())
            .await
            .map_err(js_error)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn toggle_bookmark(
        &self,
        entity_id: String,
        viewer_id: Option<String>,
    ) -> Result<InteractionState, JsValue> {
        self.bookmarks
            .toggle(&EntityKey::new(entity_id), viewer(&viewer_id).as_ref())
            .await
            .map_err(js_error)
    }

    /// Whether any mutation of the entity is still in flight. The stores share their tickets,
    /// so this includes review changes.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn is_toggling(&self, entity_id: String) -> bool {
        self.likes.is_mutating(&EntityKey::new(entity_id))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn refresh_likes(
        &self,
        entity_id: String,
        viewer_id: Option<String>,
    ) -> Result<InteractionState, JsValue> {
        self.likes
            .refresh(&EntityKey::new(entity_id), viewer(&viewer_id).as_ref())
            .await
            .map_err(js_error)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn refresh_bookmarks(
        &self,
        entity_id: String,
        viewer_id: Option<String>,
    ) -> Result<InteractionState, JsValue> {
        self.bookmarks
            .refresh(&EntityKey::new(entity_id), viewer(&viewer_id).as_ref())
            .await
            .map_err(js_error)
    }

    /// Loads likes for a whole list view. Resolves to an object keyed by entity id.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn load_likes(
        &self,
        entity_ids: Vec<String>,
        viewer_id: Option<String>,
    ) -> Result<JsValue, JsValue> {
        let keys = entity_keys(entity_ids);
        let loaded = self
            .likes
            .load_many(&keys, viewer(&viewer_id).as_ref())
            .await;
        to_js(&by_id(loaded))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn load_bookmarks(
        &self,
        entity_ids: Vec<String>,
        viewer_id: Option<String>,
    ) -> Result<JsValue, JsValue> {
        let keys = entity_keys(entity_ids);
        let loaded = self
            .bookmarks
            .load_many(&keys, viewer(&viewer_id).as_ref())
            .await;
        to_js(&by_id(loaded))
    }

    /// Forgets everything cached for the entity, including listeners.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn release(&self, entity_id: String) {
        let key = EntityKey::new(entity_id);
        self.likes.release(&key);
        self.bookmarks.release(&key);
        self.reviews.release(&key);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn load_reviews(&self, entity_id: String) -> Result<JsValue, JsValue> {
        let reviews = self
            .reviews
            .load(&EntityKey::new(entity_id))
            .await
            .map_err(js_error)?;
        to_js(&reviews)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn load_reviews_many(&self, entity_ids: Vec<String>) -> Result<JsValue, JsValue> {
        let loaded = self.reviews.load_many(&entity_keys(entity_ids)).await;
        to_js(&by_id(loaded))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn reviews(&self, entity_id: String, order: Option<ReviewOrder>) -> Result<JsValue, JsValue> {
        let key = EntityKey::new(entity_id);
        to_js(&self.reviews.sorted(&key, order.unwrap_or_default()))
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn summary(&self, entity_id: String) -> Result<JsValue, JsValue> {
        to_js(&self.reviews.summary(&EntityKey::new(entity_id)))
    }

    /// The viewer's own review of the entity, so the UI can offer "edit" instead of "submit".
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn review_by(&self, entity_id: String, viewer_id: String) -> Result<JsValue, JsValue> {
        let review = self
            .reviews
            .review_by(&EntityKey::new(entity_id), &ViewerId::new(viewer_id));
        to_js(&review)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn is_reviewing(&self, entity_id: String) -> bool {
        self.reviews.is_mutating(&EntityKey::new(entity_id))
    }

    /// `callback` receives the entity's reviews, unsorted, after every change.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn subscribe_reviews(&self, entity_id: String, callback: js_sys::Function) -> u64 {
        let (listener, _) = self
            .reviews
            .subscribe(&EntityKey::new(entity_id), move |reviews| {
                call_js(&callback, to_js(reviews));
            });
        listener_to_js(listener)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn unsubscribe_reviews(&self, listener: u64) {
        self.reviews.unsubscribe(listener_from_js(listener));
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn submit_review(
        &self,
        entity_id: String,
        viewer_id: Option<String>,
        rating: i32,
        body: String,
    ) -> Result<JsValue, JsValue> {
        let review = self
            .reviews
            .submit(
                &EntityKey::new(entity_id),
                viewer(&viewer_id).as_ref(),
                i64::from(rating),
                &body,
            )
            .await
            .map_err(js_error)?;
        to_js(&review)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn update_review(
        &self,
        entity_id: String,
        review_id: String,
        viewer_id: Option<String>,
        rating: i32,
        body: String,
    ) -> Result<JsValue, JsValue> {
        let review = self
            .reviews
            .update(
                &EntityKey::new(entity_id),
                &review_id,
                viewer(&viewer_id).as_ref(),
                i64::from(rating),
                &body,
            )
            .await
            .map_err(js_error)?;
        to_js(&review)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn delete_review(
        &self,
        entity_id: String,
        review_id: String,
        viewer_id: Option<String>,
    ) -> Result<(), JsValue> {
        self.reviews
            .delete(
                &EntityKey::new(entity_id),
                &review_id,
                viewer(&viewer_id).as_ref(),
            )
            .await
            .map_err(js_error)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn mark_review_helpful(
        &self,
        entity_id: String,
        review_id: String,
        viewer_id: Option<String>,
    ) -> Result<JsValue, JsValue> {
        let review = self
            .reviews
            .mark_helpful(
                &EntityKey::new(entity_id),
                &review_id,
                viewer(&viewer_id).as_ref(),
            )
            .await
            .map_err(js_error)?;
        to_js(&review)
    }
}

fn viewer(viewer_id: &Option<String>) -> Option<ViewerId> {
    viewer_id.as_deref().map(ViewerId::new)
}

fn entity_keys(entity_ids: Vec<String>) -> Vec<EntityKey> {
    entity_ids.into_iter().map(EntityKey::new).collect()
}

/// Keyed by the bare id, in load order.
fn by_id<T>(loaded: indexmap::IndexMap<EntityKey, T>) -> indexmap::IndexMap<String, T> {
    loaded
        .into_iter()
        .map(|(key, value)| (String::from(key), value))
        .collect()
}

fn subscribe(
    store: &InteractionStore,
    entity_id: String,
    viewer_id: Option<String>,
    callback: js_sys::Function,
) -> Subscribed {
    let (listener, state) = store.subscribe(
        &EntityKey::new(entity_id),
        viewer(&viewer_id).as_ref(),
        move |state| call_js(&callback, to_js(state)),
    );
    Subscribed {
        listener: listener_to_js(listener),
        state,
    }
}

fn call_js(callback: &js_sys::Function, value: Result<JsValue, JsValue>) {
    #[cfg(target_arch = "wasm32")]
    {
        let value = value.unwrap_or_else(|e| e);
        if let Err(e) = callback.call1(&JsValue::null(), &value) {
            log::error!("Listener threw: {e:?}");
        }
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = (callback, value);
    }
}

fn listener_to_js(listener: ListenerKey) -> u64 {
    listener.data().as_ffi()
}

fn listener_from_js(listener: u64) -> ListenerKey {
    ListenerKey::from(KeyData::from_ffi(listener))
}
