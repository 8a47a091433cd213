use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Bytes;
use axum::extract::{Extension, Path, TypedHeader};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use burnbin_common::{
    Denied, DeniedBody, ErrorBody, Health, PasteCreated, PasteView, Url, HEALTH_ENDPOINT,
    PASTES_ENDPOINT, VIEW_PREFIX,
};
use headers::Host;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{error, instrument};

use crate::clock::Clock;
use crate::engine::{Consumed, CreateError, Denial, Engine, View};
use crate::short_code::{Generator, ShortCode};
use crate::store::PasteStore;

pub const SHORT_CODE_SIZE: usize = 8;

/// How many fresh ids to try before giving up on a create.
const MAX_ID_ATTEMPTS: usize = 16;

pub struct AppState<S> {
    pub engine: Engine<S>,
    clock: Arc<dyn Clock>,
    public_url: Option<Url>,
    rng: Mutex<StdRng>,
}

impl<S: PasteStore> AppState<S> {
    pub fn new(
        engine: Engine<S>,
        clock: Arc<dyn Clock>,
        public_url: Option<Url>,
        rng: StdRng,
    ) -> Self {
        Self {
            engine,
            clock,
            public_url,
            rng: Mutex::new(rng),
        }
    }

    pub fn now(&self) -> burnbin_common::Timestamp {
        self.clock.now()
    }

    fn next_id(&self) -> String {
        let code: ShortCode<SHORT_CODE_SIZE> = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample(Generator);
        code.to_string()
    }

    fn link(&self, host: Option<&Host>, id: &str) -> String {
        let base = match (&self.public_url, host) {
            (Some(url), _) => url.as_str().trim_end_matches('/').to_string(),
            (None, Some(host)) => match host.port() {
                Some(port) => format!("http://{}:{}", host.hostname(), port),
                None => format!("http://{}", host.hostname()),
            },
            (None, None) => String::new(),
        };
        format!("{}{}{}", base, VIEW_PREFIX, id)
    }
}

pub fn router<S: PasteStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route(PASTES_ENDPOINT, post(create::<S>))
        .route(&format!("{}/:id", PASTES_ENDPOINT), get(view::<S>))
        .route(HEALTH_ENDPOINT, get(health::<S>))
        .route(&format!("{}:id", VIEW_PREFIX), get(page::<S>))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug)]
enum ApiError {
    Invalid(CreateError),
    Denied(Denial),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Invalid(e) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: e.to_string(),
                }),
            )
                .into_response(),
            Self::Denied(denial) => match to_wire(denial) {
                Some(denied) => {
                    (StatusCode::NOT_FOUND, Json(DeniedBody::from(denied))).into_response()
                }
                None => Self::Internal.into_response(),
            },
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

fn to_wire(denial: Denial) -> Option<Denied> {
    Some(match denial {
        Denial::NotFound => Denied::NotFound,
        Denial::Expired { expired_at } => {
            let expired_at = expired_at.to_datetime();
            if expired_at.is_none() {
                error!("Stored expiry is outside of the representable range");
            }
            Denied::Expired {
                expired_at: expired_at?,
            }
        }
        Denial::ViewLimitExceeded { max_views } => Denied::ViewLimitExceeded {
            max_views: max_views.get(),
        },
    })
}

/// The fields of a create request, with the JSON types checked but not the
/// values.
#[derive(Debug, PartialEq, Eq)]
struct CreateRequest {
    content: Bytes,
    ttl_seconds: Option<i64>,
    max_views: Option<i64>,
}

impl CreateRequest {
    fn parse(body: &[u8]) -> Result<Self, CreateError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| CreateError::InvalidContent)?;

        let content = match value.get("content") {
            Some(Value::String(content)) => Bytes::from(content.clone()),
            _ => return Err(CreateError::InvalidContent),
        };

        Ok(Self {
            content,
            ttl_seconds: integer_field(&value, "ttl_seconds").ok_or(CreateError::InvalidTtl)?,
            max_views: integer_field(&value, "max_views").ok_or(CreateError::InvalidMaxViews)?,
        })
    }
}

/// `Some(None)` if the field is absent or null, `None` if it holds anything
/// other than a whole number.
#[allow(clippy::option_option)]
fn integer_field(value: &Value, name: &str) -> Option<Option<i64>> {
    match value.get(name) {
        None | Some(Value::Null) => Some(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(Some),
        Some(_) => None,
    }
}

#[instrument(skip_all)]
async fn create<S: PasteStore>(
    Extension(state): Extension<Arc<AppState<S>>>,
    host: Option<TypedHeader<Host>>,
    body: Bytes,
) -> Result<Json<PasteCreated>, ApiError> {
    let request = CreateRequest::parse(&body).map_err(ApiError::Invalid)?;
    let now = state.now();

    // Statistics show that running out of attempts is very unlikely
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = state.next_id();
        let result = state
            .engine
            .create(
                &id,
                request.content.clone(),
                request.ttl_seconds,
                request.max_views,
                now,
            )
            .await;

        match result {
            Ok(_) => {
                let url = state.link(host.as_ref().map(|h| &h.0), &id);
                return Ok(Json(PasteCreated { id, url }));
            }
            Err(CreateError::IdTaken) => continue,
            Err(CreateError::Store(e)) => {
                error!("Failed to insert paste into db: {}", e);
                return Err(ApiError::Internal);
            }
            Err(e) => return Err(ApiError::Invalid(e)),
        }
    }

    error!("Failed to generate a valid shortcode");
    Err(ApiError::Internal)
}

#[instrument(skip(state))]
async fn view<S: PasteStore>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PasteView>, ApiError> {
    let View {
        content,
        remaining_views,
        expires_at,
    } = consume(&state, &id).await?;

    Ok(Json(PasteView {
        content: String::from_utf8_lossy(&content).into_owned(),
        remaining_views,
        expires_at: expires_at.and_then(|at| at.to_datetime()),
    }))
}

/// The link handed out on creation: the bare content as plain text.
#[instrument(skip(state))]
async fn page<S: PasteStore>(
    Extension(state): Extension<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<String, ApiError> {
    let view = consume(&state, &id).await?;
    Ok(String::from_utf8_lossy(&view.content).into_owned())
}

async fn consume<S: PasteStore>(state: &AppState<S>, id: &str) -> Result<View, ApiError> {
    // Anything that isn't a short code was never handed out.
    if id.parse::<ShortCode<SHORT_CODE_SIZE>>().is_err() {
        return Err(ApiError::Denied(Denial::NotFound));
    }

    let consumed = state.engine.consume(id, state.now()).await.map_err(|e| {
        error!("Failed to consume paste: {}", e);
        ApiError::Internal
    })?;

    match consumed {
        Consumed::Viewed(view) => Ok(view),
        Consumed::Denied(denial) => Err(ApiError::Denied(denial)),
    }
}

async fn health<S: PasteStore>(
    Extension(state): Extension<Arc<AppState<S>>>,
) -> (StatusCode, Json<Health>) {
    match state.engine.store().ping().await {
        Ok(()) => (StatusCode::OK, Json(Health { ok: true })),
        Err(e) => {
            error!("Health check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Health { ok: false }))
        }
    }
}
