use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_multipart::Multipart;
use actix_rt::time::timeout;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::Classify;
use crate::error::AnalyzeError;
use crate::models::{HealthResponse, MessageResponse, Prediction};
use crate::staging::{StagedUpload, StagingArea};

const BANNER: &str = "OncoChat ML API is running";

/// Process-wide state handed to every request.
pub struct AppState {
    pub classifier: Arc<dyn Classify>,
    pub staging: StagingArea,
    pub inference_timeout: Duration,
    pub max_upload_bytes: usize,
    pub inference_slots: Arc<InferenceSlots>,
}

/// Counts classifier calls running on the blocking pool. A call that outlives
/// its request's timeout keeps its slot until it actually returns.
#[derive(Debug)]
pub struct InferenceSlots {
    running: AtomicUsize,
    limit: usize,
}

impl InferenceSlots {
    pub fn new(limit: usize) -> Self {
        Self {
            running: AtomicUsize::new(0),
            limit,
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn try_acquire(self: &Arc<Self>) -> Option<InferenceSlot> {
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()
            .map(|_| InferenceSlot(Arc::clone(self)))
    }
}

struct InferenceSlot(Arc<InferenceSlots>);

impl Drop for InferenceSlot {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/analyze-image").route(web::post().to(analyze_image)));
}

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(MessageResponse { message: BANNER })
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { status: "healthy" })
}

pub async fn analyze_image(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AnalyzeError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("analyze", %request_id);

    match run_analysis(&state, payload, request_id)
        .instrument(span.clone())
        .await
    {
        Ok(prediction) => Ok(HttpResponse::Ok().json(prediction)),
        Err(e) => {
            let _enter = span.enter();
            if e.is_client_fault() {
                debug!(error = %e, "rejected upload");
            } else {
                warn!(error = %e, "analysis failed");
            }
            Err(e)
        }
    }
}

async fn run_analysis(
    state: &AppState,
    mut payload: Multipart,
    request_id: Uuid,
) -> Result<Prediction, AnalyzeError> {
    let mut staged: Option<StagedUpload> = None;

    // Only the first file part is classified. Everything else is drained.
    while let Some(item) = payload.next().await {
        let mut field = item?;
        let is_file = field.content_disposition().get_filename().is_some();

        if staged.is_none() && is_file {
            staged = Some(
                state
                    .staging
                    .stage(request_id, &mut field, state.max_upload_bytes)
                    .await?,
            );
        } else {
            while let Some(chunk) = field.next().await {
                chunk?;
            }
        }
    }

    let staged = staged.ok_or(AnalyzeError::MissingFile)?;
    let upload_bytes = staged.size();
    let path = staged.path().to_path_buf();
    let classifier = Arc::clone(&state.classifier);
    let slot = state
        .inference_slots
        .try_acquire()
        .ok_or(AnalyzeError::Busy {
            limit: state.inference_slots.limit(),
        })?;
    let started = Instant::now();

    let outcome = timeout(
        state.inference_timeout,
        web::block(move || {
            let _slot = slot;
            classifier.predict(&path)
        }),
    )
    .await;

    // The staged file goes before the response does, whichever branch follows.
    drop(staged);

    let prediction = match outcome {
        Err(_) => {
            warn!(
                still_running = state.inference_slots.running(),
                limit = state.inference_slots.limit(),
                "inference outlived its timeout"
            );
            return Err(AnalyzeError::Timeout(state.inference_timeout));
        }
        Ok(result) => result??,
    };

    info!(
        upload_bytes,
        label = prediction.label.as_str(),
        cancerous = prediction.cancerous,
        non_cancerous = prediction.non_cancerous,
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "classified upload"
    );

    Ok(prediction)
}
