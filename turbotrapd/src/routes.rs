use crate::context::AppContext;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, Router, extract::State, routing::get};
use futures_util::Stream;
use log::warn;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/summary", get(summary))
        .route("/api/incidents", get(incidents))
        .route("/api/dead-letters", get(dead_letters))
        .route("/feed", get(feed))
        .with_state(ctx)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn summary(State(ctx): State<AppContext>) -> Json<crate::schema::AttackSummary> {
    Json(ctx.detector.summary())
}

async fn incidents(State(ctx): State<AppContext>) -> Json<Vec<crate::schema::Incident>> {
    Json(ctx.audit.recent())
}

async fn dead_letters(State(ctx): State<AppContext>) -> Json<Vec<crate::bus::DeadLetter>> {
    Json(ctx.bus.dead_letters())
}

/// Live feed as SSE. Each subscriber gets its own broadcast receiver; a
/// slow client lags and loses events without touching anyone else.
async fn feed(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.bus.feed().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|event| match event {
        Ok(event) => Event::default()
            .json_data(&event)
            .ok()
            .map(Ok::<_, Infallible>),
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            warn!("[feed] subscriber lagged by {n} events");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
