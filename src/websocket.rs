//! # Batch Notification Channel
//!
//! WebSocket endpoint clients hold open to hear about their upload batch.
//! Connecting to `/ws/transcript_ready/{batch_uuid}` registers the
//! connection in the Notification Registry under that batch id; from then on
//! the batch processor pushes `completed`, `failed` and terminal events
//! through it as JSON text frames.
//!
//! ## Protocol:
//! 1. **Connect**: registers the channel for the batch in the path
//! 2. **Inbound text**: echoed back as `{"status": "message_received", ...}`
//! 3. **Server push**: one event per processed file, then one terminal event
//! 4. **Disconnect**: the channel is unregistered on every exit path -
//!    client close, protocol error, or heartbeat timeout
//!
//! Each connection is one actor; the registry only ever holds its recipient
//! handle, never the actor itself.

use crate::notify::{BatchEvent, ChannelId, NotificationRegistry};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long the client may stay silent before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct NotificationChannel {
    batch_uuid: Uuid,
    registry: Arc<NotificationRegistry>,
    state: web::Data<AppState>,
    channel_id: Option<ChannelId>,
    last_heartbeat: Instant,
}

impl NotificationChannel {
    pub fn new(batch_uuid: Uuid, registry: Arc<NotificationRegistry>, state: web::Data<AppState>) -> Self {
        Self {
            batch_uuid,
            registry,
            state,
            channel_id: None,
            last_heartbeat: Instant::now(),
        }
    }
}

impl Actor for NotificationChannel {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let channel_id = self
            .registry
            .register(self.batch_uuid, ctx.address().recipient());
        self.channel_id = Some(channel_id);
        self.state.increment_active_channels();

        info!(
            batch_uuid = %self.batch_uuid,
            channel_id,
            channels = self.registry.channel_count(self.batch_uuid),
            "Notification channel opened"
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    batch_uuid = %act.batch_uuid,
                    "Notification channel heartbeat timeout, closing"
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Unconditional on every disconnect path; a broadcast racing this
        // removal fails on the send and is ignored there.
        if let Some(channel_id) = self.channel_id.take() {
            self.registry.unregister(self.batch_uuid, channel_id);
        }
        self.state.decrement_active_channels();
        info!(batch_uuid = %self.batch_uuid, "Notification channel closed");
    }
}

impl Handler<BatchEvent> for NotificationChannel {
    type Result = ();

    fn handle(&mut self, event: BatchEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&event) {
            Ok(json) => ctx.text(json),
            Err(e) => warn!(error = %e, "Failed to serialize batch event"),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for NotificationChannel {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                // The channel is server-push only; inbound text is just echoed.
                let echo = json!({
                    "status": "message_received",
                    "message": text.to_string(),
                });
                ctx.text(echo.to_string());
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(batch_uuid = %self.batch_uuid, ?reason, "Client closed notification channel");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Unexpected binary frame on notification channel");
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(batch_uuid = %self.batch_uuid, error = %e, "Notification channel protocol error");
                ctx.stop();
            }
        }
    }
}

/// HTTP -> WebSocket upgrade for `/ws/transcript_ready/{batch_uuid}`.
pub async fn transcript_ready(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let batch_uuid = path.into_inner();
    let registry = Arc::clone(&state.registry);
    ws::start(NotificationChannel::new(batch_uuid, registry, state), &req, stream)
}
