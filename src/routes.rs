use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::display::{DisplayPowerController, ScreensaverMonitor};
use crate::error::AppError;
use crate::events::PowerEvent;
use crate::gpio::GpioBackend;

pub struct AppState<B: GpioBackend> {
    pub controller: Arc<DisplayPowerController<B>>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
        }
    }
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<PowerEvent>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if let Ok(text) = serde_json::to_string(&event) {
                            if session.text(text).await.is_err() {
                                warn!("WebSocket client disconnected");
                                break;
                            }
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        if session.text(AppError::Runtime(format!("Event stream lagged by {n} messages")).to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: GpioBackend + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/screensaver/activated")
                    .route(web::post().to(screensaver_activated::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/screensaver/deactivated")
                    .route(web::post().to(screensaver_deactivated::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/settings/reload")
                    .route(web::post().to(settings_changed::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/display")
                    .route(web::get().to(display_status::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/display/power")
                    .route(web::post().to(set_power::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/display/events")
                    .route(web::get().to(get_events::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/display/events/ws")
                    .route(web::get().to(events_ws::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn run_blocking<B, T, F>(
    controller: &Arc<DisplayPowerController<B>>,
    f: F,
) -> Result<T, AppError>
where
    B: GpioBackend + 'static,
    T: Send + 'static,
    F: FnOnce(&DisplayPowerController<B>) -> T + Send + 'static,
{
    let controller = Arc::clone(controller);
    web::block(move || f(&controller))
        .await
        .map_err(|e| AppError::Runtime(format!("Blocking task failed: {e}")))
}

async fn screensaver_activated<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    run_blocking(&state.controller, |c| c.on_screensaver_activated()).await?;

    Ok(HttpResponse::Ok())
}

async fn screensaver_deactivated<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    run_blocking(&state.controller, |c| c.on_screensaver_deactivated()).await?;

    Ok(HttpResponse::Ok())
}

async fn settings_changed<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    run_blocking(&state.controller, |c| c.on_settings_changed()).await?;

    Ok(HttpResponse::Ok())
}

async fn display_status<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let status = run_blocking(&state.controller, |c| c.status()).await?;

    Ok(web::Json(status))
}

async fn set_power<B: GpioBackend + 'static>(
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let on = parse_power_payload(&body)?;

    let action = run_blocking(&state.controller, move |c| {
        if on {
            c.start_display()
        } else {
            c.shutdown_display()
        }
    })
    .await??;

    Ok(web::Json(action))
}

async fn get_events<B: GpioBackend + 'static>(
    query: web::Query<EventsQuery>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let events = state.controller.recent_events(query.limit);

    Ok(web::Json(events))
}

async fn events_ws<B: GpioBackend + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let rx = state.controller.subscribe_events();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| AppError::Runtime(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx).await;
    });

    Ok(response)
}

fn parse_power_payload(body: &[u8]) -> Result<bool, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty power payload".into()));
    }

    match std::str::from_utf8(body) {
        Ok(text) => match text.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(AppError::InvalidValue("Power must be 0 or 1".into())),
        },
        _ => Err(AppError::InvalidValue(
            "Power payload must be valid UTF-8".into(),
        )),
    }
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
