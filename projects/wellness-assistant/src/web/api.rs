use super::DashboardState;
use crate::app::controls::Command;
use async_stream::stream;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Deserialize;
use futures::Stream;
use std::convert::Infallible;

pub async fn get_stats(State(state): State<DashboardState>) -> Json<serde_json::Value> {
    Json(state.session.to_json())
}

/// Pushes the stats document as a `stats` event every `stream_period`.
pub async fn stream_stats(
    State(state): State<DashboardState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream! {
        let mut interval = tokio::time::interval(state.stream_period);
        loop {
            interval.tick().await;
            let payload = state.session.to_json().to_string();
            yield Ok::<Event, Infallible>(Event::default().event("stats").data(payload));
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn send(state: &DashboardState, command: Command) -> StatusCode {
    match state.commands.send(command) {
        Ok(()) => {
            tracing::debug!("Dashboard command: {:?}", command);
            StatusCode::ACCEPTED
        }
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn toggle_breathing_pause(State(state): State<DashboardState>) -> StatusCode {
    send(&state, Command::TogglePause)
}

pub async fn force_breathing_session(State(state): State<DashboardState>) -> StatusCode {
    send(&state, Command::ForceSession)
}

pub async fn reset_stats(State(state): State<DashboardState>) -> StatusCode {
    send(&state, Command::ResetStats)
}

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub seconds: u64,
}

/// The main loop clamps the interval to the configured bounds.
pub async fn set_breathing_interval(
    State(state): State<DashboardState>,
    Json(request): Json<IntervalRequest>,
) -> StatusCode {
    send(&state, Command::SetBreathingInterval(request.seconds))
}

pub async fn stop_session(State(state): State<DashboardState>) -> StatusCode {
    send(&state, Command::Quit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::{SessionState, StatsSnapshot};
    use crossbeam::channel;
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> (DashboardState, channel::Receiver<Command>) {
        let (tx, rx) = channel::unbounded();
        let state = DashboardState {
            session: Arc::new(SessionState::new()),
            commands: tx,
            stream_period: Duration::from_secs(1),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn test_get_stats_returns_snapshot() {
        let (state, _rx) = state();
        state.session.publish(StatsSnapshot {
            eyes_open: true,
            ..StatsSnapshot::default()
        });
        let Json(body) = get_stats(State(state)).await;
        assert_eq!(body["stats"]["eyes_open"], true);
        assert_eq!(body["is_active"], false);
    }

    #[tokio::test]
    async fn test_controls_forward_commands() {
        let (state, rx) = state();
        assert_eq!(toggle_breathing_pause(State(state.clone())).await, StatusCode::ACCEPTED);
        assert_eq!(force_breathing_session(State(state.clone())).await, StatusCode::ACCEPTED);
        assert_eq!(reset_stats(State(state.clone())).await, StatusCode::ACCEPTED);
        assert_eq!(
            set_breathing_interval(State(state.clone()), Json(IntervalRequest { seconds: 45 })).await,
            StatusCode::ACCEPTED
        );
        assert_eq!(stop_session(State(state)).await, StatusCode::ACCEPTED);

        let received: Vec<Command> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                Command::TogglePause,
                Command::ForceSession,
                Command::ResetStats,
                Command::SetBreathingInterval(45),
                Command::Quit
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_session_is_unavailable() {
        let (state, rx) = state();
        drop(rx);
        assert_eq!(stop_session(State(state)).await, StatusCode::SERVICE_UNAVAILABLE);
    }
}
