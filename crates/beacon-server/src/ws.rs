//! WebSocket handling for live build events.
//!
//! One socket can hold any number of subscriptions, each named by a stream
//! key (`jobs`, `job:<id>`, `console:<id>`). Events are tagged with that key;
//! a `completed` message follows the last event of a stream.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use beacon_config::ConsoleConfig;
use beacon_console::{LogAssembler, Section};
use beacon_core::{ConsoleChunk, JobEvent, JobId, Principal};
use beacon_hub::Subscription;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamMap;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::principal::principal_from_headers;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let principal = principal_from_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, principal))
}

async fn handle_socket(socket: WebSocket, state: AppState, principal: Principal) {
    info!(principal = %principal, "WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();
    let mut streams: StreamMap<String, BoxStream<'static, WsMessage>> = StreamMap::new();

    loop {
        let outgoing = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<WsCommand>(&text) {
                        Ok(cmd) => apply(cmd, &state, principal, &mut streams).await,
                        Err(e) => WsMessage::Error {
                            message: format!("invalid command: {e}"),
                        },
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(principal = %principal, "WebSocket connection closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => continue,
            },
            Some((_, msg)) = streams.next(), if !streams.is_empty() => msg,
        };

        let json = match serde_json::to_string(&outgoing) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode WebSocket message");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }

    // Dropping the streams detaches every subscription.
    debug!(principal = %principal, streams = streams.len(), "Releasing subscriptions");
}

async fn apply(
    cmd: WsCommand,
    state: &AppState,
    principal: Principal,
    streams: &mut StreamMap<String, BoxStream<'static, WsMessage>>,
) -> WsMessage {
    match cmd {
        WsCommand::SubscribeJobs => {
            let stream = "jobs".to_string();
            let sub = state.hub.subscribe_jobs(principal).await;
            streams.insert(stream.clone(), job_stream(stream.clone(), sub));
            WsMessage::Subscribed { stream }
        }
        WsCommand::SubscribeJob { job_id } => {
            let stream = format!("job:{job_id}");
            let sub = state.hub.subscribe_job(job_id, principal).await;
            streams.insert(stream.clone(), job_stream(stream.clone(), sub));
            WsMessage::Subscribed { stream }
        }
        WsCommand::SubscribeConsole { job_id, sections } => {
            let stream = format!("console:{job_id}");
            let sub = state.hub.subscribe_console(job_id, principal).await;
            let events = if sections {
                let hub = state.hub.clone();
                let ended = async move { hub.job_ended_at(job_id).await }.boxed();
                section_stream(stream.clone(), sub, ended, &state.console)
            } else {
                chunk_stream(stream.clone(), sub)
            };
            streams.insert(stream.clone(), events);
            WsMessage::Subscribed { stream }
        }
        WsCommand::Unsubscribe { stream } => {
            streams.remove(&stream);
            WsMessage::Unsubscribed { stream }
        }
    }
}

fn completed(name: String) -> BoxStream<'static, WsMessage> {
    stream::once(async move { WsMessage::Completed { stream: name } }).boxed()
}

fn job_stream(key: String, sub: Subscription<JobEvent>) -> BoxStream<'static, WsMessage> {
    let name = key.clone();
    sub.map(move |event| WsMessage::Job {
        stream: name.clone(),
        event,
    })
    .chain(completed(key))
    .boxed()
}

fn chunk_stream(key: String, sub: Subscription<ConsoleChunk>) -> BoxStream<'static, WsMessage> {
    let name = key.clone();
    sub.map(move |chunk| WsMessage::Console {
        stream: name.clone(),
        chunk,
    })
    .chain(completed(key))
    .boxed()
}

/// Console chunks assembled into sections; each message carries one section
/// that changed. `ended` resolves to the job's end time and is only awaited
/// once the console is complete, to close the last section.
fn section_stream(
    key: String,
    sub: Subscription<ConsoleChunk>,
    ended: BoxFuture<'static, Option<DateTime<Utc>>>,
    config: &ConsoleConfig,
) -> BoxStream<'static, WsMessage> {
    let assembler = LogAssembler::new(config);
    let name = key.clone();

    stream::unfold(Some((sub, assembler, ended)), move |state| {
        let name = name.clone();
        async move {
            let (mut sub, mut assembler, ended) = state?;
            match sub.next().await {
                Some(chunk) => {
                    assembler.push_chunk(&chunk.data);
                    let batch = section_updates(&name, &mut assembler);
                    Some((batch, Some((sub, assembler, ended))))
                }
                None => {
                    let ended_at = if assembler.sections().is_empty() {
                        None
                    } else {
                        ended.await
                    };
                    assembler.finalize(ended_at);
                    Some((section_updates(&name, &mut assembler), None))
                }
            }
        }
    })
    .flat_map(stream::iter)
    .chain(completed(key))
    .boxed()
}

fn section_updates(name: &str, assembler: &mut LogAssembler) -> Vec<WsMessage> {
    assembler
        .take_updated()
        .into_iter()
        .filter_map(|index| {
            assembler.sections().get(index).map(|section| WsMessage::Section {
                stream: name.to_string(),
                index,
                section: section.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    SubscribeJobs,
    SubscribeJob {
        job_id: JobId,
    },
    SubscribeConsole {
        job_id: JobId,
        #[serde(default)]
        sections: bool,
    },
    Unsubscribe {
        stream: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Subscribed {
        stream: String,
    },
    Unsubscribed {
        stream: String,
    },
    Job {
        stream: String,
        event: JobEvent,
    },
    Console {
        stream: String,
        chunk: ConsoleChunk,
    },
    Section {
        stream: String,
        index: usize,
        section: Section,
    },
    Completed {
        stream: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use futures::future;

    fn chunk(id: i64, data: &str) -> ConsoleChunk {
        ConsoleChunk {
            id,
            job_id: JobId::new(3),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_parse_commands() {
        let cmd: WsCommand =
            serde_json::from_str(r#"{"type": "subscribe_console", "job_id": 3}"#).unwrap();
        assert!(matches!(
            cmd,
            WsCommand::SubscribeConsole { job_id, sections: false } if job_id == JobId::new(3)
        ));

        let cmd: WsCommand = serde_json::from_str(r#"{"type": "subscribe_jobs"}"#).unwrap();
        assert!(matches!(cmd, WsCommand::SubscribeJobs));

        assert!(serde_json::from_str::<WsCommand>(r#"{"type": "subscribe_job"}"#).is_err());
    }

    #[test]
    fn test_message_shape() {
        let value = serde_json::to_value(WsMessage::Console {
            stream: "console:3".to_string(),
            chunk: chunk(1, "hi\n"),
        })
        .unwrap();
        assert_eq!(value["type"], "console");
        assert_eq!(value["stream"], "console:3");
        assert_eq!(value["chunk"]["data"], "hi\n");
    }

    #[tokio::test]
    async fn test_chunk_stream_ends_with_completed() {
        let sub = Subscription::finished(vec![chunk(1, "a\n"), chunk(2, "b\n")]);
        let messages: Vec<WsMessage> = chunk_stream("console:3".to_string(), sub).collect().await;

        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[2], WsMessage::Completed { stream } if stream == "console:3"));
    }

    #[tokio::test]
    async fn test_section_stream_assembles_sections() {
        let sub = Subscription::finished(vec![
            chunk(1, "12:00:00|## Build\n12:00:01|compil"),
            chunk(2, "ing\n12:00:05|## Test\n12:00:06|ok\n"),
        ]);
        let messages: Vec<WsMessage> = section_stream(
            "console:3".to_string(),
            sub,
            future::ready(None).boxed(),
            &ConsoleConfig::default(),
        )
        .collect()
        .await;

        let labels: Vec<(usize, String)> = messages
            .iter()
            .filter_map(|msg| match msg {
                WsMessage::Section { index, section, .. } => Some((*index, section.label.clone())),
                _ => None,
            })
            .collect();
        assert!(labels.contains(&(0, "Build".to_string())));
        assert!(labels.contains(&(1, "Test".to_string())));
        assert!(matches!(messages.last(), Some(WsMessage::Completed { .. })));
    }

    #[tokio::test]
    async fn test_last_section_ends_with_the_job() {
        let sub = Subscription::finished(vec![chunk(1, "12:00:00|## Build\n12:00:01|done\n")]);
        let ended = Utc.with_ymd_and_hms(2024, 5, 1, 12, 3, 30).unwrap();
        let messages: Vec<WsMessage> = section_stream(
            "console:3".to_string(),
            sub,
            future::ready(Some(ended)).boxed(),
            &ConsoleConfig::default(),
        )
        .collect()
        .await;

        let last = messages
            .iter()
            .rev()
            .find_map(|msg| match msg {
                WsMessage::Section { index: 0, section, .. } => Some(section),
                _ => None,
            })
            .unwrap();
        assert_eq!(last.ended_at, NaiveTime::from_hms_opt(12, 3, 30));
    }

    #[tokio::test]
    async fn test_empty_console_skips_end_time_lookup() {
        let sub = Subscription::finished(Vec::new());
        let ended: BoxFuture<'static, Option<DateTime<Utc>>> =
            async { panic!("end time looked up for an empty console") }.boxed();
        let messages: Vec<WsMessage> =
            section_stream("console:3".to_string(), sub, ended, &ConsoleConfig::default())
                .collect()
                .await;

        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], WsMessage::Completed { .. }));
    }
}
