use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::{
    aio::{ConnectionManager, PubSubSink},
    AsyncCommands,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_sessions::Session;
use tracing::{debug, error, warn};
use waitline_service::{
    events::{CheckinExpiredMessage, DequeuedMessage, QueuePositionsMessage},
    models::{Party, PartyStatus},
    store::StoreError,
    CHECKING_IN_EXPIRED_CHANNEL, DEQUEUED_CHANNEL, QUEUE_POSITIONS_CACHE_KEY,
    QUEUE_POSITIONS_CHANNEL,
};

use crate::error::ApiError;
use crate::handlers::{connect_db, AppState};
use crate::session::PartySession;

/// Frames delivered to the browser, one `data: <json>` line per event.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status")]
pub enum StreamEvent {
    #[serde(rename = "CAN_DEQUEUE")]
    CanDequeue {
        #[serde(rename = "checkingInExpiration")]
        checking_in_expiration: DateTime<Utc>,
    },
    #[serde(rename = "QUEUE_POSITION_UPDATE")]
    QueuePositionUpdate { position: i64 },
    #[serde(rename = "UNQUEUED_CLIENT")]
    UnqueuedClient,
    #[serde(rename = "CHECKIN_WINDOW_EXPIRED")]
    CheckinWindowExpired,
}

type FrameSender = mpsc::Sender<Result<Event, Infallible>>;

/// Opens the per-client event stream: one subscriber connection for channel
/// traffic, the shared command handle for the cache read.
pub async fn party_events(
    State(state): State<AppState>,
    session: Session,
) -> Result<Sse<ReceiverStream<Result<Event, Infallible>>>, ApiError> {
    let party_session = PartySession::new(session);
    let Some(party_id) = party_session.party_id().await? else {
        return Err(ApiError::NoSession);
    };

    let conn = &mut connect_db().await?;
    match state.store.get_by_party_id(conn, &party_id).await {
        Ok(_) => {}
        Err(StoreError::PartyNotFound) => {
            party_session.clear().await;
            return Err(ApiError::NotFound);
        }
        Err(_) => return Err(ApiError::Internal),
    }

    let mut pubsub = state.redis_client.get_async_pubsub().await.map_err(|err| {
        error!(error = %err, "pub/sub connection failed");
        ApiError::Internal
    })?;
    for channel in [
        DEQUEUED_CHANNEL,
        CHECKING_IN_EXPIRED_CHANNEL,
        QUEUE_POSITIONS_CHANNEL,
    ] {
        pubsub.subscribe(channel).await.map_err(|err| {
            error!(error = %err, channel, "channel subscription failed");
            ApiError::Internal
        })?;
    }

    // Re-read after subscribing: a purge between the existence check and the
    // subscription would otherwise go unnoticed.
    let party = match state.store.get_by_party_id(conn, &party_id).await {
        Ok(party) => Some(party),
        Err(StoreError::PartyNotFound) => None,
        Err(_) => return Err(ApiError::Internal),
    };

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(bridge(party_id, party, pubsub, state.redis.clone(), tx));

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// Forwards channel traffic concerning one party as SSE frames until the
/// client disconnects or a terminal event arrives. Dropping the pub/sub
/// halves on return releases the subscription on every exit path.
async fn bridge(
    party_id: String,
    party: Option<Party>,
    pubsub: redis::aio::PubSub,
    mut cache: ConnectionManager,
    tx: FrameSender,
) {
    let (mut sink, mut stream) = pubsub.split();

    let Some(party) = party else {
        let _ = send(&tx, &StreamEvent::UnqueuedClient).await;
        return;
    };

    let mut admitted = false;
    if party.status == PartyStatus::CheckingIn {
        if let Some(expiration) = party.checkin_expiration {
            if !send(
                &tx,
                &StreamEvent::CanDequeue {
                    checking_in_expiration: expiration,
                },
            )
            .await
            {
                return;
            }
            unsubscribe_admission_channels(&mut sink).await;
            admitted = true;
        }
    } else {
        match cache
            .get::<_, Option<String>>(QUEUE_POSITIONS_CACHE_KEY)
            .await
        {
            Ok(Some(snapshot)) => {
                if let Some(event) = position_update(&party_id, &snapshot) {
                    if !send(&tx, &event).await {
                        return;
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "queue-positions cache unreadable"),
        }
    }

    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, channel, "non-text pub/sub payload");
                continue;
            }
        };

        match channel.as_str() {
            DEQUEUED_CHANNEL if !admitted => {
                match serde_json::from_str::<DequeuedMessage>(&payload) {
                    Ok(message) if message.party_ids.iter().any(|p| p == &party_id) => {
                        if !send(
                            &tx,
                            &StreamEvent::CanDequeue {
                                checking_in_expiration: message.checking_in_expiration,
                            },
                        )
                        .await
                        {
                            break;
                        }
                        unsubscribe_admission_channels(&mut sink).await;
                        admitted = true;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "undecodable dequeued message"),
                }
            }
            QUEUE_POSITIONS_CHANNEL if !admitted => {
                if let Some(event) = position_update(&party_id, &payload) {
                    if !send(&tx, &event).await {
                        break;
                    }
                }
            }
            CHECKING_IN_EXPIRED_CHANNEL => {
                match serde_json::from_str::<CheckinExpiredMessage>(&payload) {
                    Ok(message) if message.party_ids.iter().any(|p| p == &party_id) => {
                        let _ = send(&tx, &StreamEvent::CheckinWindowExpired).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "undecodable check-in-expired message"),
                }
            }
            _ => {}
        }
    }
}

/// After admission the client must never see another admission or position
/// frame; dropping the two subscriptions enforces that at the broker.
async fn unsubscribe_admission_channels(sink: &mut PubSubSink) {
    if let Err(err) = sink.unsubscribe(DEQUEUED_CHANNEL).await {
        warn!(error = %err, "failed to unsubscribe dequeued channel");
    }
    if let Err(err) = sink.unsubscribe(QUEUE_POSITIONS_CHANNEL).await {
        warn!(error = %err, "failed to unsubscribe queue-positions channel");
    }
}

fn position_update(party_id: &str, raw: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<QueuePositionsMessage>(raw) {
        Ok(snapshot) => {
            match snapshot
                .queued_parties
                .iter()
                .find(|p| p.party_id == party_id)
            {
                Some(entry) => Some(StreamEvent::QueuePositionUpdate {
                    position: entry.row,
                }),
                None => {
                    debug!(party_id, "client absent from queue-positions snapshot");
                    None
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "undecodable queue-positions message");
            None
        }
    }
}

async fn send(tx: &FrameSender, event: &StreamEvent) -> bool {
    let frame = match Event::default().json_data(event) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "unserializable stream event");
            return true;
        }
    };
    tx.send(Ok(frame)).await.is_ok()
}
