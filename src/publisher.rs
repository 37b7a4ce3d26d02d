// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_simpub::{
    ros,
    sensor::Result,
    wire::{Outgoing, WireMessage},
};
use kanal::AsyncReceiver;
use std::collections::HashMap;
use tracing::{error, info_span, instrument, trace};
use zenoh::{
    Session,
    bytes::{Encoding, ZBytes},
    pubsub::Publisher,
    qos::{CongestionControl, Priority},
};

/// Zenoh publisher and frame id for one topic.
pub struct Topic {
    publisher: Publisher<'static>,
    frame_id: String,
}

/// Declare one publisher per `(topic, frame_id)`.
pub async fn declare_topics(
    session: &Session,
    topics: impl IntoIterator<Item = (String, String)>,
) -> zenoh::Result<HashMap<String, Topic>> {
    let mut declared = HashMap::new();
    for (topic, frame_id) in topics {
        let publisher = match session
            .declare_publisher(topic.clone())
            .priority(Priority::DataHigh)
            .congestion_control(CongestionControl::Drop)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to create publisher {}: {:?}", topic, e);
                return Err(e);
            }
        };
        declared.insert(
            topic,
            Topic {
                publisher,
                frame_id,
            },
        );
    }
    Ok(declared)
}

/// Serialize and put every message arriving on `rx` until the channel
/// closes.
pub async fn publish_task(rx: AsyncReceiver<Outgoing>, topics: HashMap<String, Topic>) {
    while let Ok(Outgoing { topic, message }) = rx.recv().await {
        let Some(target) = topics.get(&topic) else {
            error!("no publisher declared for {}", topic);
            continue;
        };

        let (msg, enc) = match encode(message, &target.frame_id) {
            Ok(v) => v,
            Err(e) => {
                error!("Could not encode {} message: {:?}", topic, e);
                continue;
            }
        };

        match target.publisher.put(msg).encoding(enc).await {
            Ok(_) => trace!("{} message sent", topic),
            Err(e) => error!("{} message error: {:?}", topic, e),
        }
    }
}

#[instrument(skip_all)]
fn encode(message: WireMessage, frame_id: &str) -> Result<(ZBytes, Encoding)> {
    let (payload, schema) = info_span!("serialize", schema = message.schema())
        .in_scope(|| ros::serialize(message, frame_id))?;
    Ok((
        ZBytes::from(payload),
        Encoding::APPLICATION_CDR.with_schema(schema),
    ))
}
