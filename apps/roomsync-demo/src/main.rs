mod config;
mod fixtures;
mod logging;

use std::{error::Error, time::Duration};

use roomsync_core::{RuntimeCommand, RuntimeEvent, RuntimeLifecycleState};
use roomsync_runtime::{EventStream, RuntimeHandle, spawn_runtime};
use tokio::time::timeout;
use tracing::info;

use crate::{
    config::DemoConfig,
    fixtures::{DIRECT, FixtureDispatcher, LOUNGE, lounge_update},
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

type DemoResult<T> = Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match DemoConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    let handle = spawn_runtime(
        FixtureDispatcher::new(config.local_user_id.clone()),
        config.runtime_config(),
    );
    let mut events = handle.subscribe();

    let outcome = drive(&handle, &mut events).await;
    handle.shutdown().await;

    if let Err(err) = outcome {
        eprintln!("Demo failed: {err}");
        std::process::exit(1);
    }
}

async fn drive(handle: &RuntimeHandle, events: &mut EventStream) -> DemoResult<()> {
    handle.send(RuntimeCommand::InitialSync).await?;
    wait_for(events, |event| {
        matches!(
            event,
            RuntimeEvent::StateChanged {
                state: RuntimeLifecycleState::Ready
            }
        )
    })
    .await?;

    handle
        .send(RuntimeCommand::ApplySync {
            room_id: LOUNGE.to_owned(),
            update: lounge_update(),
        })
        .await?;

    // The second request pages past the end of the fixture history.
    for _ in 0..2 {
        handle
            .send(RuntimeCommand::RequestOlder {
                room_id: LOUNGE.to_owned(),
            })
            .await?;
        wait_for(events, |event| {
            matches!(event, RuntimeEvent::BackfillFinished { .. })
        })
        .await?;
    }

    handle
        .send(RuntimeCommand::MarkAsRead {
            room_id: LOUNGE.to_owned(),
            event_id: "$l6".to_owned(),
        })
        .await?;
    wait_for(events, |event| {
        matches!(event, RuntimeEvent::ReadReceiptPosted { .. })
    })
    .await?;

    handle
        .send(RuntimeCommand::ResetNotificationCount {
            room_id: DIRECT.to_owned(),
        })
        .await?;
    handle.send(RuntimeCommand::ListRooms).await?;
    let RuntimeEvent::RoomListUpdated { rooms } = wait_for(events, |event| {
        matches!(event, RuntimeEvent::RoomListUpdated { .. })
    })
    .await?
    else {
        return Err("room list event expected".into());
    };

    println!("{}", serde_json::to_string_pretty(&rooms)?);
    Ok(())
}

/// Log runtime events until one matches; job failures abort the demo.
async fn wait_for<F>(events: &mut EventStream, mut predicate: F) -> DemoResult<RuntimeEvent>
where
    F: FnMut(&RuntimeEvent) -> bool,
{
    loop {
        let event = timeout(EVENT_TIMEOUT, events.recv()).await??;
        if predicate(&event) {
            return Ok(event);
        }
        match &event {
            RuntimeEvent::JobFailed { code, message, .. } => {
                return Err(format!("job failed: {code}: {message}").into());
            }
            RuntimeEvent::Room {
                room_id,
                notification,
            } => info!(%room_id, ?notification, "room changed"),
            other => info!(event = ?other, "runtime event"),
        }
    }
}
