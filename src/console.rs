//! Operator console
//!
//! Lines typed on stdin are parsed into engine events and injected into the
//! loopback engine. Input is read on a dedicated OS thread and handed over a
//! channel, so the console task can stop on shutdown while a read is still
//! blocked and the process is free to exit.

use crate::connection::{parse_console_line, LoopbackEngine};
use crate::runtime::Shutdown;
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Lines buffered between the reader thread and the console task
const LINE_BUFFER: usize = 16;

/// Read `reader` line by line on its own thread
///
/// The thread ends at end of input, on a read error, or once the receiver
/// is dropped and the next line arrives.
pub fn spawn_line_reader<R>(reader: R) -> std::io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);

    thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("[CONSOLE] Failed to read input: {}", e);
                        break;
                    }
                }
            }
            debug!("[CONSOLE] Input reader finished");
        })?;

    Ok(rx)
}

/// Inject operator input as inbound engine events until shutdown
pub async fn run(
    engine: Arc<LoopbackEngine>,
    mut lines: mpsc::Receiver<String>,
    shutdown: Shutdown,
) {
    let cancel = shutdown.token();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            debug!("[CONSOLE] End of input");
            break;
        };

        let event = match parse_console_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("[CONSOLE] {}", e);
                continue;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = engine.inject(event) => {
                if let Err(e) = result {
                    warn!("[CONSOLE] Event not delivered: {}", e);
                }
            }
        }
    }
    debug!("[CONSOLE] Stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures;
    use crate::connection::{
        CommandEvent, ConnectivityEngine, EngineEvent, EngineSession, LoopbackConfig,
    };
    use std::io::Cursor;
    use std::time::Duration;
    use stdevice_shared::{CapabilityKey, TypedValue};
    use tokio::time::timeout;

    fn engine() -> Arc<LoopbackEngine> {
        let config = LoopbackConfig {
            status_step: Duration::from_millis(1),
            ..Default::default()
        };
        Arc::new(
            LoopbackEngine::with_config(&fixtures::identity(), &fixtures::onboarding(), config)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_console_stops_on_shutdown_with_input_open() {
        let shutdown = Shutdown::new();
        // The sender stays alive: nothing is ever typed and input never closes
        let (_input, lines) = mpsc::channel(1);
        let task = tokio::spawn(run(engine(), lines, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        shutdown.trigger();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("console ignored shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_console_stops_while_delivery_blocked() {
        let engine = engine();
        // A full session queue that nobody drains
        let (events, _held) = mpsc::channel(1);
        engine
            .start(EngineSession {
                events,
                capabilities: Vec::new(),
                timeout: Duration::from_secs(1),
            })
            .await
            .unwrap();

        let shutdown = Shutdown::new();
        let (input, lines) = mpsc::channel(4);
        let task = tokio::spawn(run(engine, lines, shutdown.clone()));
        input.send("switch on".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown.trigger();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("console stuck delivering an event")
            .unwrap();
    }

    #[tokio::test]
    async fn test_console_injects_parsed_lines() {
        let engine = engine();
        let (events, mut rx) = mpsc::channel(16);
        engine
            .start(EngineSession {
                events,
                capabilities: Vec::new(),
                timeout: Duration::from_secs(1),
            })
            .await
            .unwrap();

        let input = Cursor::new("# comment\n\nbogus\nswitch on\nlight/switchLevel setLevel 40\n");
        let lines = spawn_line_reader(input).unwrap();

        // Input ends on its own, so the console finishes without a shutdown
        timeout(Duration::from_secs(1), run(engine, lines, Shutdown::new()))
            .await
            .expect("console did not finish at end of input");

        let mut commands = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::Command(command) = event {
                commands.push(command);
            }
        }
        assert_eq!(
            commands,
            vec![
                CommandEvent::new(CapabilityKey::new("main", "switch"), "on"),
                CommandEvent::new(CapabilityKey::new("light", "switchLevel"), "setLevel")
                    .with_args(vec![TypedValue::Integer(40)]),
            ]
        );
    }

    #[tokio::test]
    async fn test_line_reader_forwards_until_end_of_input() {
        let mut lines = spawn_line_reader(Cursor::new("first\nsecond")).unwrap();

        assert_eq!(lines.recv().await.as_deref(), Some("first"));
        assert_eq!(lines.recv().await.as_deref(), Some("second"));
        assert_eq!(lines.recv().await, None);
    }
}
