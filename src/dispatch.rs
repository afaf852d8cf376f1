use std::{
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread,
};

use anyhow::Context;

use crate::{
    poller::PollerRefresher,
    remote::{ApiError, PlaybackApi},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Seek(u64),
    Play,
    Pause,
    Next,
    Previous,
}

impl RemoteCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::Seek(_) => "Seek",
            RemoteCommand::Play => "Play",
            RemoteCommand::Pause => "Pause",
            RemoteCommand::Next => "Next",
            RemoteCommand::Previous => "Previous",
        }
    }

    pub fn execute(&self, api: &dyn PlaybackApi) -> Result<(), ApiError> {
        match *self {
            RemoteCommand::Seek(position_ms) => api.seek(position_ms),
            RemoteCommand::Play => api.play(),
            RemoteCommand::Pause => api.pause(),
            RemoteCommand::Next => api.next(),
            RemoteCommand::Previous => api.previous(),
        }
    }
}

/// Where the engine sends player commands. The frame loop never waits on
/// the outcome.
pub trait CommandSink {
    fn send(&mut self, command: RemoteCommand);
}

/// Runs commands on a worker thread in the order they were issued.
pub struct CommandDispatcher {
    tx: Option<Sender<RemoteCommand>>,
}

impl CommandDispatcher {
    pub fn spawn(
        api: Arc<dyn PlaybackApi>,
        refresher: Option<PollerRefresher>,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<RemoteCommand>();

        thread::Builder::new()
            .name("command-dispatch".to_string())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command.execute(api.as_ref()) {
                        Ok(()) => {
                            log::debug!("{} sent", command.name());
                            if let Some(refresher) = refresher.as_ref() {
                                refresher.refresh();
                            }
                        }
                        Err(err) => log::warn!("{} failed: {err}", command.name()),
                    }
                }
            })
            .context("Failed to start the command dispatch thread")?;

        Ok(Self { tx: Some(tx) })
    }
}

impl CommandSink for CommandDispatcher {
    fn send(&mut self, command: RemoteCommand) {
        let Some(tx) = self.tx.as_ref() else {
            log::warn!("{} dropped: dispatcher is gone", command.name());
            return;
        };
        if tx.send(command).is_err() {
            log::warn!("{} dropped: dispatcher is gone", command.name());
            self.tx = None;
        }
    }
}

/// Collects commands instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub sent: Vec<RemoteCommand>,
}

impl CommandSink for RecordingSink {
    fn send(&mut self, command: RemoteCommand) {
        self.sent.push(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RawPlayback;
    use std::{
        sync::Mutex,
        time::{Duration, Instant},
    };

    #[derive(Default)]
    struct LoggingApi {
        calls: Mutex<Vec<String>>,
    }

    impl PlaybackApi for LoggingApi {
        fn get_snapshot(&self) -> Result<Option<RawPlayback>, ApiError> {
            Ok(None)
        }
        fn seek(&self, position_ms: u64) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(format!("seek {position_ms}"));
            Err(ApiError::Rejected { command: "Seek" })
        }
        fn play(&self) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push("play".to_string());
            Ok(())
        }
        fn pause(&self) -> Result<(), ApiError> {
            Ok(())
        }
        fn next(&self) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push("next".to_string());
            Ok(())
        }
        fn previous(&self) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[test]
    fn commands_run_in_order_and_failures_do_not_stop_the_worker() {
        let api = Arc::new(LoggingApi::default());
        let mut dispatcher = CommandDispatcher::spawn(api.clone(), None).unwrap();
        dispatcher.send(RemoteCommand::Seek(1500));
        dispatcher.send(RemoteCommand::Play);
        dispatcher.send(RemoteCommand::Next);

        let deadline = Instant::now() + Duration::from_secs(5);
        while api.calls.lock().unwrap().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            *api.calls.lock().unwrap(),
            vec!["seek 1500".to_string(), "play".to_string(), "next".to_string()]
        );
    }
}
