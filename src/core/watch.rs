//! Source folder observer
//!
//! The notify backend runs its own thread; it only forwards events over a
//! channel. The thread that calls [`observe`] is the sole caller of
//! [`Dispatcher::handle`], so files are dispatched one at a time in delivery
//! order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::dispatch::{DispatchOutcome, Dispatcher};
use super::{EventKind, FileEvent};
use crate::error::{ParcelError, Result};
use crate::transport::Connector;

/// Default pause between stop-flag checks when no events arrive
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(1000);

/// Non-recursive watcher on one folder
pub struct SourceWatcher {
    #[allow(dead_code)]
    watcher: Box<dyn Watcher>,
    events: Receiver<FileEvent>,
    path: PathBuf,
}

impl SourceWatcher {
    pub fn new(path: &Path) -> Result<Self> {
        let (tx, rx) = unbounded();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for file_event in translate(&event) {
                        // receiver gone means the loop is shutting down
                        let _ = tx.send(file_event);
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            }
        })
        .map_err(|e| ParcelError::Watch(format!("Failed to create filesystem watcher: {}", e)))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ParcelError::Watch(format!("Failed to watch {}: {}", path.display(), e))
            })?;

        Ok(Self {
            watcher: Box::new(watcher),
            events: rx,
            path: path.to_path_buf(),
        })
    }

    pub fn events(&self) -> Receiver<FileEvent> {
        self.events.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Map a notify event to the create/modify events the dispatcher handles
fn translate(event: &Event) -> Vec<FileEvent> {
    let kind = match event.kind {
        notify::EventKind::Create(_) => EventKind::Created,
        // moved into the folder
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)) => EventKind::Created,
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)) => return Vec::new(),
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            return event
                .paths
                .last()
                .map(|p| vec![FileEvent::new(EventKind::Created, p)])
                .unwrap_or_default();
        }
        notify::EventKind::Modify(_) => EventKind::Modified,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|p| FileEvent::new(kind, p))
        .collect()
}

/// Dispatch events until `stop` is set
///
/// Checks the flag at least once per `heartbeat`. Returns the number of
/// events received.
pub fn wait_for_events<F>(
    events: &Receiver<FileEvent>,
    stop: &AtomicBool,
    heartbeat: Duration,
    mut on_event: F,
) -> Result<usize>
where
    F: FnMut(&FileEvent) -> Result<()>,
{
    let mut received = 0;
    while !stop.load(Ordering::SeqCst) {
        match events.recv_timeout(heartbeat) {
            Ok(event) => {
                received += 1;
                on_event(&event)?;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ParcelError::Watch("filesystem watcher stopped".to_string()));
            }
        }
    }
    Ok(received)
}

fn dispatch<C: Connector>(dispatcher: &mut Dispatcher<C>, event: &FileEvent) -> Result<()> {
    debug!("{:?}: {}", event.kind, event.path.display());
    match dispatcher.handle(event)? {
        DispatchOutcome::Sent { record_id, .. } => {
            debug!("{} recorded as #{}", event.path.display(), record_id)
        }
        DispatchOutcome::Skipped => info!("Skipped {}", event.path.display()),
        _ => {}
    }
    Ok(())
}

/// Start watching, catch up on waiting files, then dispatch events until `stop`
///
/// The watcher is created before the startup scan so a file dropped while the
/// scan runs still produces an event. Files the scan already sent come back
/// as `Missing` when their queued events are handled.
pub fn watch_and_dispatch<C: Connector>(
    dispatcher: &mut Dispatcher<C>,
    touch_existing: bool,
    stop: &AtomicBool,
    heartbeat: Duration,
) -> Result<()> {
    let watcher = SourceWatcher::new(&dispatcher.settings().source_dir)?;
    if touch_existing {
        dispatcher.touch_existing()?;
    }
    dispatcher.process_existing_files()?;
    observe(dispatcher, watcher, stop, heartbeat)
}

/// Dispatch events from an already started `watcher` until `stop` is set
///
/// On stop the watcher is dropped and events it already delivered are
/// dispatched before returning. A hard dispatch failure ends the loop with
/// that error.
pub fn observe<C: Connector>(
    dispatcher: &mut Dispatcher<C>,
    watcher: SourceWatcher,
    stop: &AtomicBool,
    heartbeat: Duration,
) -> Result<()> {
    let source = watcher.path().to_path_buf();
    let events = watcher.events();
    info!("Watching {} (Ctrl-C to stop)", source.display());

    let received = wait_for_events(&events, stop, heartbeat, |event| {
        dispatch(dispatcher, event)
    })?;

    drop(watcher);
    let mut drained = 0;
    for event in events.try_iter() {
        dispatch(dispatcher, &event)?;
        drained += 1;
    }
    info!(
        "Stopped watching {}, {} event(s) handled",
        source.display(),
        received + drained
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::sync::Arc;
    use std::thread;

    fn event(kind: notify::EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_translate() {
        let created = translate(&event(notify::EventKind::Create(CreateKind::File), &["/in/a.pdf"]));
        assert_eq!(created, vec![FileEvent::new(EventKind::Created, "/in/a.pdf")]);

        let modified = translate(&event(
            notify::EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/in/a.pdf"],
        ));
        assert_eq!(modified[0].kind, EventKind::Modified);

        let renamed = translate(&event(
            notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/in/a.tmp", "/in/a.pdf"],
        ));
        assert_eq!(renamed, vec![FileEvent::new(EventKind::Created, "/in/a.pdf")]);

        assert!(translate(&event(notify::EventKind::Remove(RemoveKind::File), &["/in/a.pdf"])).is_empty());
    }

    #[test]
    fn test_wait_for_events_stops_on_flag() {
        let (tx, rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        tx.send(FileEvent::new(EventKind::Created, "/in/a.pdf")).unwrap();
        tx.send(FileEvent::new(EventKind::Modified, "/in/a.pdf")).unwrap();

        let flag = stop.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
            tx
        });

        let mut seen = Vec::new();
        let received = wait_for_events(&rx, &stop, Duration::from_millis(10), |e| {
            seen.push(e.kind);
            Ok(())
        })
        .unwrap();

        let _tx = stopper.join().unwrap();
        assert_eq!(received, 2);
        assert_eq!(seen, vec![EventKind::Created, EventKind::Modified]);
    }

    #[test]
    fn test_wait_for_events_propagates_failure() {
        let (tx, rx) = unbounded();
        tx.send(FileEvent::new(EventKind::Created, "/in/a.pdf")).unwrap();
        let stop = AtomicBool::new(false);

        let result = wait_for_events(&rx, &stop, Duration::from_millis(10), |_| {
            Err(ParcelError::Other("boom".to_string()))
        });
        assert!(matches!(result, Err(ParcelError::Other(_))));
    }

    #[test]
    fn test_disconnected_watcher_is_an_error() {
        let (tx, rx) = unbounded::<FileEvent>();
        drop(tx);
        let stop = AtomicBool::new(false);
        let result = wait_for_events(&rx, &stop, Duration::from_millis(10), |_| Ok(()));
        assert!(matches!(result, Err(ParcelError::Watch(_))));
    }
}
