use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::debug;

use crate::Result;
use crate::sink::{NoHooks, Sink, SinkHooks, StagingArea};

/// One net effect a commit would have on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunEvent {
    Create {
        path: String,
        absolute_path: PathBuf,
        content: Vec<u8>,
    },
    Update {
        path: String,
        absolute_path: PathBuf,
        content: Vec<u8>,
    },
    Delete {
        path: String,
        absolute_path: PathBuf,
    },
    Rename {
        path: String,
        absolute_path: PathBuf,
        to: String,
        absolute_to: PathBuf,
    },
}

impl DryRunEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DryRunEvent::Create { .. } => "create",
            DryRunEvent::Update { .. } => "update",
            DryRunEvent::Delete { .. } => "delete",
            DryRunEvent::Rename { .. } => "rename",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            DryRunEvent::Create { path, .. }
            | DryRunEvent::Update { path, .. }
            | DryRunEvent::Delete { path, .. }
            | DryRunEvent::Rename { path, .. } => path,
        }
    }

    pub fn content(&self) -> Option<&[u8]> {
        match self {
            DryRunEvent::Create { content, .. } | DryRunEvent::Update { content, .. } => {
                Some(content)
            }
            _ => None,
        }
    }
}

/// Sink that reports what a commit would do instead of doing it.
///
/// Events are sent to the receiver returned by [`DryRunSink::take_reporter`]; the stream is
/// closed once the commit ends. Nothing is checked against real storage, so validation only
/// sees the actions of the committed log.
pub struct DryRunSink {
    root: PathBuf,
    staging: StagingArea,
    hooks: Box<dyn SinkHooks>,
    sender: Option<Sender<DryRunEvent>>,
    receiver: Option<Receiver<DryRunEvent>>,
}

impl DryRunSink {
    /// `root` is used to resolve the absolute paths of the reported events.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            root: root.as_ref().to_path_buf(),
            staging: StagingArea::default(),
            hooks: Box::new(NoHooks),
            sender: Some(sender),
            receiver: Some(receiver),
        }
    }

    pub fn with_hooks<H: SinkHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Receiving end of the event stream. Can be taken once.
    pub fn take_reporter(&mut self) -> Option<Receiver<DryRunEvent>> {
        self.receiver.take()
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn emit(&self, event: DryRunEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                debug!("dry run reporter is gone");
            }
        }
    }
}

impl Sink for DryRunSink {
    fn staging(&self) -> &StagingArea {
        &self.staging
    }

    fn staging_mut(&mut self) -> &mut StagingArea {
        &mut self.staging
    }

    fn hooks(&mut self) -> &mut dyn SinkHooks {
        self.hooks.as_mut()
    }

    fn done(&mut self) -> Result<()> {
        let mut events = Vec::new();
        for path in self.staging.deletions() {
            events.push(DryRunEvent::Delete {
                path: path.to_string(),
                absolute_path: self.absolute(path),
            });
        }
        for (path, content) in self.staging.creations() {
            events.push(DryRunEvent::Create {
                path: path.to_string(),
                absolute_path: self.absolute(path),
                content: content.bytes()?.to_vec(),
            });
        }
        for (path, content) in self.staging.updates() {
            events.push(DryRunEvent::Update {
                path: path.to_string(),
                absolute_path: self.absolute(path),
                content: content.bytes()?.to_vec(),
            });
        }
        for (from, to) in self.staging.renames() {
            events.push(DryRunEvent::Rename {
                path: from.to_string(),
                absolute_path: self.absolute(from),
                to: to.to_string(),
                absolute_to: self.absolute(to),
            });
        }
        debug!(events = events.len(), "dry run report");
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.sender = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::VirtualTree;
    use crate::{Error, Tree};

    fn setup_test_tree() -> VirtualTree {
        let mut tree = VirtualTree::new();
        tree.create("/hello", "world").unwrap();
        tree.create("/sub/directory/file2", "file two").unwrap();
        tree.create("/sub/file1", "file one!").unwrap();
        tree
    }

    fn run(tree: &VirtualTree) -> (Result<()>, Vec<DryRunEvent>) {
        let mut sink = DryRunSink::new("/project");
        let reporter = sink.take_reporter().unwrap();
        let result = sink.commit(tree, false);
        (result, reporter.iter().collect())
    }

    #[test]
    fn test_three_creates() {
        let tree = setup_test_tree();
        let (result, events) = run(&tree);
        result.unwrap();

        assert_eq!(events.len(), 3);
        for event in &events {
            assert_eq!(event.kind(), "create");
            let expected = tree.read(event.path()).unwrap().unwrap();
            assert_eq!(event.content().unwrap().len(), expected.len());
        }
        assert!(matches!(
            &events[0],
            DryRunEvent::Create { absolute_path, .. } if absolute_path == Path::new("/project/hello")
        ));
    }

    #[test]
    fn test_every_event_kind() {
        let mut tree = VirtualTree::new();
        tree.track_existing("/keep", "k").unwrap();
        tree.track_existing("/old", "o").unwrap();
        tree.track_existing("/trash", "t").unwrap();
        tree.overwrite("/keep", "kept").unwrap();
        tree.rename("/old", "/new").unwrap();
        tree.delete("/trash").unwrap();
        tree.create("/fresh", "f").unwrap();

        let (result, events) = run(&tree);
        result.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| (e.kind(), e.path())).collect();
        assert_eq!(
            kinds,
            vec![
                ("delete", "/trash"),
                ("create", "/fresh"),
                ("update", "/keep"),
                ("rename", "/old"),
            ]
        );
        assert!(matches!(
            &events[3],
            DryRunEvent::Rename { to, absolute_to, .. }
                if to == "/new" && absolute_to == Path::new("/project/new")
        ));
    }

    #[test]
    fn test_failed_validation_reports_nothing() {
        struct ReadOnly;
        impl SinkHooks for ReadOnly {
            fn validate_action(&mut self, action: &crate::vfs::Action) -> anyhow::Result<()> {
                anyhow::bail!("{} would be modified", action.path())
            }
        }

        let mut sink = DryRunSink::new("/project").with_hooks(ReadOnly);
        let reporter = sink.take_reporter().unwrap();
        let result = sink.commit(&setup_test_tree(), false);
        match result {
            Err(Error::Validation(failures)) => assert_eq!(failures.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(reporter.iter().count(), 0);
    }

    #[test]
    fn test_stream_closes_without_reader() {
        let mut sink = DryRunSink::new("/project");
        sink.commit(&setup_test_tree(), false).unwrap();
        let reporter = sink.take_reporter().unwrap();
        assert_eq!(reporter.iter().count(), 3);
    }
}
