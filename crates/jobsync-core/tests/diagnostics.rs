//! Log-and-continue paths leave a readable trail in the log output.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use jobsync_core::reconcile::compute_spec_jobs;
use jobsync_core::{discover_templates, Branch, BranchPolicy};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture<T>(f: impl FnOnce() -> T) -> (T, String) {
    let sink = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .with_ansi(false)
        .with_max_level(Level::DEBUG)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, sink.text())
}

#[test]
fn test_deep_branch_is_logged() {
    let policy = BranchPolicy::parse("feature/");
    let branches = [Branch::new("feature/issue/99"), Branch::new("feature/2")];

    let (spec, log) = capture(|| compute_spec_jobs("proj", "lib", &branches, &policy));

    assert_eq!(spec.len(), 2);
    assert!(log.contains("feature/issue/99"), "{log}");
    assert!(log.contains("more than two segments"), "{log}");
    assert!(!log.contains("branch=feature/2"), "{log}");
}

#[test]
fn test_misplaced_templates_are_logged() {
    let root = tempfile::tempdir().unwrap();
    let deep = root.path().join("PROJ/lib/extra");
    std::fs::create_dir_all(&deep).unwrap();
    std::fs::write(deep.join("continuous-template.xml"), "<project/>").unwrap();
    let orphan = root.path().join("PROJ/other");
    std::fs::create_dir_all(&orphan).unwrap();
    std::fs::write(orphan.join("release-template.xml"), "<project/>").unwrap();

    let (templates, log) = capture(|| discover_templates(root.path()).unwrap());

    assert!(templates.is_empty());
    assert!(log.contains("skipping template"), "{log}");
    assert!(log.contains("no continuous-template.xml"), "{log}");
}

#[test]
fn test_colliding_branches_are_logged() {
    let policy = BranchPolicy::parse("feature/");
    let branches = [Branch::new("feature/a/b"), Branch::new("feature/a-b")];

    let (spec, log) = capture(|| compute_spec_jobs("proj", "lib", &branches, &policy));

    assert_eq!(spec.len(), 1);
    assert!(log.contains("same job name"), "{log}");
    assert!(log.contains("feature/a-b"), "{log}");
    assert!(log.contains("feature/a/b"), "{log}");
}
