use super::config::DuplicateTolerances;
use super::registry::PopulationRegistry;
use crate::core::models::structure::{Fingerprint, Status, StructureEntity};
use crate::core::symmetry::{SymmetryClassifier, UNKNOWN_SYMMETRY};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Marks near-identical optimized structures as duplicates of the lower
/// enthalpy member of each matching pair.
pub struct DuplicateReconciler {
    registry: Arc<PopulationRegistry>,
    classifier: Arc<dyn SymmetryClassifier>,
    tolerances: DuplicateTolerances,
}

struct Candidate {
    entity: StructureEntity,
    fingerprint: Fingerprint,
    status: Status,
    tag: (u32, u32),
}

impl DuplicateReconciler {
    pub fn new(
        registry: Arc<PopulationRegistry>,
        classifier: Arc<dyn SymmetryClassifier>,
        tolerances: DuplicateTolerances,
    ) -> Self {
        Self {
            registry,
            classifier,
            tolerances,
        }
    }

    /// Scans every pair of optimized structures once. Returns the number of
    /// structures newly marked as duplicates.
    ///
    /// Pairs are visited in registry order. On equal enthalpy the later
    /// member of the pair is marked. Once a structure is marked it is not
    /// compared against any further candidates.
    pub fn check(&self) -> usize {
        let mut candidates: Vec<Candidate> = self.registry.with_read(|entities| {
            entities
                .iter()
                .map(|entity| {
                    let s = entity.read();
                    Candidate {
                        entity: entity.clone(),
                        fingerprint: s.fingerprint(),
                        status: s.status,
                        tag: (s.generation, s.id),
                    }
                })
                .collect()
        });

        let mut marked = 0;
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                if candidates[i].status != Status::Optimized {
                    break;
                }
                let (first, second) = (&candidates[i], &candidates[j]);
                let Some((h1, h2)) = comparable(first, second) else {
                    continue;
                };
                if !self.tolerances.matches(
                    (h1, h2),
                    (first.fingerprint.volume, second.fingerprint.volume),
                ) {
                    continue;
                }

                let (duplicate, original) = if h1 < h2 { (j, i) } else { (i, j) };
                let original_tag = candidates[original].tag;
                let duplicate_candidate = &mut candidates[duplicate];
                {
                    let mut s = duplicate_candidate.entity.write();
                    // Another writer may have moved it on since the snapshot.
                    if s.status != Status::Optimized {
                        duplicate_candidate.status = s.status;
                        continue;
                    }
                    s.status = Status::Duplicate;
                    s.duplicate_of = Some(original_tag);
                }
                duplicate_candidate.status = Status::Duplicate;
                marked += 1;
                info!(
                    duplicate = %format!("{}x{}", duplicate_candidate.tag.0, duplicate_candidate.tag.1),
                    original = %format!("{}x{}", original_tag.0, original_tag.1),
                    "Structure marked as duplicate."
                );
            }
        }
        debug!(marked, "Duplicate check finished.");
        marked
    }

    /// Recomputes every symmetry class, returns each duplicate to
    /// `Optimized` and checks again. Returns the number marked afterwards.
    pub fn reset_duplicates(&self) -> usize {
        let mut reset = 0;
        for entity in self.registry.snapshot() {
            let mut s = entity.write();
            s.symmetry = self.classifier.classify(&s);
            if s.status == Status::Duplicate {
                s.status = Status::Optimized;
                s.duplicate_of = None;
                reset += 1;
            }
        }
        debug!(reset, "Duplicates reset.");
        self.check()
    }
}

/// Enthalpies of two optimized structures of the same known symmetry class.
fn comparable(first: &Candidate, second: &Candidate) -> Option<(f64, f64)> {
    if second.status != Status::Optimized {
        return None;
    }
    let (a, b) = (&first.fingerprint, &second.fingerprint);
    if a.symmetry == UNKNOWN_SYMMETRY || a.symmetry != b.symmetry {
        return None;
    }
    Some((a.enthalpy?, b.enthalpy?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Check,
    Reset,
}

/// Background thread that runs reconciliation requests in order.
///
/// Requests that pile up while a scan runs are coalesced into one scan; a
/// pending reset subsumes pending checks.
pub struct ReconcileWorker {
    sender: Option<Sender<Request>>,
    handle: Option<JoinHandle<()>>,
}

impl ReconcileWorker {
    pub fn spawn(reconciler: Arc<DuplicateReconciler>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("duplicate-reconciler".into())
            .spawn(move || Self::serve(&reconciler, &receiver));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Cannot start duplicate reconciliation thread.");
                None
            }
        };
        Self {
            sender: Some(sender),
            handle,
        }
    }

    fn serve(reconciler: &DuplicateReconciler, receiver: &Receiver<Request>) {
        while let Ok(first) = receiver.recv() {
            let mut request = first;
            while let Ok(next) = receiver.try_recv() {
                if next == Request::Reset {
                    request = Request::Reset;
                }
            }
            match request {
                Request::Check => reconciler.check(),
                Request::Reset => reconciler.reset_duplicates(),
            };
        }
    }

    pub fn request_check(&self) {
        self.send(Request::Check);
    }

    pub fn request_reset(&self) {
        self.send(Request::Reset);
    }

    fn send(&self, request: Request) {
        if let Some(sender) = &self.sender {
            if sender.send(request).is_err() {
                warn!(?request, "Duplicate reconciliation thread is gone.");
            }
        }
    }

    /// Runs every outstanding request and stops the thread.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Duplicate reconciliation thread panicked.");
            }
        }
    }
}

impl Drop for ReconcileWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
