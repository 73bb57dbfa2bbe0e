pub mod check;
pub mod dedupe;
pub mod resume;
pub mod search;

use std::path::Path;
use std::sync::Arc;
use xtalevo::engine::backend::pair_potential::PairPotentialBackend;
use xtalevo::engine::backend::remote_command::RemoteCommandBackend;
use xtalevo::engine::backend::{BackendConfig, JobBackend};
use xtalevo::workflows::search::SearchSummary;

/// Instantiates the backend a session is configured with. OpenSSH control
/// sockets live in the system temporary directory, where socket paths stay
/// short.
pub fn build_backend(config: &BackendConfig) -> Arc<dyn JobBackend> {
    match config {
        BackendConfig::PairPotential(c) => Arc::new(PairPotentialBackend::new(c.clone())),
        BackendConfig::RemoteCommand(c) => Arc::new(RemoteCommandBackend::with_openssh(
            c.clone(),
            std::env::temp_dir(),
        )),
    }
}

pub fn format_summary(summary: &SearchSummary, session: &Path) -> String {
    let mut text = format!(
        "Session {}: {} structure(s), {} optimized, {} duplicate(s), {} failed, {} waiting.",
        session.display(),
        summary.total,
        summary.optimized,
        summary.duplicates,
        summary.failed,
        summary.waiting
    );
    if let Some((tag, enthalpy)) = &summary.best {
        text.push_str(&format!("\n✓ Best structure {} (H = {:.6} eV)", tag, enthalpy));
    }
    text
}
