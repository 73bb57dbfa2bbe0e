use indicatif::MultiProgress;
use std::io::{self, BufRead, Write};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use xtalevo::engine::decision::{DecisionProvider, FixedDecisions};

/// Asks `question` on `output` until `input` yields a yes/no answer. End of
/// input counts as "no".
pub fn ask_boolean(input: &mut dyn BufRead, output: &mut dyn Write, question: &str) -> bool {
    loop {
        let Some(answer) = ask_line(input, output, &format!("{question} [y/N] ")) else {
            return false;
        };
        match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => return true,
            "" | "n" | "no" => return false,
            _ => {
                let _ = writeln!(output, "Please answer 'y' or 'n'.");
            }
        }
    }
}

/// Reads a credential. An empty answer or end of input declines.
pub fn ask_secret(input: &mut dyn BufRead, output: &mut dyn Write, prompt: &str) -> Option<String> {
    let answer = ask_line(input, output, &format!("{prompt} (empty to cancel): "))?;
    (!answer.is_empty()).then_some(answer)
}

fn ask_line(input: &mut dyn BufRead, output: &mut dyn Write, prompt: &str) -> Option<String> {
    let _ = write!(output, "{prompt}");
    let _ = output.flush();
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim().to_string()),
        Err(e) => {
            warn!("Failed to read answer from the terminal: {}", e);
            None
        }
    }
}

/// Answers decision points on the controlling terminal, pausing the
/// progress display while a question is open.
pub struct TerminalDecisions {
    mp: Option<Arc<MultiProgress>>,
    lock: Mutex<()>,
}

impl TerminalDecisions {
    pub fn new(mp: Option<Arc<MultiProgress>>) -> Self {
        Self {
            mp,
            lock: Mutex::new(()),
        }
    }

    fn with_terminal<T>(&self, ask: impl FnOnce(&mut dyn BufRead, &mut dyn Write) -> T) -> T {
        self.exclusive(|| {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut output = io::stderr();
            ask(&mut input, &mut output)
        })
    }

    /// Runs `run` with the display suspended, one caller at a time.
    fn exclusive<T>(&self, run: impl FnOnce() -> T) -> T {
        let _guard = self.lock.lock();
        match &self.mp {
            Some(mp) => mp.suspend(run),
            None => run(),
        }
    }
}

impl DecisionProvider for TerminalDecisions {
    fn need_boolean(&self, question: &str) -> bool {
        let answer = self.with_terminal(|input, output| ask_boolean(input, output, question));
        debug!(question, answer, "Decision answered.");
        answer
    }

    fn need_password(&self, prompt: &str) -> Option<String> {
        self.with_terminal(|input, output| ask_secret(input, output, prompt))
    }
}

/// Picks the decision policy from the global flags.
pub fn decisions_for(
    yes: bool,
    non_interactive: bool,
    mp: Option<Arc<MultiProgress>>,
) -> Box<dyn DecisionProvider> {
    if yes {
        Box::new(FixedDecisions::accept_all())
    } else if non_interactive {
        Box::new(FixedDecisions::decline_all())
    } else {
        Box::new(TerminalDecisions::new(mp))
    }
}
