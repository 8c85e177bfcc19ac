//! Readiness detection for process-based backends.
//!
//! Model servers do not emit a structured "ready" event, so readiness is
//! inferred from their own output lines. This is a heuristic: a server that
//! changes its startup banner, or prints the word "error" in a harmless
//! warning, will be misclassified. Probes are pluggable per backend type.

use regex::{Regex, RegexSet};

/// Outcome of inspecting one output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessSignal {
    Pending,
    Ready,
    Fatal(String),
}

/// Inspects a starting instance's output lines for a readiness marker.
pub trait ReadinessProbe: Send + Sync {
    fn inspect(&self, line: &str) -> ReadinessSignal;
}

/// Regex-driven probe. Ready markers take precedence over fatal markers on
/// the same line.
#[derive(Debug, Clone)]
pub struct MarkerProbe {
    ready: RegexSet,
    fatal: Option<Regex>,
}

impl MarkerProbe {
    pub fn new<I, S>(ready_patterns: I, fatal_pattern: Option<&str>) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            ready: RegexSet::new(ready_patterns)?,
            fatal: fatal_pattern.map(Regex::new).transpose()?,
        })
    }

    /// Markers printed by the vLLM OpenAI-compatible server (uvicorn).
    pub fn vllm() -> Self {
        // Literal patterns; construction cannot fail.
        Self {
            ready: RegexSet::new([r"Application startup complete", r"Uvicorn running"])
                .unwrap_or_else(|_| RegexSet::empty()),
            fatal: Regex::new(r"(?i)error").ok(),
        }
    }
}

impl ReadinessProbe for MarkerProbe {
    fn inspect(&self, line: &str) -> ReadinessSignal {
        if self.ready.is_match(line) {
            return ReadinessSignal::Ready;
        }
        match &self.fatal {
            Some(re) if re.is_match(line) => ReadinessSignal::Fatal(line.trim().to_string()),
            _ => ReadinessSignal::Pending,
        }
    }
}
