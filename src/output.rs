use tracing::info;

/// Append-only list of human-readable result lines.
pub trait OutputSink: Send {
    fn push(&mut self, line: String);
}

/// Output sink keeping every line in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputLog {
    lines: Vec<String>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl OutputSink for OutputLog {
    fn push(&mut self, line: String) {
        info!(target: "output", "{}", line);
        self.lines.push(line);
    }
}
