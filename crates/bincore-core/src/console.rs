//! Console output
//!
//! The engine owns one shared console stream. Shared and Snapshot contexts
//! write to it directly; Isolated contexts accumulate privately and their
//! text is appended to the stream as one block at commit, so concurrent
//! Isolated tasks never interleave output.

use std::sync::Arc;

use parking_lot::Mutex;

/// The engine's shared console stream
#[derive(Debug, Default)]
pub struct Console {
    buffer: Mutex<String>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, text: &str) {
        self.buffer.lock().push_str(text);
    }

    /// Take everything written so far
    pub fn drain(&self) -> String {
        std::mem::take(&mut *self.buffer.lock())
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }
}

/// Where a context's output goes
#[derive(Debug)]
pub enum ConsoleBuffer {
    Shared(Arc<Console>),
    Private(String),
}

impl ConsoleBuffer {
    pub fn write(&mut self, text: &str) {
        match self {
            ConsoleBuffer::Shared(console) => console.write(text),
            ConsoleBuffer::Private(acc) => acc.push_str(text),
        }
    }

    /// Take the private accumulation; empty for the shared stream
    pub fn take_private(&mut self) -> String {
        match self {
            ConsoleBuffer::Shared(_) => String::new(),
            ConsoleBuffer::Private(acc) => std::mem::take(acc),
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, ConsoleBuffer::Private(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_buffer_writes_through() {
        let console = Arc::new(Console::new());
        let mut buffer = ConsoleBuffer::Shared(console.clone());
        buffer.write("hello\n");
        assert_eq!(console.contents(), "hello\n");
        assert_eq!(buffer.take_private(), "");
    }

    #[test]
    fn test_private_buffer_accumulates() {
        let console = Arc::new(Console::new());
        let mut buffer = ConsoleBuffer::Private(String::new());
        buffer.write("a");
        buffer.write("b");
        assert_eq!(console.contents(), "");
        assert_eq!(buffer.take_private(), "ab");
        assert_eq!(buffer.take_private(), "");
    }

    #[test]
    fn test_drain_empties_stream() {
        let console = Console::new();
        console.write("x");
        assert_eq!(console.drain(), "x");
        assert_eq!(console.drain(), "");
    }
}
