//! Bounded ring log of captured child output.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Stdout,
    Stderr,
    /// Launcher-generated lines, currently stream read-error markers.
    System,
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamSource::Stdout => "stdout",
            StreamSource::Stderr => "stderr",
            StreamSource::System => "system",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub seq: u64,
    pub source: StreamSource,
    pub text: String,
}

struct Ring {
    lines: VecDeque<OutputLine>,
    next_seq: u64,
    taps: Vec<mpsc::UnboundedSender<OutputLine>>,
}

/// Cheap to clone; all clones share one ring.
#[derive(Clone)]
pub struct OutputBuffer {
    ring: Arc<Mutex<Ring>>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Arc::new(Mutex::new(Ring {
                lines: VecDeque::with_capacity(capacity.min(4096)),
                next_seq: 0,
                taps: Vec::new(),
            })),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one line, evicting the oldest when full.
    pub fn append(&self, source: StreamSource, text: impl Into<String>) {
        let text = text.into();
        let mut ring = self.lock();
        let line = OutputLine {
            seq: ring.next_seq,
            source,
            text,
        };
        ring.next_seq += 1;
        if !ring.taps.is_empty() {
            ring.taps.retain(|tap| tap.send(line.clone()).is_ok());
        }
        if ring.lines.len() >= self.capacity {
            ring.lines.pop_front();
        }
        ring.lines.push_back(line);
    }

    /// Every line appended from now on, in order and regardless of
    /// eviction. Dropping the receiver detaches it.
    pub fn tap(&self) -> mpsc::UnboundedReceiver<OutputLine> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().taps.push(tx);
        rx
    }

    /// Point-in-time copy of the current lines, oldest first.
    pub fn snapshot(&self) -> Vec<OutputLine> {
        self.lock().lines.iter().cloned().collect()
    }

    /// The last `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> Vec<OutputLine> {
        let ring = self.lock();
        let skip = ring.lines.len().saturating_sub(count);
        ring.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    /// Drop all lines. Sequence numbers keep counting.
    pub fn clear(&self) {
        self.lock().lines.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ring> {
        self.ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Strip ANSI escape sequences and stray control characters from a line.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek() {
                // CSI: ESC [ params final-byte
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: ESC ] ... BEL or ESC \
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\u{7}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {
                    chars.next();
                }
            },
            '\t' => out.push_str("    "),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_keeps_most_recent_in_order() {
        let buf = OutputBuffer::new(500);
        for i in 1..=1000 {
            buf.append(StreamSource::Stdout, format!("line {i}"));
        }
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 500);
        let expected: Vec<String> = (501..=1000).map(|i| format!("line {i}")).collect();
        let got: Vec<String> = snap.into_iter().map(|l| l.text).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn under_capacity_keeps_everything() {
        let buf = OutputBuffer::new(10);
        buf.append(StreamSource::Stdout, "a");
        buf.append(StreamSource::Stderr, "b");
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[1].source, StreamSource::Stderr);
        assert_eq!(snap[0].seq + 1, snap[1].seq);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let buf = OutputBuffer::new(4);
        buf.append(StreamSource::Stdout, "first");
        let snap = buf.snapshot();
        buf.append(StreamSource::Stdout, "second");
        assert_eq!(snap.len(), 1);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn clear_keeps_sequence_monotonic() {
        let buf = OutputBuffer::new(4);
        buf.append(StreamSource::Stdout, "x");
        buf.clear();
        assert_eq!(buf.len(), 0);
        buf.append(StreamSource::Stdout, "y");
        assert_eq!(buf.snapshot()[0].seq, 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buf = OutputBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.append(StreamSource::Stdout, "a");
        buf.append(StreamSource::Stdout, "b");
        assert_eq!(buf.snapshot()[0].text, "b");
    }

    #[test]
    fn tail_returns_newest() {
        let buf = OutputBuffer::new(8);
        for i in 0..5 {
            buf.append(StreamSource::Stdout, i.to_string());
        }
        let tail: Vec<_> = buf.tail(2).into_iter().map(|l| l.text).collect();
        assert_eq!(tail, ["3", "4"]);
        assert_eq!(buf.tail(20).len(), 5);
    }

    #[test]
    fn tap_sees_lines_the_ring_evicted() {
        let buf = OutputBuffer::new(3);
        buf.append(StreamSource::Stdout, "before");
        let mut rx = buf.tap();
        for i in 0..10 {
            buf.append(StreamSource::Stdout, i.to_string());
        }
        assert_eq!(buf.len(), 3);

        let mut got = Vec::new();
        while let Ok(line) = rx.try_recv() {
            got.push(line);
        }
        let texts: Vec<_> = got.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
        assert!(got.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
    }

    #[test]
    fn dropped_tap_is_detached() {
        let buf = OutputBuffer::new(3);
        drop(buf.tap());
        buf.append(StreamSource::Stdout, "a");
        assert!(buf.lock().taps.is_empty());
    }

    #[test]
    fn concurrent_writer_and_reader() {
        let buf = OutputBuffer::new(100);
        let writer = {
            let buf = buf.clone();
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    buf.append(StreamSource::Stdout, i.to_string());
                }
            })
        };
        for _ in 0..200 {
            let snap = buf.snapshot();
            assert!(snap.len() <= 100);
            assert!(snap.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
        }
        writer.join().unwrap();
        assert_eq!(buf.snapshot().last().unwrap().text, "9999");
    }

    #[test]
    fn sanitize_strips_escapes() {
        assert_eq!(sanitize("\u{1b}[1;32mOK\u{1b}[0m done"), "OK done");
        assert_eq!(sanitize("\u{1b}]0;title\u{7}text"), "text");
        assert_eq!(sanitize("a\tb\r"), "a    b");
    }
}
