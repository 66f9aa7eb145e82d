//! Console mirroring for streamed output.

use std::io::Write;

/// Mirrors streamed chunks to a console-like sink, one complete line at a
/// time with the terminator stripped. Bytes of an unfinished line are held
/// back until the terminator arrives or the stream ends. Mirroring is a
/// display side effect only and never touches the session buffer.
pub(crate) struct EchoSink {
    out: Box<dyn Write + Send>,
    pending: Vec<u8>,
}

impl EchoSink {
    pub(crate) fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub(crate) fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            pending: Vec::new(),
        }
    }

    /// Feeds a raw chunk, writing any lines it completes.
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.write_line(&line);
        }
    }

    /// Writes whatever is left of an unfinished final line.
    pub(crate) fn finish(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.write_line(&line);
        }
        let _ = self.out.flush();
    }

    fn write_line(&mut self, line: &[u8]) {
        // A failing sink must not take the stream down with it.
        let _ = self.out.write_all(trim_line_end(line));
        let _ = self.out.write_all(b"\n");
    }
}

/// Strips a trailing `\n` and an optional `\r` before it.
pub(crate) fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sink() -> (EchoSink, SharedBuf) {
        let buf = SharedBuf::default();
        (EchoSink::new(Box::new(buf.clone())), buf)
    }

    #[test]
    fn complete_lines_pass_through() {
        let (mut echo, buf) = sink();
        echo.push(b"one\ntwo\n");
        assert_eq!(buf.contents(), "one\ntwo\n");
    }

    #[test]
    fn partial_line_held_until_completed() {
        let (mut echo, buf) = sink();
        echo.push(b"hel");
        assert_eq!(buf.contents(), "");
        echo.push(b"lo\n");
        assert_eq!(buf.contents(), "hello\n");
    }

    #[test]
    fn line_split_across_chunks() {
        let (mut echo, buf) = sink();
        echo.push(b"a\nb");
        echo.push(b"c\nd");
        echo.finish();
        assert_eq!(buf.contents(), "a\nbc\nd\n");
    }

    #[test]
    fn finish_flushes_trailing_partial_line() {
        let (mut echo, buf) = sink();
        echo.push(b"no newline");
        echo.finish();
        assert_eq!(buf.contents(), "no newline\n");
    }

    #[test]
    fn finish_without_pending_writes_nothing() {
        let (mut echo, buf) = sink();
        echo.push(b"done\n");
        echo.finish();
        assert_eq!(buf.contents(), "done\n");
    }

    #[test]
    fn carriage_returns_are_stripped() {
        let (mut echo, buf) = sink();
        echo.push(b"windows line\r\n");
        assert_eq!(buf.contents(), "windows line\n");
    }

    #[test]
    fn trim_line_end_variants() {
        assert_eq!(trim_line_end(b"x\n"), b"x");
        assert_eq!(trim_line_end(b"x\r\n"), b"x");
        assert_eq!(trim_line_end(b"x"), b"x");
        assert_eq!(trim_line_end(b""), b"");
    }
}
