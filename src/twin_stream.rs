//! The twin stream: a coupled input reader and output writer sharing one
//! heap window that slides over the input file.
//!
//! The scanner consumes bytes from the window; the parser then commits the
//! consumed region with one of the three primitive operations: pass it
//! through to the output, discard it, or insert fresh bytes that never
//! came from the input.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};

use log::warn;

use crate::error::Result;
use crate::scanner::ScanSource;

/// How the stream currently behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMethod {
    /// Forward streaming with write-out. The production mode.
    ReadWrite,
    /// Jump around the input; used while collecting cross reference
    /// tables.
    RandomAccess,
    /// One-shot backwards reading from the end of the file; used to locate
    /// the trailing `startxref`.
    Reversed,
}

const CHUNK: usize = 4096;

pub struct TwinStream {
    method: StreamMethod,
    input: File,
    output: BufWriter<File>,
    input_len: u64,
    /// Absolute input offset of `heap[0]`.
    offsi: u64,
    /// Absolute output offset (bytes written so far).
    offso: u64,
    heap: Vec<u8>,
    /// Bytes at the start of the heap already committed to the output (or
    /// discarded); the window starts here.
    cursor: usize,
}

impl TwinStream {
    pub fn new(input: File, output: File) -> Result<TwinStream> {
        let input_len = input.metadata()?.len();
        Ok(TwinStream {
            method: StreamMethod::ReadWrite,
            input,
            output: BufWriter::new(output),
            input_len,
            offsi: 0,
            offso: 0,
            heap: Vec::new(),
            cursor: 0,
        })
    }

    pub fn input_len(&self) -> u64 {
        self.input_len
    }

    /// Absolute input offset of the window start.
    pub fn input_offset(&self) -> u64 {
        self.offsi + self.cursor as u64
    }

    /// Absolute output offset.
    pub fn output_offset(&self) -> u64 {
        self.offso
    }

    pub fn set_method(&mut self, method: StreamMethod) -> Result<()> {
        self.method = method;
        match method {
            StreamMethod::Reversed => {
                self.heap.clear();
                self.cursor = 0;
                self.offsi = self.input_len;
            }
            StreamMethod::ReadWrite => {
                // streaming starts over from the top of the file
                self.heap.clear();
                self.cursor = 0;
                self.offsi = 0;
                self.input.seek(SeekFrom::Start(0))?;
            }
            StreamMethod::RandomAccess => {}
        }
        Ok(())
    }

    /// Jump to an absolute input offset. Random access only.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.heap.clear();
        self.cursor = 0;
        self.offsi = position;
        self.input.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Move the window forward without writing anything.
    pub fn advance(&mut self, bytes: u64) -> Result<()> {
        self.consume(bytes, false)
    }

    /// Discard `bytes` bytes of input without writing them to the output.
    pub fn discard(&mut self, bytes: u64) -> Result<()> {
        self.consume(bytes, false)
    }

    /// Copy `bytes` bytes of input to the output file.
    pub fn pass_through(&mut self, bytes: u64) -> Result<()> {
        self.consume(bytes, true)
    }

    fn consume(&mut self, bytes: u64, write: bool) -> Result<()> {
        let avail = (self.heap.len() - self.cursor) as u64;
        let take = bytes.min(avail) as usize;
        if write && take > 0 {
            self.output.write_all(&self.heap[self.cursor..self.cursor + take])?;
            self.offso += take as u64;
        }
        self.cursor += take;

        let mut remaining = bytes - take as u64;
        if remaining == 0 {
            return Ok(());
        }

        // the region extends beyond the heap; stream it directly
        if write {
            let mut buf = [0u8; CHUNK];
            while remaining > 0 {
                let want = remaining.min(CHUNK as u64) as usize;
                let got = self.input.read(&mut buf[..want])?;
                if got == 0 {
                    warn!("input ended {remaining} bytes before the committed region did");
                    break;
                }
                self.output.write_all(&buf[..got])?;
                self.offso += got as u64;
                remaining -= got as u64;
            }
        } else {
            self.input.seek(SeekFrom::Current(remaining as i64))?;
            remaining = 0;
        }

        self.offsi = self.offsi + self.heap.len() as u64 + (bytes - avail - remaining);
        self.heap.clear();
        self.cursor = 0;
        Ok(())
    }

    /// Write bytes that did not come from the input.
    pub fn insert(&mut self, content: &[u8]) -> Result<()> {
        self.output.write_all(content)?;
        self.offso += content.len() as u64;
        Ok(())
    }

    /// Read `len` bytes at an arbitrary input position without disturbing
    /// the main window. Short reads happen at end of file.
    pub fn fetch_branch(&mut self, position: u64, len: usize) -> Result<Vec<u8>> {
        let start = self.offsi;
        let end = self.offsi + self.heap.len() as u64;
        if position >= start && position + len as u64 <= end {
            let from = (position - start) as usize;
            return Ok(self.heap[from..from + len].to_vec());
        }

        let main_pos = self.input.stream_position()?;
        self.input.seek(SeekFrom::Start(position))?;
        let mut buf = vec![0u8; len];
        let mut got = 0;
        while got < len {
            let n = self.input.read(&mut buf[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        buf.truncate(got);
        self.input.seek(SeekFrom::Start(main_pos))?;
        Ok(buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.output.flush()?;
        Ok(())
    }

    fn grow_forward(&mut self, req: usize) {
        // slide: drop committed bytes so the heap does not grow without
        // bound over large files
        if self.cursor > 0 {
            self.heap.drain(..self.cursor);
            self.offsi += self.cursor as u64;
            self.cursor = 0;
        }

        let want = req.max(CHUNK);
        let mut buf = vec![0u8; want];
        let mut got = 0;
        while got < want {
            match self.input.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(err) => {
                    warn!("input read failure: {err}");
                    break;
                }
            }
        }
        self.heap.extend_from_slice(&buf[..got]);
    }

    fn grow_reversed(&mut self) -> usize {
        if self.offsi == 0 {
            return 0;
        }
        let take = (CHUNK as u64).min(self.offsi) as usize;
        let from = self.offsi - take as u64;
        let mut buf = vec![0u8; take];
        if let Err(err) = self
            .input
            .seek(SeekFrom::Start(from))
            .and_then(|_| self.input.read_exact(&mut buf))
        {
            warn!("reversed read failure: {err}");
            return 0;
        }
        self.heap.splice(0..0, buf);
        self.offsi = from;
        take
    }
}

impl ScanSource for TwinStream {
    fn window(&self) -> &[u8] {
        &self.heap[self.cursor..]
    }

    fn grow(&mut self, req: usize) -> usize {
        match self.method {
            StreamMethod::Reversed => self.grow_reversed(),
            _ => {
                self.grow_forward(req);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn stream_over(content: &[u8]) -> (TwinStream, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("in.bin");
        let out_path = dir.path().join("out.bin");
        std::fs::File::create(&in_path)
            .unwrap()
            .write_all(content)
            .unwrap();
        let input = std::fs::File::open(&in_path).unwrap();
        let output = std::fs::File::create(&out_path).unwrap();
        (TwinStream::new(input, output).unwrap(), dir)
    }

    fn written(dir: &tempfile::TempDir) -> Vec<u8> {
        std::fs::read(dir.path().join("out.bin")).unwrap()
    }

    #[test]
    fn passthrough_discard_insert() {
        let (mut ts, dir) = stream_over(b"hello cruel world");
        ts.grow(0);
        ts.pass_through(6).unwrap();
        ts.discard(6).unwrap();
        ts.insert(b"kind ").unwrap();
        ts.pass_through(5).unwrap();
        ts.flush().unwrap();
        assert_eq!(written(&dir), b"hello kind world");
        assert_eq!(ts.output_offset(), 16);
        assert_eq!(ts.input_offset(), 17);
    }

    #[test]
    fn consume_past_window_streams_from_input() {
        let content: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        let (mut ts, dir) = stream_over(&content);
        ts.grow(0);
        assert!(ts.window().len() < content.len());
        ts.pass_through(content.len() as u64).unwrap();
        ts.flush().unwrap();
        assert_eq!(written(&dir), content);
    }

    #[test]
    fn fetch_branch_preserves_main_position() {
        let content: Vec<u8> = (0..10000u32).map(|i| (i % 251) as u8).collect();
        let (mut ts, dir) = stream_over(&content);
        ts.grow(0);
        let branch = ts.fetch_branch(9000, 100).unwrap();
        assert_eq!(branch, &content[9000..9100]);
        ts.pass_through(content.len() as u64).unwrap();
        ts.flush().unwrap();
        assert_eq!(written(&dir), content);
    }

    #[test]
    fn reversed_mode_grows_backwards() {
        let content: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
        let (mut ts, _dir) = stream_over(&content);
        ts.set_method(StreamMethod::Reversed).unwrap();
        let delta = ts.grow(0);
        assert_eq!(delta, CHUNK);
        assert_eq!(ts.window(), &content[9000 - CHUNK..]);
        let delta = ts.grow(0);
        assert_eq!(delta, CHUNK);
        assert_eq!(ts.window(), &content[9000 - 2 * CHUNK..]);
    }

    #[test]
    fn random_access_seek_and_advance() {
        let content: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        let (mut ts, _dir) = stream_over(&content);
        ts.set_method(StreamMethod::RandomAccess).unwrap();
        ts.seek(5000).unwrap();
        ts.grow(0);
        assert_eq!(ts.window()[0], content[5000]);
        ts.advance(100).unwrap();
        assert_eq!(ts.window()[0], content[5100]);
        assert_eq!(ts.input_offset(), 5100);
    }
}
