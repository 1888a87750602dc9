/*!
# Fixture reader

A fixture file holds one test vector per line:

```text
<hex digest> <input text>
```

The line splits on its first space, so the input may contain spaces of its
own. Blank lines are ignored. The reader is a single forward pass over the
file.
*/

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// One parsed test vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureLine {
    /// 1-based line number in the file.
    pub line_no: usize,
    /// Lowercase hex, `2 * digest_len` characters.
    pub expected_hex: String,
    pub input: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Malformed {
    #[error("no space between digest and input")]
    MissingSeparator,

    #[error("digest is not hex")]
    NotHex,

    #[error("digest has {actual} hex characters, expected {expected}")]
    DigestLength { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("line {line_no}: {reason}")]
    Malformed { line_no: usize, reason: Malformed },

    #[error("read failed after line {line_no}: {source}")]
    Io {
        line_no: usize,
        #[source]
        source: io::Error,
    },
}

pub struct FixtureReader<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    digest_len: usize,
    done: bool,
}

impl FixtureReader<BufReader<File>> {
    pub fn open(path: &Path, digest_len: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), digest_len))
    }
}

impl<R: BufRead> FixtureReader<R> {
    pub fn new(reader: R, digest_len: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
            digest_len,
            done: false,
        }
    }

    /// Physical lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for FixtureReader<R> {
    type Item = Result<FixtureLine, FixtureError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    let line = self.buf.trim_ascii();
                    if !line.is_empty() {
                        return Some(parse_line(self.line_no, line, self.digest_len));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    self.done = true;
                    return Some(Err(FixtureError::Io {
                        line_no: self.line_no,
                        source,
                    }));
                }
            }
        }
        None
    }
}

/// Parse one trimmed, non-empty line.
pub fn parse_line(
    line_no: usize,
    line: &[u8],
    digest_len: usize,
) -> Result<FixtureLine, FixtureError> {
    let malformed = |reason| FixtureError::Malformed { line_no, reason };

    let split = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| malformed(Malformed::MissingSeparator))?;
    let (digest, input) = (&line[..split], &line[split + 1..]);

    if !digest.iter().all(u8::is_ascii_hexdigit) {
        return Err(malformed(Malformed::NotHex));
    }
    if digest.len() != digest_len * 2 {
        return Err(malformed(Malformed::DigestLength {
            expected: digest_len * 2,
            actual: digest.len(),
        }));
    }

    let expected_hex = String::from_utf8_lossy(digest).to_ascii_lowercase();

    Ok(FixtureLine {
        line_no,
        expected_hex,
        input: input.to_vec(),
    })
}
