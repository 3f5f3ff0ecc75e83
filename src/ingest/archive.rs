//! Reading message archives: mbox files and Maildir directories.
//!
//! An mbox file is split on `From ` separator lines that start the file or
//! follow a blank line. `>From ` quoting (mboxrd) is undone, and the blank
//! line that precedes the next separator is not part of the message.
//!
//! A Maildir is read from its `cur/` and `new/` subdirectories, each in file
//! name order.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Iterator over the messages of an mbox stream.
pub struct MboxReader<R> {
    reader: R,
    at_boundary: bool,
    in_message: bool,
    finished: bool,
}

impl<R: BufRead> MboxReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            at_boundary: true,
            in_message: false,
            finished: false,
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}

/// Strip one `>` from a `>From ` (or `>>From `, ...) line.
fn unquote_from(line: &[u8]) -> &[u8] {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    if quotes > 0 && line[quotes..].starts_with(b"From ") {
        &line[1..]
    } else {
        line
    }
}

fn finish_message(mut message: Vec<u8>) -> Vec<u8> {
    if message.ends_with(b"\r\n\r\n") {
        message.truncate(message.len() - 2);
    } else if message.ends_with(b"\n\n") {
        message.truncate(message.len() - 1);
    }
    message
}

impl<R: BufRead> Iterator for MboxReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut message = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    self.finished = true;
                    if self.in_message {
                        self.in_message = false;
                        return Some(Ok(finish_message(message)));
                    }
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }

            let separator = self.at_boundary && line.starts_with(b"From ");
            self.at_boundary = is_blank(&line);

            if separator {
                if self.in_message {
                    return Some(Ok(finish_message(message)));
                }
                self.in_message = true;
                continue;
            }

            if self.in_message {
                message.extend_from_slice(unquote_from(&line));
            }
        }
    }
}

/// Open an mbox file for reading.
pub fn read_mbox(path: &Path) -> io::Result<MboxReader<BufReader<File>>> {
    Ok(MboxReader::new(BufReader::new(File::open(path)?)))
}

/// Message files of a Maildir, `cur/` before `new/`, each sorted by name.
pub fn maildir_messages(path: &Path) -> io::Result<Vec<PathBuf>> {
    let mut messages = Vec::new();

    for sub in ["cur", "new"] {
        let dir = path.join(sub);
        if !dir.is_dir() {
            continue;
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        messages.extend(entries);
    }

    Ok(messages)
}

/// Whether `path` looks like a Maildir rather than an mbox file.
pub fn is_maildir(path: &Path) -> bool {
    path.is_dir() && (path.join("cur").is_dir() || path.join("new").is_dir())
}

/// Every message in an archive, mbox or Maildir.
pub fn open_archive(path: &Path) -> io::Result<Box<dyn Iterator<Item = io::Result<Vec<u8>>>>> {
    if is_maildir(path) {
        let files = maildir_messages(path)?;
        Ok(Box::new(files.into_iter().map(fs::read)))
    } else if path.is_dir() {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a directory but not a Maildir", path.display()),
        ))
    } else {
        Ok(Box::new(read_mbox(path)?))
    }
}
