//! Sources and locations
//!
//! A `Location` is an opaque 32-bit value that identifies one byte in one
//! loaded file. The source table splits every file into 4 KiB chunks and
//! a location is `(chunk_index << 12) | chunk_offset`, so resolving a
//! location back to file, line, and text is a constant-time chunk lookup.
//! Locations stay valid for as long as the source table (and the zone
//! holding the file text) lives.

use crate::zone::Zone;
use std::fs;
use std::path::Path;

const CHUNK_BITS: u32 = 12;
const CHUNK_SIZE: u32 = 1 << CHUNK_BITS;
const INVALID: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location(u32);

impl Location {
    pub fn invalid() -> Location {
        Location(INVALID)
    }

    pub fn is_invalid(self) -> bool {
        self.0 == INVALID
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Offset the location forward within its file.
    pub fn offset(self, delta: u32) -> Location {
        if self.is_invalid() {
            return self;
        }
        Location(self.0 + delta)
    }
}

struct Chunk<'z> {
    path: &'z str,
    file: &'z str,
    /// Offset of this chunk's first byte within `file`.
    offset: u32,
}

pub struct Source<'z> {
    zone: &'z Zone,
    chunks: Vec<Chunk<'z>>,
}

impl<'z> Source<'z> {
    pub fn new(zone: &'z Zone) -> Source<'z> {
        Source {
            zone,
            chunks: Vec::new(),
        }
    }

    /// Load a file from disk; returns the location of its first byte, or
    /// an invalid location when the file cannot be read.
    pub fn load_file(&mut self, path: &Path) -> Location {
        let Ok(contents) = fs::read_to_string(path) else {
            return Location::invalid();
        };
        let path = self.zone.alloc_str(&path.to_string_lossy());
        self.load_from_buffer(path, &contents)
    }

    pub fn load_from_buffer(&mut self, path: &'z str, contents: &str) -> Location {
        let file = self.zone.alloc_str(contents);
        let location = Location((self.chunks.len() as u32) * CHUNK_SIZE);
        let mut offset = 0;
        loop {
            self.chunks.push(Chunk { path, file, offset });
            offset += CHUNK_SIZE;
            if offset as usize >= file.len() {
                break;
            }
        }
        location
    }

    fn chunk(&self, location: Location) -> Option<&Chunk<'z>> {
        if location.is_invalid() {
            return None;
        }
        self.chunks.get((location.raw() >> CHUNK_BITS) as usize)
    }

    /// The text starting at `location` and running to the end of its file.
    pub fn get_source(&self, location: Location) -> &'z str {
        match self.chunk(location) {
            Some(chunk) => {
                let at = chunk.offset + (location.raw() & (CHUNK_SIZE - 1));
                &chunk.file[at as usize..]
            }
            None => "",
        }
    }

    pub fn get_file_path(&self, location: Location) -> &'z str {
        match self.chunk(location) {
            Some(chunk) => chunk.path,
            None => "<invalid location>",
        }
    }

    /// The full line containing `location` plus the column (0-based).
    pub fn get_line(&self, location: Location) -> Option<(&'z str, usize)> {
        let chunk = self.chunk(location)?;
        let at = (chunk.offset + (location.raw() & (CHUNK_SIZE - 1))) as usize;
        let bytes = chunk.file.as_bytes();
        let mut start = at.min(bytes.len());
        while start > 0 && bytes[start - 1] != b'\n' && bytes[start - 1] != b'\r' {
            start -= 1;
        }
        let mut end = at.min(bytes.len());
        while end < bytes.len() && bytes[end] != b'\n' && bytes[end] != b'\r' {
            end += 1;
        }
        Some((&chunk.file[start..end], at - start))
    }

    /// 1-based line number of `location` within its file.
    pub fn get_line_number(&self, location: Location) -> Option<usize> {
        let chunk = self.chunk(location)?;
        let at = (chunk.offset + (location.raw() & (CHUNK_SIZE - 1))) as usize;
        let line = chunk.file.as_bytes()[..at.min(chunk.file.len())]
            .iter()
            .filter(|byte| **byte == b'\n')
            .count();
        Some(line + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_resolve_across_chunks() {
        let zone = Zone::new();
        let mut source = Source::new(&zone);
        let big = "x".repeat(5000) + "\nrest of it";
        let start = source.load_from_buffer("big.mica", &big);
        assert_eq!(source.get_file_path(start), "big.mica");
        let in_second_chunk = start.offset(5001);
        assert!(source.get_source(in_second_chunk).starts_with("rest"));
    }

    #[test]
    fn line_resolution() {
        let zone = Zone::new();
        let mut source = Source::new(&zone);
        let start = source.load_from_buffer("t.mica", "first\nsecond line\nthird");
        let at = start.offset(13);
        let (line, column) = source.get_line(at).unwrap();
        assert_eq!(line, "second line");
        assert_eq!(column, 7);
        assert_eq!(source.get_line_number(at), Some(2));
    }

    #[test]
    fn two_files_get_distinct_chunks() {
        let zone = Zone::new();
        let mut source = Source::new(&zone);
        let a = source.load_from_buffer("a.mica", "aaa");
        let b = source.load_from_buffer("b.mica", "bbb");
        assert_eq!(source.get_source(a), "aaa");
        assert_eq!(source.get_source(b), "bbb");
        assert_eq!(source.get_file_path(b), "b.mica");
    }

    #[test]
    fn invalid_location_is_harmless() {
        let zone = Zone::new();
        let source = Source::new(&zone);
        assert_eq!(source.get_source(Location::invalid()), "");
        assert_eq!(source.get_file_path(Location::invalid()), "<invalid location>");
        assert!(source.get_line(Location::invalid()).is_none());
    }
}
