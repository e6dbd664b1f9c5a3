//! Lazy reads of located dump lines.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::Arc;

use super::{ActiveIndex, Location, ParsedLine, parse_line};
use crate::error::{CacheResult, MalformedDumpRecord};
use crate::models::Direction;

/// The edges touching one paper in one direction.
///
/// Holds only index locations. Each call to [`iter`](Self::iter) starts a
/// fresh pass that reads the located lines from the dump on demand.
pub struct EdgeLookup {
    index: Arc<ActiveIndex>,
    key: String,
    direction: Direction,
    locations: Vec<Location>,
}

impl EdgeLookup {
    pub(super) fn new(
        index: Arc<ActiveIndex>,
        key: &str,
        direction: Direction,
        locations: Vec<Location>,
    ) -> Self {
        Self { index, key: key.to_string(), direction, locations }
    }

    /// Number of located lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// True if the paper has no edges in this direction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Index version this lookup reads from.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.index.version
    }

    /// Direction of the lookup.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Iterate neighbor ids. The first error ends the pass.
    #[must_use]
    pub fn iter(&self) -> Neighbors<'_> {
        Neighbors { lookup: self, pos: 0, readers: HashMap::new(), line: Vec::new(), done: false }
    }

    /// Read every neighbor id.
    pub fn neighbors(&self) -> CacheResult<Vec<String>> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a EdgeLookup {
    type Item = CacheResult<String>;
    type IntoIter = Neighbors<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl std::fmt::Debug for EdgeLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeLookup")
            .field("key", &self.key)
            .field("direction", &self.direction)
            .field("version", &self.index.version)
            .field("located", &self.locations.len())
            .finish()
    }
}

/// One pass over an [`EdgeLookup`].
pub struct Neighbors<'a> {
    lookup: &'a EdgeLookup,
    pos: usize,
    readers: HashMap<u32, BufReader<File>>,
    line: Vec<u8>,
    done: bool,
}

impl Neighbors<'_> {
    fn read(&mut self, location: Location) -> CacheResult<String> {
        let lookup = self.lookup;
        let malformed = |reason: String| MalformedDumpRecord {
            shard: lookup.index.shards.get(location.shard as usize).cloned().unwrap_or_default(),
            offset: location.offset,
            line: None,
            reason,
        };

        let Some(shard) = lookup.index.shards.get(location.shard as usize) else {
            return Err(malformed(format!("unknown shard {}", location.shard)).into());
        };
        let reader = match self.readers.entry(location.shard) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(BufReader::new(File::open(shard)?)),
        };
        reader.seek(SeekFrom::Start(location.offset))?;
        self.line.clear();
        reader.read_until(b'\n', &mut self.line)?;

        let parsed = std::str::from_utf8(&self.line)
            .map_err(|e| format!("invalid UTF-8: {e}"))
            .and_then(parse_line);
        match parsed {
            Ok(ParsedLine::Edge { citing, cited }) => {
                let (indexed, neighbor) = match lookup.direction {
                    Direction::Citations => (cited, citing),
                    Direction::References => (citing, cited),
                };
                if indexed == lookup.key {
                    Ok(neighbor)
                } else {
                    Err(malformed(format!("line no longer references {}", lookup.key)).into())
                }
            }
            Ok(_) => Err(malformed("located line holds no edge".to_string()).into()),
            Err(reason) => Err(malformed(reason).into()),
        }
    }
}

impl Iterator for Neighbors<'_> {
    type Item = CacheResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let location = *self.lookup.locations.get(self.pos)?;
        self.pos += 1;

        let result = self.lookup.index.ensure_current().and_then(|()| self.read(location));
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        (0, Some(self.lookup.locations.len() - self.pos))
    }
}
