//! Free port ranges.

use std::fmt;

use crate::ports::{PortError, PortResult};

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;

/// Inclusive range of available ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

/// Sorted, disjoint set of available ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreePorts {
    available: Vec<PortRange>,
    min: u16,
    max: u16,
}

impl Default for FreePorts {
    fn default() -> Self {
        Self::new()
    }
}

impl FreePorts {
    pub fn new() -> Self {
        Self {
            available: vec![PortRange { start: MIN_PORT, end: MAX_PORT }],
            min: MIN_PORT,
            max: MAX_PORT,
        }
    }

    pub fn with_range(min: u16, max: u16) -> PortResult<Self> {
        if min > max {
            return Err(PortError::InvalidRange { min, max });
        }
        Ok(Self {
            available: vec![PortRange { start: min, end: max }],
            min,
            max,
        })
    }

    pub fn in_range(&self, port: u16) -> bool {
        self.min <= port && port <= self.max
    }

    pub fn is_free(&self, port: u16) -> bool {
        self.available.iter().any(|r| r.contains(port))
    }

    /// Take `port` out of the pool. Returns false if it was not free.
    pub fn mark_in_use(&mut self, port: u16) -> bool {
        let index = match self.available.iter().position(|r| r.contains(port)) {
            Some(index) => index,
            None => return false,
        };
        let range = self.available[index];
        if range.start == range.end {
            self.available.remove(index);
        } else if port == range.start {
            self.available[index].start = port + 1;
        } else if port == range.end {
            self.available[index].end = port - 1;
        } else {
            self.available[index].end = port - 1;
            self.available.insert(index + 1, PortRange { start: port + 1, end: range.end });
        }
        true
    }

    /// Take the lowest free port.
    pub fn next_free(&mut self) -> PortResult<u16> {
        let port = self
            .available
            .first()
            .map(|r| r.start)
            .ok_or(PortError::Exhausted)?;
        self.mark_in_use(port);
        Ok(port)
    }

    /// Put `port` back. Returns false if it was already free.
    pub fn release(&mut self, port: u16) -> PortResult<bool> {
        if !self.in_range(port) {
            return Err(PortError::OutOfRange { port, min: self.min, max: self.max });
        }
        if self.is_free(port) {
            return Ok(false);
        }
        let index = self
            .available
            .iter()
            .position(|r| r.start > port)
            .unwrap_or(self.available.len());

        let joins_previous = index > 0 && self.available[index - 1].end.checked_add(1) == Some(port);
        let joins_next = index < self.available.len() && port.checked_add(1) == Some(self.available[index].start);

        match (joins_previous, joins_next) {
            (true, true) => {
                self.available[index - 1].end = self.available[index].end;
                self.available.remove(index);
            }
            (true, false) => self.available[index - 1].end = port,
            (false, true) => self.available[index].start = port,
            (false, false) => self.available.insert(index, PortRange { start: port, end: port }),
        }
        Ok(true)
    }
}

impl fmt::Display for FreePorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranges: Vec<String> = self
            .available
            .iter()
            .map(|r| format!("({}-{})", r.start, r.end))
            .collect();
        write!(f, "[{}]", ranges.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_in_use_splits_ranges() {
        let mut ports = FreePorts::new();
        assert!(ports.mark_in_use(1027));
        assert_eq!(ports.to_string(), "[(1024-1026), (1028-65535)]");
        assert!(!ports.mark_in_use(1027));
        assert!(ports.mark_in_use(1024));
        assert!(ports.mark_in_use(65535));
        assert_eq!(ports.to_string(), "[(1025-1026), (1028-65534)]");
        assert!(!ports.mark_in_use(80));
    }

    #[test]
    fn test_next_free_takes_lowest() {
        let mut ports = FreePorts::new();
        ports.mark_in_use(1024);
        assert_eq!(ports.next_free().unwrap(), 1025);
        assert_eq!(ports.next_free().unwrap(), 1026);
    }

    #[test]
    fn test_release_merges_neighbours() {
        let mut ports = FreePorts::new();
        ports.mark_in_use(1025);
        ports.mark_in_use(1026);
        ports.mark_in_use(1027);
        assert!(ports.release(1026).unwrap());
        assert_eq!(ports.to_string(), "[(1024-1024), (1026-1026), (1028-65535)]");
        assert!(ports.release(1025).unwrap());
        assert!(ports.release(1027).unwrap());
        assert_eq!(ports, FreePorts::new());
        assert!(!ports.release(2000).unwrap());
        assert!(ports.release(80).is_err());
    }

    #[test]
    fn test_exhaustion() {
        let mut ports = FreePorts::with_range(2000, 2001).unwrap();
        assert_eq!(ports.next_free().unwrap(), 2000);
        assert_eq!(ports.next_free().unwrap(), 2001);
        assert!(matches!(ports.next_free(), Err(PortError::Exhausted)));
        assert_eq!(ports.to_string(), "[]");
        assert!(ports.release(2001).unwrap());
        assert_eq!(ports.next_free().unwrap(), 2001);
    }

    #[test]
    fn test_invalid_range() {
        assert!(FreePorts::with_range(10, 5).is_err());
    }
}
