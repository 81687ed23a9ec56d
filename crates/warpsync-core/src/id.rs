//! Identity types for warpsync
//!
//! Subspace ids travel on the wire as non-negative 32-bit integers.
//! Connection ids never leave the server.

use std::fmt;

/// Subspace identity - allocated by the server, never reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubspaceId(pub u32);

impl SubspaceId {
    pub const ZERO: SubspaceId = SubspaceId(0);

    /// Largest id that still encodes as a non-negative `i32`
    pub const MAX: SubspaceId = SubspaceId(i32::MAX as u32);

    #[inline]
    pub fn new(id: u32) -> Self {
        SubspaceId(id)
    }

    /// Next id in allocation order; saturates at `MAX`
    #[inline]
    pub fn next(self) -> Self {
        SubspaceId(self.0.saturating_add(1).min(Self::MAX.0))
    }

    /// Wire representation (int32)
    #[inline]
    pub fn to_wire(self) -> i32 {
        i32::try_from(self.0).unwrap_or(i32::MAX)
    }

    /// Parse from the wire representation; negative ids are rejected
    #[inline]
    pub fn from_wire(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(SubspaceId)
    }
}

impl fmt::Debug for SubspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subspace({})", self.0)
    }
}

impl fmt::Display for SubspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-local connection identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    #[inline]
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subspace_id_wire_rejects_negative() {
        assert_eq!(SubspaceId::from_wire(7), Some(SubspaceId::new(7)));
        assert_eq!(SubspaceId::from_wire(-1), None);
        assert_eq!(SubspaceId::new(7).to_wire(), 7);
    }

    #[test]
    fn test_subspace_id_ordering() {
        assert!(SubspaceId::new(3) < SubspaceId::new(4));
        assert_eq!(SubspaceId::new(3).next(), SubspaceId::new(4));
    }

    #[test]
    fn test_allocation_stops_at_wire_limit() {
        assert_eq!(SubspaceId::MAX.next(), SubspaceId::MAX);
        assert_eq!(SubspaceId::new(u32::MAX).next(), SubspaceId::MAX);
        assert_eq!(SubspaceId::MAX.to_wire(), i32::MAX);
        assert_eq!(SubspaceId::new(u32::MAX).to_wire(), i32::MAX);
        assert_eq!(SubspaceId::from_wire(SubspaceId::MAX.to_wire()), Some(SubspaceId::MAX));
    }
}
