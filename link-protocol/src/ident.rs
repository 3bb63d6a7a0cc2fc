use core::fmt;

/// An 8-byte randomly chosen peer identifier, printable-ASCII in the
/// reference implementation but treated here as opaque bytes.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, bytemuck::Zeroable, bytemuck::Pod)]
#[repr(transparent)]
pub struct NodeId(pub [u8; 8]);

impl NodeId {
    pub const LEN: usize = 8;

    /// Printable ASCII range used by the reference implementation, [33, 126].
    pub fn random(mut rand_byte: impl FnMut() -> u8) -> Self {
        let mut bytes = [0u8; 8];
        for b in bytes.iter_mut() {
            *b = 33 + (rand_byte() % (126 - 33 + 1));
        }
        NodeId(bytes)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId(")?;
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The id of the node that founded a session. Distinct type from
/// [`NodeId`] for clarity at call sites even though the wire
/// representation is identical.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, bytemuck::Zeroable, bytemuck::Pod)]
#[repr(transparent)]
pub struct SessionId(pub NodeId);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({:?})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<NodeId> for SessionId {
    fn from(id: NodeId) -> Self {
        SessionId(id)
    }
}
