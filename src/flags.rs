//! Feature-flag bitset stored in the archive header.

/// A 64-bit bitset of archive features. Unset bits omit their corresponding
/// on-disk fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitFlags(pub u64);

/// Store paths as absolute canonical paths.
pub const F_ABSOLUTE_PATHS: BitFlags = BitFlags(1 << 1);
/// Record unix permission bits per entry.
pub const F_PERMISSIONS: BitFlags = BitFlags(1 << 2);
/// Record modification times per entry.
pub const F_MOD_TIMES: BitFlags = BitFlags(1 << 3);
/// Prefix each regular file's payload with a digest of its contents.
pub const F_CHECKSUMS: BitFlags = BitFlags(1 << 4);
/// Store payload without compression.
pub const F_NO_COMPRESS: BitFlags = BitFlags(1 << 5);
/// Include entries whose name begins with a dot.
pub const F_INCLUDE_HIDDEN: BitFlags = BitFlags(1 << 6);
/// Record devices, fifos and sockets as zero-length entries.
pub const F_SPECIAL_FILES: BitFlags = BitFlags(1 << 7);
/// Reserved: per-block digests. Defined on the wire, not consumed by v2.
pub const F_BLOCK_CHECKSUMS: BitFlags = BitFlags(1 << 8);

const NAMES: &[(BitFlags, &str, char)] = &[
    (F_ABSOLUTE_PATHS, "Absolute Paths", 'a'),
    (F_PERMISSIONS, "Permissions", 'p'),
    (F_MOD_TIMES, "Modification Times", 'm'),
    (F_CHECKSUMS, "Checksums", 's'),
    (F_NO_COMPRESS, "No Compress", 'n'),
    (F_INCLUDE_HIDDEN, "Hidden Files", 'i'),
    (F_SPECIAL_FILES, "Special Files", 'o'),
    (F_BLOCK_CHECKSUMS, "Block Checksums", 'b'),
];

impl BitFlags {
    /// Sets the specified bit(s).
    pub fn set(&mut self, flag: BitFlags) {
        self.0 |= flag.0;
    }

    /// Unsets the specified bit(s).
    pub fn clear(&mut self, flag: BitFlags) {
        self.0 &= !flag.0;
    }

    /// Flips the specified bit(s).
    pub fn toggle(&mut self, flag: BitFlags) {
        self.0 ^= flag.0;
    }

    /// Checks if all of the specified bit(s) are set.
    pub fn is_set(self, flag: BitFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Checks if the specified bit(s) are not all set.
    pub fn is_not_set(self, flag: BitFlags) -> bool {
        !self.is_set(flag)
    }

    /// Human-readable names of every set flag.
    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(f, _, _)| self.is_set(*f))
            .map(|(_, name, _)| *name)
            .collect()
    }

    /// Compact single-letter rendering used in log lines, e.g. "apms".
    pub fn letters(self) -> String {
        NAMES
            .iter()
            .filter(|(f, _, _)| self.is_set(*f))
            .map(|(_, _, c)| *c)
            .collect()
    }
}

impl std::ops::BitOr for BitFlags {
    type Output = BitFlags;
    fn bitor(self, rhs: BitFlags) -> BitFlags {
        BitFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BitFlags {
    fn bitor_assign(&mut self, rhs: BitFlags) {
        self.0 |= rhs.0;
    }
}
