//! Where an encrypted or decrypted payload is headed.

/// Target of a payload encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionIntent {
    /// Upload to the sync server. Always encrypted.
    Sync,
    /// Local storage, encrypted when a key is available.
    LocalStoragePreferEncrypted,
    /// Local storage, always encrypted.
    LocalStorageEncrypted,
    /// Local storage in plaintext.
    LocalStorageDecrypted,
    /// Encrypted backup file.
    FileEncrypted,
    /// Plaintext backup file.
    FileDecrypted,
}

impl EncryptionIntent {
    /// True if the intent demands ciphertext.
    pub fn requires_encryption(&self) -> bool {
        matches!(
            self,
            EncryptionIntent::Sync | EncryptionIntent::LocalStorageEncrypted | EncryptionIntent::FileEncrypted
        )
    }

    /// True if the intent demands plaintext.
    pub fn is_decrypted(&self) -> bool {
        matches!(
            self,
            EncryptionIntent::LocalStorageDecrypted | EncryptionIntent::FileDecrypted
        )
    }

    /// True if the payload is headed for local storage.
    pub fn is_local_storage(&self) -> bool {
        matches!(
            self,
            EncryptionIntent::LocalStoragePreferEncrypted
                | EncryptionIntent::LocalStorageEncrypted
                | EncryptionIntent::LocalStorageDecrypted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(EncryptionIntent::Sync.requires_encryption());
        assert!(!EncryptionIntent::LocalStoragePreferEncrypted.requires_encryption());
        assert!(!EncryptionIntent::LocalStoragePreferEncrypted.is_decrypted());
        assert!(EncryptionIntent::FileDecrypted.is_decrypted());
        assert!(EncryptionIntent::LocalStorageDecrypted.is_local_storage());
        assert!(!EncryptionIntent::FileEncrypted.is_local_storage());
    }
}
